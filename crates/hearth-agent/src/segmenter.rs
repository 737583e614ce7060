//! Response segmentation
//!
//! Splits a raw assistant response into reasoning, an optional tool command,
//! and the visible content. Parsing is total: any input yields a result, and
//! re-parsing the extracted content is a no-op.

use std::sync::LazyLock;

use regex::Regex;

static THINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think>(.*?)(?:</think>|$)").unwrap());
static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[-*\d.)]\s+").unwrap());
static LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:Reasoning|Action|Command|Thinking):\s*").unwrap());
static TOOL_USED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^TOOL USED[:-]?\s*").unwrap());

/// The configured vocabulary of tool command prefixes.
///
/// Entries are stored without the leading slash and may be multi-word
/// ("save to memory"). Unknown slash text is never a command.
#[derive(Debug, Clone)]
pub struct CommandRoster {
    commands: Vec<String>,
}

impl Default for CommandRoster {
    fn default() -> Self {
        Self::new([
            "search",
            "canvas",
            "python",
            "save to memory",
            "embed file",
            "export memory",
            "delete from memory",
            "read knowledge",
            "google",
            "mcp",
            "generate",
            "deepresearch",
            "curl",
            "webscrape",
        ])
    }
}

impl CommandRoster {
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            commands: commands
                .into_iter()
                .map(|c| c.into().trim_start_matches('/').to_string())
                .collect(),
        }
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Check a `/command ...` candidate against the roster.
    ///
    /// Matching is case-insensitive and requires a word boundary after the
    /// command name, so `/searching` does not match `search`.
    pub fn matches(&self, candidate: &str) -> bool {
        let Some(rest) = candidate.strip_prefix('/') else {
            return false;
        };
        self.commands.iter().any(|cmd| {
            let Some(head) = rest.get(..cmd.len()) else {
                return false;
            };
            if !head.eq_ignore_ascii_case(cmd) {
                return false;
            }
            match rest[cmd.len()..].chars().next() {
                None => true,
                Some(next) => !next.is_alphanumeric() && next != '_',
            }
        })
    }
}

/// A segmented assistant response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    /// Extracted reasoning text, without the tags
    pub thinking: Option<String>,
    /// The tool command to run, if one was detected
    pub tool_command: Option<String>,
    /// Visible content with reasoning and command removed
    pub content: String,
    /// The unmodified input
    pub raw: String,
}

impl ParsedResponse {
    pub fn empty() -> Self {
        Self {
            thinking: None,
            tool_command: None,
            content: String::new(),
            raw: String::new(),
        }
    }
}

/// Segment a raw response.
///
/// A `<think>...</think>` pair (or an unclosed opener while streaming) becomes
/// the thinking span. The remaining content is scanned line by line for a
/// roster command, tolerating bullets, numbering, and `Reasoning:`-style
/// labels; when several lines match, the last one wins because models that
/// narrate first and act second put the real command at the end.
pub fn parse_response(raw: &str, roster: &CommandRoster) -> ParsedResponse {
    let mut thinking = None;
    let mut content = raw.to_string();

    if let Some(captures) = THINK_RE.captures(raw) {
        let span = captures.get(0).map(|m| m.as_str()).unwrap_or_default();
        let inner = captures.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        if !inner.is_empty() {
            thinking = Some(inner.to_string());
        }
        content = content.replacen(span, "", 1).trim().to_string();
    }

    let mut found: Option<(usize, String)> = None;
    for (index, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        let without_bullet = BULLET_RE.replace(trimmed, "");
        let without_label = LABEL_RE.replace(&without_bullet, "");
        let clean = TOOL_USED_RE.replace(&without_label, "");

        let Some(slash) = clean.find('/') else {
            continue;
        };
        let candidate = clean[slash..].trim();
        if roster.matches(candidate) {
            let command = candidate
                .trim_end_matches(['\'', '"', '`'])
                .trim()
                .to_string();
            found = Some((index, command));
        }
    }

    let tool_command = match found {
        Some((index, command)) => {
            content = content
                .lines()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, l)| l)
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string();
            Some(command)
        }
        None => None,
    };

    ParsedResponse {
        thinking,
        tool_command,
        content,
        raw: raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> ParsedResponse {
        parse_response(raw, &CommandRoster::default())
    }

    #[test]
    fn test_empty_input() {
        let parsed = parse("");
        assert_eq!(parsed.thinking, None);
        assert_eq!(parsed.tool_command, None);
        assert_eq!(parsed.content, "");
    }

    #[test]
    fn test_plain_content_passes_through() {
        let parsed = parse("The capital of France is Paris.");
        assert_eq!(parsed.content, "The capital of France is Paris.");
        assert_eq!(parsed.tool_command, None);
        assert_eq!(parsed.thinking, None);
    }

    #[test]
    fn test_closed_think_extracted() {
        let parsed = parse("<think>need to check the weather</think>\nSure, one moment.");
        assert_eq!(parsed.thinking.as_deref(), Some("need to check the weather"));
        assert_eq!(parsed.content, "Sure, one moment.");
    }

    #[test]
    fn test_unclosed_think_during_stream() {
        let parsed = parse("<think>still reaso");
        assert_eq!(parsed.thinking.as_deref(), Some("still reaso"));
        assert_eq!(parsed.content, "");
    }

    #[test]
    fn test_command_detected_and_removed() {
        let parsed = parse("Let me look that up.\n/search rust borrow checker");
        assert_eq!(
            parsed.tool_command.as_deref(),
            Some("/search rust borrow checker")
        );
        assert_eq!(parsed.content, "Let me look that up.");
    }

    #[test]
    fn test_last_command_wins() {
        let parsed = parse("/search first attempt\nsome narration\n/search second attempt");
        assert_eq!(parsed.tool_command.as_deref(), Some("/search second attempt"));
        assert!(parsed.content.contains("/search first attempt"));
    }

    #[test]
    fn test_bullet_and_label_normalization() {
        let parsed = parse("- Action: /python print(1)");
        assert_eq!(parsed.tool_command.as_deref(), Some("/python print(1)"));

        let parsed = parse("TOOL USED: /curl https://example.com");
        assert_eq!(
            parsed.tool_command.as_deref(),
            Some("/curl https://example.com")
        );
    }

    #[test]
    fn test_indented_command_detected() {
        let parsed = parse("   /search indented query");
        assert_eq!(parsed.tool_command.as_deref(), Some("/search indented query"));
    }

    #[test]
    fn test_unknown_slash_is_not_a_command() {
        let parsed = parse("Try the file at /usr/local/bin/tool");
        assert_eq!(parsed.tool_command, None);
        assert_eq!(parsed.content, "Try the file at /usr/local/bin/tool");
    }

    #[test]
    fn test_prefix_requires_word_boundary() {
        let parsed = parse("/searching for answers");
        assert_eq!(parsed.tool_command, None);
    }

    #[test]
    fn test_multi_word_command() {
        let parsed = parse("/save to memory the user's birthday is June 3");
        assert!(
            parsed
                .tool_command
                .as_deref()
                .is_some_and(|c| c.starts_with("/save to memory"))
        );
    }

    #[test]
    fn test_trailing_quotes_stripped() {
        let parsed = parse("/search \"weather in Oslo\"\u{60}");
        assert_eq!(
            parsed.tool_command.as_deref(),
            Some("/search \"weather in Oslo")
        );
    }

    #[test]
    fn test_idempotent_on_extracted_content() {
        let first = parse("<think>plan</think>\nHere is my answer.\n/search something");
        let second = parse(&first.content);
        assert_eq!(second.content, first.content);
        assert_eq!(second.thinking, None);
        assert_eq!(second.tool_command, None);
    }

    #[test]
    fn test_case_insensitive_think_and_command() {
        let parsed = parse("<THINK>loud</THINK>\n/SEARCH shouting");
        assert_eq!(parsed.thinking.as_deref(), Some("loud"));
        assert_eq!(parsed.tool_command.as_deref(), Some("/SEARCH shouting"));
    }
}
