//! Token estimation and context clamping

use crate::turn::ConversationTurn;

/// Rough token count: one token per four characters, rounded up.
///
/// Good enough for budgeting context; exact counts would require the model's
/// tokenizer.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Clamp turns to a token budget, newest first.
///
/// Walks backwards accumulating estimated tokens and drops the oldest turns
/// that no longer fit. The newest turn is always kept even when it alone
/// exceeds the budget. A budget of zero disables clamping.
pub fn clamp_to_token_budget(turns: &[ConversationTurn], max_tokens: usize) -> Vec<ConversationTurn> {
    if max_tokens == 0 {
        return turns.to_vec();
    }

    let mut kept: Vec<ConversationTurn> = Vec::new();
    let mut total = 0usize;

    for turn in turns.iter().rev() {
        let tokens = estimate_tokens(&turn.content);
        if !kept.is_empty() && total + tokens > max_tokens {
            break;
        }
        total += tokens;
        kept.push(turn.clone());
        if total >= max_tokens {
            break;
        }
    }

    if kept.is_empty() {
        if let Some(newest) = turns.last() {
            return vec![newest.clone()];
        }
    }

    kept.reverse();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(content: &str) -> ConversationTurn {
        ConversationTurn::user(content)
    }

    #[test]
    fn test_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_clamp_keeps_newest_first() {
        let turns = vec![turn(&"a".repeat(40)), turn(&"b".repeat(40)), turn("c")];
        // 40 chars = 10 tokens each, budget fits the newest two.
        let kept = clamp_to_token_budget(&turns, 12);
        assert_eq!(kept.len(), 2);
        assert!(kept[0].content.starts_with('b'));
        assert_eq!(kept[1].content, "c");
    }

    #[test]
    fn test_clamp_always_keeps_newest() {
        let turns = vec![turn("old"), turn(&"x".repeat(400))];
        let kept = clamp_to_token_budget(&turns, 10);
        assert_eq!(kept.len(), 1);
        assert!(kept[0].content.starts_with('x'));
    }

    #[test]
    fn test_zero_budget_disables_clamping() {
        let turns = vec![turn("one"), turn("two"), turn("three")];
        assert_eq!(clamp_to_token_budget(&turns, 0).len(), 3);
    }

    #[test]
    fn test_empty_input() {
        assert!(clamp_to_token_budget(&[], 100).is_empty());
    }
}
