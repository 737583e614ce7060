//! Incremental tool-call aggregation
//!
//! Providers stream tool calls as fragments: an index, sometimes an id or
//! function name, and argument text in pieces. [`merge_fragments`] folds a
//! batch of fragments into the aggregated call list; [`BatchTracker`] manages
//! the index offset that keeps successive tool-call waves within one turn
//! from colliding.

use crate::types::{StreamDelta, ToolCall, ToolCallFragment};

/// Merge a batch of fragments into an existing aggregated call list.
///
/// Pure: `existing` is not mutated. Each fragment resolves its position as
/// `index + index_offset`, or appends at the end when it carries no index.
/// The result grows with empty placeholders as needed; `id` and
/// `function_name` overwrite when present; `arguments_chunk` always
/// concatenates, never overwrites.
pub fn merge_fragments(
    existing: &[ToolCall],
    fragments: &[ToolCallFragment],
    index_offset: usize,
) -> Vec<ToolCall> {
    let mut result = existing.to_vec();

    for fragment in fragments {
        let index = match fragment.index {
            Some(i) => i + index_offset,
            None => result.len(),
        };

        while result.len() <= index {
            result.push(ToolCall::default());
        }

        let target = &mut result[index];
        if let Some(ref id) = fragment.id {
            target.id = Some(id.clone());
        }
        if let Some(ref name) = fragment.function_name {
            target.function_name = name.clone();
        }
        if let Some(ref chunk) = fragment.arguments_chunk {
            target.arguments.push_str(chunk);
        }
    }

    result
}

/// Tracks tool-call aggregation across a streamed turn.
///
/// The offset starts at 0 and advances to the aggregated length whenever
/// content or reasoning resumes after an open batch of fragments, so a
/// second wave of tool calls re-using provider indices 0..n lands after the
/// first wave instead of on top of it.
#[derive(Debug, Default)]
pub struct BatchTracker {
    calls: Vec<ToolCall>,
    index_offset: usize,
    open_batch: bool,
}

impl BatchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one decoded delta. Content or reasoning closes any open batch
    /// before fragments (if present) are merged.
    pub fn apply(&mut self, delta: &StreamDelta) {
        if delta.content.is_some() || delta.reasoning.is_some() {
            self.finalize_batch();
        }
        if !delta.tool_calls.is_empty() {
            self.calls = merge_fragments(&self.calls, &delta.tool_calls, self.index_offset);
            self.open_batch = true;
        }
    }

    /// Close the current batch, advancing the offset past aggregated calls.
    pub fn finalize_batch(&mut self) {
        if self.open_batch {
            self.index_offset = self.calls.len();
            self.open_batch = false;
        }
    }

    /// Aggregated calls so far
    pub fn calls(&self) -> &[ToolCall] {
        &self.calls
    }

    /// Consume the tracker, finalizing and returning complete calls only.
    pub fn into_calls(mut self) -> Vec<ToolCall> {
        self.finalize_batch();
        self.calls.retain(|c| c.is_complete());
        self.calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(
        index: Option<usize>,
        id: Option<&str>,
        name: Option<&str>,
        args: Option<&str>,
    ) -> ToolCallFragment {
        ToolCallFragment {
            index,
            id: id.map(str::to_string),
            function_name: name.map(str::to_string),
            arguments_chunk: args.map(str::to_string),
        }
    }

    #[test]
    fn test_merge_builds_call_from_fragments() {
        let step1 = merge_fragments(
            &[],
            &[fragment(Some(0), Some("call_1"), Some("search"), Some("{\"q\":"))],
            0,
        );
        let step2 = merge_fragments(&step1, &[fragment(Some(0), None, None, Some("\"rust\"}"))], 0);

        assert_eq!(step2.len(), 1);
        assert_eq!(step2[0].id.as_deref(), Some("call_1"));
        assert_eq!(step2[0].function_name, "search");
        assert_eq!(step2[0].arguments, "{\"q\":\"rust\"}");
    }

    #[test]
    fn test_merge_is_pure() {
        let existing = vec![ToolCall {
            id: Some("a".into()),
            function_name: "f".into(),
            arguments: "x".into(),
        }];
        let _ = merge_fragments(&existing, &[fragment(Some(0), None, None, Some("y"))], 0);
        assert_eq!(existing[0].arguments, "x");
    }

    #[test]
    fn test_merge_idempotent_with_empty_fragments() {
        let existing = merge_fragments(&[], &[fragment(Some(0), None, Some("f"), Some("a"))], 0);
        let again = merge_fragments(&existing, &[], 0);
        assert_eq!(existing, again);
    }

    #[test]
    fn test_merge_grows_placeholders() {
        let result = merge_fragments(&[], &[fragment(Some(2), None, Some("late"), None)], 0);
        assert_eq!(result.len(), 3);
        assert!(!result[0].is_complete());
        assert!(!result[1].is_complete());
        assert_eq!(result[2].function_name, "late");
    }

    #[test]
    fn test_merge_no_index_appends() {
        let existing = merge_fragments(&[], &[fragment(Some(0), None, Some("a"), None)], 0);
        let result = merge_fragments(&existing, &[fragment(None, None, Some("b"), None)], 0);
        assert_eq!(result.len(), 2);
        assert_eq!(result[1].function_name, "b");
    }

    #[test]
    fn test_index_offset_isolation() {
        // First wave at offset 0.
        let wave1 = merge_fragments(
            &[],
            &[
                fragment(Some(0), Some("c1"), Some("read"), Some("{\"p\":1}")),
                fragment(Some(1), Some("c2"), Some("write"), Some("{\"p\":2}")),
            ],
            0,
        );
        // Second wave re-uses provider indices 0..1; the offset keeps it clear
        // of the first wave.
        let wave2 = merge_fragments(
            &wave1,
            &[fragment(Some(0), Some("c3"), Some("grep"), Some("{\"p\":3}"))],
            wave1.len(),
        );

        assert_eq!(wave2.len(), 3);
        assert_eq!(wave2[0].id.as_deref(), Some("c1"));
        assert_eq!(wave2[0].arguments, "{\"p\":1}");
        assert_eq!(wave2[1].id.as_deref(), Some("c2"));
        assert_eq!(wave2[2].id.as_deref(), Some("c3"));
    }

    #[test]
    fn test_tracker_advances_offset_on_content() {
        let mut tracker = BatchTracker::new();

        tracker.apply(&StreamDelta {
            tool_calls: vec![fragment(Some(0), Some("c1"), Some("first"), Some("{}"))],
            ..Default::default()
        });
        // Non-tool content closes the batch.
        tracker.apply(&StreamDelta {
            content: Some("thinking out loud".into()),
            ..Default::default()
        });
        // Second wave re-uses index 0.
        tracker.apply(&StreamDelta {
            tool_calls: vec![fragment(Some(0), Some("c2"), Some("second"), Some("{}"))],
            ..Default::default()
        });

        let calls = tracker.into_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function_name, "first");
        assert_eq!(calls[1].function_name, "second");
    }

    #[test]
    fn test_tracker_no_advance_without_open_batch() {
        let mut tracker = BatchTracker::new();
        tracker.apply(&StreamDelta {
            content: Some("preamble".into()),
            ..Default::default()
        });
        tracker.apply(&StreamDelta {
            tool_calls: vec![fragment(Some(0), Some("c1"), Some("only"), Some("{}"))],
            ..Default::default()
        });
        let calls = tracker.into_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function_name, "only");
    }

    #[test]
    fn test_into_calls_drops_incomplete_placeholders() {
        let mut tracker = BatchTracker::new();
        tracker.apply(&StreamDelta {
            tool_calls: vec![fragment(Some(1), Some("c1"), Some("real"), Some("{}"))],
            ..Default::default()
        });
        let calls = tracker.into_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function_name, "real");
    }
}
