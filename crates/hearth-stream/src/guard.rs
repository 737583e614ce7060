//! Degenerate-output detection
//!
//! Small local models sometimes collapse into repetition (`####...`,
//! endless dots, the same token over and over). Callers feed the
//! accumulated text through [`looks_degenerate`] and, on a hit, abort the
//! stream and retry once with [`SamplingParams::safer`] parameters.
//!
//! [`SamplingParams::safer`]: crate::types::SamplingParams::safer

/// Returns true when the tail of the accumulated output looks like the
/// model has collapsed into repetition.
///
/// Only the last 400 chars are inspected: a long healthy response with a
/// rough patch early on is not penalized for it.
pub fn looks_degenerate(text: &str) -> bool {
    let tail: String = {
        let chars: Vec<char> = text.chars().collect();
        let start = chars.len().saturating_sub(400);
        chars[start..].iter().collect()
    };

    let compact: Vec<char> = tail.chars().filter(|c| !c.is_whitespace()).collect();
    if tail.chars().count() >= 60 {
        let mut uniq: Vec<char> = compact.clone();
        uniq.sort_unstable();
        uniq.dedup();
        if uniq.len() <= 3 {
            return true;
        }
    }

    has_run(&tail, '#', 3) || has_run(&tail, '?', 6) || has_run(&tail, '.', 6) || has_run(&tail, '—', 6)
}

fn has_run(text: &str, ch: char, min_len: usize) -> bool {
    let mut run = 0usize;
    for c in text.chars() {
        if c == ch {
            run += 1;
            if run >= min_len {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}
