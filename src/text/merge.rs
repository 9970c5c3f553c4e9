//! Chunk merging with boundary de-duplication

/// Longest head/tail overlap that is checked, in characters
pub const MAX_OVERLAP: usize = 20;

/// Tunables for [`merge_with`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Insert a space when an alphanumeric tail meets an alphanumeric head.
    ///
    /// Off by default: token streams split words mid-way ("wor" + "ld") far
    /// more often than they drop the space between two words.
    pub separate_words: bool,
}

/// Append `incoming` to `existing`, dropping a re-sent overlap.
pub fn merge(existing: &str, incoming: &str) -> String {
    merge_with(existing, incoming, MergeOptions::default())
}

/// Append `incoming` to `existing`.
///
/// The largest `k <= MAX_OVERLAP` for which the last `k` characters of
/// `existing` equal the first `k` characters of `incoming` is trimmed from
/// `incoming` first. `existing` is always a prefix of the result.
pub fn merge_with(existing: &str, incoming: &str, options: MergeOptions) -> String {
    if incoming.is_empty() {
        return existing.to_string();
    }

    let overlap = overlap_len(existing, incoming);
    let mut remainder = incoming.chars().skip(overlap).peekable();

    let mut merged = String::with_capacity(existing.len() + incoming.len() + 1);
    merged.push_str(existing);

    if options.separate_words && overlap == 0 {
        let tail_is_word = existing.chars().next_back().is_some_and(char::is_alphanumeric);
        let head_is_word = remainder.peek().is_some_and(|c| c.is_alphanumeric());
        if tail_is_word && head_is_word {
            merged.push(' ');
        }
    }

    merged.extend(remainder);
    merged
}

/// Greedy longest overlap between the tail of `existing` and the head of
/// `incoming`, counted in characters.
fn overlap_len(existing: &str, incoming: &str) -> usize {
    let mut tail: Vec<char> = existing.chars().rev().take(MAX_OVERLAP).collect();
    tail.reverse();
    let head: Vec<char> = incoming.chars().take(MAX_OVERLAP).collect();

    let max = tail.len().min(head.len());
    (1..=max)
        .rev()
        .find(|&k| tail[tail.len() - k..] == head[..k])
        .unwrap_or(0)
}
