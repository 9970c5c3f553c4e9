//! Marker stripping for streamed assistant text
//!
//! The upstream stream leaks knowledge-base footnotes and internal part
//! markers into the text. Chunk boundaries can cut any of them in half, so
//! this always runs over the whole accumulated buffer.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// `[^vercel_knowledge_base_1]`
    static ref KNOWLEDGE_MARKER: Regex =
        Regex::new(r"(?i)\[\^vercel_knowledge[^\]]*\]").expect("Invalid knowledge marker regex");
    /// `^vercel_knowledge_x` or a bare `vercel_knowledge-...` fragment
    static ref KNOWLEDGE_TOKEN: Regex =
        Regex::new(r"(?i)\^?vercel_knowledge[_\w-]*").expect("Invalid knowledge token regex");
    /// `[^vercel_knowle` cut off at the end of the buffer
    static ref KNOWLEDGE_DANGLING: Regex =
        Regex::new(r"(?i)\[\^vercel_knowledge[^\]]*$").expect("Invalid dangling knowledge regex");
    /// `[^1]: source text` on its own line
    static ref FOOTNOTE_DEFINITION: Regex =
        Regex::new(r"(?m)^[ \t]*\[\^[^\]]+\]:.*$").expect("Invalid footnote definition regex");
    /// `[^2]`, `[^some source]`
    static ref FOOTNOTE_REFERENCE: Regex =
        Regex::new(r"\[\^[^\]]*\]").expect("Invalid footnote reference regex");
    /// `[^` with no closing bracket before the end of the buffer
    static ref FOOTNOTE_DANGLING: Regex =
        Regex::new(r"\[\^[^\]]*$").expect("Invalid dangling footnote regex");
    /// `[[file:app/page.tsx]]`, `[[part:3]]`
    static ref PART_MARKER: Regex =
        Regex::new(r"\[\[(?:file|part):[^\]\n]*\]\]").expect("Invalid part marker regex");
    /// A line holding only a content-part label such as `[mdx-part]`
    static ref PART_LABEL: Regex =
        Regex::new(r"(?m)^[ \t]*\[(?:text|code|mdx|reasoning|task)-part\][ \t]*(?:\n|$)")
            .expect("Invalid part label regex");
}

/// Patterns in application order.
///
/// A truncated knowledge marker goes before the bare token sweep, which would
/// otherwise take `^vercel_knowledge_...` and strand the `[`. Footnote
/// definitions go before the generic reference sweep, otherwise the reference
/// pattern eats the `[^id]` and leaves the `: text` tail behind.
fn passes() -> [&'static Regex; 8] {
    [
        &KNOWLEDGE_MARKER,
        &KNOWLEDGE_DANGLING,
        &KNOWLEDGE_TOKEN,
        &FOOTNOTE_DEFINITION,
        &FOOTNOTE_REFERENCE,
        &FOOTNOTE_DANGLING,
        &PART_MARKER,
        &PART_LABEL,
    ]
}

/// Strip protocol markers and footnote artifacts.
///
/// Idempotent: removing one marker can join two fragments into a new one, so
/// the passes repeat until nothing changes. Every pass only deletes, which
/// bounds the loop by the input length.
pub fn sanitize(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = sanitize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn sanitize_once(text: &str) -> String {
    passes().iter().fold(text.to_string(), |acc, pattern| {
        pattern.replace_all(&acc, "").into_owned()
    })
}
