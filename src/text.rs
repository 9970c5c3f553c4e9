//! Text processing for streamed assistant content
//!
//! Pure string functions: marker sanitization, chunk merging, and the
//! preview/detail renderings shown to the user.

mod merge;
mod render;
mod sanitize;


pub use merge::{merge, merge_with, MergeOptions, MAX_OVERLAP};
pub use render::{format_full, format_preview, PREVIEW_MAX_CHARS};
pub use sanitize::sanitize;
