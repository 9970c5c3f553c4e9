//! Short and long renderings of assistant content for the presentation layer

use super::sanitize;
use lazy_static::lazy_static;
use regex::Regex;

/// Preview length in characters before the ellipsis
pub const PREVIEW_MAX_CHARS: usize = 100;

const ELLIPSIS: &str = "...";

lazy_static! {
    static ref THINKING_OPEN: Regex = Regex::new(r"<Thinking>").expect("Invalid thinking regex");
    static ref THINKING_CLOSE: Regex = Regex::new(r"</Thinking>").expect("Invalid thinking regex");
    static ref CODE_PROJECT: Regex =
        Regex::new(r"(?s)<CodeProject[^>]*>.*?</CodeProject>").expect("Invalid code project regex");
    static ref ACTIONS: Regex = Regex::new(r"(?s)<Actions>.*?</Actions>").expect("Invalid actions regex");
    static ref TASK_ACTIVE: Regex = Regex::new(
        r#"(?s)<V0LaunchTasks>.*?<V0Task[^>]*taskNameActive="([^"]*)"[^>]*?/>.*?</V0LaunchTasks>"#
    )
    .expect("Invalid active task regex");
    static ref TASK_COMPLETE: Regex = Regex::new(
        r#"(?s)<V0LaunchTasks>.*?<V0Task[^>]*taskNameComplete="([^"]*)"[^>]*?/>.*?</V0LaunchTasks>"#
    )
    .expect("Invalid completed task regex");
    static ref LAUNCH_TASKS: Regex =
        Regex::new(r"(?s)<V0LaunchTasks>.*?</V0LaunchTasks>").expect("Invalid launch tasks regex");
}

/// Long form for the detail pane
pub fn format_full(content: &str) -> String {
    let text = THINKING_OPEN.replace_all(content, "🧠\n");
    let text = THINKING_CLOSE.replace_all(&text, "\n\n");
    let text = strip_blocks(&text, "\n");
    text.trim().to_string()
}

/// Single-line preview, truncated to [`PREVIEW_MAX_CHARS`]
pub fn format_preview(content: &str) -> String {
    let text = THINKING_OPEN.replace_all(content, "");
    let text = THINKING_CLOSE.replace_all(&text, " ");
    let text = strip_blocks(&text, " ").replace('\n', " ");
    let text = sanitize(&text);

    if text.chars().count() <= PREVIEW_MAX_CHARS {
        return text.trim().to_string();
    }
    let truncated: String = text.chars().take(PREVIEW_MAX_CHARS).collect();
    format!("{}{ELLIPSIS}", truncated.trim())
}

/// Drop code projects and action blocks, summarise launch tasks
fn strip_blocks(text: &str, task_suffix: &str) -> String {
    let text = CODE_PROJECT.replace_all(text, "");
    let text = ACTIONS.replace_all(&text, "");
    let text = TASK_ACTIVE.replace_all(&text, format!("**v0 is working on:** $1{task_suffix}"));
    let text = TASK_COMPLETE.replace_all(&text, format!("**v0 has completed:** $1{task_suffix}"));
    LAUNCH_TASKS.replace_all(&text, "").into_owned()
}
