//! Presentation boundary
//!
//! What a list/detail UI renders after every update.

use crate::state_machine::{ConversationRow, SessionState};
use crate::text::{format_full, format_preview};
use crate::wire::VersionSummary;
use serde::Serialize;

pub const STREAMING_PREVIEW: &str = "Streaming...";
pub const READY_PREVIEW: &str = "Ready";
pub const WAITING_DETAIL: &str = "_Waiting for response…_";

/// Snapshot of the session for rendering
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    /// Newest-first
    pub rows: Vec<ConversationRow>,
    pub streaming: bool,
    pub chat_id: Option<String>,
    pub title: Option<String>,
    pub latest_version: Option<VersionSummary>,
    /// One-line rendering of the active reply
    pub preview: String,
    /// Long rendering of the active reply
    pub detail: String,
}

impl SessionView {
    pub fn from_state(state: &SessionState) -> Self {
        let content = state.active_content().unwrap_or_default();
        let preview = match format_preview(content) {
            p if !p.is_empty() => p,
            _ if state.streaming => STREAMING_PREVIEW.to_string(),
            _ => READY_PREVIEW.to_string(),
        };
        let detail = match format_full(content) {
            d if !d.is_empty() => d,
            _ => WAITING_DETAIL.to_string(),
        };

        Self {
            rows: state.rows.clone(),
            streaming: state.streaming,
            chat_id: state.chat_id.clone(),
            title: state.title.clone(),
            latest_version: state.latest_version.clone(),
            preview,
            detail,
        }
    }
}

impl From<&SessionState> for SessionView {
    fn from(state: &SessionState) -> Self {
        Self::from_state(state)
    }
}
