//! Session state types

use crate::text::MergeOptions;
use crate::wire::{MessageSummary, Role, VersionSummary};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One row of the conversation as shown to the user.
///
/// `content` is always sanitized text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationRow {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ConversationRow {
    pub fn user(id: impl Into<String>, content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            content: content.into(),
            created_at,
        }
    }

    pub fn assistant(
        id: impl Into<String>,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            content: content.into(),
            created_at,
        }
    }

    /// Row from a server message. Missing timestamps sort as oldest.
    pub fn from_summary(message: &MessageSummary) -> Self {
        Self {
            id: message.id.clone(),
            role: message.role,
            content: crate::text::sanitize(&message.content),
            created_at: message.created_at.unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }
}

/// State of one conversation view.
///
/// `rows` are kept newest-first. While `streaming`, the row named by
/// `placeholder_id` is the assistant reply being received.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionState {
    /// Raw merged text of the active reply, before sanitization
    pub buffer: String,
    pub rows: Vec<ConversationRow>,
    pub streaming: bool,
    pub placeholder_id: Option<String>,
    pub chat_id: Option<String>,
    pub title: Option<String>,
    pub latest_version: Option<VersionSummary>,
    pub placeholder_created_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn row(&self, id: &str) -> Option<&ConversationRow> {
        self.rows.iter().find(|r| r.id == id)
    }

    pub fn placeholder(&self) -> Option<&ConversationRow> {
        self.placeholder_id.as_deref().and_then(|id| self.row(id))
    }

    pub fn placeholder_mut(&mut self) -> Option<&mut ConversationRow> {
        let id = self.placeholder_id.as_deref()?;
        self.rows.iter_mut().find(|r| r.id == id)
    }

    /// Content the previews render: the placeholder, else the newest
    /// assistant row
    pub fn active_content(&self) -> Option<&str> {
        self.placeholder()
            .or_else(|| self.rows.iter().find(|r| r.is_assistant()))
            .map(|r| r.content.as_str())
    }

    /// Newest user row
    pub fn latest_user_row(&self) -> Option<&ConversationRow> {
        self.rows.iter().find(|r| r.is_user())
    }
}

/// Static configuration for transitions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub merge: MergeOptions,
}

impl SessionContext {
    pub fn new(merge: MergeOptions) -> Self {
        Self { merge }
    }
}
