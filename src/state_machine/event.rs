//! Events that drive a session

use crate::error::StreamError;
use crate::wire::{ChatDetail, ChatSnapshot, StreamRequest};
use chrono::{DateTime, Utc};

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    StartChat(TurnSeed),
    FollowUp(TurnSeed),
    Cancel,
    /// An existing conversation was fetched for display
    Loaded { chat: ChatDetail },

    // Stream events
    Delta { text: String },
    Snapshot { chat: ChatSnapshot },
    Done,
    Error { cause: StreamError },

    // Settle step
    Settled { detail: ChatDetail },
    SettleFailed { cause: StreamError },
}

/// Everything needed to open a turn. Ids and the timestamp are minted by the
/// caller so transitions stay deterministic.
#[derive(Debug, Clone)]
pub struct TurnSeed {
    pub message: String,
    pub user_row_id: String,
    pub placeholder_id: String,
    pub at: DateTime<Utc>,
    pub request: StreamRequest,
}

impl TurnSeed {
    pub fn new(message: impl Into<String>, request: StreamRequest) -> Self {
        Self {
            message: message.into(),
            user_row_id: uuid::Uuid::new_v4().to_string(),
            placeholder_id: uuid::Uuid::new_v4().to_string(),
            at: Utc::now(),
            request,
        }
    }
}
