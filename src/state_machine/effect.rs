//! Effects produced by state transitions

use crate::error::StreamError;
use crate::wire::StreamRequest;

/// Effects to be executed after a state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open the transport and start pumping events
    OpenStream { request: StreamRequest },

    /// Best-effort fetch of the canonical conversation
    FetchCanonical { chat_id: String },

    /// Publish the current view
    NotifyView,

    /// Surface a stream failure
    ReportError { cause: StreamError },

    /// Cancel the running stream
    AbortStream,
}

impl Effect {
    pub fn open_stream(request: StreamRequest) -> Self {
        Effect::OpenStream { request }
    }

    pub fn fetch_canonical(chat_id: impl Into<String>) -> Self {
        Effect::FetchCanonical {
            chat_id: chat_id.into(),
        }
    }
}
