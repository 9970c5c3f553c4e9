//! v0 stream client
//!
//! Streams an assistant reply for a chat turn and keeps an ordered,
//! deduplicated conversation consistent while chunks, server snapshots,
//! and the canonical fetch arrive in any order.

pub mod config;
pub mod decoder;
pub mod error;
pub mod runtime;
pub mod state_machine;
pub mod text;
pub mod view;
pub mod wire;

pub use config::ClientConfig;
pub use decoder::{EventMarkers, EventStream, StreamDecoder, StreamEvent};
pub use error::{StreamError, StreamErrorKind};
pub use runtime::{
    CancelHandle, ChatFetcher, HttpClient, HttpSession, RequestOptions, SessionUpdate,
    StreamSession, StreamTransport,
};
pub use state_machine::{ConversationRow, SessionContext, SessionState};
pub use view::SessionView;
