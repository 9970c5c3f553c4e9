//! Runtime for streaming sessions
//!
//! Executes the effects of the state machine: opens transports, pumps their
//! events back into the session, runs the settle fetch, and publishes views.

mod http;
mod session;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use http::{HttpClient, RequestOptions};
pub use session::{CancelHandle, EventSink, StreamSession};
pub use traits::*;

use crate::view::SessionView;

/// Type alias for the production session
pub type HttpSession = StreamSession<HttpClient, HttpClient>;

/// Updates published to the presentation layer
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    View(SessionView),
    Error { message: String },
}
