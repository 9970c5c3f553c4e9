//! Stream error types

use thiserror::Error;

/// Transport or fetch failure with classification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StreamError {
    pub kind: StreamErrorKind,
    pub message: String,
}

impl StreamError {
    pub fn new(kind: StreamErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(StreamErrorKind::Network, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(StreamErrorKind::Protocol, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(StreamErrorKind::Unknown, message)
    }

    /// Classify a non-success HTTP response
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => StreamErrorKind::Auth,
            429 => StreamErrorKind::RateLimit,
            400..=499 => StreamErrorKind::InvalidRequest,
            500..=599 => StreamErrorKind::ServerError,
            _ => StreamErrorKind::Unknown,
        };
        let body = body.trim();
        let message = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {body}")
        };
        Self::new(kind, message)
    }
}

/// Error classification
///
/// The engine never retries on its own; `is_retryable` is for callers that
/// wrap the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorKind {
    /// Connection failures, timeouts, or the body stream breaking mid-read
    Network,
    /// Authentication failed (401, 403)
    Auth,
    /// Rate limited (429)
    RateLimit,
    /// Server error (5xx)
    ServerError,
    /// Bad request (other 4xx)
    InvalidRequest,
    /// The server reported an error frame or sent an unreadable body
    Protocol,
    Unknown,
}

impl StreamErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::RateLimit | Self::ServerError)
    }
}
