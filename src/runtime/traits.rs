//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the session with mock implementations.

use crate::error::StreamError;
use crate::wire::{ChatDetail, StreamRequest};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::io;
use std::sync::Arc;

/// Raw response body of a stream
pub type ByteStream = BoxStream<'static, Result<Bytes, io::Error>>;

/// Opens the streaming connection for one turn
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Send the request and hand back the body. Fails before any byte is
    /// read if the server refuses the request.
    async fn open(&self, request: &StreamRequest) -> Result<ByteStream, StreamError>;
}

/// Fetches the canonical conversation
#[async_trait]
pub trait ChatFetcher: Send + Sync {
    async fn fetch_chat(&self, chat_id: &str) -> Result<ChatDetail, StreamError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: StreamTransport + ?Sized> StreamTransport for Arc<T> {
    async fn open(&self, request: &StreamRequest) -> Result<ByteStream, StreamError> {
        (**self).open(request).await
    }
}

#[async_trait]
impl<T: ChatFetcher + ?Sized> ChatFetcher for Arc<T> {
    async fn fetch_chat(&self, chat_id: &str) -> Result<ChatDetail, StreamError> {
        (**self).fetch_chat(chat_id).await
    }
}
