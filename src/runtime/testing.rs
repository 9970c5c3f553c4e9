//! Mock implementations for testing
//!
//! These mocks enable end-to-end session tests without real I/O.

use super::traits::*;
use crate::error::StreamError;
use crate::wire::{ChatDetail, StreamRequest};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::VecDeque;
use std::io;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Sender side of a live mock stream
pub type ByteFeed = mpsc::UnboundedSender<Result<Bytes, io::Error>>;

enum Script {
    Chunks(Vec<Bytes>),
    Live(mpsc::UnboundedReceiver<Result<Bytes, io::Error>>),
    Refuse(StreamError),
}

// ============================================================================
// Mock Transport
// ============================================================================

/// Mock transport that plays queued scripts, one per opened stream
#[allow(dead_code)]
pub struct MockTransport {
    scripts: Mutex<VecDeque<Script>>,
    /// Record of all requests made
    pub requests: Mutex<Vec<StreamRequest>>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a stream that delivers these chunks and ends
    pub fn queue_chunks(&self, chunks: &[&str]) {
        let chunks = chunks.iter().map(|c| Bytes::from(c.to_string())).collect();
        self.scripts.lock().unwrap().push_back(Script::Chunks(chunks));
    }

    /// Queue a stream fed by the returned sender; it ends when the sender
    /// is dropped
    pub fn queue_live(&self) -> ByteFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts.lock().unwrap().push_back(Script::Live(rx));
        tx
    }

    /// Queue a refused request
    pub fn queue_refusal(&self, error: StreamError) {
        self.scripts.lock().unwrap().push_back(Script::Refuse(error));
    }

    pub fn recorded_requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamTransport for MockTransport {
    async fn open(&self, request: &StreamRequest) -> Result<ByteStream, StreamError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Chunks(chunks)) => Ok(futures::stream::iter(chunks.into_iter().map(Ok)).boxed()),
            Some(Script::Live(rx)) => Ok(UnboundedReceiverStream::new(rx).boxed()),
            Some(Script::Refuse(error)) => Err(error),
            None => Err(StreamError::network("No mock stream queued")),
        }
    }
}

// ============================================================================
// Mock Fetcher
// ============================================================================

/// Mock fetcher returning queued details; fails when the queue is empty
#[allow(dead_code)]
pub struct MockFetcher {
    responses: Mutex<VecDeque<Result<ChatDetail, StreamError>>>,
    /// Chat ids fetched, in order
    pub fetched: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl MockFetcher {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_detail(&self, detail: ChatDetail) {
        self.responses.lock().unwrap().push_back(Ok(detail));
    }

    pub fn queue_error(&self, error: StreamError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_fetches(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatFetcher for MockFetcher {
    async fn fetch_chat(&self, chat_id: &str) -> Result<ChatDetail, StreamError> {
        self.fetched.lock().unwrap().push(chat_id.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(StreamError::network("Canonical fetch unavailable")))
    }
}

// ============================================================================
// Session tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamErrorKind;
    use crate::runtime::{SessionUpdate, StreamSession};
    use crate::state_machine::{SessionContext, TransitionError};
    use crate::wire::{ChatSnapshot, Role};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::broadcast;

    type TestSession = StreamSession<Arc<MockTransport>, Arc<MockFetcher>>;

    fn request() -> StreamRequest {
        StreamRequest {
            url: "https://api.example.test/v1/chats".to_string(),
            headers: BTreeMap::new(),
            body: json!({ "message": "Build a button", "responseMode": "experimental_stream" }),
            debug: true,
        }
    }

    fn session() -> (TestSession, Arc<MockTransport>, Arc<MockFetcher>) {
        let transport = Arc::new(MockTransport::new());
        let fetcher = Arc::new(MockFetcher::new());
        let session = StreamSession::new(SessionContext::default(), transport.clone(), fetcher.clone());
        (session, transport, fetcher)
    }

    fn sse(event: &str, data: &str) -> String {
        format!("event: {event}\ndata: {data}\n\n")
    }

    fn assistant_content(session: &TestSession) -> String {
        session.state().placeholder().unwrap().content.clone()
    }

    /// Let the spawned pump run until the transport saw `count` requests
    async fn wait_for_open(transport: &MockTransport, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while transport.recorded_requests().len() < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("timed out waiting for the stream to open");
    }

    /// Wait for a published view matching `pred`
    async fn wait_for_view(
        updates: &mut broadcast::Receiver<SessionUpdate>,
        pred: impl Fn(&crate::view::SessionView) -> bool,
    ) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match updates.recv().await {
                    Ok(SessionUpdate::View(view)) if pred(&view) => return,
                    Ok(_) => {}
                    Err(e) => panic!("update channel failed: {e}"),
                }
            }
        })
        .await
        .expect("timed out waiting for view");
    }

    #[tokio::test]
    async fn test_build_a_button_with_failing_settle() {
        let (mut session, transport, fetcher) = session();
        let snapshot = json!({ "id": "chat_1", "name": "Button" }).to_string();
        transport.queue_chunks(&[
            &sse("chat", &snapshot),
            &sse("delta", "Here "),
            &sse("delta", "is "),
            &sse("delta", "a button."),
            &sse("done", "{}"),
        ]);
        fetcher.queue_error(StreamError::network("offline"));

        session.start_chat(request(), "Build a button").await.unwrap();
        session.run().await;

        let state = session.state();
        assert!(!state.streaming);
        assert_eq!(assistant_content(&session), "Here is a button.");
        assert_eq!(state.rows.len(), 2);
        assert_eq!(state.rows[1].role, Role::User);
        assert_eq!(state.rows[1].content, "Build a button");
        assert_eq!(state.title.as_deref(), Some("Button"));
        assert_eq!(fetcher.recorded_fetches(), vec!["chat_1".to_string()]);
        assert_eq!(transport.recorded_requests().len(), 1);
        assert_eq!(session.view().preview, "Here is a button.");
    }

    #[tokio::test]
    async fn test_settle_replaces_streamed_content() {
        let (mut session, transport, fetcher) = session();
        transport.queue_chunks(&[
            &sse("chat", r#"{"id":"chat_1"}"#),
            &sse("delta", "Partial answ"),
            "data: [DONE]\n\n",
        ]);
        fetcher.queue_detail(ChatSnapshot {
            text: Some("Full corrected answer.".to_string()),
            ..ChatSnapshot::with_id("chat_1")
        });

        session.start_chat(request(), "Question").await.unwrap();
        session.run().await;

        assert_eq!(assistant_content(&session), "Full corrected answer.");
    }

    #[tokio::test]
    async fn test_no_settle_without_chat_id() {
        let (mut session, transport, fetcher) = session();
        transport.queue_chunks(&[&sse("delta", "Hi"), &sse("done", "{}")]);

        session.start_chat(request(), "Hello").await.unwrap();
        session.run().await;

        assert_eq!(assistant_content(&session), "Hi");
        assert!(fetcher.recorded_fetches().is_empty());
    }

    #[tokio::test]
    async fn test_placeholder_visible_before_first_byte() {
        let (mut session, transport, _fetcher) = session();
        let _feed = transport.queue_live();
        let mut updates = session.subscribe();

        let handle = session.start_chat(request(), "Build a button").await.unwrap();

        let state = session.state();
        assert!(state.streaming);
        assert_eq!(state.rows.len(), 2);
        assert_eq!(state.rows[0].role, Role::Assistant);
        match updates.try_recv() {
            Ok(SessionUpdate::View(view)) => assert_eq!(view.preview, "Streaming..."),
            other => panic!("expected initial view, got {other:?}"),
        }
        handle.cancel();
        session.run().await;
        assert!(!session.state().streaming);
    }

    #[tokio::test]
    async fn test_cancellation_silences_late_events() {
        let (session, transport, _fetcher) = session();
        let feed = transport.queue_live();
        let mut updates = session.subscribe();
        let mut session = session;

        let handle = session.start_chat(request(), "Build a button").await.unwrap();
        let task = tokio::spawn(async move {
            session.run().await;
            session
        });

        feed.send(Ok(Bytes::from(sse("delta", "Here ")))).unwrap();
        wait_for_view(&mut updates, |v| v.preview == "Here").await;

        handle.cancel();
        handle.cancel();
        let session = task.await.unwrap();

        // The pump is gone; anything sent now goes nowhere
        let _ = feed.send(Ok(Bytes::from(sse("delta", "late text"))));
        assert!(handle.is_cancelled());
        assert!(!session.state().streaming);
        assert_eq!(assistant_content(&session), "Here ");
    }

    #[tokio::test]
    async fn test_cancelled_stream_events_discarded_by_next_turn() {
        let (mut session, transport, _fetcher) = session();
        let first = transport.queue_live();
        transport.queue_chunks(&[&sse("delta", "Second"), &sse("done", "{}")]);

        let handle = session.start_chat(request(), "First").await.unwrap();
        wait_for_open(&transport, 1).await;
        handle.cancel();
        let _ = first.send(Ok(Bytes::from(sse("delta", "stale"))));

        // Starting again applies the pending cancel first
        session.start_chat(request(), "Second question").await.unwrap();
        session.run().await;

        assert_eq!(assistant_content(&session), "Second");
        assert_eq!(session.state().rows.len(), 2);
        assert_eq!(session.state().rows[1].content, "Second question");
        assert_eq!(transport.recorded_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_releases_transport_with_full_channel() {
        let (mut session, transport, _fetcher) = session();
        let feed = transport.queue_live();

        let handle = session.start_chat(request(), "Build a button").await.unwrap();
        wait_for_open(&transport, 1).await;

        // More events than the session channel holds, and nobody running
        for i in 0..100 {
            feed.send(Ok(Bytes::from(sse("delta", &format!("chunk {i} "))))).unwrap();
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!feed.is_closed());

        handle.cancel();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !feed.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("transport body still held after cancel");

        session.run().await;
        assert!(!session.state().streaming);
    }

    #[tokio::test]
    async fn test_transport_error_keeps_partial_content() {
        let (mut session, transport, fetcher) = session();
        let feed = transport.queue_live();
        let mut updates = session.subscribe();

        session.start_chat(request(), "Build a button").await.unwrap();
        feed.send(Ok(Bytes::from(sse("delta", "Here is")))).unwrap();
        feed.send(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))).unwrap();
        session.run().await;

        assert!(!session.state().streaming);
        assert_eq!(assistant_content(&session), "Here is");
        assert!(fetcher.recorded_fetches().is_empty());

        let mut saw_error = false;
        while let Ok(update) = updates.try_recv() {
            if let SessionUpdate::Error { message } = update {
                assert!(message.contains("reset"), "unexpected message {message}");
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_refused_request_reports_error() {
        let (mut session, transport, _fetcher) = session();
        transport.queue_refusal(StreamError::from_status(401, "bad key"));
        let mut updates = session.subscribe();

        session.start_chat(request(), "Hello").await.unwrap();
        session.run().await;

        assert!(!session.state().streaming);
        assert_eq!(session.view().preview, "Ready");
        let errors: Vec<String> = std::iter::from_fn(|| updates.try_recv().ok())
            .filter_map(|u| match u {
                SessionUpdate::Error { message } => Some(message),
                SessionUpdate::View(_) => None,
            })
            .collect();
        assert_eq!(errors, vec!["HTTP 401: bad key".to_string()]);
    }

    #[tokio::test]
    async fn test_follow_up_rejected_while_streaming() {
        let (mut session, transport, _fetcher) = session();
        let _feed = transport.queue_live();

        session.start_chat(request(), "Build a button").await.unwrap();
        let err = session.follow_up(request(), "Make it red").await.unwrap_err();
        assert_eq!(err, TransitionError::AlreadyStreaming);

        wait_for_open(&transport, 1).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(transport.recorded_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_follow_up_needs_a_conversation() {
        let (mut session, transport, _fetcher) = session();
        let err = session.follow_up(request(), "Make it red").await.unwrap_err();
        assert_eq!(err, TransitionError::NoConversation);
        assert!(!session.state().streaming);
        assert!(transport.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_follow_up_after_load() {
        let (mut session, transport, fetcher) = session();
        fetcher.queue_detail(
            serde_json::from_value(json!({
                "id": "chat_1",
                "name": "Button",
                "messages": [
                    { "id": "m1", "role": "user", "content": "Build a button", "createdAt": "2025-01-01T10:00:00Z" },
                    { "id": "m2", "role": "assistant", "content": "Here is a button.", "createdAt": "2025-01-01T10:00:05Z" }
                ]
            }))
            .unwrap(),
        );
        session.load("chat_1").await.unwrap();
        assert_eq!(session.state().rows.len(), 2);
        assert_eq!(session.state().chat_id.as_deref(), Some("chat_1"));

        let snapshot = json!({
            "id": "chat_1",
            "messages": [
                { "id": "m1", "role": "user", "content": "Build a button", "createdAt": "2025-01-01T10:00:00Z" },
                { "id": "m2", "role": "assistant", "content": "Here is a button.", "createdAt": "2025-01-01T10:00:05Z" },
                { "id": "m3", "role": "user", "content": "Make it red", "createdAt": "2025-01-01T10:01:00Z" },
                { "id": "m4", "role": "assistant", "content": "", "createdAt": "2025-01-01T10:01:01Z" }
            ]
        })
        .to_string();
        transport.queue_chunks(&[&sse("delta", "Red "), &sse("chat", &snapshot), &sse("delta", "button."), &sse("done", "{}")]);

        session.follow_up(request(), "Make it red").await.unwrap();
        session.run().await;

        let state = session.state();
        let contents: Vec<&str> = state.rows.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["Red button.", "Make it red", "Build a button", "Here is a button."]
        );
        // Settle fetch queue was empty, so the streamed text stays
        assert_eq!(fetcher.recorded_fetches(), vec!["chat_1".to_string(), "chat_1".to_string()]);
    }

    #[tokio::test]
    async fn test_load_failure_propagates() {
        let (mut session, _transport, fetcher) = session();
        fetcher.queue_error(StreamError::from_status(404, "not found"));
        let err = session.load("missing").await.unwrap_err();
        assert_eq!(err.kind, StreamErrorKind::InvalidRequest);
        assert!(session.state().rows.is_empty());
    }
}
