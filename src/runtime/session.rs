//! Stream session executor

use super::traits::{ByteStream, ChatFetcher, StreamTransport};
use super::SessionUpdate;
use crate::decoder::{EventMarkers, EventStream, StreamEvent};
use crate::error::StreamError;
use crate::state_machine::{
    transition, Effect, Event, SessionContext, SessionState, TransitionError, TurnSeed,
};
use crate::view::SessionView;
use crate::wire::{ChatSnapshot, StreamRequest};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

const EVENT_CHANNEL_CAPACITY: usize = 64;
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// An event tagged with the stream that produced it
#[derive(Debug)]
struct Envelope {
    generation: u64,
    event: Event,
}

/// Cancels the stream it was returned for. Idempotent.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("Cancelling stream");
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Callback set handed to the stream pump.
///
/// Every call is a no-op once the stream is cancelled; `on_done` and
/// `on_error` are mutually exclusive and fire at most once.
pub struct EventSink {
    generation: u64,
    tx: mpsc::Sender<Envelope>,
    cancel: CancellationToken,
    finished: bool,
}

impl EventSink {
    pub async fn on_delta(&mut self, text: String) {
        self.send(Event::Delta { text }).await;
    }

    pub async fn on_chat_update(&mut self, chat: ChatSnapshot) {
        self.send(Event::Snapshot { chat }).await;
    }

    pub async fn on_done(&mut self) {
        self.send(Event::Done).await;
        self.finished = true;
    }

    pub async fn on_error(&mut self, cause: StreamError) {
        self.send(Event::Error { cause }).await;
        self.finished = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn send(&mut self, event: Event) {
        if self.finished || self.cancel.is_cancelled() {
            tracing::debug!(generation = self.generation, "Dropping event from detached stream");
            return;
        }
        let envelope = Envelope {
            generation: self.generation,
            event,
        };
        // A full channel nobody drains must not pin the transport past a cancel
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                tracing::debug!(generation = self.generation, "Cancelled while sending, dropping event");
            }
            sent = self.tx.send(envelope) => {
                if sent.is_err() {
                    tracing::debug!(generation = self.generation, "Session gone, dropping event");
                }
            }
        }
    }
}

/// Drives one conversation: seeds turns, pumps the transport, and applies
/// every event through the pure transition function.
pub struct StreamSession<T, F>
where
    T: StreamTransport + 'static,
    F: ChatFetcher + 'static,
{
    context: SessionContext,
    state: SessionState,
    transport: Arc<T>,
    fetcher: Arc<F>,
    markers: EventMarkers,
    event_tx: mpsc::Sender<Envelope>,
    event_rx: mpsc::Receiver<Envelope>,
    broadcast_tx: broadcast::Sender<SessionUpdate>,
    /// Bumped for every opened stream
    generation: u64,
    /// Token of the current stream
    stream_cancel: Option<CancellationToken>,
}

impl<T, F> StreamSession<T, F>
where
    T: StreamTransport + 'static,
    F: ChatFetcher + 'static,
{
    pub fn new(context: SessionContext, transport: T, fetcher: F) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (broadcast_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            context,
            state: SessionState::default(),
            transport: Arc::new(transport),
            fetcher: Arc::new(fetcher),
            markers: EventMarkers::default(),
            event_tx,
            event_rx,
            broadcast_tx,
            generation: 0,
            stream_cancel: None,
        }
    }

    /// Recognise different event names on the wire
    pub fn with_markers(mut self, markers: EventMarkers) -> Self {
        self.markers = markers;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.broadcast_tx.subscribe()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn view(&self) -> SessionView {
        SessionView::from_state(&self.state)
    }

    /// Start a brand-new conversation. Clears all rows.
    pub async fn start_chat(
        &mut self,
        request: StreamRequest,
        message: &str,
    ) -> Result<CancelHandle, TransitionError> {
        self.settle_cancelled().await;
        tracing::info!(url = %request.url, "Starting new chat");
        self.process(Event::StartChat(TurnSeed::new(message, request)))
            .await?;
        Ok(self.cancel_handle())
    }

    /// Continue the current conversation
    pub async fn follow_up(
        &mut self,
        request: StreamRequest,
        message: &str,
    ) -> Result<CancelHandle, TransitionError> {
        self.settle_cancelled().await;
        tracing::info!(chat_id = ?self.state.chat_id, "Sending follow-up");
        self.process(Event::FollowUp(TurnSeed::new(message, request)))
            .await?;
        Ok(self.cancel_handle())
    }

    /// Show an existing conversation so follow-ups start from its history
    pub async fn load(&mut self, chat_id: &str) -> Result<(), StreamError> {
        self.settle_cancelled().await;
        if self.state.streaming {
            return Err(StreamError::new(
                crate::error::StreamErrorKind::InvalidRequest,
                TransitionError::AlreadyStreaming.to_string(),
            ));
        }
        let mut chat = self.fetcher.fetch_chat(chat_id).await?;
        if chat.id.is_none() {
            chat.id = Some(chat_id.to_string());
        }
        tracing::info!(chat_id, "Loaded conversation");
        self.process(Event::Loaded { chat })
            .await
            .map_err(|e| StreamError::unknown(e.to_string()))
    }

    /// Apply stream events until the active stream is over, including the
    /// settle step. Returns at once when nothing is streaming.
    pub async fn run(&mut self) {
        if !self.state.streaming {
            return;
        }
        while self.state.streaming {
            let cancel = self.stream_cancel.clone().unwrap_or_default();

            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    let _ = self.process(Event::Cancel).await;
                }

                envelope = self.event_rx.recv() => {
                    // The session owns a sender, so this never closes
                    let Some(envelope) = envelope else { break };
                    self.dispatch(envelope).await;
                }
            }
        }
        tracing::info!(
            chat_id = ?self.state.chat_id,
            generation = self.generation,
            bytes = self.state.buffer.len(),
            "Stream finished"
        );
    }

    async fn dispatch(&mut self, envelope: Envelope) {
        if envelope.generation != self.generation {
            tracing::debug!(
                generation = envelope.generation,
                current = self.generation,
                "Discarding event from superseded stream"
            );
            return;
        }
        if self.stream_cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            tracing::debug!(generation = envelope.generation, "Discarding event after cancel");
            return;
        }
        let _ = self.process(envelope.event).await;
    }

    /// A stream cancelled through its handle while nobody was running the
    /// session still counts as streaming until the cancel is applied.
    async fn settle_cancelled(&mut self) {
        let cancelled = self
            .stream_cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled);
        if self.state.streaming && cancelled {
            let _ = self.process(Event::Cancel).await;
        }
    }

    fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.stream_cancel.clone().unwrap_or_default(),
        }
    }

    async fn process(&mut self, event: Event) -> Result<(), TransitionError> {
        // Effects can produce follow-up events (the settle result)
        let mut events_to_process = vec![event];

        while let Some(current_event) = events_to_process.pop() {
            let result = match transition(&self.state, &self.context, current_event) {
                Ok(r) => r,
                Err(TransitionError::StreamClosed) => {
                    tracing::debug!(generation = self.generation, "Ignoring event after stream closed");
                    return Err(TransitionError::StreamClosed);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Rejected session event");
                    let _ = self.broadcast_tx.send(SessionUpdate::Error {
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            };

            self.state = result.new_state;

            for effect in result.effects {
                if let Some(generated) = self.execute_effect(effect).await {
                    events_to_process.push(generated);
                }
            }
        }
        Ok(())
    }

    async fn execute_effect(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::OpenStream { request } => {
                if let Some(previous) = self.stream_cancel.take() {
                    previous.cancel();
                }
                self.generation += 1;
                let cancel = CancellationToken::new();
                self.stream_cancel = Some(cancel.clone());

                let sink = EventSink {
                    generation: self.generation,
                    tx: self.event_tx.clone(),
                    cancel,
                    finished: false,
                };
                let transport = self.transport.clone();
                let markers = self.markers.clone();
                tokio::spawn(pump(transport, request, markers, sink));
                None
            }

            Effect::FetchCanonical { chat_id } => {
                match self.fetcher.fetch_chat(&chat_id).await {
                    Ok(detail) => Some(Event::Settled { detail }),
                    Err(cause) => {
                        tracing::debug!(
                            chat_id = %chat_id,
                            error = %cause,
                            retryable = cause.kind.is_retryable(),
                            "Settle fetch failed, keeping streamed content"
                        );
                        Some(Event::SettleFailed { cause })
                    }
                }
            }

            Effect::NotifyView => {
                let _ = self.broadcast_tx.send(SessionUpdate::View(self.view()));
                None
            }

            Effect::ReportError { cause } => {
                tracing::warn!(
                    chat_id = ?self.state.chat_id,
                    error = %cause,
                    retryable = cause.kind.is_retryable(),
                    "Stream failed"
                );
                let _ = self.broadcast_tx.send(SessionUpdate::Error {
                    message: cause.message,
                });
                None
            }

            Effect::AbortStream => {
                if let Some(token) = &self.stream_cancel {
                    token.cancel();
                }
                None
            }
        }
    }
}

/// Read the transport and feed decoded events into the sink until the stream
/// ends or is cancelled. Dropping the body releases the connection.
async fn pump<T: StreamTransport>(
    transport: Arc<T>,
    request: StreamRequest,
    markers: EventMarkers,
    mut sink: EventSink,
) {
    let generation = sink.generation;
    if request.debug {
        tracing::debug!(generation, url = %request.url, body = %request.body, "Opening stream");
    }

    let opened: Result<ByteStream, StreamError> = tokio::select! {
        biased;
        () = sink.cancel.cancelled() => return,
        result = transport.open(&request) => result,
    };

    let body = match opened {
        Ok(body) => body,
        Err(cause) => {
            sink.on_error(cause).await;
            return;
        }
    };

    let mut events = EventStream::new(body, markers);
    loop {
        let next = tokio::select! {
            biased;
            () = sink.cancel.cancelled() => {
                tracing::debug!(generation, "Stream cancelled, releasing transport");
                return;
            }
            next = events.next_event() => next,
        };

        let Some(event) = next else { break };
        if request.debug {
            tracing::debug!(generation, event = ?event, "Stream event");
        }
        match event {
            StreamEvent::Delta { text } => sink.on_delta(text).await,
            StreamEvent::ChatSnapshot { chat } => sink.on_chat_update(chat).await,
            StreamEvent::Done => sink.on_done().await,
            StreamEvent::Error { cause } => sink.on_error(cause).await,
        }
    }
}
