//! Pure state transition function

use super::event::TurnSeed;
use super::reconcile;
use super::state::ConversationRow;
use super::{Effect, Event, SessionContext, SessionState};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: SessionState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: SessionState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("A reply is still streaming (wait for it to finish or cancel it first)")]
    AlreadyStreaming,
    #[error("Stream already closed")]
    StreamClosed,
    #[error("No conversation to follow up on")]
    NoConversation,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
///
/// Given the same inputs this always produces the same outputs; all I/O is
/// described by the returned effects.
pub fn transition(
    state: &SessionState,
    context: &SessionContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match event {
        // ============================================================
        // Turn start
        // ============================================================
        Event::StartChat(_) | Event::FollowUp(_) | Event::Loaded { .. } if state.streaming => {
            Err(TransitionError::AlreadyStreaming)
        }

        Event::StartChat(seed) => {
            let mut next = SessionState::default();
            open_turn(&mut next, &seed);
            Ok(TransitionResult::new(next)
                .with_effects([Effect::NotifyView, Effect::open_stream(seed.request)]))
        }

        Event::FollowUp(seed) => {
            if state.chat_id.is_none() {
                return Err(TransitionError::NoConversation);
            }
            let mut next = state.clone();
            open_turn(&mut next, &seed);
            Ok(TransitionResult::new(next)
                .with_effects([Effect::NotifyView, Effect::open_stream(seed.request)]))
        }

        Event::Loaded { chat } => {
            let mut next = SessionState::default();
            reconcile::absorb_metadata(&mut next, &chat);
            if let Some(messages) = &chat.messages {
                reconcile::replace_rows(&mut next, messages);
            }
            Ok(TransitionResult::new(next).with_effect(Effect::NotifyView))
        }

        // ============================================================
        // Stream events
        // ============================================================
        Event::Delta { .. } | Event::Done | Event::Error { .. } if !state.streaming => {
            Err(TransitionError::StreamClosed)
        }

        Event::Delta { text } => {
            let mut next = state.clone();
            let changed = reconcile::apply_delta(&mut next, context, &text);
            let result = TransitionResult::new(next);
            Ok(if changed {
                result.with_effect(Effect::NotifyView)
            } else {
                result
            })
        }

        Event::Snapshot { chat } => {
            let mut next = state.clone();
            reconcile::absorb_metadata(&mut next, &chat);
            match &chat.messages {
                Some(messages) if state.streaming => reconcile::merge_snapshot(&mut next, messages),
                Some(messages) => reconcile::replace_rows(&mut next, messages),
                None => {}
            }
            Ok(TransitionResult::new(next).with_effect(Effect::NotifyView))
        }

        Event::Done => {
            let mut next = state.clone();
            next.streaming = false;
            let settle = next.chat_id.clone().map(Effect::fetch_canonical);
            Ok(TransitionResult::new(next)
                .with_effect(Effect::NotifyView)
                .with_effects(settle))
        }

        Event::Error { cause } => {
            let mut next = state.clone();
            next.streaming = false;
            Ok(TransitionResult::new(next)
                .with_effects([Effect::NotifyView, Effect::ReportError { cause }]))
        }

        Event::Cancel => {
            if !state.streaming {
                return Ok(TransitionResult::new(state.clone()));
            }
            let mut next = state.clone();
            next.streaming = false;
            Ok(TransitionResult::new(next).with_effects([Effect::AbortStream, Effect::NotifyView]))
        }

        // ============================================================
        // Settle step
        // ============================================================
        Event::Settled { .. } | Event::SettleFailed { .. } if state.streaming => Err(
            TransitionError::InvalidTransition("settle result while streaming".to_string()),
        ),

        Event::Settled { detail } => {
            let mut next = state.clone();
            reconcile::absorb_metadata(&mut next, &detail);
            if let Some(text) = detail.text.as_deref() {
                reconcile::settle(&mut next, text);
            }
            let result = TransitionResult::new(next);
            Ok(if result.new_state == *state {
                result
            } else {
                result.with_effect(Effect::NotifyView)
            })
        }

        // Streamed content stays as the final result
        Event::SettleFailed { .. } => Ok(TransitionResult::new(state.clone())),
    }
}

/// Reset the active reply and seed the user turn plus its placeholder
fn open_turn(state: &mut SessionState, seed: &TurnSeed) {
    state.buffer.clear();
    state.streaming = true;
    state.placeholder_id = Some(seed.placeholder_id.clone());
    state.placeholder_created_at = Some(seed.at);

    let user = ConversationRow::user(&seed.user_row_id, &seed.message, seed.at);
    let placeholder = ConversationRow::assistant(&seed.placeholder_id, "", seed.at);
    state.rows.retain(|r| r.id != user.id && r.id != placeholder.id);
    state.rows.insert(0, user);
    state.rows.insert(0, placeholder);
}
