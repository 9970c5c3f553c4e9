//! Session state machine
//!
//! Elm Architecture: a pure `transition` over [`SessionState`] that returns
//! the effects for the runtime to execute.

mod effect;
pub mod event;
mod reconcile;
pub mod state;
pub(crate) mod transition;


pub use effect::Effect;
pub use event::{Event, TurnSeed};
pub use state::{ConversationRow, SessionContext, SessionState};
pub use transition::{transition, TransitionError, TransitionResult};
