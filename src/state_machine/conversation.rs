//! Conversation state machine
//!
//! Idle ⇄ Awaiting. The transcript is append-only; a failed ask still keeps
//! the user's turn and adds an apology turn after it.

use super::transition::{shared_failure_message, Generation, TransitionError, TransitionResult};
use crate::gateway::{AskResponse, GatewayError, GatewayErrorKind, SourceDocument};
use serde::{Deserialize, Serialize};

pub const GENERIC_APOLOGY: &str = "Sorry, I encountered an error.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One transcript entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceDocument>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            sources: vec![],
        }
    }

    pub fn assistant(content: impl Into<String>, sources: Vec<SourceDocument>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            sources,
        }
    }

    /// Synthetic assistant turn standing in for a failed answer
    pub fn apology(kind: GatewayErrorKind) -> Self {
        Self::assistant(
            shared_failure_message(kind).unwrap_or(GENERIC_APOLOGY),
            vec![],
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationPhase {
    /// No request outstanding
    #[default]
    Idle,
    /// One ask in flight
    Awaiting,
}

/// Conversation session state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConversationState {
    turns: Vec<Turn>,
    phase: ConversationPhase,
    generation: Generation,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn phase(&self) -> ConversationPhase {
        self.phase
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn is_pending(&self) -> bool {
        self.phase == ConversationPhase::Awaiting
    }

    fn with_appended(&self, turn: Turn, phase: ConversationPhase) -> Self {
        let mut turns = self.turns.clone();
        turns.push(turn);
        Self {
            turns,
            phase,
            generation: self.generation,
        }
    }
}

/// Events that drive the conversation
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    // User events
    Submit { text: String },
    Reset,

    // Gateway events
    AnswerReceived {
        stamp: Generation,
        response: AskResponse,
    },
    AskFailed {
        stamp: Generation,
        error: GatewayError,
    },
}

/// Effects to run after a conversation transition
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEffect {
    /// Issue the ask call (spawned, reports back with `stamp`)
    Ask { stamp: Generation, question: String },
    /// Push the new snapshot to observers
    PublishState,
    /// Broadcast a notice to subscribers
    Notify(ConversationNotice),
}

/// Out-of-band notices for subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationNotice {
    /// An operation was refused and changed nothing
    Rejected { reason: String },
    /// The ask failed; the transcript shows an apology instead
    AskFailed {
        kind: GatewayErrorKind,
        status: Option<u16>,
        message: String,
    },
}

pub type ConversationTransition = TransitionResult<ConversationState, ConversationEffect>;

/// Pure transition function
pub fn transition(
    state: &ConversationState,
    event: ConversationEvent,
) -> Result<ConversationTransition, TransitionError> {
    match event {
        ConversationEvent::Submit { text } => {
            // Blank input is refused, but the question goes out as typed
            if text.trim().is_empty() {
                return Err(TransitionError::EmptyInput);
            }
            if state.is_pending() {
                return Err(TransitionError::Busy);
            }

            let mut new_state =
                state.with_appended(Turn::user(text.clone()), ConversationPhase::Awaiting);
            new_state.generation = state.generation.next();
            let stamp = new_state.generation;

            Ok(TransitionResult::new(new_state)
                .with_effect(ConversationEffect::PublishState)
                .with_effect(ConversationEffect::Ask {
                    stamp,
                    question: text,
                }))
        }

        ConversationEvent::Reset => {
            let new_state = ConversationState {
                turns: vec![],
                phase: ConversationPhase::Idle,
                generation: state.generation.next(),
            };
            Ok(TransitionResult::new(new_state).with_effect(ConversationEffect::PublishState))
        }

        ConversationEvent::AnswerReceived { stamp, response } => {
            check_stamp(state, stamp)?;
            let turn = Turn::assistant(response.answer, response.sources);
            Ok(
                TransitionResult::new(state.with_appended(turn, ConversationPhase::Idle))
                    .with_effect(ConversationEffect::PublishState),
            )
        }

        ConversationEvent::AskFailed { stamp, error } => {
            check_stamp(state, stamp)?;
            let turn = Turn::apology(error.kind);
            Ok(
                TransitionResult::new(state.with_appended(turn, ConversationPhase::Idle))
                    .with_effect(ConversationEffect::PublishState)
                    .with_effect(ConversationEffect::Notify(ConversationNotice::AskFailed {
                        kind: error.kind,
                        status: error.status,
                        message: error.message,
                    })),
            )
        }
    }
}

/// A response applies only to the request that is still outstanding
fn check_stamp(state: &ConversationState, stamp: Generation) -> Result<(), TransitionError> {
    if stamp == state.generation && state.is_pending() {
        Ok(())
    } else {
        Err(TransitionError::StaleResponse {
            stamp,
            current: state.generation,
        })
    }
}
