//! Shared transition plumbing for both session state machines

use crate::gateway::GatewayErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Monotonic counter stamped onto every outstanding gateway call.
///
/// Bumped whenever a session is reset or a new request supersedes the old
/// one. A response is applied only if its stamp equals the current value.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult<S, E> {
    pub new_state: S,
    pub effects: Vec<E>,
}

impl<S, E> TransitionResult<S, E> {
    pub fn new(state: S) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    #[must_use]
    pub fn with_effect(mut self, effect: E) -> Self {
        self.effects.push(effect);
        self
    }

    #[must_use]
    pub fn with_effects(mut self, effects: impl IntoIterator<Item = E>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition.
///
/// Every variant leaves the state untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Input is empty")]
    EmptyInput,
    #[error("A request is already in flight")]
    Busy,
    #[error("No source document selected")]
    MissingDocument,
    #[error("Question count must be at least 1")]
    InvalidQuestionCount,
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),
    #[error("Every question needs an answer before grading ({answered}/{total} answered)")]
    Incomplete { answered: usize, total: usize },
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
    #[error("Discarded stale response (stamp {stamp}, current {current})")]
    StaleResponse {
        stamp: Generation,
        current: Generation,
    },
}

impl TransitionError {
    /// Stale responses are dropped quietly, everything else is surfaced
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleResponse { .. })
    }
}

/// User-facing text for failure classes both workflows word the same way
pub(crate) fn shared_failure_message(kind: GatewayErrorKind) -> Option<&'static str> {
    if kind.is_unreachable() {
        return Some(
            "I couldn't reach the study assistant. Please check your connection and try again.",
        );
    }
    match kind {
        GatewayErrorKind::Auth => Some("Your session has expired. Please sign in again."),
        _ => None,
    }
}
