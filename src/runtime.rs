//! Runtime for the session controllers
//!
//! Each controller is an actor: a task that owns the state, applies events
//! through the pure transition function and runs the returned effects.
//! Callers talk to it through a cheap, cloneable handle. A handle operation
//! resolves once its transition has been applied and the snapshot published.

mod conversation;
mod quiz;

#[cfg(test)]
pub mod testing;

use conversation::ConversationRuntime;
use quiz::QuizRuntime;

use crate::gateway::{DocumentId, Gateway};
use crate::state_machine::{
    ConversationEvent, ConversationNotice, ConversationState, QuizEvent, QuizNotice, QuizState,
    TransitionError,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

const EVENT_BUFFER: usize = 32;
const NOTICE_BUFFER: usize = 64;

/// Why a handle operation did not take effect
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    /// The controller task is gone and no longer accepts events
    #[error("session controller has stopped")]
    Closed,
    /// The controller refused the operation; state is unchanged
    #[error(transparent)]
    Rejected(#[from] TransitionError),
}

impl ControlError {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

type Reply = oneshot::Sender<Result<(), TransitionError>>;

/// Event queued to a controller. User operations carry a reply channel;
/// gateway outcomes posted by spawned calls do not.
pub(crate) struct Envelope<E> {
    pub event: E,
    pub reply: Option<Reply>,
}

impl<E> Envelope<E> {
    pub fn internal(event: E) -> Self {
        Self { event, reply: None }
    }
}

/// Queue `event` and wait until the controller has applied or refused it
async fn dispatch<E>(tx: &mpsc::Sender<Envelope<E>>, event: E) -> Result<(), ControlError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(Envelope {
        event,
        reply: Some(reply_tx),
    })
    .await
    .map_err(|_| ControlError::Closed)?;

    let outcome = reply_rx.await.map_err(|_| ControlError::Closed)?;
    outcome.map_err(ControlError::from)
}

// ============================================================================
// Conversation
// ============================================================================

/// Handle to a running conversation controller
#[derive(Clone)]
pub struct ConversationHandle {
    event_tx: mpsc::Sender<Envelope<ConversationEvent>>,
    state_rx: watch::Receiver<ConversationState>,
    notice_tx: broadcast::Sender<ConversationNotice>,
}

impl ConversationHandle {
    /// Ask a question. When this returns `Ok` the user turn is already in the
    /// snapshot. Blank input and asking while a reply is pending are rejected
    /// and leave the transcript untouched.
    pub async fn submit(&self, text: impl Into<String>) -> Result<(), ControlError> {
        self.send(ConversationEvent::Submit { text: text.into() })
            .await
    }

    /// Clear the transcript and drop any outstanding reply
    pub async fn reset(&self) -> Result<(), ControlError> {
        self.send(ConversationEvent::Reset).await
    }

    pub fn snapshot(&self) -> ConversationState {
        self.state_rx.borrow().clone()
    }

    /// Receiver that sees every published snapshot
    pub fn watch(&self) -> watch::Receiver<ConversationState> {
        self.state_rx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationNotice> {
        self.notice_tx.subscribe()
    }

    async fn send(&self, event: ConversationEvent) -> Result<(), ControlError> {
        dispatch(&self.event_tx, event).await
    }
}

/// Start a conversation controller on the current tokio runtime
pub fn spawn_conversation<G: Gateway + 'static>(gateway: Arc<G>) -> ConversationHandle {
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let (state_tx, state_rx) = watch::channel(ConversationState::new());
    let (notice_tx, _) = broadcast::channel(NOTICE_BUFFER);

    let runtime = ConversationRuntime::new(
        gateway,
        event_rx,
        event_tx.downgrade(),
        state_tx,
        notice_tx.clone(),
    );
    tokio::spawn(runtime.run());

    ConversationHandle {
        event_tx,
        state_rx,
        notice_tx,
    }
}

// ============================================================================
// Quiz
// ============================================================================

/// Handle to a running quiz controller
#[derive(Clone)]
pub struct QuizHandle {
    event_tx: mpsc::Sender<Envelope<QuizEvent>>,
    state_rx: watch::Receiver<QuizState>,
    notice_tx: broadcast::Sender<QuizNotice>,
}

impl QuizHandle {
    /// Request a new quiz. Allowed while configuring or on an active quiz,
    /// which it replaces.
    pub async fn generate(
        &self,
        topic: impl Into<String>,
        document_id: Option<DocumentId>,
        count: u32,
    ) -> Result<(), ControlError> {
        self.send(QuizEvent::Generate {
            topic: topic.into(),
            document_id,
            count,
        })
        .await
    }

    /// Record the selection for one question; later picks overwrite earlier ones
    pub async fn select_answer(
        &self,
        question_index: usize,
        option: impl Into<String>,
    ) -> Result<(), ControlError> {
        self.send(QuizEvent::SelectAnswer {
            question_index,
            option: option.into(),
        })
        .await
    }

    pub async fn grade(&self) -> Result<(), ControlError> {
        self.send(QuizEvent::Grade).await
    }

    pub async fn new_session(&self) -> Result<(), ControlError> {
        self.send(QuizEvent::NewSession).await
    }

    /// Whether grading would be accepted right now
    pub fn can_submit(&self) -> bool {
        self.state_rx.borrow().can_submit()
    }

    pub fn snapshot(&self) -> QuizState {
        self.state_rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<QuizState> {
        self.state_rx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QuizNotice> {
        self.notice_tx.subscribe()
    }

    async fn send(&self, event: QuizEvent) -> Result<(), ControlError> {
        dispatch(&self.event_tx, event).await
    }
}

/// Start a quiz controller on the current tokio runtime
pub fn spawn_quiz<G: Gateway + 'static>(gateway: Arc<G>) -> QuizHandle {
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let (state_tx, state_rx) = watch::channel(QuizState::new());
    let (notice_tx, _) = broadcast::channel(NOTICE_BUFFER);

    let runtime = QuizRuntime::new(
        gateway,
        event_rx,
        event_tx.downgrade(),
        state_tx,
        notice_tx.clone(),
    );
    tokio::spawn(runtime.run());

    QuizHandle {
        event_tx,
        state_rx,
        notice_tx,
    }
}
