//! Session state machines
//!
//! Implements the Elm Architecture pattern with pure state transitions. The
//! runtime owns the state and executes the effects a transition returns.

pub mod conversation;
pub mod quiz;
pub(crate) mod transition;


pub use conversation::{
    ConversationEffect, ConversationEvent, ConversationNotice, ConversationPhase,
    ConversationState, Role, Turn,
};
pub use quiz::{
    QuestionError, QuestionReview, QuizEffect, QuizEvent, QuizNotice, QuizPhase, QuizQuestion,
    QuizSession, QuizState, ReportStatus,
};
pub use transition::{Generation, TransitionError, TransitionResult};
