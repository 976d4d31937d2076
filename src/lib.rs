//! Study Session - client-side session controllers for a study assistant
//!
//! Two controllers drive the assistant's interactive workflows: a
//! question-and-answer conversation and a multiple-choice quiz. Both are
//! pure state machines run by small actors that talk to the backend through
//! the [`gateway::Gateway`] trait.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod config;
pub mod gateway;
pub mod runtime;
pub mod state_machine;
