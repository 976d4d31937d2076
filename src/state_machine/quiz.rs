//! Quiz session state machine
//!
//! Configuring → Generating → Active → Graded. Regenerating is allowed from
//! Active; leaving Graded takes an explicit new session.

use super::transition::{shared_failure_message, Generation, TransitionError, TransitionResult};
use crate::gateway::{
    AttemptRecord, DocumentId, GatewayError, GatewayErrorKind, QuestionPayload, QuizId,
    QuizPayload,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

const GENERATION_FAILED: &str = "Failed to generate quiz. Please try again.";
const DOCUMENT_NOT_FOUND: &str =
    "The selected document was not found or you don't have access to it.";
const MALFORMED_QUIZ: &str = "The generated quiz was malformed. Please try again.";

// ============================================================================
// Questions
// ============================================================================

/// Why a generated quiz was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuestionError {
    #[error("quiz has no questions")]
    NoQuestions,
    #[error("question {index} has an empty prompt")]
    EmptyPrompt { index: usize },
    #[error("question {index} has {count} option(s), need at least 2")]
    TooFewOptions { index: usize, count: usize },
    #[error("question {index} repeats option {option:?}")]
    DuplicateOption { index: usize, option: String },
    #[error("question {index} marks {correct:?} correct but it is not an option")]
    CorrectOptionMissing { index: usize, correct: String },
}

/// A server-generated multiple-choice question
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuizQuestion {
    prompt: String,
    options: Vec<String>,
    correct_option: String,
}

impl QuizQuestion {
    /// Validate and build a question. `index` is only used in error reports.
    ///
    /// # Errors
    ///
    /// Rejects empty prompts, fewer than two options, duplicate options, and
    /// a correct option that is not among the options.
    pub fn new(
        index: usize,
        prompt: impl Into<String>,
        options: Vec<String>,
        correct_option: impl Into<String>,
    ) -> Result<Self, QuestionError> {
        let prompt = prompt.into();
        let correct_option = correct_option.into();

        if prompt.trim().is_empty() {
            return Err(QuestionError::EmptyPrompt { index });
        }
        if options.len() < 2 {
            return Err(QuestionError::TooFewOptions {
                index,
                count: options.len(),
            });
        }
        let mut seen = HashSet::new();
        for option in &options {
            if !seen.insert(option.as_str()) {
                return Err(QuestionError::DuplicateOption {
                    index,
                    option: option.clone(),
                });
            }
        }
        if !seen.contains(correct_option.as_str()) {
            return Err(QuestionError::CorrectOptionMissing {
                index,
                correct: correct_option,
            });
        }

        Ok(Self {
            prompt,
            options,
            correct_option,
        })
    }

    fn from_payload(index: usize, payload: QuestionPayload) -> Result<Self, QuestionError> {
        Self::new(index, payload.question, payload.options, payload.correct_answer)
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn correct_option(&self) -> &str {
        &self.correct_option
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }
}

/// Number of answered questions whose selection is the correct option
pub fn score(questions: &[QuizQuestion], answers: &BTreeMap<usize, String>) -> usize {
    questions
        .iter()
        .enumerate()
        .filter(|(i, q)| answers.get(i).is_some_and(|a| *a == q.correct_option))
        .count()
}

// ============================================================================
// Session
// ============================================================================

/// Per-question outcome shown after grading
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionReview {
    pub index: usize,
    pub prompt: String,
    pub selected: Option<String>,
    pub correct_option: String,
    pub is_correct: bool,
}

/// One generated quiz and the user's progress through it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuizSession {
    id: QuizId,
    topic: String,
    source_document: DocumentId,
    questions: Vec<QuizQuestion>,
    answers: BTreeMap<usize, String>,
    graded: bool,
    score: usize,
}

impl QuizSession {
    /// Build a session from a generation response.
    ///
    /// # Errors
    ///
    /// Fails if the payload has no questions or any question is malformed.
    pub fn from_payload(
        payload: QuizPayload,
        source_document: DocumentId,
    ) -> Result<Self, QuestionError> {
        if payload.questions.is_empty() {
            return Err(QuestionError::NoQuestions);
        }
        let questions = payload
            .questions
            .into_iter()
            .enumerate()
            .map(|(i, q)| QuizQuestion::from_payload(i, q))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: payload.id,
            topic: payload.topic,
            source_document,
            questions,
            answers: BTreeMap::new(),
            graded: false,
            score: 0,
        })
    }

    pub fn id(&self) -> QuizId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn source_document(&self) -> DocumentId {
        self.source_document
    }

    pub fn questions(&self) -> &[QuizQuestion] {
        &self.questions
    }

    pub fn answers(&self) -> &BTreeMap<usize, String> {
        &self.answers
    }

    pub fn answer(&self, index: usize) -> Option<&str> {
        self.answers.get(&index).map(String::as_str)
    }

    pub fn is_graded(&self) -> bool {
        self.graded
    }

    /// Every question has a selection
    pub fn is_complete(&self) -> bool {
        (0..self.questions.len()).all(|i| self.answers.contains_key(&i))
    }

    /// Defined only once graded
    pub fn score(&self) -> Option<usize> {
        self.graded.then_some(self.score)
    }

    pub fn review(&self) -> Vec<QuestionReview> {
        self.questions
            .iter()
            .enumerate()
            .map(|(index, q)| {
                let selected = self.answers.get(&index).cloned();
                let is_correct = selected.as_deref() == Some(q.correct_option.as_str());
                QuestionReview {
                    index,
                    prompt: q.prompt.clone(),
                    selected,
                    correct_option: q.correct_option.clone(),
                    is_correct,
                }
            })
            .collect()
    }

    fn select(&mut self, index: usize, option: String) -> Result<(), TransitionError> {
        let Some(question) = self.questions.get(index) else {
            return Err(TransitionError::InvalidSelection(format!(
                "question {index} does not exist (quiz has {})",
                self.questions.len()
            )));
        };
        if !question.has_option(&option) {
            return Err(TransitionError::InvalidSelection(format!(
                "{option:?} is not an option for question {index}"
            )));
        }
        self.answers.insert(index, option);
        Ok(())
    }

    fn grade(&mut self) -> usize {
        self.score = score(&self.questions, &self.answers);
        self.graded = true;
        self.score
    }
}

// ============================================================================
// State
// ============================================================================

/// Display-only status of the attempt report sent after grading
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Recorded { attempt_id: i64 },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuizPhase {
    /// No quiz yet; carries the last generation failure for display
    Configuring { last_error: Option<String> },
    /// Generation request in flight
    Generating {
        topic: String,
        document_id: DocumentId,
        count: u32,
    },
    /// Quiz present, answers being collected
    Active { session: QuizSession },
    /// Terminal for this session instance
    Graded {
        session: QuizSession,
        report: ReportStatus,
    },
}

impl Default for QuizPhase {
    fn default() -> Self {
        QuizPhase::Configuring { last_error: None }
    }
}

/// Quiz controller state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct QuizState {
    phase: QuizPhase,
    generation: Generation,
}

impl QuizState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> &QuizPhase {
        &self.phase
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn session(&self) -> Option<&QuizSession> {
        match &self.phase {
            QuizPhase::Active { session } | QuizPhase::Graded { session, .. } => Some(session),
            _ => None,
        }
    }

    /// Sole gate for grading: active and fully answered
    pub fn can_submit(&self) -> bool {
        matches!(&self.phase, QuizPhase::Active { session } if session.is_complete())
    }

    fn with_phase(&self, phase: QuizPhase) -> Self {
        Self {
            phase,
            generation: self.generation,
        }
    }
}

/// Events that drive the quiz controller
#[derive(Debug, Clone)]
pub enum QuizEvent {
    // User events
    Generate {
        topic: String,
        document_id: Option<DocumentId>,
        count: u32,
    },
    SelectAnswer {
        question_index: usize,
        option: String,
    },
    Grade,
    NewSession,

    // Gateway events
    QuizGenerated {
        stamp: Generation,
        payload: QuizPayload,
    },
    GenerationFailed {
        stamp: Generation,
        error: GatewayError,
    },
    ReportSettled {
        stamp: Generation,
        quiz_id: QuizId,
        result: Result<AttemptRecord, GatewayError>,
    },
}

/// Effects to run after a quiz transition
#[derive(Debug, Clone, PartialEq)]
pub enum QuizEffect {
    GenerateQuiz {
        stamp: Generation,
        topic: String,
        document_id: DocumentId,
        count: u32,
    },
    /// Fire-and-forget; the outcome only updates the display status
    ReportAttempt {
        stamp: Generation,
        quiz_id: QuizId,
        score: usize,
        total: usize,
    },
    PublishState,
    Notify(QuizNotice),
}

/// Out-of-band notices for subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuizNotice {
    Rejected { reason: String },
    GenerationFailed { message: String },
    AttemptRecorded { attempt_id: i64 },
    AttemptReportFailed { message: String },
}

pub type QuizTransition = TransitionResult<QuizState, QuizEffect>;

fn generation_failure_message(error: &GatewayError) -> String {
    if let Some(shared) = shared_failure_message(error.kind) {
        return shared.to_string();
    }
    match error.kind {
        GatewayErrorKind::NotFound => DOCUMENT_NOT_FOUND.to_string(),
        GatewayErrorKind::Decode => MALFORMED_QUIZ.to_string(),
        _ => GENERATION_FAILED.to_string(),
    }
}

fn stale(state: &QuizState, stamp: Generation) -> TransitionError {
    TransitionError::StaleResponse {
        stamp,
        current: state.generation,
    }
}

fn failed_generation(state: &QuizState, message: String) -> QuizTransition {
    TransitionResult::new(state.with_phase(QuizPhase::Configuring {
        last_error: Some(message.clone()),
    }))
    .with_effect(QuizEffect::PublishState)
    .with_effect(QuizEffect::Notify(QuizNotice::GenerationFailed { message }))
}

/// Pure transition function
#[allow(clippy::too_many_lines)]
pub fn transition(state: &QuizState, event: QuizEvent) -> Result<QuizTransition, TransitionError> {
    match (&state.phase, event) {
        // ============================================================
        // Generation
        // ============================================================
        (
            QuizPhase::Configuring { .. } | QuizPhase::Active { .. },
            QuizEvent::Generate {
                topic,
                document_id,
                count,
            },
        ) => {
            let topic = topic.trim();
            if topic.is_empty() {
                return Err(TransitionError::EmptyInput);
            }
            let Some(document_id) = document_id else {
                return Err(TransitionError::MissingDocument);
            };
            if count == 0 {
                return Err(TransitionError::InvalidQuestionCount);
            }

            let stamp = state.generation.next();
            let new_state = QuizState {
                phase: QuizPhase::Generating {
                    topic: topic.to_string(),
                    document_id,
                    count,
                },
                generation: stamp,
            };
            Ok(TransitionResult::new(new_state)
                .with_effect(QuizEffect::PublishState)
                .with_effect(QuizEffect::GenerateQuiz {
                    stamp,
                    topic: topic.to_string(),
                    document_id,
                    count,
                }))
        }

        (QuizPhase::Generating { .. }, QuizEvent::Generate { .. }) => Err(TransitionError::Busy),

        (QuizPhase::Graded { .. }, QuizEvent::Generate { .. }) => Err(
            TransitionError::InvalidTransition("quiz is graded; start a new session first".into()),
        ),

        (QuizPhase::Generating { document_id, .. }, QuizEvent::QuizGenerated { stamp, payload })
            if stamp == state.generation =>
        {
            match QuizSession::from_payload(payload, *document_id) {
                Ok(session) => Ok(TransitionResult::new(
                    state.with_phase(QuizPhase::Active { session }),
                )
                .with_effect(QuizEffect::PublishState)),
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding malformed generated quiz");
                    Ok(failed_generation(state, MALFORMED_QUIZ.to_string()))
                }
            }
        }

        (QuizPhase::Generating { .. }, QuizEvent::GenerationFailed { stamp, error })
            if stamp == state.generation =>
        {
            Ok(failed_generation(state, generation_failure_message(&error)))
        }

        (_, QuizEvent::QuizGenerated { stamp, .. } | QuizEvent::GenerationFailed { stamp, .. }) => {
            Err(stale(state, stamp))
        }

        // ============================================================
        // Answering
        // ============================================================
        (
            QuizPhase::Active { session },
            QuizEvent::SelectAnswer {
                question_index,
                option,
            },
        ) => {
            let mut session = session.clone();
            session.select(question_index, option)?;
            Ok(TransitionResult::new(state.with_phase(QuizPhase::Active { session }))
                .with_effect(QuizEffect::PublishState))
        }

        (QuizPhase::Graded { .. }, QuizEvent::SelectAnswer { .. }) => Err(
            TransitionError::InvalidTransition("answers are locked after grading".into()),
        ),

        (_, QuizEvent::SelectAnswer { .. }) => Err(TransitionError::InvalidTransition(
            "no active quiz to answer".into(),
        )),

        // ============================================================
        // Grading
        // ============================================================
        (QuizPhase::Active { session }, QuizEvent::Grade) => {
            if !session.is_complete() {
                return Err(TransitionError::Incomplete {
                    answered: session.answers.len(),
                    total: session.questions.len(),
                });
            }

            let mut session = session.clone();
            let score = session.grade();
            let quiz_id = session.id;
            let total = session.questions.len();

            Ok(TransitionResult::new(state.with_phase(QuizPhase::Graded {
                session,
                report: ReportStatus::Pending,
            }))
            .with_effect(QuizEffect::PublishState)
            .with_effect(QuizEffect::ReportAttempt {
                stamp: state.generation,
                quiz_id,
                score,
                total,
            }))
        }

        (QuizPhase::Graded { .. }, QuizEvent::Grade) => Err(TransitionError::InvalidTransition(
            "quiz is already graded".into(),
        )),

        (_, QuizEvent::Grade) => Err(TransitionError::InvalidTransition(
            "no active quiz to grade".into(),
        )),

        // The report never changes grading, only its display status
        (
            QuizPhase::Graded {
                session,
                report: ReportStatus::Pending,
            },
            QuizEvent::ReportSettled {
                stamp,
                quiz_id,
                result,
            },
        ) if stamp == state.generation && quiz_id == session.id => {
            let (report, notice) = match result {
                Ok(record) => (
                    ReportStatus::Recorded {
                        attempt_id: record.id,
                    },
                    QuizNotice::AttemptRecorded {
                        attempt_id: record.id,
                    },
                ),
                Err(e) => (
                    ReportStatus::Failed {
                        message: e.message.clone(),
                    },
                    QuizNotice::AttemptReportFailed { message: e.message },
                ),
            };
            Ok(TransitionResult::new(state.with_phase(QuizPhase::Graded {
                session: session.clone(),
                report,
            }))
            .with_effects([QuizEffect::PublishState, QuizEffect::Notify(notice)]))
        }

        (_, QuizEvent::ReportSettled { stamp, .. }) => Err(stale(state, stamp)),

        // ============================================================
        // Reset
        // ============================================================
        (_, QuizEvent::NewSession) => Ok(TransitionResult::new(QuizState {
            phase: QuizPhase::default(),
            generation: state.generation.next(),
        })
        .with_effect(QuizEffect::PublishState)),
    }
}
