//! Mock gateways for testing
//!
//! These mocks enable controller tests without a backend.

use crate::gateway::{
    AskResponse, AttemptRecord, DocumentId, Gateway, GatewayError, QuizId, QuizPayload,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};

/// A call the controllers made, as the mock saw it
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    Ask(String),
    GenerateQuiz {
        topic: String,
        document_id: DocumentId,
        count: u32,
    },
    ReportAttempt {
        quiz_id: QuizId,
        score: usize,
        total: usize,
    },
    ListAttempts,
}

// ============================================================================
// Mock Gateway
// ============================================================================

/// Mock gateway that returns queued responses per call type
#[derive(Default)]
pub struct MockGateway {
    answers: Mutex<VecDeque<Result<AskResponse, GatewayError>>>,
    quizzes: Mutex<VecDeque<Result<QuizPayload, GatewayError>>>,
    reports: Mutex<VecDeque<Result<AttemptRecord, GatewayError>>>,
    attempts: Mutex<VecDeque<Result<Vec<AttemptRecord>, GatewayError>>>,
    /// Record of all calls made
    pub calls: Mutex<Vec<GatewayCall>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_answer(&self, answer: impl Into<String>) {
        self.answers.lock().unwrap().push_back(Ok(AskResponse {
            answer: answer.into(),
            sources: vec![],
        }));
    }

    pub fn queue_ask_error(&self, error: GatewayError) {
        self.answers.lock().unwrap().push_back(Err(error));
    }

    pub fn queue_quiz(&self, payload: QuizPayload) {
        self.quizzes.lock().unwrap().push_back(Ok(payload));
    }

    pub fn queue_quiz_error(&self, error: GatewayError) {
        self.quizzes.lock().unwrap().push_back(Err(error));
    }

    pub fn queue_report(&self, result: Result<AttemptRecord, GatewayError>) {
        self.reports.lock().unwrap().push_back(result);
    }

    pub fn queue_attempts(&self, attempts: Vec<AttemptRecord>) {
        self.attempts.lock().unwrap().push_back(Ok(attempts));
    }

    /// Get recorded calls
    pub fn recorded_calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: GatewayCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn next<T>(queue: &Mutex<VecDeque<Result<T, GatewayError>>>) -> Result<T, GatewayError> {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::network("No mock response queued")))
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn ask(&self, question: &str) -> Result<AskResponse, GatewayError> {
        self.record(GatewayCall::Ask(question.to_string()));
        Self::next(&self.answers)
    }

    async fn generate_quiz(
        &self,
        topic: &str,
        document_id: DocumentId,
        count: u32,
    ) -> Result<QuizPayload, GatewayError> {
        self.record(GatewayCall::GenerateQuiz {
            topic: topic.to_string(),
            document_id,
            count,
        });
        Self::next(&self.quizzes)
    }

    async fn report_attempt(
        &self,
        quiz_id: QuizId,
        score: usize,
        total: usize,
    ) -> Result<AttemptRecord, GatewayError> {
        self.record(GatewayCall::ReportAttempt {
            quiz_id,
            score,
            total,
        });
        Self::next(&self.reports)
    }

    async fn list_attempts(&self) -> Result<Vec<AttemptRecord>, GatewayError> {
        self.record(GatewayCall::ListAttempts);
        Self::next(&self.attempts)
    }
}

// ============================================================================
// Delayed Mock Gateway (for stale response testing)
// ============================================================================

/// Mock gateway whose calls take `delay` before answering
pub struct DelayedMockGateway {
    pub inner: MockGateway,
    delay: Duration,
    /// Notified when a call starts (for test synchronization)
    pub call_started: Arc<Notify>,
}

impl DelayedMockGateway {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MockGateway::new(),
            delay,
            call_started: Arc::new(Notify::new()),
        }
    }

    async fn pause(&self) {
        self.call_started.notify_one();
        tokio::time::sleep(self.delay).await;
    }
}

#[async_trait]
impl Gateway for DelayedMockGateway {
    async fn ask(&self, question: &str) -> Result<AskResponse, GatewayError> {
        self.pause().await;
        self.inner.ask(question).await
    }

    async fn generate_quiz(
        &self,
        topic: &str,
        document_id: DocumentId,
        count: u32,
    ) -> Result<QuizPayload, GatewayError> {
        self.pause().await;
        self.inner.generate_quiz(topic, document_id, count).await
    }

    async fn report_attempt(
        &self,
        quiz_id: QuizId,
        score: usize,
        total: usize,
    ) -> Result<AttemptRecord, GatewayError> {
        self.pause().await;
        self.inner.report_attempt(quiz_id, score, total).await
    }

    async fn list_attempts(&self) -> Result<Vec<AttemptRecord>, GatewayError> {
        self.pause().await;
        self.inner.list_attempts().await
    }
}

/// Wait until the watched state satisfies `pred`, or give up after `timeout`
pub async fn wait_for_state<T: Clone>(
    rx: &mut watch::Receiver<T>,
    timeout: Duration,
    pred: impl FnMut(&T) -> bool,
) -> Option<T> {
    match tokio::time::timeout(timeout, rx.wait_for(pred)).await {
        Ok(Ok(state)) => Some(state.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::QuestionPayload;
    use crate::gateway::LoggingGateway;
    use crate::runtime::{spawn_conversation, spawn_quiz, ControlError};
    use crate::state_machine::TransitionError;
    use crate::state_machine::{
        ConversationNotice, ConversationPhase, QuizNotice, QuizPhase, QuizState, ReportStatus, Role,
    };

    const WAIT: Duration = Duration::from_secs(2);

    fn quiz_payload(correct: &[&str]) -> QuizPayload {
        QuizPayload {
            id: QuizId(42),
            topic: "Photosynthesis".to_string(),
            questions: correct
                .iter()
                .enumerate()
                .map(|(i, c)| QuestionPayload {
                    question: format!("Question {i}?"),
                    options: vec!["A".into(), "B".into(), "C".into()],
                    correct_answer: (*c).to_string(),
                })
                .collect(),
            created_at: None,
        }
    }

    fn record(id: i64) -> AttemptRecord {
        AttemptRecord {
            id,
            quiz_id: QuizId(42),
            score: 1.0,
            total_questions: 2,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn test_mock_gateway_queues_and_records() {
        let mock = MockGateway::new();
        mock.queue_answer("Hello");

        let response = mock.ask("Hi").await.unwrap();
        assert_eq!(response.answer, "Hello");

        // Second call should fail (no more responses)
        let err = mock.ask("Again").await.unwrap_err();
        assert!(err.kind.is_unreachable());
        assert_eq!(
            mock.recorded_calls(),
            vec![
                GatewayCall::Ask("Hi".to_string()),
                GatewayCall::Ask("Again".to_string())
            ]
        );
    }

    /// Integration test: question and answer round trip
    #[tokio::test]
    async fn test_conversation_answer() {
        let gateway = Arc::new(MockGateway::new());
        gateway.queue_answer("ATP stores energy.");

        let handle = spawn_conversation(gateway.clone());
        let mut rx = handle.watch();
        handle.submit("What is ATP?").await.unwrap();

        let state = wait_for_state(&mut rx, WAIT, |s| s.turns().len() == 2)
            .await
            .expect("answer never arrived");
        assert_eq!(state.phase(), ConversationPhase::Idle);
        assert_eq!(state.turns()[1].role, Role::Assistant);
        assert_eq!(state.turns()[1].content, "ATP stores energy.");
        assert_eq!(
            gateway.recorded_calls(),
            vec![GatewayCall::Ask("What is ATP?".to_string())]
        );
    }

    /// Integration test: failure yields an apology and a notice
    #[tokio::test]
    async fn test_conversation_failure_notice() {
        let gateway = Arc::new(MockGateway::new());
        gateway.queue_ask_error(GatewayError::from_status(500, "boom"));

        let handle = spawn_conversation(gateway);
        let mut notices = handle.subscribe();
        let mut rx = handle.watch();
        handle.submit("Why?").await.unwrap();

        let state = wait_for_state(&mut rx, WAIT, |s| s.turns().len() == 2)
            .await
            .unwrap();
        assert_eq!(state.phase(), ConversationPhase::Idle);
        assert_eq!(state.turns()[0].content, "Why?");

        let notice = tokio::time::timeout(WAIT, notices.recv()).await.unwrap().unwrap();
        assert!(matches!(
            notice,
            ConversationNotice::AskFailed {
                status: Some(500),
                ..
            }
        ));
    }

    /// Integration test: a second submit while awaiting changes nothing
    #[tokio::test]
    async fn test_conversation_busy_submit_is_rejected() {
        let gateway = Arc::new(DelayedMockGateway::new(Duration::from_millis(200)));
        gateway.inner.queue_answer("first answer");

        let handle = spawn_conversation(gateway.clone());
        let mut notices = handle.subscribe();
        handle.submit("first").await.unwrap();
        assert_eq!(
            handle.submit("second").await,
            Err(ControlError::Rejected(TransitionError::Busy))
        );
        assert_eq!(handle.snapshot().turns().len(), 1);

        let notice = tokio::time::timeout(WAIT, notices.recv()).await.unwrap().unwrap();
        assert!(matches!(notice, ConversationNotice::Rejected { .. }));

        let mut rx = handle.watch();
        let state = wait_for_state(&mut rx, WAIT, |s| !s.is_pending())
            .await
            .unwrap();
        assert_eq!(state.turns().len(), 2);
        assert_eq!(gateway.inner.recorded_calls().len(), 1);
    }

    /// Integration test: reset while awaiting discards the late answer
    #[tokio::test]
    async fn test_conversation_reset_discards_late_answer() {
        let gateway = Arc::new(DelayedMockGateway::new(Duration::from_millis(100)));
        gateway.inner.queue_answer("too late");

        let handle = spawn_conversation(gateway.clone());
        handle.submit("question").await.unwrap();
        gateway.call_started.notified().await;
        handle.reset().await.unwrap();

        // Let the delayed answer arrive and be dropped
        tokio::time::sleep(Duration::from_millis(300)).await;

        let state = handle.snapshot();
        assert!(state.turns().is_empty());
        assert_eq!(state.phase(), ConversationPhase::Idle);
    }

    /// Integration test: generate, answer, grade, report
    #[tokio::test]
    async fn test_quiz_full_flow() {
        let gateway = Arc::new(MockGateway::new());
        gateway.queue_quiz(quiz_payload(&["A", "B"]));
        gateway.queue_report(Ok(record(7)));

        let handle = spawn_quiz(gateway.clone());
        let mut rx = handle.watch();
        handle
            .generate("Photosynthesis", Some(DocumentId(3)), 2)
            .await
            .unwrap();

        wait_for_state(&mut rx, WAIT, |s| matches!(s.phase(), QuizPhase::Active { .. }))
            .await
            .expect("quiz never became active");
        assert!(!handle.can_submit());

        handle.select_answer(0, "A").await.unwrap();
        handle.select_answer(1, "C").await.unwrap();
        wait_for_state(&mut rx, WAIT, QuizState::can_submit)
            .await
            .unwrap();
        handle.grade().await.unwrap();

        let state = wait_for_state(&mut rx, WAIT, |s| {
            matches!(
                s.phase(),
                QuizPhase::Graded {
                    report: ReportStatus::Recorded { .. },
                    ..
                }
            )
        })
        .await
        .expect("report never settled");
        assert_eq!(state.session().unwrap().score(), Some(1));

        assert_eq!(
            gateway.recorded_calls(),
            vec![
                GatewayCall::GenerateQuiz {
                    topic: "Photosynthesis".to_string(),
                    document_id: DocumentId(3),
                    count: 2,
                },
                GatewayCall::ReportAttempt {
                    quiz_id: QuizId(42),
                    score: 1,
                    total: 2,
                },
            ]
        );
    }

    /// Integration test: a failed report leaves the grade alone
    #[tokio::test]
    async fn test_quiz_report_failure_keeps_grade() {
        let gateway = Arc::new(MockGateway::new());
        gateway.queue_quiz(quiz_payload(&["A"]));
        gateway.queue_report(Err(GatewayError::from_status(500, "db down")));

        let handle = spawn_quiz(gateway);
        let mut notices = handle.subscribe();
        let mut rx = handle.watch();
        handle.generate("t", Some(DocumentId(1)), 1).await.unwrap();
        wait_for_state(&mut rx, WAIT, |s| s.session().is_some())
            .await
            .unwrap();
        handle.select_answer(0, "A").await.unwrap();
        handle.grade().await.unwrap();

        let state = wait_for_state(&mut rx, WAIT, |s| {
            matches!(
                s.phase(),
                QuizPhase::Graded {
                    report: ReportStatus::Failed { .. },
                    ..
                }
            )
        })
        .await
        .unwrap();
        assert_eq!(state.session().unwrap().score(), Some(1));

        let notice = tokio::time::timeout(WAIT, notices.recv()).await.unwrap().unwrap();
        assert!(matches!(notice, QuizNotice::AttemptReportFailed { .. }));
    }

    /// Integration test: new session while generating discards the quiz
    #[tokio::test]
    async fn test_quiz_new_session_discards_generation() {
        let gateway = Arc::new(DelayedMockGateway::new(Duration::from_millis(100)));
        gateway.inner.queue_quiz(quiz_payload(&["A"]));

        let handle = spawn_quiz(gateway.clone());
        handle.generate("t", Some(DocumentId(1)), 1).await.unwrap();
        gateway.call_started.notified().await;
        handle.new_session().await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;

        let state = handle.snapshot();
        assert_eq!(state.phase(), &QuizPhase::Configuring { last_error: None });
        assert!(state.session().is_none());
    }

    /// Integration test: generation failure goes back to configuring
    #[tokio::test]
    async fn test_quiz_generation_failure() {
        let gateway = Arc::new(MockGateway::new());
        gateway.queue_quiz_error(GatewayError::network("connection refused"));

        let handle = spawn_quiz(gateway);
        let mut rx = handle.watch();
        handle.generate("t", Some(DocumentId(1)), 3).await.unwrap();

        let state = wait_for_state(&mut rx, WAIT, |s| {
            matches!(s.phase(), QuizPhase::Configuring { last_error: Some(_) })
        })
        .await
        .unwrap();
        assert!(state.session().is_none());
    }

    #[tokio::test]
    async fn test_missing_document_is_rejected() {
        let gateway = Arc::new(MockGateway::new());
        let handle = spawn_quiz(gateway.clone());
        let mut notices = handle.subscribe();

        assert_eq!(
            handle.generate("t", None, 3).await,
            Err(ControlError::Rejected(TransitionError::MissingDocument))
        );

        let notice = tokio::time::timeout(WAIT, notices.recv()).await.unwrap().unwrap();
        assert!(matches!(notice, QuizNotice::Rejected { .. }));
        assert!(gateway.recorded_calls().is_empty());
    }

    #[tokio::test]
    async fn test_handle_reports_closed_controller() {
        use crate::runtime::ConversationHandle;
        use crate::state_machine::ConversationState;
        use tokio::sync::{broadcast, mpsc};

        let (event_tx, event_rx) = mpsc::channel(1);
        drop(event_rx);
        let handle = ConversationHandle {
            event_tx,
            state_rx: watch::channel(ConversationState::new()).1,
            notice_tx: broadcast::channel(1).0,
        };

        let err = handle.submit("hello").await.unwrap_err();
        assert!(err.is_closed());
        assert!(handle.snapshot().turns().is_empty());
    }

    /// The user turn is in the snapshot as soon as submit returns
    #[tokio::test]
    async fn test_submit_is_visible_when_it_returns() {
        let gateway = Arc::new(DelayedMockGateway::new(Duration::from_millis(200)));
        gateway.inner.queue_answer("ATP stores energy.");

        let handle = spawn_conversation(gateway);
        handle.submit("What is ATP?").await.unwrap();

        let state = handle.snapshot();
        assert_eq!(state.turns().len(), 1);
        assert_eq!(state.turns()[0].content, "What is ATP?");
        assert!(state.is_pending());

        handle.reset().await.unwrap();
        assert!(handle.snapshot().turns().is_empty());
    }

    /// Selections are applied before `select_answer` returns
    #[tokio::test]
    async fn test_selection_is_visible_when_it_returns() {
        let gateway = Arc::new(MockGateway::new());
        gateway.queue_quiz(quiz_payload(&["A", "B"]));

        let handle = spawn_quiz(gateway);
        let mut rx = handle.watch();
        handle.generate("t", Some(DocumentId(1)), 2).await.unwrap();
        assert!(matches!(
            handle.snapshot().phase(),
            QuizPhase::Generating { .. }
        ));
        wait_for_state(&mut rx, WAIT, |s| s.session().is_some())
            .await
            .unwrap();

        handle.select_answer(0, "A").await.unwrap();
        assert!(!handle.can_submit());
        assert_eq!(
            handle.grade().await,
            Err(ControlError::Rejected(TransitionError::Incomplete {
                answered: 1,
                total: 2
            }))
        );

        handle.select_answer(1, "C").await.unwrap();
        assert!(handle.can_submit());
        handle.grade().await.unwrap();
        assert_eq!(handle.snapshot().session().unwrap().score(), Some(1));
    }

    #[tokio::test]
    async fn test_attempt_history_lines() {
        use chrono::NaiveDate;

        let mock = MockGateway::new();
        let completed = NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(14, 5, 0)
            .unwrap();
        mock.queue_attempts(vec![
            AttemptRecord {
                completed_at: Some(completed),
                ..record(7)
            },
            AttemptRecord {
                score: 3.0,
                total_questions: 5,
                ..record(8)
            },
        ]);
        let gateway = LoggingGateway::new(mock);

        let lines: Vec<String> = gateway
            .list_attempts()
            .await
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            lines,
            vec![
                "#7 quiz 42: 1/2 2026-03-01 14:05".to_string(),
                "#8 quiz 42: 3/5".to_string(),
            ]
        );

        // Queue exhausted
        assert!(gateway.list_attempts().await.is_err());
    }
}
