//! Backend gateway abstraction
//!
//! The controllers only see the [`Gateway`] trait. Transport, auth headers
//! and encoding live behind it.

mod error;
mod http;
mod types;

pub use error::{GatewayError, GatewayErrorKind};
pub use http::HttpGateway;
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Logical calls the study backend offers
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Ask a question over the uploaded documents
    async fn ask(&self, question: &str) -> Result<AskResponse, GatewayError>;

    /// Generate a multiple-choice quiz from a document
    async fn generate_quiz(
        &self,
        topic: &str,
        document_id: DocumentId,
        count: u32,
    ) -> Result<QuizPayload, GatewayError>;

    /// Record a graded attempt
    async fn report_attempt(
        &self,
        quiz_id: QuizId,
        score: usize,
        total: usize,
    ) -> Result<AttemptRecord, GatewayError>;

    /// Past attempts of the current user
    async fn list_attempts(&self) -> Result<Vec<AttemptRecord>, GatewayError>;
}

#[async_trait]
impl<T: Gateway + ?Sized> Gateway for Arc<T> {
    async fn ask(&self, question: &str) -> Result<AskResponse, GatewayError> {
        (**self).ask(question).await
    }

    async fn generate_quiz(
        &self,
        topic: &str,
        document_id: DocumentId,
        count: u32,
    ) -> Result<QuizPayload, GatewayError> {
        (**self).generate_quiz(topic, document_id, count).await
    }

    async fn report_attempt(
        &self,
        quiz_id: QuizId,
        score: usize,
        total: usize,
    ) -> Result<AttemptRecord, GatewayError> {
        (**self).report_attempt(quiz_id, score, total).await
    }

    async fn list_attempts(&self) -> Result<Vec<AttemptRecord>, GatewayError> {
        (**self).list_attempts().await
    }
}

/// Logging wrapper for gateways
pub struct LoggingGateway<G> {
    inner: G,
}

impl<G: Gateway> LoggingGateway<G> {
    pub fn new(inner: G) -> Self {
        Self { inner }
    }

    fn log_outcome<T>(
        call: &'static str,
        request_id: &str,
        started: Instant,
        result: &Result<T, GatewayError>,
    ) {
        let duration = started.elapsed();
        match result {
            Ok(_) => {
                tracing::info!(
                    call,
                    request_id,
                    duration_ms = %duration.as_millis(),
                    "Gateway call completed"
                );
            }
            Err(e) => {
                tracing::warn!(
                    call,
                    request_id,
                    duration_ms = %duration.as_millis(),
                    kind = ?e.kind,
                    status = ?e.status,
                    error = %e.message,
                    "Gateway call failed"
                );
            }
        }
    }
}

fn request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[async_trait]
impl<G: Gateway> Gateway for LoggingGateway<G> {
    async fn ask(&self, question: &str) -> Result<AskResponse, GatewayError> {
        let id = request_id();
        tracing::debug!(request_id = %id, chars = question.chars().count(), "ask");
        let started = Instant::now();
        let result = self.inner.ask(question).await;
        Self::log_outcome("ask", &id, started, &result);
        result
    }

    async fn generate_quiz(
        &self,
        topic: &str,
        document_id: DocumentId,
        count: u32,
    ) -> Result<QuizPayload, GatewayError> {
        let id = request_id();
        tracing::debug!(request_id = %id, topic, %document_id, count, "generate_quiz");
        let started = Instant::now();
        let result = self.inner.generate_quiz(topic, document_id, count).await;
        Self::log_outcome("generate_quiz", &id, started, &result);
        result
    }

    async fn report_attempt(
        &self,
        quiz_id: QuizId,
        score: usize,
        total: usize,
    ) -> Result<AttemptRecord, GatewayError> {
        let id = request_id();
        tracing::debug!(request_id = %id, %quiz_id, score, total, "report_attempt");
        let started = Instant::now();
        let result = self.inner.report_attempt(quiz_id, score, total).await;
        Self::log_outcome("report_attempt", &id, started, &result);
        result
    }

    async fn list_attempts(&self) -> Result<Vec<AttemptRecord>, GatewayError> {
        let id = request_id();
        let started = Instant::now();
        let result = self.inner.list_attempts().await;
        Self::log_outcome("list_attempts", &id, started, &result);
        result
    }
}
