//! Wire types exchanged with the study backend

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Backend identifier of a generated quiz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuizId(pub i64);

/// Backend identifier of an uploaded document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub i64);

impl fmt::Display for QuizId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Request description
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// `{ method, path, body }` request handed to a transport
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayRequest {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<Value>,
}

impl GatewayRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            body: Some(body),
        }
    }
}

// ============================================================================
// Chat
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct AskRequest {
    pub question: String,
}

/// Document excerpt the answer was grounded on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub page_content: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<SourceDocument>,
}

// ============================================================================
// Quizzes
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct GenerateQuizRequest {
    pub topic: String,
    pub num_questions: u32,
    pub document_id: DocumentId,
}

/// One generated question as the backend sends it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionPayload {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizPayload {
    pub id: QuizId,
    pub topic: String,
    pub questions: Vec<QuestionPayload>,
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptReport {
    pub quiz_id: QuizId,
    pub score: usize,
    pub total_questions: usize,
}

/// Stored attempt, returned as the report acknowledgement and by history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: i64,
    pub quiz_id: QuizId,
    pub score: f64,
    pub total_questions: usize,
    #[serde(default)]
    pub completed_at: Option<NaiveDateTime>,
}

/// One history line: `#7 quiz 42: 3/5 2026-03-01 14:05`
impl fmt::Display for AttemptRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} quiz {}: {}/{}",
            self.id, self.quiz_id, self.score, self.total_questions
        )?;
        if let Some(at) = self.completed_at {
            write!(f, " {}", at.format("%Y-%m-%d %H:%M"))?;
        }
        Ok(())
    }
}

/// FastAPI error body
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorDetail {
    pub detail: Value,
}

impl ErrorDetail {
    /// Flatten `detail` (a string, or a list of validation errors) into one line
    pub fn message(&self) -> String {
        match &self.detail {
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.get("msg")
                        .and_then(Value::as_str)
                        .map_or_else(|| item.to_string(), str::to_string)
                })
                .collect::<Vec<_>>()
                .join("; "),
            other => other.to_string(),
        }
    }
}
