//! reqwest-backed gateway talking to the study backend's REST API

use super::types::{
    AskRequest, AskResponse, AttemptRecord, AttemptReport, DocumentId, ErrorDetail,
    GatewayRequest, GenerateQuizRequest, HttpMethod, QuizId, QuizPayload,
};
use super::{Gateway, GatewayError};
use crate::config::ClientConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

const CHAT_PATH: &str = "/chat/";
const GENERATE_QUIZ_PATH: &str = "/quizzes/generate";
const ATTEMPT_PATH: &str = "/quizzes/attempt";
const ATTEMPTS_PATH: &str = "/quizzes/attempts";

/// HTTP implementation of [`Gateway`]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpGateway {
    /// Build a gateway from client configuration.
    ///
    /// # Errors
    ///
    /// Fails if the underlying HTTP client cannot be constructed (TLS backend init).
    pub fn new(config: &ClientConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::unknown(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Send a request description and return the parsed JSON body
    pub async fn send(&self, request: &GatewayRequest) -> Result<Value, GatewayError> {
        let url = self.url(&request.path);
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        };
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::timeout(format!("Request timeout: {e}"))
            } else if e.is_connect() {
                GatewayError::network(format!("Connection failed: {e}"))
            } else {
                GatewayError::unknown(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorDetail>(&body)
                .map_or_else(|_| body.clone(), |detail| detail.message());
            return Err(GatewayError::from_status(status.as_u16(), message));
        }

        serde_json::from_str(&body)
            .map_err(|e| GatewayError::decode(format!("Failed to parse response: {e} - body: {body}")))
    }

    async fn call<T: DeserializeOwned>(&self, request: GatewayRequest) -> Result<T, GatewayError> {
        let value = self.send(&request).await?;
        serde_json::from_value(value).map_err(|e| {
            GatewayError::decode(format!(
                "Unexpected response shape from {} {}: {e}",
                request.method.as_str(),
                request.path
            ))
        })
    }
}

fn to_body(body: &impl Serialize) -> Result<Value, GatewayError> {
    serde_json::to_value(body)
        .map_err(|e| GatewayError::invalid_request(format!("Failed to encode request: {e}")))
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn ask(&self, question: &str) -> Result<AskResponse, GatewayError> {
        let body = to_body(&AskRequest {
            question: question.to_string(),
        })?;
        self.call(GatewayRequest::post(CHAT_PATH, body)).await
    }

    async fn generate_quiz(
        &self,
        topic: &str,
        document_id: DocumentId,
        count: u32,
    ) -> Result<QuizPayload, GatewayError> {
        let body = to_body(&GenerateQuizRequest {
            topic: topic.to_string(),
            num_questions: count,
            document_id,
        })?;
        self.call(GatewayRequest::post(GENERATE_QUIZ_PATH, body)).await
    }

    async fn report_attempt(
        &self,
        quiz_id: QuizId,
        score: usize,
        total: usize,
    ) -> Result<AttemptRecord, GatewayError> {
        let body = to_body(&AttemptReport {
            quiz_id,
            score,
            total_questions: total,
        })?;
        self.call(GatewayRequest::post(ATTEMPT_PATH, body)).await
    }

    async fn list_attempts(&self) -> Result<Vec<AttemptRecord>, GatewayError> {
        self.call(GatewayRequest::get(ATTEMPTS_PATH)).await
    }
}
