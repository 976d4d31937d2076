//! Gateway error types

use thiserror::Error;

/// Structured failure from the backend gateway
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    /// HTTP status, when the backend answered at all
    pub status: Option<u16>,
    pub message: String,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Timeout, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Auth, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::NotFound, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::InvalidRequest, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::RateLimit, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::ServerError, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Decode, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Unknown, message)
    }

    /// Classify a non-2xx status into an error
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        let err = match status {
            401 | 403 => Self::auth(format!("Authentication failed: {message}")),
            404 => Self::not_found(format!("Not found: {message}")),
            400 | 422 => Self::invalid_request(format!("Invalid request: {message}")),
            429 => Self::rate_limit(format!("Rate limit exceeded: {message}")),
            500..=599 => Self::server_error(format!("Server error: {message}")),
            _ => Self::unknown(format!("HTTP {status}: {message}")),
        };
        err.with_status(status)
    }
}

/// Failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorKind {
    /// Connection refused, DNS, body read failure
    Network,
    /// Request exceeded the configured timeout
    Timeout,
    /// Missing or expired credentials (401, 403)
    Auth,
    /// Referenced document or quiz does not exist (404)
    NotFound,
    /// Rejected by backend validation (400, 422)
    InvalidRequest,
    /// 429
    RateLimit,
    /// 5xx
    ServerError,
    /// 2xx with a body we could not decode
    Decode,
    Unknown,
}

impl GatewayErrorKind {
    /// The backend was never reached
    pub fn is_unreachable(self) -> bool {
        matches!(self, Self::Network | Self::Timeout)
    }
}
