//! Client configuration from the environment

use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api/v1";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Matches the backend's `num_questions` default
pub const DEFAULT_QUESTION_COUNT: u32 = 5;

/// Gateway and session configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL including the API prefix (e.g. `http://localhost:8000/api/v1`)
    pub api_url: String,
    /// Bearer token issued by the login flow
    pub api_token: Option<String>,
    pub request_timeout: Duration,
    /// Question count used when the user does not pick one
    pub default_question_count: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            default_question_count: DEFAULT_QUESTION_COUNT,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup (the environment in production)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let request_timeout = parse_or_default(&lookup, "STUDY_REQUEST_TIMEOUT_SECS")
            .filter(|secs: &u64| *secs > 0)
            .map_or(defaults.request_timeout, Duration::from_secs);

        let default_question_count = parse_or_default(&lookup, "STUDY_QUIZ_QUESTIONS")
            .filter(|count: &u32| *count > 0)
            .unwrap_or(defaults.default_question_count);

        Self {
            api_url: lookup("STUDY_API_URL")
                .filter(|url| !url.trim().is_empty())
                .unwrap_or(defaults.api_url),
            api_token: lookup("STUDY_API_TOKEN").filter(|token| !token.trim().is_empty()),
            request_timeout,
            default_question_count,
        }
    }
}

fn parse_or_default<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable setting, using default");
            None
        }
    }
}
