use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::error::BackendError;
pub use judgecraft_types::TokenUsage;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// A generative-model backend.
#[async_trait]
pub trait Backend: Send + Sync {
    fn model(&self) -> Option<&str> {
        None
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<Generation, BackendError>;
}

/// Client for OpenAI-compatible `/chat/completions` endpoints.
pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            model: model.into(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    fn model(&self) -> Option<&str> {
        Some(&self.model)
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<Generation, BackendError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.user_prompt},
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| BackendError::Other(format!("request failed: {e}")))?;
        let status = resp.status();
        let retry_after = resp.headers().get(RETRY_AFTER).cloned();
        let text = resp
            .text()
            .await
            .map_err(|e| BackendError::Other(format!("failed to read response: {e}")))?;
        check_status(status, retry_after.as_ref(), &text)?;

        let v: Value = serde_json::from_str(&text)
            .map_err(|e| BackendError::Other(format!("invalid JSON response: {e}")))?;
        parse_completion(&v)
    }
}

/// Maps a non-success HTTP status to a typed error. 429 is `RateLimited`,
/// carrying the `Retry-After` seconds when the header has them.
pub(crate) fn check_status(
    status: StatusCode,
    retry_after: Option<&HeaderValue>,
    body: &str,
) -> Result<(), BackendError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(BackendError::RateLimited {
            retry_after: parse_retry_after(retry_after),
            message: format!("HTTP 429: {body}"),
        });
    }
    if !status.is_success() {
        return Err(BackendError::Other(format!("HTTP {}: {}", status.as_u16(), body)));
    }
    Ok(())
}

/// Delta-seconds form only; values too large for a `Duration` are ignored.
pub(crate) fn parse_retry_after(header: Option<&HeaderValue>) -> Option<Duration> {
    let secs: f64 = header?.to_str().ok()?.trim().parse().ok()?;
    if secs < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

fn parse_completion(v: &Value) -> Result<Generation, BackendError> {
    let text = v["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| BackendError::Other(format!("response has no message content: {v}")))?
        .to_string();
    let usage = v.get("usage").map(|u| {
        let count = |key: &str| u[key].as_u64().unwrap_or(0) as u32;
        TokenUsage::new(count("prompt_tokens"), count("completion_tokens"))
    });
    Ok(Generation { text, usage })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_completion_with_usage() {
        let v = json!({
            "choices": [{"message": {"role": "assistant", "content": "EVALUATION: PASS"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });
        let generation = parse_completion(&v).unwrap();
        assert_eq!(generation.text, "EVALUATION: PASS");
        assert_eq!(generation.usage, Some(TokenUsage::new(12, 3)));
    }

    #[test]
    fn missing_content_is_an_error() {
        let err = parse_completion(&json!({"choices": []})).unwrap_err();
        assert!(matches!(err, BackendError::Other(_)));
    }

    #[test]
    fn retry_after_seconds() {
        let header = HeaderValue::from_static("2");
        assert_eq!(parse_retry_after(Some(&header)), Some(Duration::from_secs(2)));
        let date = HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(parse_retry_after(Some(&date)), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn oversized_retry_after_is_ignored() {
        let huge = HeaderValue::from_static("99999999999999999999");
        assert_eq!(parse_retry_after(Some(&huge)), None);
        let negative = HeaderValue::from_static("-5");
        assert_eq!(parse_retry_after(Some(&negative)), None);
        let fractional = HeaderValue::from_static(" 1.5 ");
        assert_eq!(parse_retry_after(Some(&fractional)), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn too_many_requests_is_rate_limited() {
        let header = HeaderValue::from_static("7");
        let err = check_status(StatusCode::TOO_MANY_REQUESTS, Some(&header), "slow down").unwrap_err();
        assert_eq!(
            err,
            BackendError::RateLimited {
                retry_after: Some(Duration::from_secs(7)),
                message: "HTTP 429: slow down".into(),
            }
        );

        let err = check_status(StatusCode::TOO_MANY_REQUESTS, None, "").unwrap_err();
        assert!(matches!(err, BackendError::RateLimited { retry_after: None, .. }));
    }

    #[test]
    fn other_statuses_are_plain_errors() {
        assert_eq!(check_status(StatusCode::OK, None, "{}"), Ok(()));
        assert_eq!(
            check_status(StatusCode::SERVICE_UNAVAILABLE, None, "down"),
            Err(BackendError::Other("HTTP 503: down".into()))
        );
    }
}
