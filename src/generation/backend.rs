//! Transport to the text-generation service.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::GenerationSettings;
use crate::errors::GenerationError;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// One completion call: an optional system prompt plus a single user turn.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Abstraction over the generation service so the pipeline can run
/// against a scripted backend in tests.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Return the text of the model's reply. Transport and API failures are
    /// mapped onto [`GenerationError`] kinds, never returned raw.
    async fn complete(&self, request: CompletionRequest) -> Result<String, GenerationError>;

    fn name(&self) -> &str;
}

/// Messages API client.
pub struct AnthropicBackend {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl fmt::Debug for AnthropicBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnthropicBackend")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: String,
}

impl AnthropicBackend {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(GenerationError::Configuration(
                "API credential is empty".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            api_key,
            model: model.into(),
        })
    }

    pub fn from_settings(
        settings: &GenerationSettings,
        api_key: impl Into<String>,
    ) -> Result<Self, GenerationError> {
        Self::new(
            settings.api_url.clone(),
            api_key,
            settings.model.clone(),
            Duration::from_secs(settings.request_timeout_secs),
        )
    }

    fn request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [
                { "role": "user", "content": request.prompt }
            ],
        });
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }
        body
    }
}

/// Map a non-success API reply onto a typed error. The error `type` from the
/// body wins; the HTTP status decides when the body is unrecognised.
pub fn map_api_error(
    status: u16,
    error_type: Option<&str>,
    message: &str,
    retry_after: Option<u64>,
) -> GenerationError {
    match (error_type, status) {
        (Some("rate_limit_error"), _) | (None, 429) => GenerationError::RateLimit { retry_after },
        (Some("authentication_error" | "permission_error"), _) | (None, 401 | 403) => {
            GenerationError::Auth
        }
        (Some("invalid_request_error"), _) | (None, 400) => {
            GenerationError::InvalidRequest(message.to_string())
        }
        (Some(kind), _) => GenerationError::Service(format!("{} ({}): {}", kind, status, message)),
        (None, _) => GenerationError::Service(format!("HTTP {}: {}", status, message)),
    }
}

fn map_transport_error(err: reqwest::Error) -> GenerationError {
    if err.is_timeout() {
        GenerationError::Service("request to the generation service timed out".to_string())
    } else if err.is_connect() {
        GenerationError::Service("could not connect to the generation service".to_string())
    } else {
        GenerationError::Service(format!("request failed: {}", err.without_url()))
    }
}

#[async_trait]
impl CompletionBackend for AnthropicBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<String, GenerationError> {
        debug!(
            model = %self.model,
            max_tokens = request.max_tokens,
            prompt_chars = request.prompt.len(),
            "sending completion request"
        );

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.request_body(&request))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            let body = response.text().await.unwrap_or_default();
            let parsed = serde_json::from_str::<ApiErrorEnvelope>(&body).ok();
            let (kind, message) = match &parsed {
                Some(envelope) => (Some(envelope.error.kind.as_str()), envelope.error.message.as_str()),
                None => (None, body.as_str()),
            };
            let err = map_api_error(status.as_u16(), kind, message, retry_after);
            warn!(status = status.as_u16(), kind = err.kind(), "generation service returned an error");
            return Err(err);
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::MalformedResponse(e.without_url().to_string()))?;

        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();
        if text.is_empty() {
            return Err(GenerationError::MalformedResponse(
                "response contained no text content".to_string(),
            ));
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> AnthropicBackend {
        AnthropicBackend::new(
            "https://api.anthropic.com/v1/messages",
            "sk-secret-value",
            "claude-3-opus-20240229",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_debug_redacts_credential() {
        let rendered = format!("{:?}", backend());
        assert!(!rendered.contains("sk-secret-value"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_empty_credential_is_configuration_error() {
        let err = AnthropicBackend::new("http://x", "  ", "m", Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn test_request_body_shape() {
        let body = backend().request_body(&CompletionRequest {
            system: Some("be terse".into()),
            prompt: "hello".into(),
            max_tokens: 4000,
            temperature: 0.2,
        });
        assert_eq!(body["model"], "claude-3-opus-20240229");
        assert_eq!(body["max_tokens"], 4000);
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hello");
    }

    #[test]
    fn test_request_body_omits_missing_system() {
        let body = backend().request_body(&CompletionRequest {
            system: None,
            prompt: "hello".into(),
            max_tokens: 10,
            temperature: 0.0,
        });
        assert!(body.get("system").is_none());
    }

    #[test]
    fn test_map_api_error_by_type() {
        assert_eq!(
            map_api_error(429, Some("rate_limit_error"), "slow down", Some(7)),
            GenerationError::RateLimit { retry_after: Some(7) }
        );
        assert_eq!(
            map_api_error(401, Some("authentication_error"), "bad key", None),
            GenerationError::Auth
        );
        assert_eq!(
            map_api_error(403, Some("permission_error"), "nope", None),
            GenerationError::Auth
        );
        assert_eq!(
            map_api_error(400, Some("invalid_request_error"), "max_tokens too large", None),
            GenerationError::InvalidRequest("max_tokens too large".into())
        );
        assert!(matches!(
            map_api_error(529, Some("overloaded_error"), "busy", None),
            GenerationError::Service(_)
        ));
    }

    #[test]
    fn test_map_api_error_by_status_when_body_unparsed() {
        assert!(matches!(
            map_api_error(429, None, "", None),
            GenerationError::RateLimit { .. }
        ));
        assert_eq!(map_api_error(401, None, "", None), GenerationError::Auth);
        assert!(matches!(
            map_api_error(502, None, "bad gateway", None),
            GenerationError::Service(msg) if msg.contains("502")
        ));
    }
}
