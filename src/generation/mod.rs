//! Generation client: turns a prompt into a validated [`GeneratedApp`].
//!
//! Every reply, whether from a first generation or a build-fix request,
//! goes through the same path: shape validation, mandatory files, manifest,
//! then a second security-review call to the service.

pub mod backend;
pub mod mock;
pub mod prompts;
pub mod response;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::GenerationSettings;
use crate::errors::GenerationError;
use crate::util::truncate_tail;
use crate::workspace::FileSet;
pub use backend::{AnthropicBackend, CompletionBackend, CompletionRequest};
pub use response::{GeneratedApp, Manifest, SecurityVerdict};

/// Build output beyond this many trailing characters is not sent back.
pub const MAX_BUILD_ERROR_CHARS: usize = 8000;

#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub security_max_tokens: u32,
    /// Extra attempts for retryable failures.
    pub retries: u32,
    pub retry_backoff: Duration,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::from(&GenerationSettings::default())
    }
}

impl From<&GenerationSettings> for GenerationOptions {
    fn from(settings: &GenerationSettings) -> Self {
        Self {
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            security_max_tokens: settings.security_max_tokens,
            retries: settings.retries,
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
        }
    }
}

pub struct GenerationClient {
    backend: Arc<dyn CompletionBackend>,
    options: GenerationOptions,
}

impl GenerationClient {
    pub fn new(backend: Arc<dyn CompletionBackend>, options: GenerationOptions) -> Self {
        Self { backend, options }
    }

    pub async fn generate(&self, prompt: &str) -> Result<GeneratedApp, GenerationError> {
        info!(backend = self.backend.name(), "requesting app generation");
        self.generate_from(prompts::generation_prompt(prompt)).await
    }

    /// Ask for a corrected project given the original prompt and the raw
    /// toolchain failure text.
    pub async fn fix_build_errors(
        &self,
        original_prompt: &str,
        build_error_text: &str,
    ) -> Result<GeneratedApp, GenerationError> {
        info!(backend = self.backend.name(), "requesting build fix");
        let build_output = truncate_tail(build_error_text, MAX_BUILD_ERROR_CHARS);
        self.generate_from(prompts::fix_prompt(original_prompt, &build_output))
            .await
    }

    async fn generate_from(&self, user_prompt: String) -> Result<GeneratedApp, GenerationError> {
        let text = self
            .complete(CompletionRequest {
                system: Some(prompts::SYSTEM_PROMPT.to_string()),
                prompt: user_prompt,
                max_tokens: self.options.max_tokens,
                temperature: self.options.temperature,
            })
            .await?;

        let app = response::parse_generation(&text)?;
        self.check_security(&app.file_set).await?;

        info!(
            app_name = %app.app_name,
            files = app.file_set.len(),
            "generated app passed validation"
        );
        Ok(app)
    }

    /// Second pass: ask the service to classify the files for security
    /// concerns. Anything but `SAFE` rejects the whole project.
    pub async fn check_security(&self, file_set: &FileSet) -> Result<(), GenerationError> {
        let reply = self
            .complete(CompletionRequest {
                system: None,
                prompt: prompts::security_prompt(file_set),
                max_tokens: self.options.security_max_tokens,
                temperature: 0.0,
            })
            .await?;

        match response::parse_security_verdict(&reply) {
            SecurityVerdict::Safe => Ok(()),
            SecurityVerdict::Issues(issues) => {
                warn!(count = issues.len(), "security review rejected generated code");
                Err(GenerationError::SecurityRejected { issues })
            }
        }
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, GenerationError> {
        let mut attempt = 0;
        loop {
            match self.backend.complete(request.clone()).await {
                Ok(text) => return Ok(text),
                Err(err) if err.is_retryable() && attempt < self.options.retries => {
                    attempt += 1;
                    let delay = match err {
                        GenerationError::RateLimit {
                            retry_after: Some(secs),
                        } => Duration::from_secs(secs),
                        _ => self.options.retry_backoff * attempt,
                    };
                    warn!(
                        kind = err.kind(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying generation request"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
