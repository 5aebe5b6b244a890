
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::config::GenerationConfig;
use crate::{KbError, Result};

/// Text completion service
#[async_trait]
pub trait Generator: Send + Sync {
    /// Completes `prompt`. Failures are reported as [`KbError::GenerationFailed`].
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: Option<String>,
    error: Option<String>,
}

/// [`Generator`] backed by Ollama's `/api/generate`. Calls are not retried.
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    endpoint: Url,
    model: String,
    temperature: f32,
    agent: ureq::Agent,
}

impl OllamaGenerator {
    #[inline]
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let endpoint = config
            .ollama_url()
            .map_err(|e| KbError::Config(e.to_string()))?
            .join("/api/generate")
            .map_err(|e| KbError::Config(format!("invalid generation URL: {}", e)))?;

        // Error statuses are inspected by hand so Ollama's error message survives
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_seconds)))
            .http_status_as_error(false)
            .build()
            .into();

        Ok(Self {
            endpoint,
            model: config.model.clone(),
            temperature: config.temperature,
            agent,
        })
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn generate_blocking(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
            },
        };
        let body = serde_json::to_string(&request)
            .map_err(|e| KbError::GenerationFailed(format!("could not encode request: {}", e)))?;

        info!(
            "Querying {} with a prompt of {} chars",
            self.model,
            prompt.len()
        );

        let mut response = self
            .agent
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .send(&body)
            .map_err(|e| match e {
                ureq::Error::Timeout(_) => {
                    KbError::GenerationFailed(format!("{} timed out", self.endpoint))
                }
                other => KbError::GenerationFailed(format!(
                    "could not reach {}: {}",
                    self.endpoint, other
                )),
            })?;

        let status = response.status();
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|e| KbError::GenerationFailed(format!("could not read response: {}", e)))?;
        let parsed: Option<GenerateResponse> = serde_json::from_str(&text).ok();

        if let Some(error) = parsed.as_ref().and_then(|p| p.error.as_deref()) {
            return Err(KbError::GenerationFailed(format!(
                "model error (HTTP {}): {}",
                status.as_u16(),
                error
            )));
        }
        if !status.is_success() {
            return Err(KbError::GenerationFailed(format!(
                "HTTP {} from {}",
                status.as_u16(),
                self.endpoint
            )));
        }

        let reply = parsed
            .and_then(|p| p.response)
            .ok_or_else(|| KbError::GenerationFailed("unexpected response format".to_string()))?;

        debug!("Received {} chars from {}", reply.len(), self.model);
        Ok(reply.trim().to_string())
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    #[inline]
    async fn generate(&self, prompt: &str) -> Result<String> {
        let generator = self.clone();
        let prompt = prompt.to_string();

        tokio::task::spawn_blocking(move || generator.generate_blocking(&prompt))
            .await
            .map_err(|e| KbError::GenerationFailed(format!("generation task failed: {}", e)))?
    }
}
