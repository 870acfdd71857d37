//! Google Gemini `generateContent` client.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{CodeGenerator, LlmError, build_prompt};
use crate::config::LlmConfig;

/// Sampling parameters sent with every request.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub top_p: f32,
    pub top_k: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_output_tokens: 2000,
            top_p: 0.8,
            top_k: 40,
        }
    }
}

/// Backoff applied to transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [RequestContent<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: [RequestPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Gemini API client.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: Option<String>,
    model: String,
    api_base: String,
    generation: GenerationConfig,
    retry: RetryPolicy,
}

impl GeminiClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

    /// Creates a client. A missing key is not an error here: the client then
    /// answers every call with [`LlmError::NotConfigured`].
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("hackforge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            api_base: config.api_base.trim_end_matches('/').to_owned(),
            generation: GenerationConfig::default(),
            retry: RetryPolicy::default(),
        })
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }

    async fn send_request(&self, api_key: &str, text: &str) -> Result<String, LlmError> {
        let body = GenerateRequest {
            contents: [RequestContent {
                parts: [RequestPart { text }],
            }],
            generation_config: self.generation,
        };

        let res = self
            .http
            .post(self.endpoint())
            .header("X-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = res.status();
        let raw = res.text().await.map_err(map_reqwest_error)?;

        if !status.is_success() {
            return Err(classify_error(status.as_u16(), &raw));
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&raw).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        extract_text(parsed)
    }
}

#[async_trait]
impl CodeGenerator for GeminiClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::NotConfigured)?;
        let text = build_prompt(prompt);

        debug!(model = %self.model, prompt_len = prompt.len(), "calling Gemini API");

        (|| async { self.send_request(api_key, &text).await })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(self.retry.min_delay)
                    .with_max_delay(self.retry.max_delay)
                    .with_max_times(self.retry.max_retries)
                    .with_jitter(),
            )
            .when(|e: &LlmError| e.should_retry())
            .notify(|e: &LlmError, dur: Duration| {
                warn!(
                    "Gemini API call failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    e
                )
            })
            .await
    }
}

fn map_reqwest_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Transport(e.to_string())
    }
}

/// Maps a non-2xx Gemini reply onto an [`LlmError`].
fn classify_error(status: u16, body: &str) -> LlmError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|env| env.error)
        .and_then(|err| err.message)
        .unwrap_or_else(|| body.trim().to_owned());
    let lower = body.to_ascii_lowercase();

    if status == 401 || status == 403 || body.contains("API_KEY_INVALID") || body.contains("API key")
    {
        LlmError::InvalidApiKey
    } else if status == 429 || lower.contains("quota") {
        LlmError::QuotaExceeded
    } else if status == 404 || lower.contains("model_not_found") {
        LlmError::ModelNotFound(message)
    } else {
        LlmError::Http { status, message }
    }
}

fn extract_text(response: GenerateResponse) -> Result<String, LlmError> {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|content| content.parts.into_iter().next())
        .and_then(|part| part.text)
        .ok_or_else(|| LlmError::InvalidResponse("no candidate text".to_string()))
}
