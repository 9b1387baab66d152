use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{status}: {message}")]
    Api { status: StatusCode, message: String },

    #[error("Failed to parse response body: {0}")]
    ResponseParsing(#[source] serde_json::Error),

    #[error("Prompt was blocked by the service: {0}")]
    Blocked(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    // "STOP" | "MAX_TOKENS" | "SAFETY" | ...
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    // Non-text parts (inline data, function calls) carry no `text`.
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponseContainer {
    error: ErrorResponse,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

impl GenerateResponse {
    /// Text of the first candidate, `None` when the service produced nothing.
    fn into_text(self) -> Result<Option<String>, ApiError> {
        let Some(candidate) = self.candidates.into_iter().next() else {
            if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
                return Err(ApiError::Blocked(reason));
            }
            warn!("response contained no candidates");
            return Ok(None);
        };

        let text: String = candidate
            .content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| p.text)
            .collect();

        if text.is_empty() {
            debug!(finish_reason = ?candidate.finish_reason, "candidate carried no text");
            return Ok(None);
        }
        Ok(Some(text))
    }
}

/// Credentials and endpoint for the Gemini API.
#[derive(Debug)]
pub struct GeminiConfig {
    api_key: SecretString,
    base_url: Url,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ApiError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(ApiError::InvalidConfiguration(
                "API key cannot be empty".to_string(),
            ));
        }

        let base_url = Url::parse(DEFAULT_API_BASE).map_err(|e| {
            ApiError::InvalidConfiguration(format!("Failed to parse default base URL: {}", e))
        })?;

        Ok(Self {
            api_key: api_key.into(),
            base_url,
        })
    }

    pub fn base_url(mut self, url: &str) -> Result<Self, ApiError> {
        self.base_url = Url::parse(url).map_err(|e| {
            ApiError::InvalidConfiguration(format!("Invalid base URL '{}': {}", url, e))
        })?;
        Ok(self)
    }
}

/// Something that turns a prompt into answer text.
///
/// `Ok(None)` means the service answered successfully but said nothing.
#[async_trait]
pub trait Generate: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Option<String>, ApiError>;
}

/// A handle to one Gemini model's `generateContent` endpoint.
#[derive(Debug)]
pub struct GeminiModel {
    config: GeminiConfig,
    endpoint: Url,
    client: Client,
}

impl GeminiModel {
    /// Acquires a handle for `model_id`. No request is made; this only checks
    /// the identifier and prepares the endpoint and HTTP client.
    pub fn new(config: GeminiConfig, model_id: &str) -> Result<Self, ApiError> {
        if model_id.is_empty() || model_id.chars().any(char::is_whitespace) {
            return Err(ApiError::InvalidConfiguration(format!(
                "Invalid model name '{}'",
                model_id
            )));
        }

        let endpoint = Self::endpoint(&config.base_url, model_id)?;
        let client = Client::builder().build().map_err(|e| {
            ApiError::InvalidConfiguration(format!("Failed to build HTTP client: {}", e))
        })?;

        debug!(%endpoint, "model handle ready");
        Ok(Self {
            config,
            endpoint,
            client,
        })
    }

    fn endpoint(base_url: &Url, model_id: &str) -> Result<Url, ApiError> {
        let action = format!("{}:generateContent", model_id);
        let mut url = base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ApiError::InvalidConfiguration(format!("Base URL '{}' cannot take a path", base_url))
            })?
            .pop_if_empty()
            .extend(["v1beta", "models", action.as_str()]);
        Ok(url)
    }
}

/// Boxed [`GeminiModel`], the default way `asky` reaches the service.
pub fn open_gemini(config: GeminiConfig, model_id: &str) -> Result<Box<dyn Generate>, ApiError> {
    Ok(Box::new(GeminiModel::new(config, model_id)?))
}

#[async_trait]
impl Generate for GeminiModel {
    async fn generate(&self, prompt: &str) -> Result<Option<String>, ApiError> {
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        debug!(endpoint = %self.endpoint, "sending generateContent request");
        let response = self
            .client
            .post(self.endpoint.clone())
            .header("x-goog-api-key", self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;
        trace!(%status, body = %response_text, "generateContent response");

        if !status.is_success() {
            let message = match serde_json::from_str::<ErrorResponseContainer>(&response_text) {
                Ok(container) => container.error.message,
                Err(_) => response_text,
            };
            return Err(ApiError::Api { status, message });
        }

        serde_json::from_str::<GenerateResponse>(&response_text)
            .map_err(ApiError::ResponseParsing)?
            .into_text()
    }
}
