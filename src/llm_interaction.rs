//! HTTP clients for the model providers.
//!
//! Each provider implements [`ModelClient`]: one prompt in, the concatenated
//! response text out. No retries; a failed call is reported to the caller.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, instrument};

use crate::config::{ModelSettings, Provider};
use crate::constants;
use crate::error::{ModelError, PipelineError, Stage};

/// One model call.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}


#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Short identifier for logs, e.g. `gemini/gemini-2.0-flash`.
    fn name(&self) -> String;

    /// Send the prompt and return the raw response text. An empty string means
    /// the provider answered with no text.
    async fn generate(&self, request: &ModelRequest) -> Result<String, ModelError>;
}

/// Build the client for a stage. Fails before any network activity when the
/// provider's credential is missing.
pub fn create_client(
    settings: &ModelSettings,
    stage: Stage,
) -> Result<Arc<dyn ModelClient>, PipelineError> {
    let api_key = settings.credential(stage)?.map(str::to_string);
    let http = Client::builder()
        .timeout(settings.timeout)
        .build()
        .map_err(|e| PipelineError::Configuration(format!("HTTP client: {}", e)))?;

    debug!(%stage, provider = %settings.provider, model = %settings.model, "Creating model client");
    let client: Arc<dyn ModelClient> = match settings.provider {
        Provider::Gemini => Arc::new(GeminiClient {
            http,
            base_url: settings.base_url.clone(),
            model: settings.model.clone(),
            api_key: api_key.unwrap_or_default(),
        }),
        Provider::Anthropic => Arc::new(AnthropicClient {
            http,
            base_url: settings.base_url.clone(),
            model: settings.model.clone(),
            api_key: api_key.unwrap_or_default(),
        }),
        Provider::Ollama => Arc::new(OllamaClient {
            http,
            base_url: settings.base_url.clone(),
            model: settings.model.clone(),
        }),
    };
    Ok(client)
}

/// Turn a non-success status into [`ModelError::Api`] and decode the body.
async fn read_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
    provider: &str,
) -> Result<T, ModelError> {
    let status = response.status();
    if !status.is_success() {
        let error_body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error body".to_string());
        error!(%status, %error_body, provider, "Model API request failed");
        return Err(ModelError::Api {
            status: status.as_u16(),
            message: error_body,
        });
    }

    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| {
        error!(provider, error = %e, "Failed to parse model API response");
        ModelError::InvalidResponse(format!("{} response: {}", provider, e))
    })
}

// --- Gemini (generativelanguage.googleapis.com) ---

pub struct GeminiClient {
    http: Client,
    base_url: String,
    model: String,
    api_key: String,
}

#[derive(Deserialize, Debug)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize, Debug)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize, Debug)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize, Debug)]
struct GeminiPart {
    text: Option<String>,
}

#[async_trait]
impl ModelClient for GeminiClient {
    fn name(&self) -> String {
        format!("gemini/{}", self.model)
    }

    #[instrument(skip(self, request), fields(model = %self.model, prompt_len = request.prompt.len()))]
    async fn generate(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);

        let mut generation_config = json!({ "maxOutputTokens": request.max_tokens });
        if let Some(temperature) = request.temperature {
            generation_config["temperature"] = json!(temperature);
        }
        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            "generationConfig": generation_config,
        });
        if let Some(system) = &request.system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let parsed: GeminiResponse = read_json(response, "gemini").await?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        debug!(response_len = text.len(), "Received Gemini response");
        Ok(text)
    }
}

// --- Anthropic Messages API ---

pub struct AnthropicClient {
    http: Client,
    base_url: String,
    model: String,
    api_key: String,
}

#[derive(Deserialize, Debug)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum AnthropicBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[async_trait]
impl ModelClient for AnthropicClient {
    fn name(&self) -> String {
        format!("anthropic/{}", self.model)
    }

    #[instrument(skip(self, request), fields(model = %self.model, prompt_len = request.prompt.len()))]
    async fn generate(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let url = format!("{}/v1/messages", self.base_url);

        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "messages": [{ "role": "user", "content": request.prompt }],
        });
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", constants::ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;
        let parsed: AnthropicResponse = read_json(response, "anthropic").await?;

        let text: String = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicBlock::Text { text } => Some(text),
                AnthropicBlock::Other => None,
            })
            .collect();
        debug!(response_len = text.len(), "Received Anthropic response");
        Ok(text)
    }
}

// --- Ollama /api/generate ---

pub struct OllamaClient {
    http: Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool, // We want the full response, not a stream
    options: serde_json::Value,
}

#[derive(Deserialize, Debug)]
struct OllamaResponse {
    model: String,
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

#[async_trait]
impl ModelClient for OllamaClient {
    fn name(&self) -> String {
        format!("ollama/{}", self.model)
    }

    #[instrument(skip(self, request), fields(model = %self.model, prompt_len = request.prompt.len()))]
    async fn generate(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let url = format!("{}/api/generate", self.base_url);

        let mut options = json!({ "num_predict": request.max_tokens });
        if let Some(temperature) = request.temperature {
            options["temperature"] = json!(temperature);
        }
        let payload = OllamaRequest {
            model: &self.model,
            prompt: &request.prompt,
            system: request.system.as_deref(),
            stream: false,
            options,
        };

        let response = self.http.post(&url).json(&payload).send().await?;
        let parsed: OllamaResponse = read_json(response, "ollama").await?;

        debug!(model = %parsed.model, done = parsed.done, response_len = parsed.response.len(), "Received Ollama response");
        Ok(parsed.response)
    }
}
