//! Generative model access.
//!
//! Everything that needs a language model goes through the
//! [`GenerativeModel`] trait: symptom classification, the conversational
//! intake decode and history analysis. [`GeminiClient`] implements it over
//! the Gemini REST API.

pub mod classify;
pub mod intake;

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AiConfig;
use crate::error::{Error, Result};

pub use classify::{classify_symptom, parse_departments};
pub use intake::{parse_intake_reply, IntakeReply};

/// Header carrying the API key.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// A text-in, text-out generative model.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Generate a completion for `prompt`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NetworkFailure`] if the model cannot be reached or
    /// returns no text.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Gemini `generateContent` client.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    /// Build a client from the `ai` configuration section.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] if no API key is configured, or
    /// [`Error::NetworkFailure`] if the HTTP client cannot be built.
    pub fn from_config(config: &AiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::ConfigValidation {
                message: "ai.api_key is not set (ERDISPATCH_AI__API_KEY)".to_string(),
            })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Content<'a> {
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
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate.
    fn text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        (!text.is_empty()).then_some(text)
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = GenerateRequest {
            contents: [Content {
                parts: [RequestPart { text: prompt }],
            }],
        };

        debug!(model = %self.model, prompt_len = prompt.len(), "Calling generative model");
        let response = self
            .http
            .post(self.url())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(%status, "Generative model request failed");
            return Err(Error::network(format!("model returned {status}: {detail}")));
        }

        let parsed: GenerateResponse = response.json().await?;
        parsed
            .text()
            .ok_or_else(|| Error::network("model returned no text"))
    }
}

/// Markdown code fence around a model answer, compiled once.
static FENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").ok());

/// Pull the JSON object out of a model answer that may be wrapped in a
/// Markdown code fence or surrounded by prose.
pub(crate) fn extract_json(answer: &str) -> Option<&str> {
    let trimmed = answer.trim();
    let fence = FENCE.as_ref()?;
    if let Some(inner) = fence.captures(trimmed).and_then(|c| c.get(1)) {
        return Some(inner.as_str());
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (start < end).then(|| &trimmed[start..=end])
}
