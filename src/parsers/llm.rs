use std::fmt;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::error::GeminiError;
use crate::parsers::{OutputParser, synthesize_session_id};
use crate::types::{AssistantMessage, Message, ResultMessage};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub const DEFAULT_PARSER_MODEL: &str = "gemini-2.0-flash";

pub const PARSER_MODEL_ENV: &str = "GEMINI_PARSER_MODEL";

const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024; // 2MB

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const INSTRUCTIONS: &str = "You are given the raw stdout and stderr of one run of a \
command-line AI assistant. The stdout may contain banners, logs or partial JSON. \
Extract the assistant's final answer. Reply with a JSON object with exactly these \
fields: \"response\" (string, the answer text, empty if there is none), \"is_error\" \
(boolean, true if the run failed), \"error\" (string or null, the failure description).";

/// Fallback parser that asks a Gemini model to interpret output the JSON
/// parser cannot. Needs `GEMINI_API_KEY` or `GOOGLE_API_KEY`.
pub struct LlmParser {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl fmt::Debug for LlmParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmParser")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

/// The structured reply the model is instructed to produce.
#[derive(Deserialize)]
struct Interpretation {
    #[serde(default)]
    response: String,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    error: Option<String>,
}

impl LlmParser {
    pub fn new(api_key: impl Into<String>) -> Result<Self, GeminiError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(GeminiError::Configuration("LLM parser API key is empty".to_string()));
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GeminiError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            model: DEFAULT_PARSER_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Credentials from `GEMINI_API_KEY`, then `GOOGLE_API_KEY`; model from
    /// `GEMINI_PARSER_MODEL`.
    pub fn from_env() -> Result<Self, GeminiError> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_API_KEY"))
            .map_err(|_| {
                GeminiError::Configuration(
                    "LLM parser requires GEMINI_API_KEY or GOOGLE_API_KEY".to_string(),
                )
            })?;

        let mut parser = Self::new(api_key)?;
        if let Ok(model) = std::env::var(PARSER_MODEL_ENV)
            && !model.is_empty()
        {
            parser.model = model;
        }
        Ok(parser)
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn interpret(&self, stdout: &str, stderr: &str) -> Result<String, GeminiError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let prompt = format!("{INSTRUCTIONS}\n\n<stdout>\n{stdout}\n</stdout>\n\n<stderr>\n{stderr}\n</stderr>");
        let body = json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": {"responseMimeType": "application/json", "temperature": 0},
        });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_bytes = response.bytes().await.unwrap_or_default();
            let truncated = &error_bytes[..error_bytes.len().min(MAX_RESPONSE_BYTES)];
            return Err(GeminiError::Upstream {
                message: format!("{status}: {}", String::from_utf8_lossy(truncated)),
                status: Some(status.as_u16()),
            });
        }

        let bytes = response.bytes().await?;
        if bytes.len() > MAX_RESPONSE_BYTES {
            return Err(GeminiError::Upstream {
                message: format!(
                    "response too large: {} bytes (max {MAX_RESPONSE_BYTES})",
                    bytes.len()
                ),
                status: None,
            });
        }

        let reply: GenerateContentResponse = serde_json::from_slice(&bytes).map_err(|e| {
            GeminiError::parsing(
                "failed to decode parser backend reply",
                String::from_utf8_lossy(&bytes),
                e,
            )
        })?;

        reply
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.text.filter(|t| !t.trim().is_empty()))
            .ok_or_else(|| GeminiError::Upstream {
                message: "no candidate text in reply".to_string(),
                status: None,
            })
    }
}

impl OutputParser for LlmParser {
    fn name(&self) -> &'static str {
        "LlmParser"
    }

    async fn parse(&self, stdout: &str, stderr: &str) -> Result<Vec<Message>, GeminiError> {
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }

        let text = self.interpret(stdout, stderr).await?;
        let interpretation: Interpretation = serde_json::from_str(text.trim()).map_err(|e| {
            GeminiError::parsing("parser backend reply is not the requested JSON", stdout, e)
        })?;

        let mut messages = Vec::with_capacity(2);
        if !interpretation.response.is_empty() {
            messages.push(AssistantMessage::text(interpretation.response.clone()).into());
        }

        let result = if interpretation.is_error {
            interpretation.error.or_else(|| Some("Unknown error".to_string()))
        } else {
            (!interpretation.response.is_empty())
                .then(|| interpretation.response.chars().take(100).collect())
        };

        messages.push(
            ResultMessage {
                subtype: if interpretation.is_error { "error" } else { "success" }.to_string(),
                duration_ms: 0,
                is_error: interpretation.is_error,
                session_id: synthesize_session_id(),
                num_turns: 1,
                total_cost_usd: None,
                usage: None,
                result,
            }
            .into(),
        );

        Ok(messages)
    }
}
