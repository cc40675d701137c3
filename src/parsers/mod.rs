pub mod json;
pub mod llm;

use std::future::Future;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::PARSER_STRATEGY_ENV;
use crate::error::GeminiError;
use crate::parsers::json::JsonParser;
use crate::parsers::llm::LlmParser;
use crate::types::Message;

/// Turns captured CLI output into an ordered message sequence.
///
/// Implementations skip individually corrupt lines and only fail when the
/// whole payload cannot be decoded as the detected format.
pub trait OutputParser: Send + Sync {
    /// Identity reported in the client's init message.
    fn name(&self) -> &'static str;

    fn parse(
        &self,
        stdout: &str,
        stderr: &str,
    ) -> impl Future<Output = Result<Vec<Message>, GeminiError>> + Send;
}

/// Parser selection as it appears in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParserStrategy {
    #[default]
    Json,
    Llm,
}

impl FromStr for ParserStrategy {
    type Err = GeminiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "llm" => Ok(Self::Llm),
            other => Err(GeminiError::Configuration(format!(
                "unknown parser strategy: {other}"
            ))),
        }
    }
}

impl ParserStrategy {
    /// Read `GEMINI_PARSER_STRATEGY`. Unknown values fall back to JSON.
    pub fn from_env() -> Self {
        match std::env::var(PARSER_STRATEGY_ENV) {
            Ok(value) => value.parse().unwrap_or_else(|e: GeminiError| {
                tracing::warn!("{e}; using JSON parser");
                Self::Json
            }),
            Err(_) => Self::Json,
        }
    }
}

/// The closed set of parser implementations.
pub enum ParserKind {
    Json(JsonParser),
    Llm(LlmParser),
}

impl Default for ParserKind {
    fn default() -> Self {
        Self::Json(JsonParser)
    }
}

impl ParserKind {
    /// Build the parser for `strategy`. Selection never fails: a variant that
    /// cannot be constructed degrades to the JSON parser with a warning.
    pub fn from_strategy(strategy: ParserStrategy) -> Self {
        match strategy {
            ParserStrategy::Json => Self::Json(JsonParser),
            ParserStrategy::Llm => match LlmParser::from_env() {
                Ok(parser) => Self::Llm(parser),
                Err(e) => {
                    tracing::warn!("failed to create LLM parser: {e}; using JSON parser");
                    Self::Json(JsonParser)
                }
            },
        }
    }

    pub fn from_env() -> Self {
        Self::from_strategy(ParserStrategy::from_env())
    }
}

impl OutputParser for ParserKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Json(p) => p.name(),
            Self::Llm(p) => p.name(),
        }
    }

    async fn parse(&self, stdout: &str, stderr: &str) -> Result<Vec<Message>, GeminiError> {
        match self {
            Self::Json(p) => p.parse(stdout, stderr).await,
            Self::Llm(p) => p.parse(stdout, stderr).await,
        }
    }
}

/// Session id used when the CLI did not supply one: `gemini-<unix millis>`.
/// Best-effort unique only.
pub fn synthesize_session_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("gemini-{millis}")
}
