use std::collections::BTreeSet;
use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::GeminiError;

/// Model used when neither the options nor `GEMINI_MODEL` name one.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Environment fallback for the model name.
pub const MODEL_ENV: &str = "GEMINI_MODEL";

/// Environment switch selecting the output parser (`json` or `llm`).
pub const PARSER_STRATEGY_ENV: &str = "GEMINI_PARSER_STRATEGY";

/// Output mode requested from the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// One JSON object describing the finished turn (`-o json`).
    #[default]
    Json,
    /// Newline-delimited JSON events (`-o stream-json`).
    StreamJson,
}

impl OutputFormat {
    pub fn as_cli_arg(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::StreamJson => "stream-json",
        }
    }
}

/// Options for one query. Every field is optional in TOML form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeminiOptions {
    pub model: Option<String>,
    /// Working directory for the CLI process. Defaults to the current directory.
    pub cwd: Option<PathBuf>,
    pub sandbox: bool,
    /// Auto-accept every action the CLI proposes.
    pub yolo: bool,
    /// Session token to resume, or `"latest"`.
    pub resume: Option<String>,
    pub allowed_tools: BTreeSet<String>,
    pub output_format: OutputFormat,
}

impl GeminiOptions {
    pub fn from_toml_str(s: &str) -> Result<Self, GeminiError> {
        toml::from_str(s).map_err(|e| GeminiError::Configuration(format!("invalid options TOML: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self, GeminiError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            GeminiError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Explicit model, else `GEMINI_MODEL`, else [`DEFAULT_MODEL`].
    pub fn resolved_model(&self) -> String {
        self.model
            .clone()
            .or_else(|| env::var(MODEL_ENV).ok().filter(|m| !m.is_empty()))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn resolved_cwd(&self) -> PathBuf {
        match &self.cwd {
            Some(cwd) => cwd.clone(),
            None => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Reject option combinations the CLI cannot express.
    pub fn validate(&self) -> Result<(), GeminiError> {
        if let Some(model) = &self.model
            && model.trim().is_empty()
        {
            return Err(GeminiError::Configuration("model must not be empty".to_string()));
        }

        if let Some(resume) = &self.resume
            && resume.trim().is_empty()
        {
            return Err(GeminiError::Configuration(
                "resume must be a session token or \"latest\"".to_string(),
            ));
        }

        for tool in &self.allowed_tools {
            if tool.is_empty() || tool.contains(',') || tool.chars().any(char::is_whitespace) {
                return Err(GeminiError::Configuration(format!(
                    "invalid tool name in allowed_tools: {tool:?}"
                )));
            }
        }

        Ok(())
    }
}
