use thiserror::Error;

/// Coarse fault classes shared by every transport and parser variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The CLI could not be reached or launched.
    Connection,
    /// The CLI launched but output capture failed or it exited badly.
    Execution,
    /// Captured output could not be decoded as the detected format.
    Parsing,
    /// Options are invalid or contradictory.
    Configuration,
}

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("gemini CLI not found: {0}")]
    CliNotFound(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("process exited with code {code}: {stderr}")]
    ProcessExit { code: i32, stderr: String },

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("cancelled after {0}ms")]
    Cancelled(u64),

    /// Whole-payload decode failure. The raw stdout is retained for diagnostics.
    #[error("{message}: {source}")]
    Parsing {
        message: String,
        raw_output: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("upstream parser backend error: {message}")]
    Upstream {
        message: String,
        status: Option<u16>,
    },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, GeminiError>;

impl GeminiError {
    pub fn parsing(
        message: impl Into<String>,
        raw_output: impl Into<String>,
        source: serde_json::Error,
    ) -> Self {
        Self::Parsing {
            message: message.into(),
            raw_output: raw_output.into(),
            source,
        }
    }

    pub fn kind(&self) -> FaultKind {
        match self {
            Self::CliNotFound(_) | Self::Connection(_) => FaultKind::Connection,
            Self::Execution(_)
            | Self::ProcessExit { .. }
            | Self::Timeout(_)
            | Self::Cancelled(_) => FaultKind::Execution,
            Self::Parsing { .. } | Self::Upstream { .. } | Self::Request(_) => FaultKind::Parsing,
            Self::Configuration(_) => FaultKind::Configuration,
        }
    }

    /// Raw payload attached to a parsing fault, if any.
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            Self::Parsing { raw_output, .. } => Some(raw_output),
            _ => None,
        }
    }

    /// Produce a sanitized message suitable for showing to an end user.
    /// Does not echo raw payloads or upstream response bodies.
    pub fn user_message(&self) -> String {
        match self {
            Self::CliNotFound(name) => {
                format!("gemini CLI `{name}` not found in PATH; install it or set the executable path")
            }
            Self::Connection(msg) => format!("could not start gemini CLI: {msg}"),
            Self::Execution(msg) => format!("gemini CLI execution failed: {msg}"),
            Self::ProcessExit { code, stderr } => {
                if stderr.trim().is_empty() {
                    format!("CLI process exited with code {code}")
                } else {
                    // CLIs print banners first; the useful part is the tail.
                    let preview: String = stderr
                        .chars()
                        .rev()
                        .take(200)
                        .collect::<Vec<_>>()
                        .into_iter()
                        .rev()
                        .collect();
                    let prefix = if preview.len() < stderr.len() {
                        "..."
                    } else {
                        ""
                    };
                    format!("CLI process exited with code {code}: {prefix}{preview}")
                }
            }
            Self::Timeout(ms) => format!("gemini CLI timed out after {ms}ms"),
            Self::Cancelled(ms) => format!("cancelled after {ms}ms"),
            Self::Parsing { message, .. } => message.clone(),
            Self::Upstream { status, .. } => match status {
                Some(code) => format!("parser backend returned HTTP {code}"),
                None => "parser backend returned an unusable reply".to_string(),
            },
            Self::Request(_) => "request to parser backend failed".to_string(),
            Self::Configuration(msg) => format!("invalid configuration: {msg}"),
        }
    }
}
