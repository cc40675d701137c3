//! Message model exchanged between the pipeline and its consumer.
//!
//! Messages are plain values: built once by a parser or the client, never
//! mutated afterwards, and owned by whoever receives them.

use serde::Serialize;
use serde_json::{Map, Value};

/// Free-form key/value payload carried by system messages and result usage.
pub type Data = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Code {
        code: String,
        language: Option<String>,
    },
    ToolUse {
        name: String,
        input: Value,
    },
    ToolResult {
        name: String,
        output: Value,
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Informational or session-setup event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemMessage {
    pub subtype: String,
    pub data: Data,
}

/// Echo of the input prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserMessage {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantMessage {
    pub content: Vec<ContentBlock>,
}

impl AssistantMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
        }
    }

    /// Concatenated text of every text block, in order.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Terminal summary of one turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultMessage {
    pub subtype: String,
    pub duration_ms: u64,
    pub is_error: bool,
    pub session_id: String,
    pub num_turns: u32,
    pub total_cost_usd: Option<f64>,
    pub usage: Option<Data>,
    pub result: Option<String>,
}

impl ResultMessage {
    /// Subtype used for the result the client synthesizes on pipeline failure.
    pub const EXECUTION_ERROR: &'static str = "error_during_execution";

    /// Session id carried by client-synthesized failure results.
    pub const ERROR_SESSION: &'static str = "error";

    pub fn execution_error(description: impl Into<String>) -> Self {
        Self {
            subtype: Self::EXECUTION_ERROR.to_string(),
            duration_ms: 0,
            is_error: true,
            session_id: Self::ERROR_SESSION.to_string(),
            num_turns: 0,
            total_cost_usd: None,
            usage: None,
            result: Some(description.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    System(SystemMessage),
    User(UserMessage),
    Assistant(AssistantMessage),
    Result(ResultMessage),
}

impl Message {
    pub fn is_result(&self) -> bool {
        matches!(self, Self::Result(_))
    }

    pub fn as_result(&self) -> Option<&ResultMessage> {
        match self {
            Self::Result(r) => Some(r),
            _ => None,
        }
    }
}

impl From<SystemMessage> for Message {
    fn from(m: SystemMessage) -> Self {
        Self::System(m)
    }
}

impl From<UserMessage> for Message {
    fn from(m: UserMessage) -> Self {
        Self::User(m)
    }
}

impl From<AssistantMessage> for Message {
    fn from(m: AssistantMessage) -> Self {
        Self::Assistant(m)
    }
}

impl From<ResultMessage> for Message {
    fn from(m: ResultMessage) -> Self {
        Self::Result(m)
    }
}
