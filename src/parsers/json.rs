use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::error::GeminiError;
use crate::parsers::{OutputParser, synthesize_session_id};
use crate::types::{AssistantMessage, Data, Message, ResultMessage, SystemMessage, UserMessage};

/// Number of response characters copied into `ResultMessage::result`.
const RESULT_PREVIEW_CHARS: usize = 100;

/// Parses the CLI's native `-o json` and `-o stream-json` output.
///
/// The format is sniffed from the text itself: a payload that starts with `{`
/// and never has a `{` at the start of a later line is one JSON object,
/// anything else is newline-delimited events. A stream holding a single event
/// line is therefore read as a single object.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

/// Shape of `-o json` output. Per-model stats stay raw so they can be
/// passed through in `usage`.
#[derive(Deserialize)]
struct SingleOutput {
    #[serde(default, deserialize_with = "lenient")]
    response: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    stats: SingleStats,
}

#[derive(Deserialize, Default)]
struct SingleStats {
    #[serde(default, deserialize_with = "lenient")]
    models: Map<String, Value>,
    #[serde(default, deserialize_with = "lenient")]
    tools: Map<String, Value>,
}

/// One line of `-o stream-json` output.
///
/// Only `type` is strict. A field holding an unexpected JSON type reads as its
/// default so one odd field never costs the whole event.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    Init {
        #[serde(default)]
        session_id: Value,
        #[serde(default)]
        model: Value,
        #[serde(default)]
        timestamp: Value,
    },
    Message {
        #[serde(default, deserialize_with = "lenient")]
        role: Option<String>,
        #[serde(default, deserialize_with = "lenient")]
        content: Option<String>,
        #[serde(default, deserialize_with = "lenient")]
        delta: bool,
    },
    Result {
        #[serde(default, deserialize_with = "lenient")]
        status: Option<String>,
        #[serde(default, deserialize_with = "lenient")]
        stats: Map<String, Value>,
    },
    Error {
        #[serde(default, deserialize_with = "lenient")]
        message: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// Decode `T` if the value has the right shape, else fall back to `T::default()`.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Session ids arrive as strings, but numeric ids are accepted verbatim.
fn session_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl OutputParser for JsonParser {
    fn name(&self) -> &'static str {
        "JsonParser"
    }

    async fn parse(&self, stdout: &str, _stderr: &str) -> Result<Vec<Message>, GeminiError> {
        self.parse_output(stdout)
    }
}

impl JsonParser {
    /// Synchronous core of [`OutputParser::parse`]. Stderr plays no part.
    pub fn parse_output(&self, stdout: &str) -> Result<Vec<Message>, GeminiError> {
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }

        let cleaned = clean_output(stdout);
        if cleaned.is_empty() {
            return Ok(Vec::new());
        }

        if is_single_json(&cleaned) {
            parse_single(&cleaned).map_err(|e| {
                tracing::error!(error = %e, "JSON parsing failed");
                GeminiError::parsing("failed to parse Gemini CLI JSON output", stdout, e)
            })
        } else {
            Ok(parse_stream(&cleaned))
        }
    }
}

/// Drop leading non-JSON lines (mode banners and the like). Once a line
/// starting with `{` or `[` has been seen, every following line is kept so
/// pretty-printed objects survive intact.
pub fn clean_output(output: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();

    for line in output.trim().split('\n') {
        let stripped = line.trim();
        if !kept.is_empty() || stripped.starts_with('{') || stripped.starts_with('[') {
            kept.push(line);
        }
    }

    kept.join("\n")
}

pub fn is_single_json(cleaned: &str) -> bool {
    cleaned.trim().starts_with('{') && !cleaned.contains("\n{")
}

fn parse_single(payload: &str) -> Result<Vec<Message>, serde_json::Error> {
    let output: SingleOutput = serde_json::from_str(payload)?;
    let response = output.response.unwrap_or_default();

    let mut messages = Vec::with_capacity(2);
    if !response.is_empty() {
        messages.push(AssistantMessage::text(response.clone()).into());
    }

    let mut total_duration_ms: u64 = 0;
    let mut total_tokens: u64 = 0;
    for model in output.stats.models.values() {
        total_duration_ms =
            total_duration_ms.saturating_add(count(&model["api"]["totalLatencyMs"]));
        total_tokens = total_tokens.saturating_add(count(&model["tokens"]["total"]));
    }
    let tool_calls = output.stats.tools.get("totalCalls").map_or(0, count);

    // This payload shape carries no pricing, so no cost is ever reported.
    let total_cost_usd = None;

    let mut usage = Data::new();
    usage.insert("total_tokens".to_string(), json!(total_tokens));
    usage.insert("tool_calls".to_string(), json!(tool_calls));
    usage.insert("models".to_string(), Value::Object(output.stats.models));

    let result = (!response.is_empty())
        .then(|| response.chars().take(RESULT_PREVIEW_CHARS).collect::<String>());

    messages.push(
        ResultMessage {
            subtype: "success".to_string(),
            duration_ms: total_duration_ms,
            is_error: false,
            session_id: synthesize_session_id(),
            num_turns: 1,
            total_cost_usd,
            usage: Some(usage),
            result,
        }
        .into(),
    );

    Ok(messages)
}

fn parse_stream(payload: &str) -> Vec<Message> {
    let mut messages = Vec::new();
    let mut session = SessionTracker::default();

    for line in payload.trim().split('\n') {
        let line = line.trim();
        if line.is_empty() || !line.starts_with('{') {
            continue;
        }

        let event: StreamEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                let preview: String = line.chars().take(RESULT_PREVIEW_CHARS).collect();
                tracing::warn!(error = %e, line = %preview, "skipping undecodable stream-json line");
                continue;
            }
        };

        match event {
            StreamEvent::Init {
                session_id,
                model,
                timestamp,
            } => {
                let session_id = session.start(session_text(session_id));
                let mut data = Data::new();
                data.insert("session_id".to_string(), Value::String(session_id));
                data.insert("model".to_string(), model);
                data.insert("timestamp".to_string(), timestamp);
                messages.push(
                    SystemMessage {
                        subtype: "init".to_string(),
                        data,
                    }
                    .into(),
                );
            }
            StreamEvent::Message {
                role,
                content,
                delta,
            } => {
                let content = content.unwrap_or_default();
                match role.as_deref() {
                    Some("user") => messages.push(UserMessage { content }.into()),
                    // Deltas are emitted one message per line, never merged.
                    Some("assistant") if !content.is_empty() => {
                        tracing::trace!(delta, "assistant content");
                        messages.push(AssistantMessage::text(content).into());
                    }
                    _ => {}
                }
            }
            StreamEvent::Result { status, stats } => {
                let is_error = status.as_deref() == Some("error");
                let mut usage = Data::new();
                for key in ["total_tokens", "input_tokens", "output_tokens", "tool_calls"] {
                    usage.insert(key.to_string(), json!(stats.get(key).map_or(0, count)));
                }

                messages.push(
                    ResultMessage {
                        subtype: status.unwrap_or_else(|| "success".to_string()),
                        duration_ms: stats.get("duration_ms").map_or(0, count),
                        is_error,
                        session_id: session.current(),
                        num_turns: 1,
                        total_cost_usd: None,
                        usage: Some(usage),
                        result: None,
                    }
                    .into(),
                );
            }
            StreamEvent::Error { message } => {
                messages.push(
                    ResultMessage {
                        subtype: "error".to_string(),
                        duration_ms: 0,
                        is_error: true,
                        session_id: session.current(),
                        num_turns: 0,
                        total_cost_usd: None,
                        usage: None,
                        result: Some(message.unwrap_or_else(|| "Unknown error".to_string())),
                    }
                    .into(),
                );
            }
            StreamEvent::Unknown => {}
        }
    }

    messages
}

/// Session id for one stream parse. A synthesized id is created at most once
/// per parse so every result without an `init` event shares it.
#[derive(Default)]
struct SessionTracker {
    id: Option<String>,
}

impl SessionTracker {
    fn start(&mut self, upstream: Option<String>) -> String {
        let id = upstream
            .filter(|s| !s.is_empty())
            .unwrap_or_else(synthesize_session_id);
        self.id = Some(id.clone());
        id
    }

    fn current(&mut self) -> String {
        self.id.get_or_insert_with(synthesize_session_id).clone()
    }
}

/// Non-negative integer view of a stats field; missing or malformed is 0.
fn count(value: &Value) -> u64 {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        .unwrap_or(0)
}
