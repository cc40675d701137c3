use async_stream::stream;
use futures_util::Stream;
use serde_json::Value;

use crate::config::GeminiOptions;
use crate::error::GeminiError;
use crate::parsers::{OutputParser, ParserKind};
use crate::transport::{SubprocessTransport, Transport};
use crate::types::{Data, Message, ResultMessage, SystemMessage, UserMessage};

/// Runs one prompt through a transport and a parser and yields the messages.
///
/// The stream always follows the same stages:
/// connect, synthetic init and user messages, execute and parse, disconnect.
/// On failure it yields an `error_during_execution` result followed by the
/// error itself. Disconnect is attempted on every exit path, including the
/// stream being dropped before it finishes.
pub struct Client<T = SubprocessTransport> {
    transport: T,
    parser: ParserKind,
}

impl Default for Client<SubprocessTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl Client<SubprocessTransport> {
    /// Subprocess transport, parser chosen by `GEMINI_PARSER_STRATEGY`.
    pub fn new() -> Self {
        Self::with_transport(SubprocessTransport::new())
    }
}

impl<T: Transport + 'static> Client<T> {
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            parser: ParserKind::from_env(),
        }
    }

    pub fn parser(mut self, parser: ParserKind) -> Self {
        self.parser = parser;
        self
    }

    pub fn parser_name(&self) -> &'static str {
        self.parser.name()
    }

    pub fn process(
        self,
        prompt: impl Into<String>,
        options: GeminiOptions,
    ) -> impl Stream<Item = Result<Message, GeminiError>> + Send + 'static {
        let Client { transport, parser } = self;
        let prompt = prompt.into();

        stream! {
            let mut scope = ConnectionScope::new(transport);

            let failure = match scope.connect().await {
                Err(e) => Some(e),
                Ok(()) => {
                    yield Ok(init_message(&options, parser.name()).into());
                    yield Ok(UserMessage { content: prompt.clone() }.into());

                    let stage = execute_and_parse(&mut scope, &parser, &prompt, &options).await;
                    for message in stage.messages {
                        yield Ok(message);
                    }
                    stage.fault
                }
            };

            match failure {
                Some(err) => {
                    tracing::error!(error = %err, "query processing failed");
                    yield Ok(ResultMessage::execution_error(err.to_string()).into());
                    scope.release().await;
                    yield Err(err);
                }
                None => scope.release().await,
            }
        }
    }
}

/// Output of the execute-and-parse stage. Messages decoded before a fault
/// are still delivered ahead of it.
struct Stage {
    messages: Vec<Message>,
    fault: Option<GeminiError>,
}

impl Stage {
    fn failed(fault: GeminiError) -> Self {
        Self {
            messages: Vec::new(),
            fault: Some(fault),
        }
    }
}

async fn execute_and_parse<T: Transport + 'static>(
    scope: &mut ConnectionScope<T>,
    parser: &ParserKind,
    prompt: &str,
    options: &GeminiOptions,
) -> Stage {
    let transport = match scope.transport() {
        Ok(t) => t,
        Err(e) => return Stage::failed(e),
    };

    let output = match transport.execute(prompt, options).await {
        Ok(output) => output,
        Err(e) => return Stage::failed(e),
    };

    let exit_fault = || GeminiError::ProcessExit {
        code: output.exit_code.unwrap_or(-1),
        stderr: output.stderr.clone(),
    };

    match parser.parse(&output.stdout, &output.stderr).await {
        // A failing CLI that still reported a result has described its own failure.
        Ok(messages) => {
            let fault = (!output.success() && !messages.iter().any(Message::is_result))
                .then(exit_fault);
            Stage { messages, fault }
        }
        Err(e) if output.success() => Stage::failed(e),
        Err(e) => {
            tracing::debug!(error = %e, "parse failed after unsuccessful exit");
            Stage::failed(exit_fault())
        }
    }
}

/// Client-side echo of the effective configuration. Not derived from
/// anything the CLI reports.
fn init_message(options: &GeminiOptions, parser_name: &str) -> SystemMessage {
    let mut data = Data::new();
    data.insert("model".to_string(), Value::String(options.resolved_model()));
    data.insert(
        "cwd".to_string(),
        Value::String(options.resolved_cwd().display().to_string()),
    );
    data.insert("parser".to_string(), Value::String(parser_name.to_string()));
    data.insert("sandbox".to_string(), Value::Bool(options.sandbox));
    data.insert("yolo".to_string(), Value::Bool(options.yolo));

    SystemMessage {
        subtype: "init".to_string(),
        data,
    }
}

/// Owns the transport for the lifetime of one query.
///
/// `release` awaits `disconnect`. If the scope is dropped without being
/// released (the consumer stopped polling), `disconnect` is spawned onto the
/// current runtime instead.
struct ConnectionScope<T: Transport + 'static> {
    transport: Option<T>,
}

impl<T: Transport + 'static> ConnectionScope<T> {
    fn new(transport: T) -> Self {
        Self {
            transport: Some(transport),
        }
    }

    fn transport(&mut self) -> Result<&mut T, GeminiError> {
        self.transport
            .as_mut()
            .ok_or_else(|| GeminiError::Connection("transport already released".to_string()))
    }

    async fn connect(&mut self) -> Result<(), GeminiError> {
        self.transport()?.connect().await
    }

    async fn release(&mut self) {
        if let Some(mut transport) = self.transport.take()
            && let Err(e) = transport.disconnect().await
        {
            tracing::warn!(error = %e, "transport disconnect failed");
        }
    }
}

impl<T: Transport + 'static> Drop for ConnectionScope<T> {
    fn drop(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!("query abandoned before completion; disconnecting transport");
                handle.spawn(async move {
                    if let Err(e) = transport.disconnect().await {
                        tracing::warn!(error = %e, "transport disconnect failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!("no runtime available; transport dropped without disconnect");
            }
        }
    }
}
