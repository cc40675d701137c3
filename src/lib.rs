//! Typed message stream over the Gemini CLI.
//!
//! The CLI prints either one JSON object (`-o json`) or newline-delimited
//! JSON events (`-o stream-json`), mixed with banner lines. This crate runs
//! it through a [`Transport`], normalizes what it printed with an
//! [`OutputParser`], and hands the caller an ordered stream of [`Message`]s.
//!
//! ```no_run
//! use futures_util::StreamExt;
//! use gemini_cli_sdk::{GeminiOptions, Message, query};
//!
//! # async fn run() -> Result<(), gemini_cli_sdk::GeminiError> {
//! let options = GeminiOptions { yolo: true, ..Default::default() };
//! let mut messages = Box::pin(query("Hello, Gemini!", Some(options)));
//! while let Some(message) = messages.next().await {
//!     if let Message::Assistant(reply) = message? {
//!         println!("{}", reply.text_content());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod parsers;
pub mod transport;
pub mod types;

use futures_util::Stream;

pub use client::Client;
pub use config::{GeminiOptions, OutputFormat};
pub use error::{FaultKind, GeminiError, Result};
pub use parsers::json::JsonParser;
pub use parsers::llm::LlmParser;
pub use parsers::{OutputParser, ParserKind, ParserStrategy};
pub use transport::{CapturedOutput, SubprocessTransport, Transport};
pub use types::{
    AssistantMessage, ContentBlock, Message, ResultMessage, SystemMessage, UserMessage,
};

/// Run one prompt with the default client: the `gemini` binary on `PATH`
/// and the parser selected by `GEMINI_PARSER_STRATEGY`.
pub fn query(
    prompt: impl Into<String>,
    options: Option<GeminiOptions>,
) -> impl Stream<Item = Result<Message>> + Send + 'static {
    Client::new().process(prompt, options.unwrap_or_default())
}
