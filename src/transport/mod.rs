pub mod args;
pub mod subprocess;

use std::future::Future;

use crate::config::GeminiOptions;
use crate::error::GeminiError;

pub use subprocess::SubprocessTransport;

/// Everything the CLI wrote, decoded as text, plus how it exited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Owns the lifecycle of whatever produces raw CLI output.
///
/// `connect` and `disconnect` must both be safe to call when the paired call
/// never happened: the client always attempts `disconnect`, even after a
/// failed `connect`.
pub trait Transport: Send {
    fn connect(&mut self) -> impl Future<Output = Result<(), GeminiError>> + Send;

    /// Run one prompt to completion and capture all of its output.
    ///
    /// A non-zero exit code is not an error at this layer; it is reported
    /// through [`CapturedOutput::exit_code`].
    fn execute(
        &mut self,
        prompt: &str,
        options: &GeminiOptions,
    ) -> impl Future<Output = Result<CapturedOutput, GeminiError>> + Send;

    fn disconnect(&mut self) -> impl Future<Output = Result<(), GeminiError>> + Send;
}
