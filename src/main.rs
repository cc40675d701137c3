use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use futures_util::StreamExt;

use gemini_cli_sdk::{Client, GeminiOptions, OutputFormat, SubprocessTransport};

/// Run one prompt through the Gemini CLI and print the normalized messages
/// as JSON lines.
#[derive(Parser)]
#[command(name = "gemini-query")]
#[command(about = "Typed message stream over the Gemini CLI", long_about = None)]
struct Cli {
    /// Prompt to send
    prompt: String,

    /// TOML file with default options; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model name
    #[arg(short, long)]
    model: Option<String>,

    /// Working directory for the CLI
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Run the CLI in sandbox mode
    #[arg(long)]
    sandbox: bool,

    /// Auto-accept every action
    #[arg(long)]
    yolo: bool,

    /// Session token to resume, or "latest"
    #[arg(long)]
    resume: Option<String>,

    /// Tool the CLI may use without asking (repeatable)
    #[arg(long = "allowed-tool")]
    allowed_tools: Vec<String>,

    /// Request newline-delimited events instead of one JSON object
    #[arg(long)]
    stream: bool,

    /// Path or name of the gemini executable
    #[arg(long, default_value = "gemini")]
    executable: String,

    /// Abort the CLI after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl Cli {
    fn options(&self) -> anyhow::Result<GeminiOptions> {
        let mut options = match &self.config {
            Some(path) => GeminiOptions::load(path)?,
            None => GeminiOptions::default(),
        };

        if self.model.is_some() {
            options.model = self.model.clone();
        }
        if self.cwd.is_some() {
            options.cwd = self.cwd.clone();
        }
        if self.resume.is_some() {
            options.resume = self.resume.clone();
        }
        options.sandbox |= self.sandbox;
        options.yolo |= self.yolo;
        options.allowed_tools.extend(self.allowed_tools.iter().cloned());
        if self.stream {
            options.output_format = OutputFormat::StreamJson;
        }

        Ok(options)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let options = cli.options()?;

    let mut transport = SubprocessTransport::new().executable(cli.executable.clone());
    if let Some(secs) = cli.timeout_secs {
        transport = transport.timeout(Duration::from_secs(secs));
    }

    let client = Client::with_transport(transport);
    tracing::debug!(parser = client.parser_name(), "starting query");

    let mut messages = Box::pin(client.process(cli.prompt.clone(), options));
    while let Some(item) = messages.next().await {
        match item {
            Ok(message) => println!("{}", serde_json::to_string(&message)?),
            Err(e) => {
                tracing::error!(error = %e, "query failed");
                anyhow::bail!(e.user_message());
            }
        }
    }

    Ok(())
}
