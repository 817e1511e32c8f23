//! CLI entrypoint and subcommand orchestration.

mod config;
#[cfg(test)]
mod test_support;
mod tui;

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use proto::EngineEvent;
use session::{GeminiProvider, SessionEngine, StreamProvider};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;

const PURPLE: Color = Color::Rgb {
    r: 0x7D,
    g: 0x56,
    b: 0xF4,
};
const BLUE: Color = Color::Rgb {
    r: 0x1D,
    g: 0x56,
    b: 0xF4,
};

/// Top-level command-line arguments for gemchat.
#[derive(Parser)]
#[command(name = "gemchat")]
#[command(about = "Streaming terminal chat with Google Gemini", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Gemini model to use (overrides GEMINI_MODEL)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Enable debug logging to ~/.gemchat/logs/
    #[arg(short, long, default_value_t = false, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// CLI subcommands available in the application.
#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Start the full-screen chat (default when no subcommand is given)
    Chat {
        /// Prompt to submit as soon as the chat opens
        prompt: Vec<String>,
    },

    /// Ask one question and stream the answer to stdout
    Ask {
        /// Question text; read from stdin when omitted
        prompt: Vec<String>,
    },

    /// Print version information
    Version,
}

impl Commands {
    fn label(&self) -> &'static str {
        match self {
            Commands::Chat { .. } => "chat",
            Commands::Ask { .. } => "ask",
            Commands::Version => "version",
        }
    }
}

#[tokio::main]
/// Program entrypoint.
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Commands::Chat { prompt: Vec::new() });
    let is_tui = matches!(command, Commands::Chat { .. });

    // WorkerGuard must outlive main() so buffered file writes are flushed on exit.
    let _file_guard = init_tracing(&cli.log_level, cli.debug, is_tui);

    // Emit session-start marker when --debug is active so each run is easily identifiable.
    if cli.debug {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            command = command.label(),
            log_level = %cli.log_level,
            "========== gemchat session start =========="
        );
    }

    match command {
        Commands::Version => {
            println!("{}", version_line());
            Ok(())
        }
        Commands::Chat { prompt } => {
            let config = load_config(cli.config.as_deref(), cli.model)?;
            cmd_chat(config, join_prompt(prompt)).await
        }
        Commands::Ask { prompt } => {
            let config = load_config(cli.config.as_deref(), cli.model)?;
            cmd_ask(build_provider(&config), join_prompt(prompt)).await
        }
    }
}

/// Installs the tracing subscriber.
///
/// Console output is suppressed in TUI mode to avoid corrupting the display.
/// `--debug` adds a daily-rotated file layer under `~/.gemchat/logs/`.
fn init_tracing(
    log_level: &str,
    debug: bool,
    is_tui: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let mut file_guard = None;
    let debug_writer = if debug {
        let log_dir = config::gemchat_home()
            .unwrap_or_else(|| PathBuf::from(".gemchat"))
            .join("logs");
        std::fs::create_dir_all(&log_dir).ok();
        let appender = tracing_appender::rolling::daily(&log_dir, "debug.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);
        Some(writer)
    } else {
        None
    };

    let file_filter = || EnvFilter::new("debug,hyper_util=info,rustls=info,reqwest=info,h2=info");

    match (is_tui, debug_writer) {
        (true, Some(writer)) => {
            let console = fmt::layer()
                .with_writer(std::io::sink)
                .with_target(false)
                .with_filter(console_filter);
            let file = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .with_filter(file_filter());
            tracing_subscriber::registry()
                .with(console)
                .with(file)
                .init();
        }
        (true, None) => {
            fmt()
                .with_env_filter(console_filter)
                .with_writer(std::io::sink)
                .with_target(false)
                .init();
        }
        (false, Some(writer)) => {
            let console = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(console_filter);
            let file = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .with_filter(file_filter());
            tracing_subscriber::registry()
                .with(console)
                .with(file)
                .init();
        }
        (false, None) => {
            fmt()
                .with_env_filter(console_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
    }

    file_guard
}

/// Resolves `.env`, the config file, env overrides, and the CLI model flag, then validates.
fn load_config(path: Option<&Path>, model: Option<String>) -> anyhow::Result<Config> {
    let dotenv_path = config::load_dotenv();
    debug!(path = ?dotenv_path, ".env resolved");

    let config = Config::load(path)
        .context("failed to load configuration")?
        .with_model_override(model);
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Builds the Gemini provider from validated configuration.
fn build_provider(config: &Config) -> Arc<dyn StreamProvider> {
    let gemini = &config.gemini;
    let mut provider = GeminiProvider::new(&gemini.api_key, &gemini.model)
        .with_temperature(gemini.temperature)
        .with_idle_timeout(gemini.stream_idle_timeout());
    if let Some(max_tokens) = gemini.max_tokens {
        provider = provider.with_max_output_tokens(max_tokens);
    }
    if let Some(base_url) = gemini.effective_base_url() {
        provider = provider.with_base_url(base_url);
    }
    Arc::new(provider)
}

/// Starts the full-screen chat.
async fn cmd_chat(config: Config, initial_prompt: Option<String>) -> anyhow::Result<()> {
    let engine = SessionEngine::new(build_provider(&config));
    tui::run_tui(
        engine,
        config.gemini.model.clone(),
        config.tui.tick(),
        initial_prompt,
    )
    .await?;

    print_goodbye_banner(&config.gemini.model);
    Ok(())
}

/// Asks one question and streams the answer to stdout.
async fn cmd_ask(provider: Arc<dyn StreamProvider>, prompt: Option<String>) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout();
    execute!(stdout, SetForegroundColor(PURPLE), Print("You: "), ResetColor)?;
    let prompt = match prompt {
        Some(prompt) => {
            println!("{prompt}");
            prompt
        }
        None => read_prompt_line(std::io::stdin().lock())?,
    };

    let mut engine = SessionEngine::new(provider);
    engine.submit(&prompt).context("nothing to ask")?;

    execute!(
        stdout,
        SetForegroundColor(PURPLE),
        Print("Gemini answer:\n"),
        ResetColor
    )?;

    while let Some(event) = engine.pump_next().await {
        match event {
            EngineEvent::StreamStarted | EngineEvent::StreamDone => {}
            EngineEvent::ChunkReceived(text) => {
                execute!(stdout, SetForegroundColor(BLUE), Print(text), ResetColor)?;
            }
            EngineEvent::StreamError(failure) => {
                println!();
                anyhow::bail!("{failure}");
            }
        }
    }

    println!();
    Ok(())
}

/// Reads one line of input and trims it.
fn read_prompt_line(mut reader: impl BufRead) -> anyhow::Result<String> {
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .context("error reading the user input")?;
    Ok(line.trim().to_string())
}

/// Joins positional words into one prompt; `None` when nothing was given.
fn join_prompt(words: Vec<String>) -> Option<String> {
    let prompt = words.join(" ");
    let prompt = prompt.trim();
    (!prompt.is_empty()).then(|| prompt.to_string())
}

fn version_line() -> String {
    format!("gemchat version: {}", env!("CARGO_PKG_VERSION"))
}

fn print_goodbye_banner(model: &str) {
    println!();
    println!("  \x1b[1;35m gemchat\x1b[0m");
    println!();
    println!("  \x1b[1;37mModel\x1b[0m     \x1b[32m{model}\x1b[0m");
    println!();
}
