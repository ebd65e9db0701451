//! dkr-reload - Main Entry Point
//!
//! A terminal shell around the reload backend. Status and loader output go to
//! stdout, logs go to stderr. Lines typed on stdin are sent to the console;
//! `:rom <path>` selects a ROM image and `:quit` (or end of input) exits.

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::Sender;
use dkr_reload::backend::{BackendCommand, BackendMessage, OutputBuffer, OutputEdit};
use dkr_reload::session::image_display_name;
use dkr_reload::types::NEWLINE;
use dkr_reload::{AppConfig, ReloadBackend};
use std::io::BufRead;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "dkr-reload")]
#[command(about = "Upload a ROM over USB and hot reload rebuilt code")]
#[command(version)]
struct Cli {
    /// ROM image to upload on startup
    #[arg(long, value_name = "PATH")]
    rom: Option<PathBuf>,

    /// Loader executable, overriding the config file
    #[arg(long, value_name = "PROGRAM")]
    loader: Option<PathBuf>,

    /// Config file to use instead of the default locations
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Also write logs to a daily file in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

/// A line typed into the shell
#[derive(Debug, PartialEq)]
enum ShellInput {
    SelectImage(PathBuf),
    Quit,
    Text(String),
}

fn parse_input(line: &str) -> ShellInput {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim() == ":quit" {
        return ShellInput::Quit;
    }
    match line.strip_prefix(":rom ") {
        Some(path) if !path.trim().is_empty() => ShellInput::SelectImage(PathBuf::from(path.trim())),
        _ => ShellInput::Text(line.to_string()),
    }
}

fn init_logging(log_dir: Option<&PathBuf>) -> Option<WorkerGuard> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "dkr-reload.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,dkr_reload=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

/// Forward stdin to the backend until `:quit` or end of input
fn read_stdin(commands: Sender<BackendCommand>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to read stdin: {}", e);
                break;
            }
        };

        let cmd = match parse_input(&line) {
            ShellInput::SelectImage(path) => BackendCommand::SelectImage(path),
            ShellInput::Quit => break,
            ShellInput::Text(text) => BackendCommand::SubmitInput(text),
        };
        if commands.send(cmd).is_err() {
            return;
        }
    }
    let _ = commands.send(BackendCommand::Close);
}

/// Last line of the output text, without its terminator
fn last_line(text: &str) -> &str {
    let text = text.strip_suffix(NEWLINE).unwrap_or(text);
    text.rsplit(NEWLINE).next().unwrap_or(text)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_dir.as_ref());

    tracing::info!("Starting dkr-reload");

    let mut config = AppConfig::discover(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(loader) = cli.loader {
        config.loader.program = loader;
    }

    let (backend, frontend) = ReloadBackend::new(config).context("Cannot start the loader")?;
    let backend_handle = std::thread::Builder::new()
        .name("reload-backend".to_string())
        .spawn(move || backend.run())
        .context("Failed to start backend thread")?;

    if let Some(rom) = cli.rom {
        frontend.select_image(rom);
    }

    let commands = frontend.command_sender.clone();
    std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || read_stdin(commands))
        .context("Failed to start input thread")?;

    let mut output = OutputBuffer::new();
    let mut fatal = None;

    for msg in frontend.receiver.iter() {
        match msg {
            BackendMessage::Status { text, severity } => println!("[{}] {}", severity, text),
            BackendMessage::Output(edit) => {
                output.apply(&edit);
                match &edit {
                    OutputEdit::Append(line) | OutputEdit::ReplaceLast(line) => {
                        println!("{}", last_line(line))
                    }
                }
            }
            BackendMessage::InputEnabled(enabled) => {
                tracing::info!("Console input {}", if enabled { "enabled" } else { "disabled" });
            }
            BackendMessage::ConnectionState(state) => tracing::debug!("Connection state: {}", state),
            BackendMessage::ImageSelected { image, artifact } => {
                println!("ROM: {}", image_display_name(&image));
                tracing::info!("Watching {:?} for hot reload", artifact);
            }
            BackendMessage::Fatal(error) => {
                tracing::error!("{}", error);
                fatal = Some(error);
            }
            BackendMessage::Shutdown => break,
        }
    }

    tracing::info!("Shutting down...");
    if backend_handle.join().is_err() {
        tracing::error!("Backend thread panicked");
    }

    match fatal {
        Some(error) => Err(anyhow::anyhow!(error)),
        None => Ok(()),
    }
}
