//! CLI binary for kirana.

use clap::{Parser, Subcommand};
use kirana::audio::capture::CpalCapture;
use kirana::audio::playback::CpalPlayback;
use kirana::session::{Session, SessionEvent, Speaker};
use kirana::tools::ProviderRegistry;
use kirana::tools::catalog::CatalogProvider;
use kirana::{KiranaConfig, ToolCall};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Kirana: real-time voice shopping assistant.
#[derive(Parser)]
#[command(name = "kirana", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Engine API key (overrides the config file).
    #[arg(long, env = "ENGINE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Start a voice conversation with the shopping assistant.
    Chat,

    /// List available audio devices.
    Devices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kirana=info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = if let Some(ref path) = cli.config {
        KiranaConfig::from_file(path)?
    } else {
        KiranaConfig::default()
    };
    if cli.api_key.is_some() {
        config.engine.api_key = cli.api_key;
    }

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => run_chat(config).await,
        Command::Devices => list_devices(),
    }
}

async fn run_chat(config: KiranaConfig) -> anyhow::Result<()> {
    println!("Kirana v{}", env!("CARGO_PKG_VERSION"));

    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(CatalogProvider::with_demo_catalog()));

    let session = Session::connect(config, registry).await?;
    let mut events = session.events();

    println!("\nReady! Ask for any product. Press Ctrl+C to stop.\n");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if signal.is_ok() {
                    info!("received Ctrl+C, shutting down...");
                    session.disconnect();
                }
            }
            () = session.wait_closed() => break,
            event = events.recv() => {
                match event {
                    Ok(event) => print_event(&event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        info!("event stream lagged by {n}");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    println!("Session ended.");
    Ok(())
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Transcript {
            speaker,
            text,
            is_final,
        } => {
            let who = match speaker {
                Speaker::User => "you",
                Speaker::Agent => "kirana",
            };
            let marker = if *is_final { "" } else { "…" };
            println!("[{who}] {text}{marker}");
        }
        SessionEvent::ToolCalls(calls) => {
            for ToolCall { name, args, .. } in calls {
                println!("[tool] {name}({args})");
            }
        }
        SessionEvent::StatusChanged(status) => info!("status: {status:?}"),
        SessionEvent::Interrupted => info!("interrupted"),
        SessionEvent::Error(message) => eprintln!("error: {message}"),
        SessionEvent::Closed { code, reason } => info!("closed ({code}): {reason}"),
        _ => {}
    }
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in CpalCapture::list_input_devices()? {
        println!("  - {name}");
    }

    println!("\nOutput devices:");
    for name in CpalPlayback::list_output_devices()? {
        println!("  - {name}");
    }

    Ok(())
}
