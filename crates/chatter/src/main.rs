//! # chatter
//!
//! Chatter binary: `serve` runs the relay, `join` chats through one.

#![deny(unsafe_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chatter_client::{ChatClient, ClientConfig, ClientEvent};
use chatter_core::{ChatMessage, constants};
use chatter_server::{ChatServer, ServerConfig, ServerEvent};
use chatter_settings::ChatterSettings;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

/// Line typed in `join` to leave the room.
const QUIT_COMMAND: &str = "/quit";

/// Chatter relay and client.
#[derive(Parser, Debug)]
#[command(name = "chatter", version, about = "TCP chat relay and client")]
struct Cli {
    /// Settings file (defaults to `~/.chatter/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay until Ctrl-C.
    Serve {
        /// Host to bind (overrides settings).
        #[arg(long)]
        host: Option<String>,
        /// Port to bind, 0 for auto-assign (overrides settings).
        #[arg(long)]
        port: Option<u16>,
        /// Serve Prometheus metrics on this address.
        #[arg(long)]
        metrics_addr: Option<SocketAddr>,
    },
    /// Join a relay and chat from stdin.
    Join {
        /// Username to announce.
        #[arg(long)]
        name: String,
        /// Relay host (overrides settings).
        #[arg(long)]
        host: Option<String>,
        /// Relay port (overrides settings).
        #[arg(long)]
        port: Option<u16>,
        /// Color tag sent with each message.
        #[arg(long)]
        color: Option<String>,
    },
}

fn load_settings(path: Option<&Path>) -> Result<ChatterSettings> {
    let settings = match path {
        Some(path) => chatter_settings::loader::load_settings_from_path(path),
        None => chatter_settings::loader::load_settings(),
    };
    settings.context("Failed to load settings")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.settings.as_deref())?;
    chatter_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    match cli.command {
        Command::Serve {
            host,
            port,
            metrics_addr,
        } => serve(&settings, host, port, metrics_addr).await,
        Command::Join {
            name,
            host,
            port,
            color,
        } => join(&settings, name, host, port, color).await,
    }
}

async fn serve(
    settings: &ChatterSettings,
    host: Option<String>,
    port: Option<u16>,
    metrics_addr: Option<SocketAddr>,
) -> Result<()> {
    if let Some(addr) = metrics_addr {
        chatter_server::metrics::install_exporter(addr)
            .context("Failed to start metrics exporter")?;
    }

    let mut config = ServerConfig::from_settings(settings);
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    let (server, mut events) = ChatServer::start(config)
        .await
        .context("Failed to start relay")?;
    tracing::info!(
        version = constants::VERSION,
        "{} relay listening on {}",
        constants::NAME,
        server.local_addr()
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal.context("Failed to listen for ctrl-c")?;
                break;
            }
            event = events.recv() => match event {
                Ok(event) => log_server_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "server event log lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    tracing::info!("Shutting down...");
    server.stop().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn log_server_event(event: &ServerEvent) {
    match event {
        ServerEvent::ClientJoined(id) => tracing::debug!(conn_id = %id, "client joined"),
        ServerEvent::ClientLeft(id) => tracing::debug!(conn_id = %id, "client left"),
        ServerEvent::OutputLogged { at, text } => {
            tracing::info!(at = %at.format("%H:%M:%S"), "{text}");
        }
    }
}

async fn join(
    settings: &ChatterSettings,
    name: String,
    host: Option<String>,
    port: Option<u16>,
    color: Option<String>,
) -> Result<()> {
    let host = host.unwrap_or_else(|| settings.client.host.clone());
    let port = port.unwrap_or(settings.client.port);
    let color = color.unwrap_or_else(|| settings.client.default_color.clone());

    let (client, mut events) =
        ChatClient::connect(&host, port, name.clone(), ClientConfig::from_settings(settings))
            .await
            .with_context(|| format!("Failed to join {host}:{port}"))?;
    println!("Connected to {host}:{port} as {name}. Type {QUIT_COMMAND} to leave.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                let text = line.trim();
                if text == QUIT_COMMAND {
                    break;
                }
                if text.is_empty() {
                    continue;
                }
                if !client.send(ChatMessage::new(name.as_str(), text, color.as_str())).await {
                    eprintln!("Message not sent.");
                }
            }
            event = events.recv() => match event {
                Some(ClientEvent::MessageReceived(message)) => {
                    println!("[{}] {}: {}", message.color, message.username, message.text);
                }
                Some(ClientEvent::RosterChanged(roster)) => {
                    println!("Online: {}", roster.join(", "));
                }
                Some(ClientEvent::ConnectionLost) | None => {
                    println!("Connection to the server was lost.");
                    break;
                }
            },
        }
    }

    client.disconnect().await;
    println!("You have disconnected from the server.");
    Ok(())
}
