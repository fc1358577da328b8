//! CLI entry point for diva-stream

mod render;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use diva_stream_core::config::{Config, ConfigLoader};
use diva_stream_core::logging::init_logging;
use diva_stream_engine::{ChatStreamEngine, MessageOrigin, MessageStatus, Priority};
use diva_stream_transport::{HttpOrchestrator, WebSocketTransport};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// How long `send` waits for a pushed reply after the backend accepted a message
const REPLY_GRACE: Duration = Duration::from_secs(3);

#[derive(Parser)]
#[command(name = "diva-stream")]
#[command(about = "Real-time chat streaming client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration directory
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message and wait for it to settle
    Send {
        /// Message to send
        message: String,
        /// Session id (overrides the configured one)
        #[arg(short, long)]
        session: Option<String>,
        /// Dispatch priority
        #[arg(short, long, value_enum, default_value_t = PriorityArg::Normal)]
        priority: PriorityArg,
    },
    /// Interactive chat over stdin
    Chat {
        /// Session id (overrides the configured one)
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Print the resolved configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum PriorityArg {
    High,
    Normal,
    Low,
}

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::High => Priority::High,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::Low => Priority::Low,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_loader = if let Some(dir) = cli.config_dir {
        ConfigLoader::with_dir(dir)
    } else {
        ConfigLoader::new()
    };
    let mut config = config_loader.load().with_context(|| {
        format!(
            "Failed to load config from {}",
            config_loader.config_dir().display()
        )
    })?;

    config.logging.dir = resolve_log_dir(config_loader.config_dir(), &config.logging.dir)
        .to_string_lossy()
        .into_owned();
    let _log_guard = init_logging(&config.logging);

    match cli.command {
        Commands::Send {
            message,
            session,
            priority,
        } => {
            info!("Sending one-shot message");
            run_send(config, &message, session, priority.into()).await?;
        }
        Commands::Chat { session } => {
            info!("Starting interactive chat");
            run_chat(config, session).await?;
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Relative log directories live under the config directory
fn resolve_log_dir(config_dir: &Path, dir: &str) -> PathBuf {
    if let Some(rest) = dir.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    let path = PathBuf::from(dir);
    if path.is_absolute() {
        path
    } else {
        config_dir.join(path)
    }
}

async fn start_engine(config: &Config, session: Option<String>) -> Result<ChatStreamEngine> {
    let mut stream = config.stream.clone();
    if let Some(session) = session {
        stream.session_id = session;
    }

    let client = HttpOrchestrator::new(&stream.api_endpoint, &config.transport);
    let realtime = WebSocketTransport::new(
        stream.ws_endpoint.clone(),
        stream.session_id.clone(),
        &config.transport,
    );

    let engine = ChatStreamEngine::new(stream, Arc::new(client))?;
    // Replies still arrive over HTTP when the socket is unavailable.
    if let Err(e) = engine.attach_transport(Box::new(realtime)).await {
        warn!("Realtime transport unavailable: {}", e);
    }
    Ok(engine)
}

fn cli_metadata() -> HashMap<String, serde_json::Value> {
    let mut metadata = HashMap::new();
    metadata.insert("source".to_string(), json!("cli"));
    metadata
}

/// Send one message, print its transitions and any replies
async fn run_send(
    config: Config,
    message: &str,
    session: Option<String>,
    priority: Priority,
) -> Result<()> {
    let engine = start_engine(&config, session).await?;
    let mut stream = engine.messages();
    let sent = engine.send_message_with_priority(message, Some(cli_metadata()), priority);

    // Each attempt may use the full request budget.
    let attempts = config.transport.request_retries + 1;
    let deadline =
        tokio::time::sleep(engine.config().message_timeout() * attempts + REPLY_GRACE);
    tokio::pin!(deadline);
    let mut grace: Option<tokio::time::Instant> = None;
    let mut outcome = MessageStatus::Pending;

    loop {
        let grace_deadline =
            grace.unwrap_or_else(|| tokio::time::Instant::now() + Duration::from_secs(3600));
        tokio::select! {
            _ = &mut deadline => {
                println!("{}", style("Timed out waiting for the message to settle").yellow());
                break;
            }
            _ = tokio::time::sleep_until(grace_deadline), if grace.is_some() => break,
            msg = stream.recv() => {
                let Some(msg) = msg else { break };
                println!("{}", render::message_line(&msg));

                if msg.id == sent.id {
                    outcome = msg.status;
                    match msg.status {
                        MessageStatus::Sent | MessageStatus::Delivered => {
                            grace = Some(tokio::time::Instant::now() + REPLY_GRACE);
                        }
                        MessageStatus::Failed
                            if msg.retry_count >= engine.config().max_retries => break,
                        _ => {}
                    }
                } else if msg.origin == MessageOrigin::Agent {
                    break;
                }
            }
        }
    }

    engine.destroy().await;

    if outcome == MessageStatus::Failed {
        anyhow::bail!("Message {} could not be delivered", sent.id);
    }
    Ok(())
}

/// Interactive chat loop
async fn run_chat(config: Config, session: Option<String>) -> Result<()> {
    let engine = start_engine(&config, session).await?;

    println!("{}", style("diva-stream chat").bold().cyan());
    println!(
        "Session {}. Commands: /retry <id>, /history, /clear, /quit\n",
        style(&engine.config().session_id).bold()
    );

    let mut messages = engine.messages();
    let mut typing = engine.typing_updates();
    let mut connection = engine.connection_updates();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match line {
                    "/quit" | "/exit" => break,
                    "/history" => {
                        for msg in engine.history().iter() {
                            println!("{}", render::message_line(msg));
                        }
                    }
                    "/clear" => {
                        engine.clear_history();
                        println!("{}", style("History cleared").dim());
                    }
                    _ => {
                        if let Some(prefix) = line.strip_prefix("/retry ") {
                            retry_by_prefix(&engine, prefix.trim());
                        } else {
                            engine.send_message(line, Some(cli_metadata()));
                        }
                    }
                }
            }
            Some(msg) = messages.recv() => {
                println!("{}", render::message_line(&msg));
            }
            Some(view) = typing.recv() => {
                if let Some(line) = render::typing_line(&view) {
                    println!("{}", line);
                }
            }
            Some(status) = connection.recv() => {
                println!("{}", render::connection_line(&status));
            }
        }
    }

    engine.destroy().await;
    println!("Goodbye!");
    Ok(())
}

fn retry_by_prefix(engine: &ChatStreamEngine, prefix: &str) {
    let candidate = engine
        .filter_messages_by_type(MessageOrigin::User)
        .into_iter()
        .find(|m| m.id.starts_with(prefix));

    match candidate {
        Some(msg) if engine.retry_message(&msg.id) => {
            println!("{}", style(format!("Retrying {}", msg.id)).dim());
        }
        Some(msg) => println!("Message {} is not failed", msg.id),
        None => println!("No message with id {}", prefix),
    }
}
