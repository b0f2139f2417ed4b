//! Chat CLI - talk to a character from the terminal.
//!
//! `chat list` shows the characters available to the signed-in user.
//! `chat open <id> [message]` prints the character and the conversation so
//! far, then optionally sends one message and streams the reply to stdout as
//! it arrives.

use std::cell::Cell;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::task::LocalSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chat_client::{BackendClient, ChatError, ChatSession, ClientConfig, SendOutcome};
use chat_core::{MessageCache, Role};

#[derive(Parser)]
#[command(name = "chat")]
#[command(about = "Chat with a character, streaming replies as they arrive")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Backend origin, e.g. http://127.0.0.1:3000
    #[arg(short, long, global = true)]
    backend: Option<String>,

    /// Session cookie header value
    #[arg(long, global = true)]
    cookie: Option<String>,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the characters you can chat with
    List,
    /// Show a conversation and optionally send one message
    Open {
        /// Conversation (character) id
        conversation_id: String,
        /// Message to send; without it only the history is shown
        message: Option<String>,
    },
}

fn main() -> Result<ExitCode> {
    // Logs go to stderr so replies can be piped
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = LocalSet::new();
    local.block_on(&runtime, run(cli))
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let path = cli.config.unwrap_or_else(ClientConfig::default_path);
    let config = ClientConfig::load_from_path(&path)?
        .with_env_overrides()
        .with_overrides(cli.backend, cli.cookie);
    tracing::debug!("Using backend {}", config.backend_url);

    let backend = Rc::new(BackendClient::from_config(&config)?);

    match cli.command {
        Commands::List => list(&backend, &path).await,
        Commands::Open {
            conversation_id,
            message,
        } => open(backend, &path, &conversation_id, message).await,
    }
}

async fn list(backend: &BackendClient, config_path: &Path) -> Result<ExitCode> {
    if backend.current_user().await?.is_none() {
        return Ok(not_signed_in(config_path));
    }

    let characters = backend.list_characters().await?;
    if characters.is_empty() {
        println!("No characters yet.");
    }
    for character in characters {
        if character.description.is_empty() {
            println!("{}  {}", character.id, character.name);
        } else {
            println!("{}  {} - {}", character.id, character.name, character.description);
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn open(
    backend: Rc<BackendClient>,
    config_path: &Path,
    conversation_id: &str,
    message: Option<String>,
) -> Result<ExitCode> {
    let cache = MessageCache::new();
    let mut session = ChatSession::new(backend, cache, conversation_id);

    match session.authorize().await {
        Ok(_) => {}
        Err(ChatError::Unauthorized) => return Ok(not_signed_in(config_path)),
        Err(e) => return Err(e.into()),
    }

    session.load().await?;

    if let Some(character) = session.character() {
        println!("== {} ==", character.name);
        if !character.personality.is_empty() {
            println!("{}", character.personality);
        }
        println!();
    }
    for msg in session.messages() {
        print_message(session.character().map(|c| c.name.as_str()), msg.role, &msg.content);
    }

    let Some(text) = message else {
        return Ok(ExitCode::SUCCESS);
    };

    print_message(None, Role::User, &text);
    let name = session
        .character()
        .map(|c| c.name.clone())
        .unwrap_or_else(|| "assistant".to_string());
    print!("{}: ", name);
    std::io::stdout().flush()?;

    // Byte offset of the reply already written to stdout
    let printed = Rc::new(Cell::new(0usize));
    let sink = printed.clone();
    let subscription = session.subscribe(move |_, messages| {
        let Some(streaming) = messages.iter().find(|m| m.streaming) else {
            return;
        };
        if let Some(delta) = streaming.content.get(sink.get()..) {
            if !delta.is_empty() {
                print!("{}", delta);
                if let Err(e) = std::io::stdout().flush() {
                    tracing::debug!("Failed to flush reply output: {}", e);
                }
                sink.set(streaming.content.len());
            }
        }
    });

    let outcome = session.submit(&text)?.await?;
    session.unsubscribe(subscription);

    match outcome {
        SendOutcome::Finalized(reply) => {
            if let Some(rest) = reply.content.get(printed.get()..) {
                print!("{}", rest);
            }
            println!();
            Ok(ExitCode::SUCCESS)
        }
        SendOutcome::RolledBack(e) => {
            println!();
            eprintln!("Reply failed: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn not_signed_in(config_path: &Path) -> ExitCode {
    eprintln!(
        "Not signed in. Set session_cookie in {} or pass --cookie.",
        config_path.display()
    );
    ExitCode::from(2)
}

fn print_message(character: Option<&str>, role: Role, content: &str) {
    let speaker = match role {
        Role::User => "you",
        Role::Assistant => character.unwrap_or("assistant"),
    };
    println!("{}: {}", speaker, content);
}
