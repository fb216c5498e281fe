//! ragmem CLI
//!
//! Replays a transcript through a rolling memory and prints the memories the
//! agent would see at the end of it.

use clap::Parser;
use ragmem::config::Settings;
use ragmem::{
    CompletionBackend, ConversationLog, ExtractiveSummarizer, InMemoryMemoryStore, Message,
    OpenAiCompletion, RagMemory,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// ragmem - rolling retrieval-augmented memory for a conversation transcript
#[derive(Parser, Debug)]
#[command(name = "ragmem")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Transcript to replay: JSONL messages or plain text lines (stdin if omitted)
    input: Option<PathBuf>,

    /// Settings file (defaults to $RAGMEM_CONFIG or <config dir>/ragmem/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Messages per summarized chunk
    #[arg(long)]
    chunk_messages: Option<usize>,

    /// Refresh retrieved memories every N messages
    #[arg(long)]
    refresh_every: Option<usize>,

    /// Maximum memories retrieved per refresh
    #[arg(long)]
    max_memories: Option<usize>,

    /// JSONL file memories are persisted to and reloaded from
    #[arg(long)]
    journal: Option<PathBuf>,

    /// Summarize without calling a model
    #[arg(long)]
    offline: bool,

    /// Speaker name for plain text lines
    #[arg(long, default_value = "user")]
    name: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let settings = load_settings(&cli).await?;
    info!(
        "Starting ragmem: chunk={}, refresh_every={}, max_memories={}",
        settings.memory.chunk_messages,
        settings.memory.refresh_memory_every_n_messages,
        settings.memory.max_memory_values
    );

    let store = match &cli.journal {
        Some(path) => Arc::new(InMemoryMemoryStore::with_journal(path.clone()).await?),
        None => Arc::new(InMemoryMemoryStore::new()),
    };
    let completion: Arc<dyn CompletionBackend> = if cli.offline {
        Arc::new(ExtractiveSummarizer::new())
    } else {
        Arc::new(OpenAiCompletion::new(&settings.llm)?)
    };
    let conversation = Arc::new(ConversationLog::new());
    let memory = RagMemory::new(
        settings.memory.clone(),
        conversation.clone(),
        store.clone(),
        completion,
    )?;

    let reader: Box<dyn AsyncBufRead + Unpin> = match &cli.input {
        Some(path) => Box::new(BufReader::new(tokio::fs::File::open(path).await?)),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let Some(message) = parse_line(&line, &cli.name) else {
            continue;
        };
        conversation.append(message);
        let outcome = memory.on_new_messages(1).await;
        if !outcome.writes.is_empty() {
            debug!(
                "Message {}: queued {} summarization turn(s)",
                conversation.len(),
                outcome.writes.len()
            );
        }
    }

    memory.flush().await;
    if let Err(e) = memory.refresh().await {
        warn!("Final memory refresh failed: {}", e);
    }
    info!(
        "Replayed {} messages, {} memories stored",
        conversation.len(),
        store.len().await
    );

    match memory.render_prompt() {
        Some(block) => print!("{}", block),
        None => println!("(no memories)"),
    }

    Ok(())
}

/// Resolve the settings file and apply command-line overrides
async fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = match cli.config.clone().or_else(Settings::default_path) {
        Some(path) => Settings::load(&path).await?,
        None => Settings::default(),
    };

    if let Some(n) = cli.chunk_messages {
        settings.memory.chunk_messages = n;
    }
    if let Some(n) = cli.refresh_every {
        settings.memory.refresh_memory_every_n_messages = n;
    }
    if let Some(n) = cli.max_memories {
        settings.memory.max_memory_values = n;
    }
    settings.memory.validate()?;

    Ok(settings)
}

/// A JSON object line is a full message; anything else is plain speech
fn parse_line(line: &str, default_name: &str) -> Option<Message> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('{') {
        if let Ok(message) = serde_json::from_str::<Message>(trimmed) {
            return Some(message);
        }
    }
    Some(Message::say(default_name, trimmed))
}
