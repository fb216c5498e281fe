//! In-process memory store
//!
//! Keeps memories in memory, ranks them by word overlap with the query and
//! optionally mirrors every write to a JSONL journal so a later process can
//! reload them.

use crate::backend::{Memory, MemoryBackend, MemoryQuery};
use crate::{RagMemoryError, Result};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

fn word_regex() -> &'static Regex {
    static WORD: OnceLock<Regex> = OnceLock::new();
    WORD.get_or_init(|| Regex::new(r"[\p{L}\p{N}_]+").expect("word regex is valid"))
}

fn tokenize(text: &str) -> HashSet<String> {
    word_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Memory store backed by a vector, with an optional JSONL journal
#[derive(Debug, Default)]
pub struct InMemoryMemoryStore {
    memories: RwLock<Vec<Memory>>,
    journal: Option<PathBuf>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store journaled to `path`, loading any memories already there
    pub async fn with_journal(path: PathBuf) -> Result<Self> {
        let memories = if path.exists() {
            Self::read_journal(&path).await?
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            Vec::new()
        };

        debug!("Loaded {} memories from {:?}", memories.len(), path);
        Ok(Self {
            memories: RwLock::new(memories),
            journal: Some(path),
        })
    }

    async fn read_journal(path: &Path) -> Result<Vec<Memory>> {
        let content = fs::read_to_string(path).await?;
        let mut memories = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Memory>(line) {
                Ok(memory) => memories.push(memory),
                Err(e) => warn!("Skipping malformed journal line {}: {}", lineno + 1, e),
            }
        }
        Ok(memories)
    }

    async fn append_journal(&self, memory: &Memory) -> Result<()> {
        let Some(path) = &self.journal else {
            return Ok(());
        };
        let line = serde_json::to_string(memory)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| RagMemoryError::Store(format!("cannot open journal {:?}: {}", path, e)))?;
        file.write_all(format!("{}\n", line).as_bytes())
            .await
            .map_err(|e| RagMemoryError::Store(format!("cannot append to journal {:?}: {}", path, e)))?;
        Ok(())
    }

    /// Insert a fully formed memory (with metadata)
    pub async fn insert(&self, memory: Memory) -> Result<()> {
        self.append_journal(&memory).await?;
        self.memories.write().await.push(memory);
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.memories.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.memories.read().await.is_empty()
    }

    /// All memories, oldest first
    pub async fn all(&self) -> Vec<Memory> {
        self.memories.read().await.clone()
    }
}

#[async_trait]
impl MemoryBackend for InMemoryMemoryStore {
    async fn get_memory(&self, query: &str, opts: MemoryQuery) -> Result<Vec<Memory>> {
        let query_words = tokenize(query);
        let memories = self.memories.read().await;

        // Newest first so ties favour recent memories.
        let mut scored: Vec<(usize, usize)> = memories
            .iter()
            .enumerate()
            .rev()
            .map(|(idx, memory)| {
                let score = tokenize(&memory.text).intersection(&query_words).count();
                (score, idx)
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(opts.match_count)
            .map(|(_, idx)| memories[idx].clone())
            .collect())
    }

    async fn add_memory(&self, text: &str) -> Result<()> {
        self.insert(Memory::new(text)).await
    }
}
