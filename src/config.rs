//! Settings file
//!
//! `config.toml` has two optional tables:
//!
//! ```toml
//! [memory]
//! chunk_messages = 4
//! refresh_memory_every_n_messages = 1
//!
//! [llm]
//! base_url = "http://localhost:11434/v1"
//! small_model = "llama3.2:1b"
//! ```
//!
//! A missing file means all defaults.

use crate::{RagMemoryConfig, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Environment variable overriding the settings file location
pub const CONFIG_ENV: &str = "RAGMEM_CONFIG";

/// Completion endpoint settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible API root (without `/chat/completions`)
    pub base_url: String,
    /// Environment variable holding the bearer token
    pub api_key_env: String,
    pub model: String,
    /// Cheap model used for summarization
    pub small_model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_retry_attempts: u32,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-4o".to_string(),
            small_model: "gpt-4o-mini".to_string(),
            max_tokens: 512,
            temperature: 0.2,
            max_retry_attempts: 4,
            request_timeout_secs: 60,
        }
    }
}

/// Everything read from `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub memory: RagMemoryConfig,
    pub llm: LlmConfig,
}

impl Settings {
    /// Parse settings from TOML text and validate them
    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.memory.validate()?;
        Ok(settings)
    }

    /// Load settings from `path`, falling back to defaults when it does not exist
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).await?;
        debug!("Loaded settings from {:?}", path);
        Self::from_toml(&content)
    }

    /// `$RAGMEM_CONFIG`, else `<config dir>/ragmem/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|dir| dir.join("ragmem").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RagMemoryError;
    use tempfile::TempDir;

    #[test]
    fn test_parse_full_settings() {
        let settings = Settings::from_toml(
            r#"
[memory]
chunk_messages = 6
max_pending_writes = 16

[llm]
base_url = "http://localhost:11434/v1"
small_model = "tiny"
"#,
        )
        .unwrap();

        assert_eq!(settings.memory.chunk_messages, 6);
        assert_eq!(settings.memory.refresh_memory_every_n_messages, 1);
        assert_eq!(settings.memory.max_pending_writes, Some(16));
        assert_eq!(settings.llm.base_url, "http://localhost:11434/v1");
        assert_eq!(settings.llm.small_model, "tiny");
        assert_eq!(settings.llm.model, LlmConfig::default().model);
    }

    #[test]
    fn test_invalid_memory_settings_rejected() {
        let result = Settings::from_toml("[memory]\nrefresh_memory_every_n_messages = 0\n");
        assert!(matches!(result, Err(RagMemoryError::InvalidConfig(_))));

        let result = Settings::from_toml("[memory]\nchunk_messages = \"four\"\n");
        assert!(matches!(result, Err(RagMemoryError::Config(_))));
    }

    #[tokio::test]
    async fn test_load_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load(&temp_dir.path().join("absent.toml"))
            .await
            .unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[memory]\nchunk_messages = 3\n").unwrap();

        let settings = Settings::load(&path).await.unwrap();
        assert_eq!(settings.memory.chunk_messages, 3);
    }
}
