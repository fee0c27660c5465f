use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

use crate::invoker::BackendConfig;

/// Engine configuration.
///
/// Backend endpoints, prompt sizing, cache behavior, and the optional
/// vocabulary resource. Persisted as JSON under the app config directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub schema_version: u32,
    pub primary_backend: BackendConfig,
    pub fallback_backend: Option<BackendConfig>,
    /// Word cap for the model's feedback field, enforced by prompt
    /// instruction.
    pub feedback_word_limit: usize,
    /// Max context entries rendered per catalog.
    pub context_entry_limit: usize,
    /// Character budget for the rendered context section.
    pub context_char_budget: usize,
    /// TTL for cached context result sets, in seconds.
    pub cache_ttl_secs: u64,
    /// Optional vocabulary resource file; built-in lists when absent.
    pub vocabulary_path: Option<PathBuf>,
    /// Suppresses attempt persistence for non-production invocations.
    pub test_mode: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            primary_backend: BackendConfig {
                provider: "primary".to_string(),
                base_url: "http://localhost:4000".to_string(),
                api_key: String::new(),
                model: "cds-validation".to_string(),
                timeout_secs: 60,
            },
            fallback_backend: None,
            feedback_word_limit: 120,
            context_entry_limit: 8,
            context_char_budget: 4_000,
            cache_ttl_secs: 300,
            vocabulary_path: None,
            test_mode: false,
        }
    }
}

impl EngineConfig {
    /// Get the default config directory
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".ordervalidation"))
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file or return default
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                debug!("Failed to load config, using default: {}", e);
                Self::default()
            }
        }
    }

    /// Load config from file
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: EngineConfig = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }
}
