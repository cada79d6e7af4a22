//! TOML Configuration File Support
//!
//! Process-wide configuration for parley, resolved once at startup from a
//! TOML file at `~/.config/parley/parley.toml` with `PARLEY_*` environment
//! variables taking precedence.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. TOML configuration file
//! 3. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [store]
//! api_url = "https://api.conversationhost.example"
//! api_secret = "sk-..."
//! request_timeout_secs = 120
//!
//! [bots]
//! # Restrict the bot picker to these ids; omit to expose all bots
//! allowed_ids = ["bot_support", "bot_sales"]
//!
//! [chat]
//! fallback_model = "gpt-4o"
//! conversation_page_size = 50
//!
//! [daemon]
//! socket_path = "/run/user/1000/parley/parley.sock"
//! # auth_token = "..."   # generated per run when omitted
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::orchestrator::OrchestratorConfig;
use crate::store::HttpStoreConfig;

/// Config file name within the config directory
pub const CONFIG_FILENAME: &str = "parley.toml";

/// Config directory name under XDG config home
pub const CONFIG_DIR_NAME: &str = "parley";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Store section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreToml {
    /// Base URL of the hosted conversation store API
    pub api_url: Option<String>,
    /// API credential
    pub api_secret: Option<String>,
    /// Per-request timeout in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Bots section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotsToml {
    /// Allow-list of bot ids exposed to clients
    pub allowed_ids: Option<Vec<String>>,
}

/// Chat section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatToml {
    /// Model for bot-less turns
    pub fallback_model: Option<String>,
    /// Page size for conversation listings
    pub conversation_page_size: Option<usize>,
}

/// Daemon section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonToml {
    /// Unix socket path for client connections
    pub socket_path: Option<String>,
    /// Shared handshake token; generated per run when omitted
    pub auth_token: Option<String>,
}

/// Root of the TOML configuration file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyToml {
    /// Store section
    pub store: StoreToml,
    /// Bots section
    pub bots: BotsToml,
    /// Chat section
    pub chat: ChatToml,
    /// Daemon section
    pub daemon: DaemonToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Fully resolved process configuration
#[derive(Clone, Debug)]
pub struct ParleyConfig {
    /// Base URL of the hosted conversation store API
    pub api_url: Option<String>,
    /// API credential
    pub api_secret: Option<String>,
    /// Per-request timeout for store calls
    pub request_timeout: Duration,
    /// Allow-list of bot ids; None exposes all bots
    pub allowed_bot_ids: Option<Vec<String>>,
    /// Model for bot-less turns
    pub fallback_model: String,
    /// Page size for conversation listings
    pub conversation_page_size: usize,
    /// Daemon socket path override
    pub socket_path: Option<PathBuf>,
    /// Daemon handshake token override
    pub auth_token: Option<String>,
}

impl Default for ParleyConfig {
    fn default() -> Self {
        Self::resolve(ParleyToml::default())
    }
}

impl ParleyConfig {
    /// Resolve a parsed TOML file into concrete settings (defaults applied,
    /// environment not yet consulted)
    #[must_use]
    pub fn resolve(file: ParleyToml) -> Self {
        Self {
            api_url: file.store.api_url,
            api_secret: file.store.api_secret,
            request_timeout: Duration::from_secs(file.store.request_timeout_secs.unwrap_or(120)),
            allowed_bot_ids: file.bots.allowed_ids.filter(|ids| !ids.is_empty()),
            fallback_model: file
                .chat
                .fallback_model
                .unwrap_or_else(|| crate::turn::FALLBACK_MODEL.to_string()),
            conversation_page_size: file.chat.conversation_page_size.unwrap_or(50),
            socket_path: file.daemon.socket_path.map(PathBuf::from),
            auth_token: file.daemon.auth_token,
        }
    }

    /// Apply `PARLEY_*` environment variable overrides
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("PARLEY_API_URL") {
            self.api_url = Some(url);
        }
        if let Ok(secret) = std::env::var("PARLEY_API_SECRET") {
            self.api_secret = Some(secret);
        }
        if let Ok(raw) = std::env::var("PARLEY_BOT_IDS") {
            self.allowed_bot_ids = parse_bot_ids(&raw);
        }
        if let Ok(model) = std::env::var("PARLEY_MODEL") {
            self.fallback_model = model;
        }
        if let Ok(path) = std::env::var("PARLEY_SOCKET") {
            self.socket_path = Some(PathBuf::from(path));
        }
        if let Ok(token) = std::env::var("PARLEY_AUTH_TOKEN") {
            self.auth_token = Some(token);
        }
    }

    /// Project the orchestrator's slice of the configuration
    #[must_use]
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            allowed_bot_ids: self.allowed_bot_ids.clone(),
            fallback_model: self.fallback_model.clone(),
            conversation_page_size: self.conversation_page_size,
        }
    }

    /// Build the HTTP store configuration, when both URL and credential are
    /// present
    #[must_use]
    pub fn http_store_config(&self) -> Option<HttpStoreConfig> {
        let base_url = self.api_url.clone()?;
        let api_secret = self.api_secret.clone()?;
        let mut config = HttpStoreConfig::new(base_url, api_secret);
        config.request_timeout = self.request_timeout;
        Some(config)
    }
}

/// Parse a comma-separated allow-list; blank input means "no restriction"
#[must_use]
pub fn parse_bot_ids(raw: &str) -> Option<Vec<String>> {
    let ids: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ToString::to_string)
        .collect();
    if ids.is_empty() {
        None
    } else {
        Some(ids)
    }
}

/// Default configuration file path (`~/.config/parley/parley.toml`)
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILENAME))
}

/// Load configuration from the default path (when the file exists) and the
/// environment
pub async fn load_config() -> Result<ParleyConfig, ConfigError> {
    let mut config = match default_config_path() {
        Some(path) if tokio::fs::try_exists(&path).await.unwrap_or(false) => {
            load_file(&path).await?
        }
        _ => ParleyConfig::default(),
    };
    config.apply_env();
    Ok(config)
}

/// Load configuration from an explicit path and the environment
pub async fn load_config_from_path(path: &Path) -> Result<ParleyConfig, ConfigError> {
    let mut config = load_file(path).await?;
    config.apply_env();
    Ok(config)
}

async fn load_file(path: &Path) -> Result<ParleyConfig, ConfigError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
    let file: ParleyToml = toml::from_str(&raw)?;
    Ok(ParleyConfig::resolve(file))
}
