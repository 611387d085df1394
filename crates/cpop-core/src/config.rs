//! Runtime configuration
//!
//! Loaded from `~/.config/cpop/config.json` when present; every field has a
//! default so a missing file is not an error.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::details::DEFAULT_MAX_ATTENDEES;
use crate::retry::{Backoff, RetryPolicy};
use crate::{Error, Result};

/// Solana network endpoints
pub mod network {
    pub const DEVNET: &str = "https://api.devnet.solana.com";
    pub const TESTNET: &str = "https://api.testnet.solana.com";
    pub const MAINNET: &str = "https://api.mainnet-beta.solana.com";
    pub const LOCALNET: &str = "http://127.0.0.1:8899";
}

/// Which Solana network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Devnet,
    Testnet,
    Mainnet,
    Localnet,
}

impl Network {
    pub fn rpc_url(&self) -> &'static str {
        match self {
            Self::Devnet => network::DEVNET,
            Self::Testnet => network::TESTNET,
            Self::Mainnet => network::MAINNET,
            Self::Localnet => network::LOCALNET,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Devnet => "devnet",
            Self::Testnet => "testnet",
            Self::Mainnet => "mainnet-beta",
            Self::Localnet => "localnet",
        }
    }

    /// Parse a user-supplied network name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "devnet" => Some(Self::Devnet),
            "testnet" => Some(Self::Testnet),
            "mainnet" | "mainnet-beta" => Some(Self::Mainnet),
            "localnet" | "localhost" => Some(Self::Localnet),
            _ => None,
        }
    }
}

/// Bounded retry settings for the pool-registration step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Fixed delay between attempts
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay_ms: 2_000,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.delay_ms), Backoff::Fixed)
    }
}

/// Accounts of the external compression program that vary per network
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Output state tree for compressed token accounts (base58)
    pub state_tree: String,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            state_tree: "smt1NamzXdq4AMqS2fS2F1i5KTYPZRhoHgWx38d8WsT".to_string(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CpopConfig {
    /// Network to operate on
    pub network: Network,
    /// RPC endpoint override (defaults to the network's public endpoint)
    pub rpc_url: Option<String>,
    /// Origin claim URLs are built on
    pub claim_origin: String,
    /// SQLite database path override
    pub database_path: Option<PathBuf>,
    /// Native asset symbol event tokens may not reuse
    pub native_symbol: String,
    /// Upper bound on attendees per event
    pub max_attendees: u32,
    /// How long to wait for a confirmation before calling it indeterminate
    pub confirm_timeout_secs: u64,
    /// Interval between signature status polls
    pub confirm_poll_interval_ms: u64,
    /// Pool registration retry policy
    pub pool_retry: RetrySettings,
    /// Compression program accounts
    pub compression: CompressionConfig,
}

impl Default for CpopConfig {
    fn default() -> Self {
        Self {
            network: Network::Devnet,
            rpc_url: None,
            claim_origin: "https://cpop.app".to_string(),
            database_path: None,
            native_symbol: "SOL".to_string(),
            max_attendees: DEFAULT_MAX_ATTENDEES,
            confirm_timeout_secs: 60,
            confirm_poll_interval_ms: 2_000,
            pool_retry: RetrySettings::default(),
            compression: CompressionConfig::default(),
        }
    }
}

impl CpopConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("cpop").join("config.json"))
    }

    /// Load from an explicit path, or from the default location if it exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };

        let raw = std::fs::read_to_string(&path)?;
        let config = Self::from_json(&raw)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Parse and check a JSON config
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.check()?;
        Ok(config)
    }

    /// Save as pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn check(&self) -> Result<()> {
        let origin = url::Url::parse(&self.claim_origin)
            .map_err(|e| Error::Config(format!("claim_origin '{}': {}", self.claim_origin, e)))?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "claim_origin must be http(s), got '{}'",
                origin.scheme()
            )));
        }
        if self.max_attendees == 0 {
            return Err(Error::Config("max_attendees must be positive".into()));
        }
        if self.native_symbol.trim().is_empty() {
            return Err(Error::Config("native_symbol must not be empty".into()));
        }
        Ok(())
    }

    /// Effective RPC endpoint
    pub fn rpc_url(&self) -> &str {
        self.rpc_url.as_deref().unwrap_or_else(|| self.network.rpc_url())
    }

    /// Effective database path
    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("cpop")
                .join("records.sqlite3")
        })
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn confirm_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_interval_ms)
    }
}
