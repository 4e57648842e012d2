//! Configuration system for skiff.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $SKIFF_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/skiff/config.toml
//!   3. ~/.config/skiff/config.toml
//!
//! A missing file is not an error; defaults apply.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chunk::CHUNK_SIZE;
use crate::wire::{Codec, DEFAULT_MAGIC, MAX_FRAME_LEN};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkiffConfig {
    pub protocol: ProtocolConfig,
    pub network: NetworkConfig,
}

/// Values both peers must agree on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// First byte of every frame.
    pub magic: u8,
    /// Bytes per chunk. Clamped to 1..=1024.
    pub chunk_size: usize,
    /// Largest chunk count a sender may offer or a receiver will accept.
    /// Bounds the receiver's reassembly table before any data arrives.
    pub max_chunks: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Seconds to wait for a datagram before counting a timeout.
    pub recv_timeout_secs: u64,
    /// Receive buffer in bytes. Never smaller than the largest frame.
    pub recv_buffer_size: usize,
    /// Timeouts tolerated (each followed by a retransmission) before the
    /// session fails.
    pub max_retries: u32,
    /// Delay before the first retransmission, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Upper bound on any single backoff delay, in milliseconds.
    pub max_backoff_ms: u64,
    pub backoff: Backoff,
}

/// How the retransmission delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Every attempt waits `retry_backoff_ms`.
    Fixed,
    /// Attempt n waits `retry_backoff_ms * 2^(n-1)`, capped.
    Exponential,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

/// 4 GiB at the full chunk size.
pub const DEFAULT_MAX_CHUNKS: u32 = 1 << 22;

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            magic: DEFAULT_MAGIC,
            chunk_size: CHUNK_SIZE,
            max_chunks: DEFAULT_MAX_CHUNKS,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            recv_timeout_secs: 20,
            recv_buffer_size: 1250,
            max_retries: 3,
            retry_backoff_ms: 500,
            max_backoff_ms: 8000,
            backoff: Backoff::Exponential,
        }
    }
}

// ── Runtime views ─────────────────────────────────────────────────────────────

impl ProtocolConfig {
    pub fn codec(&self) -> Codec {
        Codec::new(self.magic)
    }

    /// Chunk size the sessions actually use.
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.clamp(1, CHUNK_SIZE)
    }
}

/// Timeout and retransmission policy handed to the transfer drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub recv_timeout: Duration,
    pub max_retries: u32,
    pub backoff: Backoff,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        NetworkConfig::default().retry_policy()
    }
}

impl RetryPolicy {
    /// Delay before retransmission attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }
}

impl NetworkConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            recv_timeout: Duration::from_secs(self.recv_timeout_secs),
            max_retries: self.max_retries,
            backoff: self.backoff,
            base_delay: Duration::from_millis(self.retry_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
        }
    }

    /// Receive buffer size the drivers actually allocate.
    pub fn effective_recv_buffer(&self) -> usize {
        self.recv_buffer_size.max(MAX_FRAME_LEN)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("skiff")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("invalid value {value:?} for {key}")]
    InvalidOverride { key: &'static str, value: String },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl SkiffConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            SkiffConfig::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        tracing::debug!(path = %path.display(), ?config, "configuration loaded");
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("SKIFF_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Apply SKIFF_* overrides. `lookup` returns the value of a variable,
    /// if set; [`load`](Self::load) passes the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
            let parsed = value.trim().parse::<T>();
            parsed.map_err(|_| ConfigError::InvalidOverride { key, value })
        }

        if let Some(v) = lookup("SKIFF_PROTOCOL__MAGIC") {
            let magic = match v.trim().strip_prefix("0x") {
                Some(hex) => u8::from_str_radix(hex, 16).ok(),
                None => v.trim().parse().ok(),
            };
            self.protocol.magic = magic.ok_or(ConfigError::InvalidOverride {
                key: "SKIFF_PROTOCOL__MAGIC",
                value: v,
            })?;
        }
        if let Some(v) = lookup("SKIFF_PROTOCOL__CHUNK_SIZE") {
            self.protocol.chunk_size = parse("SKIFF_PROTOCOL__CHUNK_SIZE", v)?;
        }
        if let Some(v) = lookup("SKIFF_PROTOCOL__MAX_CHUNKS") {
            self.protocol.max_chunks = parse("SKIFF_PROTOCOL__MAX_CHUNKS", v)?;
        }
        if let Some(v) = lookup("SKIFF_NETWORK__RECV_TIMEOUT_SECS") {
            self.network.recv_timeout_secs = parse("SKIFF_NETWORK__RECV_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("SKIFF_NETWORK__MAX_RETRIES") {
            self.network.max_retries = parse("SKIFF_NETWORK__MAX_RETRIES", v)?;
        }
        if let Some(v) = lookup("SKIFF_NETWORK__RETRY_BACKOFF_MS") {
            self.network.retry_backoff_ms = parse("SKIFF_NETWORK__RETRY_BACKOFF_MS", v)?;
        }
        if let Some(v) = lookup("SKIFF_NETWORK__BACKOFF") {
            self.network.backoff = match v.trim() {
                "fixed" => Backoff::Fixed,
                "exponential" => Backoff::Exponential,
                _ => {
                    return Err(ConfigError::InvalidOverride {
                        key: "SKIFF_NETWORK__BACKOFF",
                        value: v,
                    })
                }
            };
        }
        Ok(())
    }
}
