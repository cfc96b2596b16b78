//! Server configuration.
//!
//! Loading is left to the embedding application; [`BoltConfig`] only
//! deserializes with serde and validates itself.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bolt::codec::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use crate::bolt::packstream::{DEFAULT_MAX_CONTAINER_SIZE, DEFAULT_MAX_NESTING_DEPTH};

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("read_low_watermark ({low}) must be below read_high_watermark ({high})")]
    Watermarks { low: usize, high: usize },

    #[error("chunk_size {0} is outside {min}..={max}", min = MIN_CHUNK_SIZE, max = MAX_CHUNK_SIZE)]
    ChunkSize(usize),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

// ============================================================================
// EncryptionLevel
// ============================================================================

/// Which transports the listener accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionLevel {
    /// Only TLS connections
    Required,
    /// TLS when the client asks for it and an acceptor is configured
    #[default]
    Optional,
    /// Plain connections only
    Disabled,
}

// ============================================================================
// BoltConfig
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoltConfig {
    pub listen_address: String,
    pub encryption: EncryptionLevel,

    /// Queued inbound messages above which reads are suspended
    pub read_high_watermark: usize,
    /// Queued inbound messages below which reads resume
    pub read_low_watermark: usize,

    /// Responses buffered before the session waits on the writer
    pub outbound_buffer_capacity: usize,
    /// Longest a single write may stall before the connection is closed
    pub write_throttle_max_duration: Duration,

    /// Idle time during a running request before a NOOP is sent
    pub keep_alive_interval: Duration,
    pub keep_alive_granularity: Duration,

    pub unauth_timeout: Duration,
    pub unauth_max_inbound_bytes: u64,

    /// Consecutive failures before rate limiting; 0 disables the limiter
    pub auth_max_failed_attempts: u32,
    pub auth_lock_window: Duration,

    pub chunk_size: usize,
    pub max_message_size: usize,
    pub max_container_size: usize,
    /// Deepest nesting of lists, maps and structures in a value
    pub max_nesting_depth: usize,

    /// Reported as `server` in the HELLO SUCCESS
    pub server_agent: String,
    /// Advertised to Bolt 4.3+ clients as `connection.recv_timeout_seconds`
    pub recv_timeout_hint: Option<Duration>,
}

impl Default for BoltConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:7687".to_string(),
            encryption: EncryptionLevel::default(),
            read_high_watermark: 300,
            read_low_watermark: 100,
            outbound_buffer_capacity: 64,
            write_throttle_max_duration: Duration::from_secs(15 * 60),
            keep_alive_interval: Duration::from_secs(60),
            keep_alive_granularity: Duration::from_secs(1),
            unauth_timeout: Duration::from_secs(30),
            unauth_max_inbound_bytes: 8 * 1024 * 1024,
            auth_max_failed_attempts: 3,
            auth_lock_window: Duration::from_secs(5),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_container_size: DEFAULT_MAX_CONTAINER_SIZE,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            server_agent: format!("Zeta4G/{}", env!("CARGO_PKG_VERSION")),
            recv_timeout_hint: None,
        }
    }
}

impl BoltConfig {
    pub fn builder() -> BoltConfigBuilder {
        BoltConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_low_watermark >= self.read_high_watermark {
            return Err(ConfigError::Watermarks {
                low: self.read_low_watermark,
                high: self.read_high_watermark,
            });
        }
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(ConfigError::ChunkSize(self.chunk_size));
        }
        let non_zero = [
            ("outbound_buffer_capacity", self.outbound_buffer_capacity == 0),
            ("write_throttle_max_duration", self.write_throttle_max_duration.is_zero()),
            ("keep_alive_interval", self.keep_alive_interval.is_zero()),
            ("keep_alive_granularity", self.keep_alive_granularity.is_zero()),
            ("unauth_timeout", self.unauth_timeout.is_zero()),
            ("unauth_max_inbound_bytes", self.unauth_max_inbound_bytes == 0),
            ("max_message_size", self.max_message_size == 0),
            ("max_nesting_depth", self.max_nesting_depth == 0),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, zero)| *zero) {
            return Err(ConfigError::Zero(name));
        }
        Ok(())
    }
}

// ============================================================================
// BoltConfigBuilder
// ============================================================================

pub struct BoltConfigBuilder {
    config: BoltConfig,
}

impl BoltConfigBuilder {
    pub fn with_listen_address(mut self, address: impl Into<String>) -> Self {
        self.config.listen_address = address.into();
        self
    }

    pub fn with_encryption(mut self, level: EncryptionLevel) -> Self {
        self.config.encryption = level;
        self
    }

    pub fn with_read_watermarks(mut self, low: usize, high: usize) -> Self {
        self.config.read_low_watermark = low;
        self.config.read_high_watermark = high;
        self
    }

    pub fn with_outbound_buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.outbound_buffer_capacity = capacity;
        self
    }

    pub fn with_write_throttle_max_duration(mut self, duration: Duration) -> Self {
        self.config.write_throttle_max_duration = duration;
        self
    }

    pub fn with_keep_alive(mut self, interval: Duration, granularity: Duration) -> Self {
        self.config.keep_alive_interval = interval;
        self.config.keep_alive_granularity = granularity;
        self
    }

    pub fn with_unauth_limits(mut self, timeout: Duration, max_inbound_bytes: u64) -> Self {
        self.config.unauth_timeout = timeout;
        self.config.unauth_max_inbound_bytes = max_inbound_bytes;
        self
    }

    pub fn with_auth_rate_limit(mut self, max_failed_attempts: u32, window: Duration) -> Self {
        self.config.auth_max_failed_attempts = max_failed_attempts;
        self.config.auth_lock_window = window;
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    pub fn with_max_container_size(mut self, size: usize) -> Self {
        self.config.max_container_size = size;
        self
    }

    pub fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.config.max_nesting_depth = depth;
        self
    }

    pub fn with_server_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.server_agent = agent.into();
        self
    }

    pub fn with_recv_timeout_hint(mut self, hint: Duration) -> Self {
        self.config.recv_timeout_hint = Some(hint);
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<BoltConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
