//! Client and server configuration.
//!
//! Both structs have sensible defaults, can be adjusted through the fluent
//! builders, and can be loaded from JSON (durations in milliseconds, every
//! field optional):
//!
//! ```
//! use rpcwire::config::ServerConfig;
//!
//! let config = ServerConfig::from_json_str(
//!     r#"{ "max_concurrent_calls": 16, "log_exceptions": true }"#,
//! )
//! .unwrap();
//! assert_eq!(config.max_concurrent_calls, 16);
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::writer::WriterConfig;

/// Default maximum concurrently running calls per server connection.
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 256;

/// Default time in-flight calls get to finish when a connection closes.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Client settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Deadline applied to every call; `None` waits indefinitely.
    #[serde(rename = "timeout_ms", with = "option_duration_ms")]
    pub timeout: Option<Duration>,
    /// Largest reply payload accepted.
    pub max_payload_size: u32,
    /// Outbound frame queue.
    pub writer: WriterConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            writer: WriterConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Server settings, applied to every connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Calls running at once on one connection; reading pauses at the limit.
    pub max_concurrent_calls: usize,
    /// How long `close()` waits for in-flight calls before aborting them.
    #[serde(rename = "drain_timeout_ms", with = "duration_ms")]
    pub drain_timeout: Duration,
    /// Log faults raised by methods.
    pub log_exceptions: bool,
    /// Fault names never logged, even with `log_exceptions`.
    pub exclude_log_exceptions: Vec<String>,
    /// Largest call payload accepted.
    pub max_payload_size: u32,
    /// Outbound frame queue.
    pub writer: WriterConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: DEFAULT_MAX_CONCURRENT_CALLS,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            log_exceptions: false,
            exclude_log_exceptions: Vec::new(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            writer: WriterConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Serde helper: `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Serde helper: `Option<Duration>` as integer milliseconds or null.
pub(crate) mod option_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
