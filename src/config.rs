//! # Configuration Management
//!
//! Centralized configuration for the Netron protocol runtime.
//!
//! This module provides structured configuration for peers and the core
//! dispatcher: request/handshake deadlines, stream flow-control thresholds
//! and protocol-violation policy.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Environment overrides via `from_env()` (`NETRON_*` variables)
//! - Direct instantiation with defaults

use crate::error::{NetronError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Max allowed payload size for a single packet (16 MB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Default receive-buffer high-water mark for streams (64 KB)
pub const DEFAULT_STREAM_HIGH_WATER_MARK: usize = 64 * 1024;

/// Runtime configuration for a Netron instance
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetronConfig {
    /// Deadline for a response to an outbound request
    #[serde(with = "duration_serde")]
    pub response_timeout: Duration,

    /// Deadline for completing the connection handshake
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Deadline for the remote side to accept a requested stream
    #[serde(with = "duration_serde")]
    pub stream_accept_timeout: Duration,

    /// Buffered-bytes threshold above which a stream receiver emits PAUSE
    pub stream_high_water_mark: usize,

    /// Maximum allowed packet payload size in bytes
    pub max_payload_size: usize,

    /// Treat protocol violations (unknown action codes, malformed
    /// handshakes) as fatal for the connection instead of failing the
    /// single request
    pub fatal_protocol_violations: bool,
}

impl Default for NetronConfig {
    fn default() -> Self {
        Self {
            response_timeout: timeout::RESPONSE_TIMEOUT,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            stream_accept_timeout: timeout::STREAM_ACCEPT_TIMEOUT,
            stream_high_water_mark: DEFAULT_STREAM_HIGH_WATER_MARK,
            max_payload_size: MAX_PAYLOAD_SIZE,
            fatal_protocol_violations: false,
        }
    }
}

impl NetronConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| NetronError::ConfigError(format!("Failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| NetronError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables, starting from defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("NETRON_RESPONSE_TIMEOUT_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                config.response_timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(val) = std::env::var("NETRON_HANDSHAKE_TIMEOUT_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                config.handshake_timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(val) = std::env::var("NETRON_STREAM_HIGH_WATER_MARK") {
            if let Ok(bytes) = val.parse::<usize>() {
                config.stream_high_water_mark = bytes;
            }
        }

        if let Ok(val) = std::env::var("NETRON_FATAL_PROTOCOL_VIOLATIONS") {
            config.fatal_protocol_violations = matches!(val.as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Validate the configuration for common misconfigurations.
    ///
    /// Returns a list of validation errors. Empty list means the
    /// configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.response_timeout.as_millis() < 10 {
            errors.push("Response timeout too short (minimum: 10ms)".to_string());
        } else if self.response_timeout.as_secs() > 600 {
            errors.push("Response timeout too long (maximum: 600s)".to_string());
        }

        if self.handshake_timeout.as_millis() < 10 {
            errors.push("Handshake timeout too short (minimum: 10ms)".to_string());
        } else if self.handshake_timeout.as_secs() > 300 {
            errors.push("Handshake timeout too long (maximum: 300s)".to_string());
        }

        if self.stream_accept_timeout.as_millis() < 10 {
            errors.push("Stream accept timeout too short (minimum: 10ms)".to_string());
        }

        if self.stream_high_water_mark == 0 {
            errors.push("Stream high-water mark must be greater than 0".to_string());
        } else if self.stream_high_water_mark > self.max_payload_size {
            errors.push("Stream high-water mark cannot exceed max payload size".to_string());
        }

        if self.max_payload_size < 1024 {
            errors.push("Max payload size too small (minimum: 1 KB)".to_string());
        } else if self.max_payload_size > 100 * 1024 * 1024 {
            errors.push(format!(
                "Max payload size too large: {} bytes (maximum recommended: 100 MB)",
                self.max_payload_size
            ));
        }

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(NetronError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Helper module for Duration serialization/deserialization as milliseconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(NetronConfig::default().validate().is_empty());
    }

    #[test]
    fn toml_round_trip() {
        let example = NetronConfig::example_config();
        let parsed = NetronConfig::from_toml(&example).expect("example config must parse");
        assert_eq!(parsed.max_payload_size, MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn zero_high_water_mark_rejected() {
        let config = NetronConfig::default_with_overrides(|c| c.stream_high_water_mark = 0);
        assert!(config.validate_strict().is_err());
    }
}
