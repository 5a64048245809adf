//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files
//! across the COMET worker cache crates: the [`ConfigLoader`] trait plus the
//! cache and endpoint configuration structs with their validation rules.
//!
//! # Usage
//!
//! ```rust,no_run
//! use comet_common::config::{CacheConfig, ConfigLoader};
//! use std::path::Path;
//!
//! let config = CacheConfig::load(Path::new("cache.toml")).expect("load cache config");
//! println!("Host capacity: {} bytes", config.size);
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::consts::{DEFAULT_AUTH_KEY, DEFAULT_ENDPOINT_IP, DEFAULT_ENDPOINT_PORT};

/// Log level for configuration.
///
/// Serializes to lowercase strings: "trace", "debug", "info", "warn", "error".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace-level verbosity.
    Trace,
    /// Debug-level verbosity.
    Debug,
    /// Info-level verbosity (default).
    Info,
    /// Warning-level verbosity.
    Warn,
    /// Error-level verbosity.
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
/// - Returns `ConfigError::ValidationError` if semantic validation fails
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load and validate configuration from the given path.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound);
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the loaded configuration.
    fn validate(&self) -> Result<(), ConfigError>;
}

/// Eviction policy identifier.
///
/// Only `least-hits` is defined: victims are selected in ascending hit-count
/// order, FIFO within a hit bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionPolicy {
    /// Evict entries with the fewest recorded hits first.
    #[serde(rename = "least-hits")]
    LeastHits,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::LeastHits
    }
}

/// Worker cache configuration.
///
/// # TOML Example
///
/// ```toml
/// size = 1073741824
/// gpu_cache_size = 268435456
/// policy = "least-hits"
/// log_dir = "/tmp/comet"
/// cache_profiler = false
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Host cache capacity in bytes. Zero disables host caching.
    #[serde(default)]
    pub size: usize,

    /// Device cache capacity in bytes. Zero disables device caching.
    #[serde(default)]
    pub gpu_cache_size: usize,

    /// Eviction policy.
    #[serde(default)]
    pub policy: EvictionPolicy,

    /// Directory for debug logs and profiler reports.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Enables the profiling bookkeeping on PUT/PUT_GPU/GET.
    #[serde(default)]
    pub cache_profiler: bool,

    /// Log verbosity.
    #[serde(default)]
    pub log_level: LogLevel,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size: 0,
            gpu_cache_size: 0,
            policy: EvictionPolicy::default(),
            log_dir: default_log_dir(),
            cache_profiler: false,
            log_level: LogLevel::default(),
        }
    }
}

impl ConfigLoader for CacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_profiler && self.size == 0 && self.gpu_cache_size == 0 {
            return Err(ConfigError::ValidationError(
                "cache_profiler enabled but both cache capacities are zero".to_string(),
            ));
        }
        if self.log_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "log_dir cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Region endpoint configuration: where the shared-memory region server
/// listens and the fixed byte string clients must present on connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Endpoint IP address.
    #[serde(default = "default_endpoint_ip")]
    pub ip: String,

    /// Endpoint port.
    #[serde(default = "default_endpoint_port")]
    pub port: u16,

    /// Authentication key, agreed out of band.
    #[serde(default = "default_auth_key")]
    pub auth_key: Vec<u8>,
}

fn default_endpoint_ip() -> String {
    DEFAULT_ENDPOINT_IP.to_string()
}

fn default_endpoint_port() -> u16 {
    DEFAULT_ENDPOINT_PORT
}

fn default_auth_key() -> Vec<u8> {
    DEFAULT_AUTH_KEY.to_vec()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            ip: default_endpoint_ip(),
            port: default_endpoint_port(),
            auth_key: default_auth_key(),
        }
    }
}

impl EndpointConfig {
    /// Socket address string in `ip:port` form.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl ConfigLoader for EndpointConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.ip.is_empty() {
            return Err(ConfigError::ValidationError(
                "ip cannot be empty".to_string(),
            ));
        }
        if self.auth_key.is_empty() {
            return Err(ConfigError::ValidationError(
                "auth_key cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
