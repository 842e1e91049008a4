//! Core error types for breathwork-core.
//!
//! This module defines the error hierarchy using thiserror. The timer and the
//! cache return their own enums; `CoreError` covers configuration loading,
//! where parse, validation and I/O failures meet.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for breathwork-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Unknown dot-path key
    #[error("unknown config key: {0}")]
    UnknownKey(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Home/data directory could not be prepared
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    /// Operation not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl ValidationError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Offline asset cache errors.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Pre-population of a generation failed; nothing was stored.
    #[error("Install of cache '{generation}' failed on '{asset}': {message}")]
    InstallFailed {
        generation: String,
        asset: String,
        message: String,
    },

    /// Network request failed and no fallback applies.
    #[error("Network request for {url} failed: {message}")]
    Network { url: String, message: String },

    /// Navigation fallback document is not in the cache.
    #[error("Offline fallback '{0}' is not cached")]
    FallbackMissing(String),

    /// Lifecycle step invoked out of order.
    #[error("Worker is {state}, cannot {action}")]
    Lifecycle { state: String, action: String },

    /// Storage backend failure.
    #[error("Cache storage error: {0}")]
    Storage(String),

    /// Malformed request URL or asset path
    #[error("Invalid URL '{input}': {source}")]
    InvalidUrl {
        input: String,
        #[source]
        source: url::ParseError,
    },
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        CacheError::Network {
            url: err
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "<unknown>".into()),
            message: err.to_string(),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
