//! TOML-based application configuration.
//!
//! Stores user preferences including:
//! - Exercise defaults (phase duration, time limit, limit presets)
//! - Offline asset cache settings (generation, origin, asset list)
//! - Log filter
//!
//! Configuration is stored at `~/.config/breathwork/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::{ConfigError, Result};

/// Exercise defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseConfig {
    /// Seconds per phase.
    #[serde(default = "default_phase_duration")]
    pub phase_duration: u64,
    /// Seconds; absent means no limit.
    #[serde(default)]
    pub time_limit: Option<u64>,
    /// Selectable limits, in seconds.
    #[serde(default = "default_time_limit_presets")]
    pub time_limit_presets: Vec<u64>,
}

/// Offline asset cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Version-tagged cache name. Bump it to roll out new assets.
    #[serde(default = "default_generation")]
    pub generation: String,
    /// Origin the asset paths are resolved against.
    #[serde(default = "default_origin")]
    pub origin: String,
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,
    /// Page served for navigations while offline.
    #[serde(default = "default_fallback")]
    pub fallback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/breathwork/config.toml`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub exercise: ExerciseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// Default functions
fn default_phase_duration() -> u64 {
    4
}
fn default_time_limit_presets() -> Vec<u64> {
    vec![60, 180, 300, 600]
}
fn default_generation() -> String {
    "box-breathing-cache-v1".into()
}
fn default_origin() -> String {
    "http://localhost:8080".into()
}
fn default_assets() -> Vec<String> {
    ["/", "/index.html", "/app.js", "/manifest.json"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_fallback() -> String {
    "/index.html".into()
}
fn default_log_filter() -> String {
    "warn".into()
}

impl Default for ExerciseConfig {
    fn default() -> Self {
        Self {
            phase_duration: default_phase_duration(),
            time_limit: None,
            time_limit_presets: default_time_limit_presets(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            generation: default_generation(),
            origin: default_origin(),
            assets: default_assets(),
            fallback: default_fallback(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value
                            .parse::<bool>()
                            .map_err(|_| invalid(format!("cannot parse '{value}' as bool")))?,
                    ),
                    // Optional numbers serialize as null when unset; a required
                    // field given "none" fails when the config is rebuilt.
                    serde_json::Value::Number(_) | serde_json::Value::Null => match value {
                        "" | "none" | "null" => serde_json::Value::Null,
                        _ => value
                            .parse::<u64>()
                            .map(|n| serde_json::Value::Number(n.into()))
                            .map_err(|_| {
                                invalid(format!("expected seconds or 'none', got '{value}'"))
                            })?,
                    },
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    serde_json::Value::String(_) => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// Path of the config file inside the data directory.
    pub fn path() -> Result<PathBuf> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk, writing defaults first if no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation, or if the default config cannot be written to disk.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Config = toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
                cfg.validate()?;
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
            .into()),
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Reject values the timer or the cache cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        };
        if self.exercise.phase_duration == 0 {
            return Err(invalid("exercise.phase_duration", "must be at least 1 second"));
        }
        if self.exercise.time_limit == Some(0) {
            return Err(invalid("exercise.time_limit", "must be positive or unset"));
        }
        if self.exercise.time_limit_presets.contains(&0) {
            return Err(invalid("exercise.time_limit_presets", "presets must be positive"));
        }
        if self.cache.generation.trim().is_empty() {
            return Err(invalid("cache.generation", "must not be empty"));
        }
        if let Err(e) = url::Url::parse(&self.cache.origin) {
            return Err(invalid("cache.origin", &e.to_string()));
        }
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving. Returns error if the key is
    /// unknown or the result does not validate.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let mut json = serde_json::to_value(&*self)?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json)?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Set a config value by key and save.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the config cannot be saved.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.apply(key, value)?;
        self.save()
    }
}
