//! Library configuration.
//!
//! Settings are layered with the following precedence:
//! 1. Environment variables (highest priority)
//! 2. JSON config file
//! 3. Default values (lowest priority)
//!
//! Chunk-cache defaults start from the process-wide value set with
//! [`set_chunk_cache`](crate::chunking::set_chunk_cache).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chunking::{get_chunk_cache, ChunkCache};
use crate::error::{Error, Result};

pub const ENV_CHUNK_CACHE_SIZE: &str = "NC4H5_CHUNK_CACHE_SIZE";
pub const ENV_CHUNK_CACHE_NELEMS: &str = "NC4H5_CHUNK_CACHE_NELEMS";
pub const ENV_CHUNK_CACHE_PREEMPTION: &str = "NC4H5_CHUNK_CACHE_PREEMPTION";
pub const ENV_DEFAULT_CHUNK_SIZE: &str = "NC4H5_DEFAULT_CHUNK_SIZE";
pub const ENV_LOG_LEVEL: &str = "NC4H5_LOG_LEVEL";

/// Complete configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Chunk cache given to every new variable
    #[serde(default = "get_chunk_cache")]
    pub chunk_cache: ChunkCache,

    /// Target size in bytes of a default chunk
    #[serde(default = "default_chunk_size")]
    pub default_chunk_size: usize,

    /// Target size in bytes of a default chunk of a one-dimensional
    /// unlimited variable
    #[serde(default = "default_1d_unlim_size")]
    pub default_1d_unlim_size: usize,

    /// How many chunks an adjusted cache holds
    #[serde(default = "default_chunks_in_cache")]
    pub chunks_in_cache: usize,

    /// Upper bound for an adjusted cache
    #[serde(default = "default_max_cache_size")]
    pub max_default_cache_size: usize,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from defaults, an optional JSON file and the
    /// environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();
        if let Some(path) = path {
            let json_config = Self::load_from_file(path)?;
            config.merge(json_config);
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: Config) {
        *self = other;
    }

    /// Override fields from environment variables looked up through `var`
    pub fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
            value
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("{key}={value:?} is not a valid value")))
        }
        if let Some(v) = var(ENV_CHUNK_CACHE_SIZE) {
            self.chunk_cache.size = parse(ENV_CHUNK_CACHE_SIZE, &v)?;
        }
        if let Some(v) = var(ENV_CHUNK_CACHE_NELEMS) {
            self.chunk_cache.nelems = parse(ENV_CHUNK_CACHE_NELEMS, &v)?;
        }
        if let Some(v) = var(ENV_CHUNK_CACHE_PREEMPTION) {
            self.chunk_cache.preemption = parse(ENV_CHUNK_CACHE_PREEMPTION, &v)?;
        }
        if let Some(v) = var(ENV_DEFAULT_CHUNK_SIZE) {
            self.default_chunk_size = parse(ENV_DEFAULT_CHUNK_SIZE, &v)?;
        }
        if let Some(v) = var(ENV_LOG_LEVEL) {
            self.log_level = v;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.chunk_cache.preemption) {
            return Err(Error::Config(format!(
                "chunk cache preemption {} must be within [0, 1]",
                self.chunk_cache.preemption
            )));
        }
        if self.chunk_cache.size == 0 || self.chunk_cache.nelems == 0 {
            return Err(Error::Config("chunk cache size and slot count cannot be 0".to_string()));
        }
        if self.default_chunk_size == 0 || self.default_1d_unlim_size == 0 {
            return Err(Error::Config("default chunk sizes cannot be 0".to_string()));
        }
        if self.chunks_in_cache == 0 {
            return Err(Error::Config("chunks_in_cache cannot be 0".to_string()));
        }
        if self.max_default_cache_size < self.chunk_cache.size {
            return Err(Error::Config(format!(
                "max_default_cache_size {} is below the default cache size {}",
                self.max_default_cache_size, self.chunk_cache.size
            )));
        }
        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(Error::Config(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.log_level
                )));
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_cache: get_chunk_cache(),
            default_chunk_size: default_chunk_size(),
            default_1d_unlim_size: default_1d_unlim_size(),
            chunks_in_cache: default_chunks_in_cache(),
            max_default_cache_size: default_max_cache_size(),
            log_level: default_log_level(),
        }
    }
}

fn default_chunk_size() -> usize {
    16 * 1024 * 1024
}

fn default_1d_unlim_size() -> usize {
    4096
}

fn default_chunks_in_cache() -> usize {
    10
}

fn default_max_cache_size() -> usize {
    64 * 1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.default_chunk_size, 16 * 1024 * 1024);
        assert_eq!(config.default_1d_unlim_size, 4096);
        assert_eq!(config.chunks_in_cache, 10);
        assert_eq!(config.log_level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = Config::from_json(r#"{ "default_chunk_size": 1048576 }"#).unwrap();
        assert_eq!(config.default_chunk_size, 1048576);
        assert_eq!(config.max_default_cache_size, 64 * 1024 * 1024);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "log_level": "debug", "chunk_cache": {{ "size": 2048, "nelems": 11, "preemption": 0.5 }} }}"#).unwrap();
        let mut config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.chunk_cache.size, 2048);

        let env: HashMap<&str, &str> = [(ENV_CHUNK_CACHE_SIZE, "4096"), (ENV_LOG_LEVEL, "warn")].into();
        config.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.chunk_cache.size, 4096);
        assert_eq!(config.chunk_cache.nelems, 11);
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = Config::default();
        let err = config
            .apply_env(|k| (k == ENV_CHUNK_CACHE_PREEMPTION).then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = Config::default();
        config.chunk_cache.preemption = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.log_level = "verbose".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.default_chunk_size = 0;
        assert!(config.validate().is_err());
    }
}
