//! Nativecheck Configuration
//!
//! Handles parsing and management of nativecheck.toml configuration files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::ffi::{BindingResolver, MarshalLimits, DEFAULT_MAX_CAPACITY};
use crate::logging::LogFormat;

/// Name of the configuration file searched for in the working directory and parents.
pub const CONFIG_FILE_NAME: &str = "nativecheck.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching nativecheck.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HarnessConfig {
    /// Where native libraries are looked up
    #[serde(default)]
    pub libraries: LibrariesConfig,

    /// Marshalling limits
    #[serde(default)]
    pub marshal: MarshalConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HarnessConfig {
    /// Load configuration from a file path.
    ///
    /// A relative `libraries.dir` is resolved against the file's directory.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let mut config: HarnessConfig = toml::from_str(&content)?;
        if let (Some(dir), Some(parent)) = (&config.libraries.dir, path.parent()) {
            if dir.is_relative() {
                config.libraries.dir = Some(parent.join(dir));
            }
        }
        Ok(config)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                // Reached root without finding config
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Marshalling limits described by this configuration.
    pub fn marshal_limits(&self) -> MarshalLimits {
        MarshalLimits {
            max_capacity: self.marshal.max_capacity,
        }
    }

    /// Build a binding resolver honouring this configuration.
    pub fn resolver(&self) -> BindingResolver {
        let resolver = BindingResolver::new().with_limits(self.marshal_limits());
        match &self.libraries.dir {
            Some(dir) => resolver.with_base_dir(dir),
            None => resolver,
        }
    }
}

/// Library lookup settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LibrariesConfig {
    /// Base directory for relative library paths
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Marshalling settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarshalConfig {
    /// Largest capacity a mutable buffer may declare, in bytes
    #[serde(default = "default_max_capacity")]
    pub max_capacity: usize,
}

fn default_max_capacity() -> usize {
    DEFAULT_MAX_CAPACITY
}

impl Default for MarshalConfig {
    fn default() -> Self {
        Self {
            max_capacity: default_max_capacity(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by `RUST_LOG`)
    #[serde(default = "default_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

fn default_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}
