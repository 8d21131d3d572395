//! dynffi Configuration System
//!
//! Provides configuration for the dynamic FFI engine and its CLI:
//! - Project configuration (dynffi.toml)
//! - Global user configuration (~/.dynffi/config.toml)
//! - Environment overrides (DYNFFI_*)
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Global config (~/.dynffi/config.toml)
//! 2. Project config (./dynffi.toml, searched upwards)
//! 3. Environment variables (DYNFFI_*)
//! 4. CLI flags
//!
//! # Example
//!
//! ```no_run
//! use dynffi_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! println!("{:?}", config.search_paths());
//! ```

pub mod loader;
pub mod settings;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// Re-export main types
pub use loader::ConfigLoader;
pub use settings::{FfiConfig, LibraryConfig, LogConfig};

/// File name searched for when walking up from a project directory
pub const PROJECT_CONFIG_FILE: &str = "dynffi.toml";
