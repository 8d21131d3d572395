//! FFI settings (dynffi.toml / ~/.dynffi/config.toml)
//!
//! Both files share one schema. Every field is optional so a global file and
//! a project file can be layered with [`FfiConfig::merge`].

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct FfiConfig {
    /// Library loading settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<LibraryConfig>,

    /// Logging settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogConfig>,
}

/// `[library]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LibraryConfig {
    /// Directories searched for short library names, in priority order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_paths: Option<Vec<PathBuf>>,

    /// Make symbols of loaded modules visible to later loads (RTLD_GLOBAL)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global: Option<bool>,
}

/// `[log]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// `tracing` filter directive, e.g. "dynffi_runtime=debug"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl FfiConfig {
    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config = Self::parse(&content).map_err(|e| match e {
            ConfigError::TomlParseError { error, .. } => ConfigError::TomlParseError {
                file: path.to_path_buf(),
                error,
            },
            other => other,
        })?;

        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::TomlParseError {
            file: PathBuf::new(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(paths) = self.library.as_ref().and_then(|l| l.search_paths.as_ref()) {
            if paths.iter().any(|p| p.as_os_str().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    field: "library.search_paths".to_string(),
                    reason: "empty path".to_string(),
                });
            }
        }

        if let Some(filter) = self.log.as_ref().and_then(|l| l.filter.as_ref()) {
            if filter.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "log.filter".to_string(),
                    reason: "filter must not be empty".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Layer `other` on top of `self`; set fields in `other` win
    ///
    /// Search paths are concatenated with `other`'s entries first so that the
    /// more specific file is searched before the more general one.
    pub fn merge(mut self, other: FfiConfig) -> FfiConfig {
        if let Some(lib) = other.library {
            let base = self.library.get_or_insert_with(Default::default);
            if let Some(mut paths) = lib.search_paths {
                if let Some(existing) = base.search_paths.take() {
                    paths.extend(existing);
                }
                base.search_paths = Some(paths);
            }
            if lib.global.is_some() {
                base.global = lib.global;
            }
        }

        if let Some(log) = other.log {
            if log.filter.is_some() {
                self.log = Some(log);
            }
        }

        self
    }

    /// Library search paths (empty when unset)
    pub fn search_paths(&self) -> &[PathBuf] {
        self.library
            .as_ref()
            .and_then(|l| l.search_paths.as_deref())
            .unwrap_or(&[])
    }

    /// Default visibility for loaded modules
    pub fn global(&self) -> bool {
        self.library
            .as_ref()
            .and_then(|l| l.global)
            .unwrap_or(false)
    }

    /// Log filter directive, if configured
    pub fn log_filter(&self) -> Option<&str> {
        self.log.as_ref().and_then(|l| l.filter.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_full_config() {
        let config = FfiConfig::parse(
            r#"
[library]
search_paths = ["/opt/lib", "vendor/lib"]
global = true

[log]
filter = "dynffi_runtime=debug"
"#,
        )
        .unwrap();

        assert_eq!(
            config.search_paths(),
            &[PathBuf::from("/opt/lib"), PathBuf::from("vendor/lib")]
        );
        assert!(config.global());
        assert_eq!(config.log_filter(), Some("dynffi_runtime=debug"));
    }

    #[test]
    fn test_empty_config_defaults() {
        let config = FfiConfig::parse("").unwrap();
        assert!(config.search_paths().is_empty());
        assert!(!config.global());
        assert_eq!(config.log_filter(), None);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = FfiConfig::parse("[library]\nsearch = []\n");
        assert!(matches!(result, Err(ConfigError::TomlParseError { .. })));
    }

    #[test]
    fn test_empty_filter_rejected() {
        let result = FfiConfig::parse("[log]\nfilter = \"  \"\n");
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "log.filter"
        ));
    }

    #[test]
    fn test_merge_prefers_overlay() {
        let global = FfiConfig::parse(
            r#"
[library]
search_paths = ["/usr/local/lib"]
global = true

[log]
filter = "warn"
"#,
        )
        .unwrap();
        let project = FfiConfig::parse(
            r#"
[library]
search_paths = ["./lib"]
global = false
"#,
        )
        .unwrap();

        let merged = global.merge(project);
        assert_eq!(
            merged.search_paths(),
            &[PathBuf::from("./lib"), PathBuf::from("/usr/local/lib")]
        );
        assert!(!merged.global());
        assert_eq!(merged.log_filter(), Some("warn"));
    }
}
