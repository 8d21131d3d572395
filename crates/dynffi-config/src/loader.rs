//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::settings::{FfiConfig, LibraryConfig, LogConfig};
use crate::{ConfigError, ConfigResult, PROJECT_CONFIG_FILE};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.dynffi/config.toml) - lowest priority
/// 2. Project config (./dynffi.toml) - overrides global
/// 3. Environment variables (DYNFFI_*) - overrides project
/// 4. CLI flags - highest priority (handled by caller)
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Create a loader that reads the global config from `path` instead of the home directory
    pub fn with_global_path(path: impl Into<PathBuf>) -> Self {
        Self {
            global_config_path: Some(path.into()),
        }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find dynffi.toml, layers it over the
    /// global config (if any) and applies environment overrides.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<FfiConfig> {
        let project = self.find_project_config(start_dir)?;
        let global = self.load_global_config()?;

        Ok(apply_env_overrides(global.merge(project)))
    }

    /// Load configuration from a specific file
    ///
    /// The global config and environment overrides still apply.
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<FfiConfig> {
        let project = FfiConfig::load_from_file(config_path)?;
        let global = self.load_global_config()?;

        Ok(apply_env_overrides(global.merge(project)))
    }

    /// Find project configuration by walking up directory tree
    fn find_project_config(&self, start_dir: &Path) -> ConfigResult<FfiConfig> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_CONFIG_FILE);

            if config_path.exists() {
                return FfiConfig::load_from_file(&config_path);
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok(FfiConfig::default()),
            }
        }
    }

    /// Load global configuration from ~/.dynffi/config.toml
    fn load_global_config(&mut self) -> ConfigResult<FfiConfig> {
        let path = match &self.global_config_path {
            Some(path) => path.clone(),
            None => match Self::global_config_dir() {
                Ok(dir) => {
                    let path = dir.join("config.toml");
                    self.global_config_path = Some(path.clone());
                    path
                }
                // No home directory means no global config
                Err(ConfigError::HomeNotFound) => return Ok(FfiConfig::default()),
                Err(e) => return Err(e),
            },
        };

        if !path.exists() {
            return Ok(FfiConfig::default());
        }

        FfiConfig::load_from_file(&path)
    }

    /// Get the global configuration directory (~/.dynffi)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".dynffi"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply environment variable overrides
///
/// - `DYNFFI_LIBRARY_PATH`: platform path list, prepended to the search paths
/// - `DYNFFI_GLOBAL`: `true`/`1`/`yes` enables global symbol visibility
/// - `DYNFFI_LOG`: log filter directive
pub fn apply_env_overrides(config: FfiConfig) -> FfiConfig {
    let mut overlay = FfiConfig::default();

    if let Some(paths) = env::var_os("DYNFFI_LIBRARY_PATH") {
        let paths: Vec<PathBuf> = env::split_paths(&paths)
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        if !paths.is_empty() {
            overlay
                .library
                .get_or_insert_with(LibraryConfig::default)
                .search_paths = Some(paths);
        }
    }

    if let Ok(global) = env::var("DYNFFI_GLOBAL") {
        let global = matches!(global.to_lowercase().as_str(), "true" | "1" | "yes");
        overlay
            .library
            .get_or_insert_with(LibraryConfig::default)
            .global = Some(global);
    }

    if let Ok(filter) = env::var("DYNFFI_LOG") {
        if !filter.trim().is_empty() {
            overlay.log = Some(LogConfig {
                filter: Some(filter),
            });
        }
    }

    config.merge(overlay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn create_config_file(dir: &Path, content: &str) -> PathBuf {
        let config_path = dir.join(PROJECT_CONFIG_FILE);
        fs::write(&config_path, content).unwrap();
        config_path
    }

    fn clear_env() {
        env::remove_var("DYNFFI_LIBRARY_PATH");
        env::remove_var("DYNFFI_GLOBAL");
        env::remove_var("DYNFFI_LOG");
    }

    fn isolated_loader(temp: &TempDir) -> ConfigLoader {
        ConfigLoader::with_global_path(temp.path().join("no-global.toml"))
    }

    #[test]
    #[serial]
    fn test_load_project_config() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        create_config_file(
            temp_dir.path(),
            r#"
[library]
search_paths = ["/opt/native"]
"#,
        );

        let config = isolated_loader(&temp_dir)
            .load_from_directory(temp_dir.path())
            .unwrap();

        assert_eq!(config.search_paths(), &[PathBuf::from("/opt/native")]);
    }

    #[test]
    #[serial]
    fn test_find_config_in_parent() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[library]\nglobal = true\n");

        let sub_dir = temp_dir.path().join("subdir");
        fs::create_dir(&sub_dir).unwrap();

        let config = isolated_loader(&temp_dir)
            .load_from_directory(&sub_dir)
            .unwrap();

        assert!(config.global());
    }

    #[test]
    #[serial]
    fn test_global_config_is_layered_under_project() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let global_path = temp_dir.path().join("global.toml");
        fs::write(&global_path, "[log]\nfilter = \"info\"\n[library]\nglobal = true\n").unwrap();

        let project_dir = temp_dir.path().join("project");
        fs::create_dir(&project_dir).unwrap();
        create_config_file(&project_dir, "[library]\nglobal = false\n");

        let config = ConfigLoader::with_global_path(global_path)
            .load_from_directory(&project_dir)
            .unwrap();

        assert!(!config.global());
        assert_eq!(config.log_filter(), Some("info"));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        create_config_file(
            temp_dir.path(),
            "[library]\nsearch_paths = [\"/from/file\"]\n",
        );

        env::set_var("DYNFFI_LIBRARY_PATH", "/from/env");
        env::set_var("DYNFFI_GLOBAL", "yes");
        env::set_var("DYNFFI_LOG", "trace");

        let config = isolated_loader(&temp_dir)
            .load_from_directory(temp_dir.path())
            .unwrap();
        clear_env();

        assert_eq!(
            config.search_paths(),
            &[PathBuf::from("/from/env"), PathBuf::from("/from/file")]
        );
        assert!(config.global());
        assert_eq!(config.log_filter(), Some("trace"));
    }

    #[test]
    #[serial]
    fn test_invalid_toml_reports_file() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let path = create_config_file(temp_dir.path(), "[library\n");

        let result = isolated_loader(&temp_dir).load_from_file(&path);
        match result {
            Err(ConfigError::TomlParseError { file, .. }) => assert_eq!(file, path),
            other => panic!("expected TomlParseError, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigLoader::new().load_from_file(Path::new("/nonexistent/dynffi.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }
}
