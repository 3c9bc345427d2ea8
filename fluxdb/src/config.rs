use crate::error::{FluxError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Runtime configuration, usually read from a `flux.yaml` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database file, or `:memory:`
    #[serde(default = "default_database")]
    pub database: String,
    /// Directory holding one `<Model>.json` extension file per extended model
    #[serde(default = "default_extend_dir")]
    pub extend_dir: PathBuf,
    #[serde(default)]
    pub table_prefix: String,
    /// Prefixes of `Suite`, `Suite/Kind` or `Suite/Kind/Name` to exclude
    #[serde(default)]
    pub disabled_plugins: Vec<String>,
    #[serde(default = "default_storage")]
    pub storage: String,
    #[serde(default = "default_cache")]
    pub cache: Option<String>,
    /// Wrap `save_all` in a storage transaction
    #[serde(default)]
    pub atomic_batches: bool,
}

fn default_database() -> String {
    ":memory:".to_string()
}

fn default_extend_dir() -> PathBuf {
    PathBuf::from("extends")
}

fn default_storage() -> String {
    "Sqlite".to_string()
}

fn default_cache() -> Option<String> {
    Some("Array".to_string())
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: default_database(),
            extend_dir: default_extend_dir(),
            table_prefix: String::new(),
            disabled_plugins: Vec::new(),
            storage: default_storage(),
            cache: default_cache(),
            atomic_batches: false,
        }
    }
}

impl Config {
    /// Parse a YAML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FluxError::Configuration(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse a YAML config string
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| FluxError::Configuration(format!("invalid config: {e}")))?;
        Ok(config)
    }

    /// Builder-style helper used mostly by tests.
    pub fn with_extend_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extend_dir = dir.into();
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.database == ":memory:"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config = Config::from_yaml_str("{}").unwrap();
        assert!(config.is_in_memory());
        assert_eq!(config.extend_dir, PathBuf::from("extends"));
        assert_eq!(config.storage, "Sqlite");
        assert_eq!(config.cache.as_deref(), Some("Array"));
        assert!(!config.atomic_batches);
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_yaml_str(
            r#"
database: data/flux.db
extend_dir: data/extends
table_prefix: flux_
disabled_plugins: [Core/Cache, Demo]
cache: ~
atomic_batches: true
"#,
        )
        .unwrap();
        assert_eq!(config.database, "data/flux.db");
        assert_eq!(config.table_prefix, "flux_");
        assert_eq!(config.disabled_plugins, vec!["Core/Cache", "Demo"]);
        assert!(config.cache.is_none());
        assert!(config.atomic_batches);
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let result = Config::from_file(Path::new("/nonexistent/flux.yaml"));
        assert!(matches!(result, Err(FluxError::Configuration(_))));
    }

    #[test]
    fn test_malformed_yaml_is_configuration_error() {
        let result = Config::from_yaml_str("disabled_plugins: {nope");
        assert!(matches!(result, Err(FluxError::Configuration(_))));
    }
}
