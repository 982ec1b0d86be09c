// ⚙️ Configuration - TOML file + environment overrides
//
// Every field has a default, so an empty file (or no file) is a valid config.
//
//   [warehouse]
//   path = "roster.db"
//
//   [store]
//   root = "store"
//   input_prefix = "project/"
//   archive_prefix = "archives/"
//   insert_prefix = "inserts/"
//   update_prefix = "updates/"
//
//   [alerts]
//   subject = "Roster Reconciliation Failure Notification"

use crate::error::{ReconcileError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_DB_PATH: &str = "ROSTER_DB_PATH";
pub const ENV_STORE_ROOT: &str = "ROSTER_STORE_ROOT";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub warehouse: WarehouseConfig,
    pub store: StoreConfig,
    pub alerts: AlertConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WarehouseConfig {
    pub path: PathBuf,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        WarehouseConfig {
            path: PathBuf::from("roster.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub root: PathBuf,
    pub input_prefix: String,
    pub archive_prefix: String,
    pub insert_prefix: String,
    pub update_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            root: PathBuf::from("store"),
            input_prefix: "project/".to_string(),
            archive_prefix: "archives/".to_string(),
            insert_prefix: "inserts/".to_string(),
            update_prefix: "updates/".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlertConfig {
    pub subject: String,
}

impl Default for AlertConfig {
    fn default() -> Self {
        AlertConfig {
            subject: "Roster Reconciliation Failure Notification".to_string(),
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| ReconcileError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    ReconcileError::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                Config::from_toml(&text)?
            }
            None => Config::default(),
        };

        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overrides come through a lookup function so tests need not touch the
    /// process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DB_PATH).filter(|v| !v.is_empty()) {
            self.warehouse.path = PathBuf::from(path);
        }
        if let Some(root) = lookup(ENV_STORE_ROOT).filter(|v| !v.is_empty()) {
            self.store.root = PathBuf::from(root);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let prefixes = [
            ("input_prefix", &self.store.input_prefix),
            ("archive_prefix", &self.store.archive_prefix),
            ("insert_prefix", &self.store.insert_prefix),
            ("update_prefix", &self.store.update_prefix),
        ];

        for (name, prefix) in prefixes {
            if prefix.is_empty() || !prefix.ends_with('/') {
                return Err(ReconcileError::Config(format!(
                    "store.{} must be a non-empty folder prefix ending in '/', got '{}'",
                    name, prefix
                )));
            }
        }

        // Archiving into the input folder would rediscover the file next run
        if self.store.archive_prefix.starts_with(&self.store.input_prefix)
            || self.store.input_prefix.starts_with(&self.store.archive_prefix)
        {
            return Err(ReconcileError::Config(format!(
                "store.input_prefix '{}' and store.archive_prefix '{}' must not overlap",
                self.store.input_prefix, self.store.archive_prefix
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.store.input_prefix, "project/");
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
[warehouse]
path = "/var/lib/roster/warehouse.db"

[store]
input_prefix = "incoming/"
"#,
        )
        .unwrap();

        assert_eq!(config.warehouse.path, PathBuf::from("/var/lib/roster/warehouse.db"));
        assert_eq!(config.store.input_prefix, "incoming/");
        assert_eq!(config.store.archive_prefix, "archives/");
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = Config::from_toml("[store]\nbucket = \"x\"\n").unwrap_err();
        assert!(matches!(err, ReconcileError::Config(_)));
    }

    #[test]
    fn test_prefix_must_end_with_slash() {
        let err = Config::from_toml("[store]\ninsert_prefix = \"inserts\"\n").unwrap_err();
        assert!(err.to_string().contains("insert_prefix"));
    }

    #[test]
    fn test_overlapping_input_and_archive_rejected() {
        let err = Config::from_toml(
            "[store]\ninput_prefix = \"project/\"\narchive_prefix = \"project/archives/\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("must not overlap"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(|name| match name {
            ENV_DB_PATH => Some("/tmp/override.db".to_string()),
            ENV_STORE_ROOT => Some(String::new()),
            _ => None,
        });

        assert_eq!(config.warehouse.path, PathBuf::from("/tmp/override.db"));
        // Empty values are ignored
        assert_eq!(config.store.root, PathBuf::from("store"));
    }
}
