//! Engine configuration.
//!
//! Loaded from an optional TOML file, then overridden by `CANOPY_*`
//! environment variables. Every field has a default, so an absent file or a
//! partial one is fine.

use std::fs;
use std::path::{Path, PathBuf};

use canopy_core::{CanopyError, CanopyResult};
use serde::{Deserialize, Serialize};

/// Reconciliation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Rows per upsert transaction.
    pub chunk_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { chunk_size: 250 }
    }
}

/// Traversal budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub max_hops: u32,
    pub max_visited_nodes: usize,
    pub timeout_ms: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_hops: 6,
            max_visited_nodes: 5000,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanopyConfig {
    pub database_path: PathBuf,
    pub sync: SyncConfig,
    pub traversal: GraphConfig,
}

impl Default for CanopyConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("canopy.db"),
            sync: SyncConfig::default(),
            traversal: GraphConfig::default(),
        }
    }
}

impl CanopyConfig {
    /// Read `path` (when given), apply process environment overrides, validate.
    pub fn load(path: Option<&Path>) -> CanopyResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> CanopyResult<Self> {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| CanopyError::config(format!("{}: {}", path.display(), e)))
    }

    /// Apply `CANOPY_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> CanopyResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db) = lookup("CANOPY_DB") {
            self.database_path = PathBuf::from(db);
        }
        if let Some(raw) = lookup("CANOPY_CHUNK_SIZE") {
            self.sync.chunk_size = parse_var("CANOPY_CHUNK_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("CANOPY_MAX_HOPS") {
            self.traversal.max_hops = parse_var("CANOPY_MAX_HOPS", &raw)?;
        }
        if let Some(raw) = lookup("CANOPY_MAX_VISITED") {
            self.traversal.max_visited_nodes = parse_var("CANOPY_MAX_VISITED", &raw)?;
        }
        if let Some(raw) = lookup("CANOPY_TRAVERSAL_TIMEOUT_MS") {
            self.traversal.timeout_ms = parse_var("CANOPY_TRAVERSAL_TIMEOUT_MS", &raw)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> CanopyResult<()> {
        if self.sync.chunk_size == 0 {
            return Err(CanopyError::config("sync.chunk_size must be at least 1"));
        }
        if self.traversal.max_visited_nodes == 0 {
            return Err(CanopyError::config(
                "traversal.max_visited_nodes must be at least 1",
            ));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> CanopyResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| CanopyError::config(format!("{} is not a valid number: '{}'", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CanopyConfig::default();
        assert_eq!(config.database_path, PathBuf::from("canopy.db"));
        assert_eq!(config.sync.chunk_size, 250);
        assert_eq!(config.traversal.max_hops, 6);
        assert_eq!(config.traversal.max_visited_nodes, 5000);
        assert_eq!(config.traversal.timeout_ms, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "database_path = \"/var/lib/canopy/graph.db\"").unwrap();
        writeln!(file, "[traversal]").unwrap();
        writeln!(file, "max_hops = 3").unwrap();

        let config = CanopyConfig::from_file(file.path()).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/var/lib/canopy/graph.db"));
        assert_eq!(config.traversal.max_hops, 3);
        assert_eq!(config.traversal.max_visited_nodes, 5000);
        assert_eq!(config.sync.chunk_size, 250);
    }

    #[test]
    fn test_bad_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync]\nchunk_size = \"lots\"").unwrap();
        let err = CanopyConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, CanopyError::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CANOPY_DB", "other.db"),
            ("CANOPY_CHUNK_SIZE", "50"),
            ("CANOPY_MAX_VISITED", "10"),
        ]
        .into_iter()
        .collect();

        let mut config = CanopyConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.database_path, PathBuf::from("other.db"));
        assert_eq!(config.sync.chunk_size, 50);
        assert_eq!(config.traversal.max_visited_nodes, 10);
        assert_eq!(config.traversal.max_hops, 6);

        let err = config
            .apply_overrides(|k| (k == "CANOPY_MAX_HOPS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, CanopyError::Config(_)));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = CanopyConfig::default();
        config.sync.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = CanopyConfig::default();
        config.traversal.max_visited_nodes = 0;
        assert!(config.validate().is_err());
    }
}
