//! Repository configuration.
//!
//! A [`RepoConfig`] names the repository (its id and admin id, which sign
//! every DAG fragment it sends), lists the DAG numbers it accepts, and sets
//! the few tunables of the core. It is plain serde data, usually loaded from
//! a JSON file by the surrounding application.

use crate::constants::{DEFAULT_DAGNODE_CACHE_CAPACITY, DEFAULT_MAX_PARENTS};
use crate::dag::DagNum;
use crate::error::{DagError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

#[cfg(feature = "rocksdb")]
pub use crate::storage::RocksDbConfig;

fn default_verify_on_load() -> bool {
    true
}

fn default_cache_capacity() -> usize {
    DEFAULT_DAGNODE_CACHE_CAPACITY
}

fn default_max_parents() -> usize {
    DEFAULT_MAX_PARENTS
}

/// Identity and tuning of one repository instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Repository id, shared by all clones of the same repository.
    pub repo_id: String,
    /// Administrative id, shared by repositories that may exchange history.
    pub admin_id: String,
    /// DAG numbers this repository accepts changesets for.
    pub registered_dags: BTreeSet<DagNum>,
    /// Verify content hashes when loading changesets.
    #[serde(default = "default_verify_on_load")]
    pub verify_on_load: bool,
    /// Maximum dagnodes kept in the repository cache.
    #[serde(default = "default_cache_capacity")]
    pub dagnode_cache_capacity: usize,
    /// Maximum parents one changeset may declare.
    #[serde(default = "default_max_parents")]
    pub max_parents: usize,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            repo_id: String::new(),
            admin_id: String::new(),
            registered_dags: [DagNum::VERSION_CONTROL, DagNum::WORK_ITEMS, DagNum::USERS]
                .into_iter()
                .collect(),
            verify_on_load: default_verify_on_load(),
            dagnode_cache_capacity: default_cache_capacity(),
            max_parents: default_max_parents(),
        }
    }
}

impl RepoConfig {
    /// Creates a configuration with the well-known DAGs registered.
    pub fn new(repo_id: impl Into<String>, admin_id: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            admin_id: admin_id.into(),
            ..Self::default()
        }
    }

    /// Registers an additional DAG number.
    pub fn with_dag(mut self, dag_num: DagNum) -> Self {
        self.registered_dags.insert(dag_num);
        self
    }

    /// Parses a configuration from JSON and validates it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RepoConfig = serde_json::from_str(json)
            .map_err(|e| DagError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&json)
    }

    /// Serializes the configuration to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| DagError::serialization(format!("Failed to serialize config: {}", e)))
    }

    /// Checks ids, registered DAG numbers and limits.
    pub fn validate(&self) -> Result<()> {
        if self.repo_id.trim().is_empty() {
            return Err(DagError::config("repo_id cannot be empty"));
        }
        if self.admin_id.trim().is_empty() {
            return Err(DagError::config("admin_id cannot be empty"));
        }
        for dag_num in &self.registered_dags {
            dag_num
                .validate()
                .map_err(|e| DagError::config(format!("registered dag: {}", e)))?;
        }
        if self.dagnode_cache_capacity == 0 {
            return Err(DagError::config("dagnode_cache_capacity must be positive"));
        }
        if self.max_parents == 0 {
            return Err(DagError::config("max_parents must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_in() {
        let json = format!(
            r#"{{"repo_id":"r1","admin_id":"a1","registered_dags":[{}]}}"#,
            DagNum::VERSION_CONTROL.as_u64()
        );
        let config = RepoConfig::from_json(&json).unwrap();
        assert!(config.verify_on_load);
        assert_eq!(config.max_parents, DEFAULT_MAX_PARENTS);
        assert_eq!(config.dagnode_cache_capacity, DEFAULT_DAGNODE_CACHE_CAPACITY);
        assert_eq!(config.registered_dags.len(), 1);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = RepoConfig::new("repo", "admin").with_dag(DagNum::from_raw((1 << 33) | 77));
        let restored = RepoConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(RepoConfig::default().validate().is_err(), "empty ids");

        let bad_dag = RepoConfig::new("r", "a").with_dag(DagNum::from_raw(3 << 32 | 1));
        assert!(matches!(bad_dag.validate(), Err(DagError::Config(_))));

        let mut zero = RepoConfig::new("r", "a");
        zero.max_parents = 0;
        assert!(zero.validate().is_err());

        assert!(RepoConfig::from_json("{not json").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("repo.json");
        std::fs::write(&path, RepoConfig::new("r", "a").to_json().unwrap()).unwrap();
        assert_eq!(RepoConfig::from_file(&path).unwrap().repo_id, "r");
        assert!(matches!(
            RepoConfig::from_file(dir.path().join("missing.json")),
            Err(DagError::Io(_))
        ));
    }
}
