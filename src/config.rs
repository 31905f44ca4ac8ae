//! Analysis session configuration.
//!
//! Plain serde structs, loadable from a YAML file. Validation happens once,
//! at session construction — a malformed store profile aborts startup
//! rather than surfacing later as a failed query.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TaintGraphError};
use crate::types::Relation;

// ---------------------------------------------------------------------------
// StoreProfile
// ---------------------------------------------------------------------------

/// Connection parameters for the graph store backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreProfile {
    /// Path to the graph database file.
    pub database: PathBuf,
}

impl StoreProfile {
    pub fn new(database: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
        }
    }

    /// Reject profiles that cannot possibly connect.
    pub fn validate(&self) -> Result<()> {
        if self.database.as_os_str().is_empty() {
            return Err(TaintGraphError::Config(
                "store database path is empty".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PrefetchSettings
// ---------------------------------------------------------------------------

/// Prefetch pool sizing. Off by default: turning it on trades network
/// request volume for anticipated cache hits, which is only a win when the
/// traversal actually revisits the prefetched neighborhoods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefetchSettings {
    /// Worker thread count. Zero disables the pool.
    #[serde(default)]
    pub workers: usize,
    /// Probability in `[0, 1]` that a queued node is actually prefetched.
    #[serde(default = "default_drop_out")]
    pub drop_out: f64,
    /// Which relations the default prefetch strategy fetches.
    #[serde(default = "default_prefetch_relations")]
    pub relations: Vec<Relation>,
}

fn default_drop_out() -> f64 {
    0.25
}

fn default_prefetch_relations() -> Vec<Relation> {
    vec![Relation::Pdg]
}

impl Default for PrefetchSettings {
    fn default() -> Self {
        Self {
            workers: 0,
            drop_out: default_drop_out(),
            relations: default_prefetch_relations(),
        }
    }
}

// ---------------------------------------------------------------------------
// AnalysisConfig
// ---------------------------------------------------------------------------

/// Top-level configuration for an analysis session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub store: StoreProfile,
    /// Disable to route every query straight to the store (diagnostics).
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
    #[serde(default)]
    pub prefetch: PrefetchSettings,
    /// Interprocedural traversal recursion bound.
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: u32,
}

fn default_use_cache() -> bool {
    true
}

fn default_max_call_depth() -> u32 {
    3
}

impl AnalysisConfig {
    pub fn new(store: StoreProfile) -> Self {
        Self {
            store,
            use_cache: true,
            prefetch: PrefetchSettings::default(),
            max_call_depth: default_max_call_depth(),
        }
    }

    /// Load from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&raw)
            .map_err(|e| TaintGraphError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        if !(0.0..=1.0).contains(&self.prefetch.drop_out) {
            return Err(TaintGraphError::Config(format!(
                "prefetch drop_out must be within [0, 1], got {}",
                self.prefetch.drop_out
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_prefetch() {
        let config = AnalysisConfig::new(StoreProfile::new("graph.db"));
        assert!(config.use_cache);
        assert_eq!(config.prefetch.workers, 0);
        assert_eq!(config.max_call_depth, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_database_path_rejected() {
        let config = AnalysisConfig::new(StoreProfile::new(""));
        assert!(matches!(
            config.validate(),
            Err(crate::error::TaintGraphError::Config(_))
        ));
    }

    #[test]
    fn drop_out_out_of_range_rejected() {
        let mut config = AnalysisConfig::new(StoreProfile::new("graph.db"));
        config.prefetch.drop_out = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn yaml_round_trip() {
        let yaml = "\
store:
  database: /tmp/graph.db
prefetch:
  workers: 2
  drop_out: 0.5
max_call_depth: 1
";
        let config: AnalysisConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.store.database, PathBuf::from("/tmp/graph.db"));
        assert_eq!(config.prefetch.workers, 2);
        assert_eq!(config.prefetch.relations, vec![Relation::Pdg]);
        assert_eq!(config.max_call_depth, 1);
        assert!(config.use_cache, "use_cache defaults to true");
    }

    #[test]
    fn yaml_file_loader_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yml");
        std::fs::write(&path, "store:\n  database: \"\"\n").unwrap();
        assert!(AnalysisConfig::from_yaml_file(&path).is_err());
    }
}
