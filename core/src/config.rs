// Node configuration — JSON file with per-field fallbacks
//
// Loading never fails: a missing or unreadable file yields the defaults, and
// every field that is absent, of the wrong type or invalid (zero) falls back
// to its default on its own, with a warning.

use crate::dissemination::DEFAULT_MAX_DISTANCE;
use crate::search::{DEFAULT_MAX_TTL, DEFAULT_SEEN_CAPACITY};
use crate::store;
use crate::taxonomy::{BasicTaxonomy, Taxonomy};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Distance announced for local parameters
    pub max_distance: u32,

    /// Taxonomy document (XML); none means an empty taxonomy
    pub taxonomy_file: Option<PathBuf>,

    /// Per-parameter ttl of new searches
    pub max_ttl: u32,

    /// Overrides both `max_distance` and `max_ttl` when set
    pub same_ttl: Option<u32>,

    /// Size of the duplicate-delivery register
    pub seen_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            max_distance: DEFAULT_MAX_DISTANCE,
            taxonomy_file: None,
            max_ttl: DEFAULT_MAX_TTL,
            same_ttl: None,
            seen_capacity: DEFAULT_SEEN_CAPACITY,
        }
    }
}

impl NodeConfig {
    /// Strict load: any I/O or syntax problem is an error
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&content)?;
        Ok(config.validated())
    }

    /// Lenient load used by nodes and the CLI
    pub fn load_or_default(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config unreadable, using defaults");
                return Self::default();
            }
        };
        let value: serde_json::Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config is not valid JSON, using defaults");
                return Self::default();
            }
        };
        Self::from_value(&value).validated()
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Effective dissemination distance
    pub fn max_distance(&self) -> u32 {
        self.same_ttl.unwrap_or(self.max_distance)
    }

    /// Effective search ttl
    pub fn max_ttl(&self) -> u32 {
        self.same_ttl.unwrap_or(self.max_ttl)
    }

    /// The configured taxonomy, or an empty one when none is configured or
    /// it cannot be loaded
    pub fn load_taxonomy(&self) -> Arc<dyn Taxonomy> {
        let Some(path) = &self.taxonomy_file else {
            return Arc::new(BasicTaxonomy::new());
        };
        match store::load_taxonomy(path) {
            Ok(taxonomy) => {
                debug!(path = %path.display(), concepts = taxonomy.len(), "loaded taxonomy");
                Arc::new(taxonomy)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "taxonomy unusable, using an empty one");
                Arc::new(BasicTaxonomy::new())
            }
        }
    }

    /// Replace zero values by their defaults
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        if self.max_distance == 0 {
            warn!("max_distance must be positive, using {}", defaults.max_distance);
            self.max_distance = defaults.max_distance;
        }
        if self.max_ttl == 0 {
            warn!("max_ttl must be positive, using {}", defaults.max_ttl);
            self.max_ttl = defaults.max_ttl;
        }
        if self.same_ttl == Some(0) {
            warn!("same_ttl must be positive, ignoring it");
            self.same_ttl = None;
        }
        if self.seen_capacity == 0 {
            warn!("seen_capacity must be positive, using {}", defaults.seen_capacity);
            self.seen_capacity = defaults.seen_capacity;
        }
        self
    }

    fn from_value(value: &serde_json::Value) -> Self {
        let defaults = Self::default();
        Self {
            max_distance: field(value, "max_distance", defaults.max_distance),
            taxonomy_file: field(value, "taxonomy_file", defaults.taxonomy_file),
            max_ttl: field(value, "max_ttl", defaults.max_ttl),
            same_ttl: field(value, "same_ttl", defaults.same_ttl),
            seen_capacity: field(value, "seen_capacity", defaults.seen_capacity),
        }
    }
}

/// One field of a JSON object, or `default` with a warning when unusable
fn field<T: DeserializeOwned>(value: &serde_json::Value, name: &str, default: T) -> T {
    let Some(raw) = value.get(name) else {
        return default;
    };
    match serde_json::from_value(raw.clone()) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(field = name, error = %e, "invalid config value, using default");
            default
        }
    }
}
