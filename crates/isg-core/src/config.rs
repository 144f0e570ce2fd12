//! # Engine Configuration
//!
//! Tunables for ingestion limits and query defaults, loadable from TOML.
//!
//! ```toml
//! [query]
//! include_low_confidence = false
//! low_confidence_threshold = 0.0
//! default_max_depth = 12
//! blast_radius_timeout_ms = 250
//! suggestion_limit = 5
//! fuzzy_limit = 20
//!
//! [ingest]
//! max_entities_per_file = 100000
//! max_relationships_per_file = 500000
//! max_snapshot_bytes = 536870912
//! ```

use crate::primitives::{
    DEFAULT_FUZZY_LIMIT, DEFAULT_MAX_ENTITIES_PER_FILE, DEFAULT_MAX_RELATIONSHIPS_PER_FILE,
    DEFAULT_MAX_SNAPSHOT_BYTES, DEFAULT_SUGGESTION_LIMIT, MAX_FUZZY_LIMIT,
};
use crate::types::{Confidence, IsgError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Query defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryConfig {
    /// Whether low-confidence edges take part in queries by default.
    pub include_low_confidence: bool,
    /// Edges with confidence at or below this value are low-confidence.
    pub low_confidence_threshold: f64,
    /// Depth cutoff for blast radius when the caller gives none.
    pub default_max_depth: Option<usize>,
    /// Wall-clock budget for blast radius when the caller gives none.
    pub blast_radius_timeout_ms: Option<u64>,
    /// Suggestions attached to `EntityNotFound`.
    pub suggestion_limit: usize,
    /// Default result limit of fuzzy search.
    pub fuzzy_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            include_low_confidence: false,
            low_confidence_threshold: 0.0,
            default_max_depth: None,
            blast_radius_timeout_ms: None,
            suggestion_limit: DEFAULT_SUGGESTION_LIMIT,
            fuzzy_limit: DEFAULT_FUZZY_LIMIT,
        }
    }
}

impl QueryConfig {
    /// Threshold as fixed-point confidence.
    #[must_use]
    pub fn threshold(&self) -> Confidence {
        Confidence::from_f64(self.low_confidence_threshold).unwrap_or(Confidence::ZERO)
    }
}

/// Ingestion and persistence limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    pub max_entities_per_file: usize,
    pub max_relationships_per_file: usize,
    pub max_snapshot_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_entities_per_file: DEFAULT_MAX_ENTITIES_PER_FILE,
            max_relationships_per_file: DEFAULT_MAX_RELATIONSHIPS_PER_FILE,
            max_snapshot_bytes: DEFAULT_MAX_SNAPSHOT_BYTES,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub query: QueryConfig,
    pub ingest: IngestConfig,
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, IsgError> {
        let config: Self =
            toml::from_str(text).map_err(|e| IsgError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, IsgError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            IsgError::IoError(format!("cannot read config '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Check ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), IsgError> {
        if Confidence::from_f64(self.query.low_confidence_threshold).is_none() {
            return Err(IsgError::ConfigError(format!(
                "query.low_confidence_threshold must be within 0.0..=1.0, got {}",
                self.query.low_confidence_threshold
            )));
        }
        if self.query.fuzzy_limit == 0 || self.query.fuzzy_limit > MAX_FUZZY_LIMIT {
            return Err(IsgError::ConfigError(format!(
                "query.fuzzy_limit must be within 1..={}",
                MAX_FUZZY_LIMIT
            )));
        }
        if self.query.suggestion_limit > MAX_FUZZY_LIMIT {
            return Err(IsgError::ConfigError(format!(
                "query.suggestion_limit must be at most {}",
                MAX_FUZZY_LIMIT
            )));
        }
        if self.ingest.max_entities_per_file == 0 || self.ingest.max_relationships_per_file == 0 {
            return Err(IsgError::ConfigError(
                "ingest limits must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.query.include_low_confidence);
        assert_eq!(config.query.threshold(), Confidence::ZERO);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            "[query]\ninclude_low_confidence = true\ndefault_max_depth = 4\n",
        )
        .expect("parse");
        assert!(config.query.include_low_confidence);
        assert_eq!(config.query.default_max_depth, Some(4));
        assert_eq!(config.query.suggestion_limit, DEFAULT_SUGGESTION_LIMIT);
        assert_eq!(config.ingest, IngestConfig::default());
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let err = EngineConfig::from_toml_str("[query]\nlow_confidence_threshold = 1.5\n")
            .expect_err("range");
        assert!(matches!(err, IsgError::ConfigError(_)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(EngineConfig::from_toml_str("[query]\nbogus = 1\n").is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("isg.toml");
        std::fs::write(&path, "[ingest]\nmax_entities_per_file = 10\n").expect("write");
        let config = EngineConfig::load(&path).expect("load");
        assert_eq!(config.ingest.max_entities_per_file, 10);
        assert!(EngineConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
