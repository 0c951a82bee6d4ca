//! Analysis configuration.
//!
//! Loaded from YAML; every field has a default so an empty document is a
//! valid configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Upper bound on heap locations before the analysis gives up.
///
/// The aliasing matrix is quadratic in this number and the elimination pass
/// iterates over it to a fixed point.
pub const MAX_NUMBER_OF_HEAP_LOCATIONS: usize = 32;

/// How much partial-escape information the analysis computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStoreAnalysisType {
    /// Escapes are all-or-nothing; no no-escape subgraphs are kept.
    Basic,
    /// Partial escapes are tracked, and writes that follow an escape are
    /// excluded from the no-escape region since the consumer cannot
    /// predicate them.
    #[default]
    NoPredicatedInstructions,
    /// Partial escapes are tracked without write pruning.
    Full,
}

impl LoadStoreAnalysisType {
    pub fn tracks_partial_escapes(self) -> bool {
        self != LoadStoreAnalysisType::Basic
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    pub analysis_type: LoadStoreAnalysisType,
    pub max_heap_locations: usize,
    /// Report eliminable allocations to the statistics sink.
    pub record_stats: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            analysis_type: LoadStoreAnalysisType::default(),
            max_heap_locations: MAX_NUMBER_OF_HEAP_LOCATIONS,
            record_stats: true,
        }
    }
}

impl AnalysisConfig {
    pub fn with_analysis_type(mut self, analysis_type: LoadStoreAnalysisType) -> Self {
        self.analysis_type = analysis_type;
        self
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: AnalysisConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_heap_locations == 0 {
            return Err(ConfigError::Invalid(
                "max_heap_locations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
