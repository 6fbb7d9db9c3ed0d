//! Runtime configuration with documented constants
//!
//! All tuning knobs of the runtime core are collected here with explanations
//! of their purpose and how they interact with each other. Configuration is
//! passed explicitly into the world and scheduler; there is no global instance.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::{Result, SimError};

/// Configuration for the runtime core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    // === SPATIAL INDEX ===
    /// Side length of each square chunk in the spatial index (world units)
    ///
    /// Should be chosen so a typical query radius spans 1-3 chunks.
    /// Smaller = more chunks, fewer entities per chunk, more chunk lookups
    /// Larger = fewer chunks, more candidates to distance-filter per query
    pub chunk_size: f32,

    /// Typical query radius used by gameplay systems (world units)
    ///
    /// Only used to validate `chunk_size`; queries always take an explicit radius.
    pub typical_query_radius: f32,

    // === ACTIVITY CULLING ===
    pub culling: CullingConfig,

    // === PARALLELIZATION ===
    /// Minimum positioned-entity count before the relevance pass uses rayon
    ///
    /// Below this threshold, thread overhead exceeds benefits.
    pub parallel_threshold: usize,

    // === EVENTS ===
    /// Number of delivered events remembered by the event history ring
    pub history_capacity: usize,
}

/// Activity culling settings applied by the scheduler before each tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CullingConfig {
    /// Master switch; when false every entity is active for every system
    pub enabled: bool,

    /// Distance from a point of interest at which relevance falls to zero
    pub relevance_radius: f32,

    /// Entities with relevance below this value are culled
    ///
    /// At 0.0 every entity inside `relevance_radius` of any point of interest
    /// is active; raising it shrinks the active zone towards the points.
    pub relevance_threshold: f32,
}

impl Default for CullingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            relevance_radius: 200.0,
            relevance_threshold: 0.0,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            // Spatial (typical radius / 2 = chunk size, so queries span ~3 chunks per axis)
            chunk_size: 25.0,
            typical_query_radius: 50.0,

            culling: CullingConfig::default(),

            parallel_threshold: 1000,

            history_capacity: 64,
        }
    }
}

impl RuntimeConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config from TOML; missing keys fall back to defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RuntimeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validate configuration for internal consistency
    pub fn validate(&self) -> Result<()> {
        if !(self.chunk_size.is_finite() && self.chunk_size > 0.0) {
            return Err(SimError::Config(format!(
                "chunk_size must be a positive number, got {}",
                self.chunk_size
            )));
        }

        // A typical query should touch a small, bounded number of chunks
        if self.typical_query_radius / self.chunk_size > 3.0 {
            return Err(SimError::Config(format!(
                "chunk_size ({}) should be >= typical_query_radius / 3 ({:.1})",
                self.chunk_size,
                self.typical_query_radius / 3.0
            )));
        }

        if self.culling.relevance_radius <= 0.0 {
            return Err(SimError::Config(
                "culling.relevance_radius must be positive".into(),
            ));
        }

        if !(0.0..1.0).contains(&self.culling.relevance_threshold) {
            return Err(SimError::Config(format!(
                "culling.relevance_threshold ({}) must be in [0, 1)",
                self.culling.relevance_threshold
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_oversized_radius_rejected() {
        let config = RuntimeConfig {
            chunk_size: 5.0,
            typical_query_radius: 100.0,
            ..RuntimeConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let config = RuntimeConfig {
            chunk_size: 0.0,
            ..RuntimeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            chunk_size = 40.0

            [culling]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.chunk_size, 40.0);
        assert!(!config.culling.enabled);
        // Untouched keys keep their defaults
        assert_eq!(config.culling.relevance_radius, 200.0);
        assert_eq!(config.parallel_threshold, 1000);
    }

    #[test]
    fn test_from_toml_invalid_threshold() {
        let result = RuntimeConfig::from_toml_str(
            r#"
            [culling]
            relevance_threshold = 1.5
            "#,
        );
        assert!(matches!(result, Err(SimError::Config(_))));
    }

    #[test]
    fn test_from_toml_syntax_error() {
        let result = RuntimeConfig::from_toml_str("chunk_size = = 3");
        assert!(matches!(result, Err(SimError::TomlError(_))));
    }
}
