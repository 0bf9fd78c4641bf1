//! Engine Configuration
//!
//! TOML settings handed to the engine at start.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ConfigError;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Members only see members started with the same cluster name
    pub cluster_name: String,

    /// Label for logs and engine threads
    pub instance_name: Option<String>,

    /// Per-map settings, keyed by map name
    pub maps: BTreeMap<String, MapConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cluster_name: "dev".to_string(),
            instance_name: None,
            maps: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document. `origin` names the source in errors.
    pub fn from_toml(contents: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|error| ConfigError::Parse {
            origin: origin.to_string(),
            error,
        })
    }

    pub fn with_cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = name.into();
        self
    }

    pub fn with_instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = Some(name.into());
        self
    }

    pub fn with_map(mut self, name: impl Into<String>, config: MapConfig) -> Self {
        self.maps.insert(name.into(), config);
        self
    }
}

/// Settings for one named map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MapConfig {
    /// Maximum number of live entries (unbounded if unset)
    pub max_entries: Option<usize>,
}

impl MapConfig {
    pub fn bounded(max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_document() {
        let config = EngineConfig::from_toml(
            r#"
            cluster_name = "prod"
            instance_name = "router-1"

            [maps.subs]

            [maps.owners]
            max_entries = 64
            "#,
            "inline",
        )
        .unwrap();

        assert_eq!(config.cluster_name, "prod");
        assert_eq!(config.instance_name.as_deref(), Some("router-1"));
        assert_eq!(config.maps["subs"], MapConfig::default());
        assert_eq!(config.maps["owners"], MapConfig::bounded(64));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config = EngineConfig::from_toml("", "inline").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = EngineConfig::from_toml("clustr_name = \"typo\"", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::default()
            .with_cluster_name("edge")
            .with_instance_name("n1")
            .with_map("owners", MapConfig::bounded(2));

        assert_eq!(config.cluster_name, "edge");
        assert_eq!(config.instance_name.as_deref(), Some("n1"));
        assert_eq!(config.maps.len(), 1);
    }
}
