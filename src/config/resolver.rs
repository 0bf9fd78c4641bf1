//! Configuration Resolution
//!
//! Lookup order, first match wins:
//! 1. the override file, as a resource and then as a filesystem path
//! 2. the `cluster.toml` resource
//! 3. the bundled `default-cluster.toml`
//!
//! Nothing here fails the caller. A source that cannot be read or parsed
//! is logged and the engine starts with its built-in defaults.

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use super::{EngineConfig, CONFIG_FILE, DEFAULT_CONFIG_FILE};
use crate::error::ConfigError;

/// Resources compiled into the crate
const BUNDLED: &[(&str, &str)] = &[(
    DEFAULT_CONFIG_FILE,
    include_str!("../../resources/default-cluster.toml"),
)];

/// Where a configuration document comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// A file on disk
    File(PathBuf),
    /// A resource compiled into the crate
    Bundled {
        name: &'static str,
        contents: &'static str,
    },
}

impl ConfigSource {
    pub fn read(&self) -> Result<String, ConfigError> {
        match self {
            ConfigSource::File(path) => {
                std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
                    origin: self.to_string(),
                    error,
                })
            }
            ConfigSource::Bundled { contents, .. } => Ok(contents.to_string()),
        }
    }

    pub fn load(&self) -> Result<EngineConfig, ConfigError> {
        let contents = self.read()?;
        EngineConfig::from_toml(&contents, &self.to_string())
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Bundled { name, .. } => write!(f, "bundled:{}", name),
        }
    }
}

/// Finds named resources in a list of directories, then among the
/// resources bundled with the crate
#[derive(Debug, Clone, Default)]
pub struct ResourceLoader {
    roots: Vec<PathBuf>,
}

impl ResourceLoader {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Only relative names are resources
    pub fn find(&self, name: impl AsRef<Path>) -> Option<ConfigSource> {
        let name = name.as_ref();
        if !name.is_relative() || name.as_os_str().is_empty() {
            return None;
        }

        for root in &self.roots {
            let candidate = root.join(name);
            if candidate.is_file() {
                return Some(ConfigSource::File(candidate));
            }
        }

        BUNDLED
            .iter()
            .find(|(bundled, _)| Path::new(bundled) == name)
            .map(|&(name, contents)| ConfigSource::Bundled { name, contents })
    }
}

/// Resolves the engine configuration for a join
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    cluster_file: Option<PathBuf>,
    resources: ResourceLoader,
}

impl ConfigResolver {
    pub fn new(cluster_file: Option<PathBuf>, resources: ResourceLoader) -> Self {
        Self {
            cluster_file,
            resources,
        }
    }

    /// Pick the configuration source, without reading it
    pub fn locate(&self) -> Option<ConfigSource> {
        if let Some(source) = self.override_file() {
            return Some(source);
        }
        if let Some(source) = self.resources.find(CONFIG_FILE) {
            return Some(source);
        }

        let fallback = self.resources.find(DEFAULT_CONFIG_FILE);
        if fallback.is_some() {
            warn!(
                "Cannot find {} on the resource path, falling back to {}",
                CONFIG_FILE, DEFAULT_CONFIG_FILE
            );
        }
        fallback
    }

    /// Load the configuration, falling back to engine defaults on any failure
    pub fn resolve(&self) -> EngineConfig {
        let Some(source) = self.locate() else {
            warn!("Cannot find cluster configuration, using engine defaults");
            return EngineConfig::default();
        };

        match source.load() {
            Ok(config) => {
                info!(source = %source, cluster = %config.cluster_name, "Loaded cluster configuration");
                config
            }
            Err(e) => {
                error!(error = %e, "Failed to read cluster configuration, using engine defaults");
                EngineConfig::default()
            }
        }
    }

    fn override_file(&self) -> Option<ConfigSource> {
        let path = self.cluster_file.as_ref()?;
        if path.to_string_lossy().trim().is_empty() {
            return None;
        }

        if let Some(source) = self.resources.find(path) {
            return Some(source);
        }
        if path.exists() {
            return Some(ConfigSource::File(path.clone()));
        }

        warn!(
            "Cannot find cluster file {}, using {} or {} instead",
            path.display(),
            CONFIG_FILE,
            DEFAULT_CONFIG_FILE
        );
        None
    }
}
