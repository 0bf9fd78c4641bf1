//! Cluster Configuration
//!
//! Manager options and the lookup chain that produces the engine
//! configuration.

mod engine;
mod resolver;

pub use engine::{EngineConfig, MapConfig};
pub use resolver::{ConfigResolver, ConfigSource, ResourceLoader};

use std::path::PathBuf;

/// Environment variable naming an override configuration file
pub const CLUSTER_FILE_ENV: &str = "NODEMESH_CLUSTER_FILE";

/// Environment variable listing resource directories (platform path-list syntax)
pub const RESOURCE_PATH_ENV: &str = "NODEMESH_RESOURCE_PATH";

/// Resource looked up when no override file is given
pub const CONFIG_FILE: &str = "cluster.toml";

/// Resource bundled with the crate, used as the last resort
pub const DEFAULT_CONFIG_FILE: &str = "default-cluster.toml";

/// Cluster manager options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterOptions {
    /// Override configuration file, tried first as a resource then as a path.
    /// When unset, `NODEMESH_CLUSTER_FILE` is read on every resolve.
    pub cluster_file: Option<PathBuf>,

    /// Directories searched for resources, in order
    pub resource_roots: Vec<PathBuf>,

    /// Let the engine shut the connection down from its own hook.
    /// Off by default: the manager leaves the cluster itself.
    pub engine_shutdown_hook: bool,
}

impl ClusterOptions {
    /// Options taken from `NODEMESH_CLUSTER_FILE` and `NODEMESH_RESOURCE_PATH`
    pub fn from_env() -> Self {
        let cluster_file = env_cluster_file();
        let resource_roots = std::env::var_os(RESOURCE_PATH_ENV)
            .map(|paths| std::env::split_paths(&paths).collect())
            .unwrap_or_default();

        Self {
            cluster_file,
            resource_roots,
            engine_shutdown_hook: false,
        }
    }

    pub fn with_cluster_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cluster_file = Some(path.into());
        self
    }

    pub fn with_resource_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.resource_roots.push(root.into());
        self
    }

    pub fn with_engine_shutdown_hook(mut self, enabled: bool) -> Self {
        self.engine_shutdown_hook = enabled;
        self
    }

    /// Resolver for these options
    pub fn resolver(&self) -> ConfigResolver {
        ConfigResolver::new(
            self.cluster_file.clone().or_else(env_cluster_file),
            ResourceLoader::new(self.resource_roots.clone()),
        )
    }
}

fn env_cluster_file() -> Option<PathBuf> {
    std::env::var(CLUSTER_FILE_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
}

/// Held by tests that read or write the process environment
#[cfg(test)]
pub(crate) static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());
