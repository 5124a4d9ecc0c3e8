//! Configuration for the Scout daemon
//!
//! Two pieces of durable state live under the project config directory:
//! - `config.toml` — daemon settings, loaded with sensible defaults
//! - `folders.toml` — the monitored-folder registry (the configuration
//!   store), rewritten atomically on every mutation
//!
//! Locations:
//! - macOS: ~/Library/Application Support/scout/
//! - Linux: ~/.config/scout/
//! - Windows: %APPDATA%/scout/

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::paths;
use crate::types::FolderConfig;
use crate::DEFAULT_PORT;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Sync server settings
    pub listen: ListenConfig,
    /// Indexing pipeline settings
    pub index: IndexConfig,
    /// Filesystem watching settings
    pub watch: WatchConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            index: IndexConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

/// Sync server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// WebSocket port
    pub port: u16,
    /// Bind address
    pub bind: IpAddr,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }
}

/// Indexing pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Maximum folders indexing concurrently
    pub max_concurrent_ops: usize,
    /// Admissions allowed to wait before new ones are rejected
    pub max_queued_ops: usize,
    /// Files submitted per admission (bounds peak memory)
    pub max_files_per_batch: usize,
    /// Soft memory ceiling in MB (advisory)
    pub memory_soft_limit_mb: u64,
    /// Hard memory ceiling in MB (admissions rejected above this)
    pub memory_hard_limit_mb: u64,
    /// Embedding models offered to clients
    pub available_models: Vec<String>,
    /// Model assigned when a client does not pick one
    pub default_model: String,
    /// Directory names excluded from scans, in addition to the built-ins
    pub exclude: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_concurrent_ops: 2,
            max_queued_ops: 8,
            max_files_per_batch: 50,
            memory_soft_limit_mb: 512,
            memory_hard_limit_mb: 1024,
            available_models: vec![
                "nomic-embed-text".into(),
                "mxbai-embed-large".into(),
                "all-minilm".into(),
            ],
            default_model: "nomic-embed-text".into(),
            exclude: vec![],
        }
    }
}

/// Filesystem watching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Debounce window for change events in milliseconds
    pub debounce_ms: u64,
    /// Interval between folder-existence checks in seconds
    pub existence_interval_secs: u64,
    /// Interval between snapshot uptime heartbeats in seconds
    pub heartbeat_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            existence_interval_secs: 30,
            heartbeat_secs: 10,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default path
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("Failed to load config from {:?}: {}, using defaults", path, e);
                Self::default()
            }),
            None => {
                debug!("No config directory found, using defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: DaemonConfig =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "scout", "scout")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the default folder registry path
    pub fn default_registry_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "scout", "scout")
            .map(|dirs| dirs.config_dir().join("folders.toml"))
    }

    /// Get the default file-state database path
    pub fn default_state_db_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "scout", "scout")
            .map(|dirs| dirs.data_dir().join("file-state.db"))
    }

    /// Get the default PID file path
    pub fn default_pid_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "scout", "scout")
            .map(|dirs| dirs.data_dir().join("scoutd.pid"))
    }

    /// Generate a sample configuration file content
    pub fn sample() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

/// On-disk shape of the folder registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    folders: Vec<FolderConfig>,
}

/// The persisted monitored-folder registry (configuration store)
///
/// Owns the uniqueness invariant: no two entries share a path and no entry
/// is an ancestor or descendant of another. Every mutation rewrites the
/// whole file through a temp-file rename so a crash mid-save never leaves a
/// torn registry.
pub struct FolderRegistry {
    path: PathBuf,
    folders: RwLock<Vec<FolderConfig>>,
}

impl FolderRegistry {
    /// Open a registry file, loading existing entries if present
    pub fn open(path: PathBuf) -> Result<Self, ConfigError> {
        let folders = if path.exists() {
            let content =
                std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
            let file: RegistryFile =
                toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
            info!("Loaded {} folder(s) from {:?}", file.folders.len(), path);
            file.folders
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            folders: RwLock::new(folders),
        })
    }

    /// All configured folders
    pub fn list(&self) -> Vec<FolderConfig> {
        self.folders.read().clone()
    }

    /// Number of configured folders
    pub fn len(&self) -> usize {
        self.folders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.read().is_empty()
    }

    /// True when exactly this path is configured
    pub fn contains(&self, path: &Path) -> bool {
        self.folders.read().iter().any(|f| f.path == path)
    }

    /// Configured folders strictly inside `path`
    pub fn descendants_of(&self, path: &Path) -> Vec<FolderConfig> {
        self.folders
            .read()
            .iter()
            .filter(|f| paths::is_ancestor(path, &f.path))
            .cloned()
            .collect()
    }

    /// The configured folder that strictly contains `path`, if any
    pub fn ancestor_of(&self, path: &Path) -> Option<FolderConfig> {
        self.folders
            .read()
            .iter()
            .find(|f| paths::is_ancestor(&f.path, path))
            .cloned()
    }

    /// Insert a folder, removing any configured descendants in the same
    /// durable write. Returns the replaced descendants.
    pub fn insert_replacing_descendants(
        &self,
        config: FolderConfig,
    ) -> Result<Vec<FolderConfig>, ConfigError> {
        let mut folders = self.folders.write();

        let removed: Vec<FolderConfig> = folders
            .iter()
            .filter(|f| paths::is_ancestor(&config.path, &f.path))
            .cloned()
            .collect();

        folders.retain(|f| !paths::is_ancestor(&config.path, &f.path));
        folders.push(config);

        self.persist(&folders)?;
        Ok(removed)
    }

    /// Remove a folder by exact path. Returns whether it was present.
    pub fn remove(&self, path: &Path) -> Result<bool, ConfigError> {
        let mut folders = self.folders.write();
        let before = folders.len();
        folders.retain(|f| f.path != path);

        if folders.len() == before {
            return Ok(false);
        }

        self.persist(&folders)?;
        Ok(true)
    }

    fn persist(&self, folders: &[FolderConfig]) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let file = RegistryFile {
            folders: folders.to_vec(),
        };
        let content =
            toml::to_string_pretty(&file).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        // Write-then-rename keeps the registry whole across a crash
        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, content).map_err(|e| ConfigError::Io(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| ConfigError::Io(e.to_string()))?;

        debug!("Persisted {} folder(s) to {:?}", folders.len(), self.path);
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// I/O error
    Io(String),
    /// Parse error
    Parse(String),
    /// Serialization error
    Serialize(String),
    /// No config directory available
    NoConfigDir,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "I/O error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Serialize(e) => write!(f, "Serialization error: {}", e),
            ConfigError::NoConfigDir => write!(f, "No configuration directory available"),
        }
    }
}

impl std::error::Error for ConfigError {}
