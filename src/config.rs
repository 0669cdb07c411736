use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from damocles.toml.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct DamoclesConfig {
    pub watchdog: WatchdogConfig,
    pub docker: DockerConfig,
    pub log: LogConfig,
    pub daemon: DaemonConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Seconds between cull cycles.
    pub poll_interval_secs: u64,
    /// Seconds a container may live before it is deemed overdue.
    /// The shipped default suits transient CI jobs; production hosts
    /// typically raise this to several minutes.
    pub staleness_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct DockerConfig {
    /// Unix socket path; unset means platform connection defaults.
    pub socket: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default log level filter; RUST_LOG overrides it.
    pub level: String,
    /// Log destination; unset means stderr.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct DaemonConfig {
    /// PID file to write and hold locked; unset means none.
    pub pid_file: Option<PathBuf>,
}

// --- Default implementations ---

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            staleness_timeout_secs: 30,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Errors produced while loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

impl DamoclesConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file is not an error: the daemon runs fine on pure
    /// defaults. A present-but-malformed file is fatal.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
