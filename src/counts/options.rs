use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::metrics::CountsMetrics;
use super::rotation::{RotationHook, RotationPolicy};
use super::store::{validate_version_tag, WriteOptions, DEFAULT_VERSION_TAG};

/// Options supplied when opening a [`super::CountsTracker`].
#[derive(Clone)]
pub struct CountsOptions {
    /// Version tag every store must carry to be opened.
    pub version_tag: String,
    /// Behaviour of `rotate` while another rotation is running.
    pub rotation_policy: RotationPolicy,
    /// Whether to scan and checksum the whole body when opening.
    pub verify_on_open: bool,
    /// Whether new store files are fsynced before being published.
    pub sync_writes: bool,
    /// Optional metrics collection implementation
    pub metrics: Option<Arc<dyn CountsMetrics>>,
    /// Optional callback run between validation and publication of a rotation.
    pub rotation_hook: Option<Arc<dyn RotationHook>>,
}

impl Default for CountsOptions {
    fn default() -> Self {
        Self {
            version_tag: DEFAULT_VERSION_TAG.to_owned(),
            rotation_policy: RotationPolicy::default(),
            verify_on_open: true,
            sync_writes: true,
            metrics: None,
            rotation_hook: None,
        }
    }
}

impl fmt::Debug for CountsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountsOptions")
            .field("version_tag", &self.version_tag)
            .field("rotation_policy", &self.rotation_policy)
            .field("verify_on_open", &self.verify_on_open)
            .field("sync_writes", &self.sync_writes)
            .field("metrics", &self.metrics.is_some())
            .field("rotation_hook", &self.rotation_hook.is_some())
            .finish()
    }
}

impl CountsOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the expected version tag.
    pub fn version_tag(mut self, tag: impl Into<String>) -> Self {
        self.version_tag = tag.into();
        self
    }

    /// Sets the rotation policy.
    pub fn rotation_policy(mut self, policy: RotationPolicy) -> Self {
        self.rotation_policy = policy;
        self
    }

    /// Enables or disables full body verification on open.
    pub fn verify_on_open(mut self, enabled: bool) -> Self {
        self.verify_on_open = enabled;
        self
    }

    /// Enables or disables fsync of new store files.
    pub fn sync_writes(mut self, enabled: bool) -> Self {
        self.sync_writes = enabled;
        self
    }

    /// Sets the metrics collection implementation.
    pub fn metrics(mut self, metrics: Arc<dyn CountsMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Installs a rotation hook.
    pub fn rotation_hook(mut self, hook: Arc<dyn RotationHook>) -> Self {
        self.rotation_hook = Some(hook);
        self
    }

    pub(crate) fn write_options(&self) -> WriteOptions {
        WriteOptions {
            sync: self.sync_writes,
        }
    }
}

/// Serializable subset of [`CountsOptions`], loaded from TOML.
///
/// ```toml
/// version_tag = "SombraCounts v1"
/// rotation_policy = "wait"
/// verify_on_open = true
/// sync_writes = true
/// store = "/var/lib/sombra/counts.db"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CountsConfig {
    /// Expected store version tag.
    pub version_tag: String,
    /// Rotation policy.
    pub rotation_policy: RotationPolicy,
    /// Full body verification on open.
    pub verify_on_open: bool,
    /// Fsync new store files.
    pub sync_writes: bool,
    /// Default store base path for tooling.
    pub store: Option<PathBuf>,
}

impl Default for CountsConfig {
    fn default() -> Self {
        Self {
            version_tag: DEFAULT_VERSION_TAG.to_owned(),
            rotation_policy: RotationPolicy::default(),
            verify_on_open: true,
            sync_writes: true,
            store: None,
        }
    }
}

/// Failure to load a [`CountsConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read counts config {path}: {source}")]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Config file is not valid TOML for [`CountsConfig`].
    #[error("failed to parse counts config{}: {source}", path.as_ref().map(|p| format!(" {}", p.display())).unwrap_or_default())]
    Parse {
        /// File that was parsed, if any.
        path: Option<PathBuf>,
        /// Underlying error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid counts config: {0}")]
    Invalid(&'static str),
}

impl CountsConfig {
    /// Parses a config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(text).map_err(|source| ConfigError::Parse { path: None, source })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        validate_version_tag(&self.version_tag)
            .map_err(|_| ConfigError::Invalid("version_tag must be 1..=78 bytes"))
    }

    /// Runtime options carrying these settings.
    pub fn into_options(self) -> CountsOptions {
        CountsOptions::new()
            .version_tag(self.version_tag)
            .rotation_policy(self.rotation_policy)
            .verify_on_open(self.verify_on_open)
            .sync_writes(self.sync_writes)
    }
}

/// Default location of the tooling config file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("sombra").join("counts.toml"))
}
