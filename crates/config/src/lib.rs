//! Layered configuration for ferry.
//!
//! Sources, later ones winning:
//! 1. built-in defaults,
//! 2. a TOML file (`ferry.toml` in the user's config directory unless a path
//!    is given),
//! 3. `FERRY_`-prefixed environment variables, with `__` separating sections
//!    (`FERRY_POOL__SIZE=4`, `FERRY_REMOTE__HOST=sftp.example.com`).
//!
//! [`Config::load`] validates the merged result, so a returned config has
//! every setting its transport needs.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "FERRY_";
pub const FILE_NAME: &str = "ferry.toml";

/// How the remote directory is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// A directory reachable on this machine (mount, shared volume).
    Directory,
    /// An SFTP server, public-key authentication only.
    Sftp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Identifies this source in logs and in the ledger.
    pub name: String,
    pub transport: Transport,
    /// Directory polled on the remote side.
    pub directory: PathBuf,
    /// Absolute path acting as the remote root (`directory` transport).
    pub root: Option<PathBuf>,
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub private_key: Option<PathBuf>,
    pub known_hosts: Option<PathBuf>,
    /// Connect and per-operation timeout (`sftp` transport).
    pub timeout_ms: u64,
}
impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            name: "remote".to_string(),
            transport: Transport::Directory,
            directory: PathBuf::from("/"),
            root: None,
            host: None,
            port: 22,
            username: None,
            private_key: None,
            known_hosts: None,
            timeout_ms: 10_000,
        }
    }
}
impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Where transferred files land; required.
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub size: usize,
    pub wait_timeout_ms: u64,
}
impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 4,
            wait_timeout_ms: 5_000,
        }
    }
}
impl PoolConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub delay_ms: u64,
    pub max_fetch_size: usize,
    pub max_messages_per_poll: usize,
}
impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            delay_ms: 5_000,
            max_fetch_size: 10,
            max_messages_per_poll: 10,
        }
    }
}
impl PollerConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite file; defaults to `ledger.db` in the user's data directory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub local: LocalConfig,
    pub pool: PoolConfig,
    pub poller: PollerConfig,
    pub ledger: LedgerConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Default location of the configuration file.
    pub fn default_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join(FILE_NAME))
    }

    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("", "", "ferry")
    }

    /// Load and validate configuration from defaults, the TOML file at `path`
    /// (or the default location) and the environment.
    ///
    /// A missing file is not an error; the other sources may be enough.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);
        Self::from_figment(Self::figment(path.as_deref()))
    }

    /// The merged sources, before extraction.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            tracing::debug!(path = %path.display(), "Reading configuration file");
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every setting needed by the selected transport is present
    /// and every bound is usable.
    pub fn validate(&self) -> Result<()> {
        if self.remote.name.trim().is_empty() {
            exn::bail!(ErrorKind::Missing("remote.name"));
        }
        if self.remote.directory.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Missing("remote.directory"));
        }
        match self.remote.transport {
            Transport::Directory => {
                let root = self.remote.root.as_deref().ok_or_raise(|| ErrorKind::Missing("remote.root"))?;
                if !root.is_absolute() {
                    exn::bail!(ErrorKind::Invalid("remote.root", "must be an absolute path".into()));
                }
            },
            Transport::Sftp => {
                if self.remote.host.as_deref().is_none_or(|host| host.trim().is_empty()) {
                    exn::bail!(ErrorKind::Missing("remote.host"));
                }
                if self.remote.username.as_deref().is_none_or(|user| user.trim().is_empty()) {
                    exn::bail!(ErrorKind::Missing("remote.username"));
                }
                if self.remote.private_key.is_none() {
                    exn::bail!(ErrorKind::Missing("remote.private_key"));
                }
                if self.remote.known_hosts.is_none() {
                    exn::bail!(ErrorKind::Missing("remote.known_hosts"));
                }
                if self.remote.port == 0 {
                    exn::bail!(ErrorKind::Invalid("remote.port", "must not be zero".into()));
                }
            },
        }
        if self.local.directory.is_none() {
            exn::bail!(ErrorKind::Missing("local.directory"));
        }
        if self.pool.size == 0 {
            exn::bail!(ErrorKind::Invalid("pool.size", "must be at least 1".into()));
        }
        if self.poller.max_fetch_size == 0 {
            exn::bail!(ErrorKind::Invalid("poller.max_fetch_size", "must be at least 1".into()));
        }
        if self.poller.max_messages_per_poll == 0 {
            exn::bail!(ErrorKind::Invalid("poller.max_messages_per_poll", "must be at least 1".into()));
        }
        Ok(())
    }

    /// The validated local directory.
    pub fn local_directory(&self) -> Result<&Path> {
        self.local.directory.as_deref().ok_or_raise(|| ErrorKind::Missing("local.directory"))
    }

    /// The ledger file, falling back to the user's data directory.
    pub fn ledger_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.ledger.path {
            return Ok(path.clone());
        }
        let dirs = Self::project_dirs().ok_or_raise(|| ErrorKind::NoDataDirectory)?;
        Ok(dirs.data_dir().join("ledger.db"))
    }
}
