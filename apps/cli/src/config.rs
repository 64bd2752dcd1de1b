//! CLI configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/picstash/config.toml`
//! - Windows: `%APPDATA%/picstash/config.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use picstash_storage_fs::{DEFAULT_CHUNK_SIZE, FsConfig};
use picstash_transfer::{ErrorClassifier, ErrorKind, RetryPolicy};
use serde::{Deserialize, Serialize};

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory the filesystem store lives in.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// Key prefix for uploads without an explicit `--to`.
    #[serde(default = "default_prefix")]
    pub default_prefix: String,

    /// Bytes moved per step.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Delay after every chunk in milliseconds (0 = none).
    #[serde(default)]
    pub throttle_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Extra raw-code classifications on top of the built-in table.
    #[serde(default)]
    pub error_codes: Vec<ErrorCodeOverride>,
}

/// Retry settings for failed transfers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorCodeOverride {
    pub code: i64,
    pub kind: ErrorKind,
}

fn default_storage_root() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("picstash")
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("picstash").join("store")
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        PathBuf::from("/tmp/picstash/store")
    }
}

fn default_prefix() -> String {
    "images".into()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            default_prefix: default_prefix(),
            chunk_size: default_chunk_size(),
            throttle_ms: 0,
            retry: RetryConfig::default(),
            error_codes: Vec::new(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_factor: self.backoff_factor,
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or creates a default there if not found.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Restrict permissions on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn classifier(&self) -> ErrorClassifier {
        self.error_codes
            .iter()
            .fold(ErrorClassifier::new(), |classifier, o| {
                classifier.with_code(o.code, o.kind)
            })
    }

    pub fn fs_config(&self) -> FsConfig {
        FsConfig {
            root: self.storage_root.clone(),
            chunk_size: self.chunk_size,
            throttle: (self.throttle_ms > 0).then(|| Duration::from_millis(self.throttle_ms)),
        }
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("picstash")
            .join("config.toml")
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("picstash").join("config.toml")
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        PathBuf::from("/tmp/picstash/config.toml")
    }
}
