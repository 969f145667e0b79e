use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ZkvError, ZkvResult};

/// Top-level client configuration (loaded from zkv.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ZkvConfig {
    pub crypto: CryptoConfig,
    pub storage: StorageConfig,
    pub log: LogConfig,
}

/// Client-side encryption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// PBKDF2 iterations for new registrations (default: 100000).
    /// Existing users keep the iteration count recorded at registration.
    pub kdf_iterations: u32,
    /// Minimum password length in characters (default: 8)
    pub min_password_len: usize,
    /// File chunk size in bytes (default: 1 MiB)
    pub chunk_size: usize,
    /// Encrypt/decrypt file chunks on the rayon pool
    pub parallel_chunks: bool,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: 100_000,
            min_password_len: 8,
            chunk_size: 1 << 20,
            parallel_chunks: false,
        }
    }
}

/// Which OpenDAL service backs the record store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Volatile, process-local (tests and dry runs)
    Memory,
    /// Local directory tree under `root`
    Fs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Data directory for the fs backend (default: ~/.local/share/zkvault)
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            root: PathBuf::from("~/.local/share/zkvault"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level filter (default: info). RUST_LOG overrides it.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}

impl ZkvConfig {
    /// Load configuration from a TOML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> ZkvResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| ZkvError::Config(format!("parsing {}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> ZkvResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ZkvError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ZkvResult<()> {
        if self.crypto.kdf_iterations == 0 {
            return Err(ZkvError::Config("crypto.kdf_iterations must be > 0".into()));
        }
        if self.crypto.chunk_size == 0 {
            return Err(ZkvError::Config("crypto.chunk_size must be > 0".into()));
        }
        Ok(())
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}
