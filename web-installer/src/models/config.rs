// Installer configuration
//
// Built once at startup (TOML file or defaults) and passed by reference into every component.
// Nothing mutates it after the orchestrator starts.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONNECTION_NAME: &str = "default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    /// Directory receiving `passbolt.php` and `license`.
    pub config_dir: PathBuf,
    /// Fixed export location of the server public key.
    pub server_key_public: PathBuf,
    /// Fixed export location of the server private key.
    pub server_key_private: PathBuf,
    /// Dedicated keyring holding the one active server key.
    pub gnupg_home: PathBuf,
    pub gpg_binary: String,
    pub gpg_timeout_secs: u64,
    /// Mirrors the application's license plugin switch.
    pub license_enabled: bool,
    /// Directory holding `manifest.json` and the SQL files it lists.
    pub migrations_dir: PathBuf,
    pub migration_timeout_secs: u64,
    /// Overrides the resolved log folder when set.
    pub log_dir: Option<PathBuf>,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("/etc/passbolt"),
            server_key_public: PathBuf::from("/etc/passbolt/gpg/serverkey.asc"),
            server_key_private: PathBuf::from("/etc/passbolt/gpg/serverkey_private.asc"),
            gnupg_home: PathBuf::from("/var/lib/passbolt/.gnupg"),
            gpg_binary: "gpg".to_string(),
            gpg_timeout_secs: 120,
            license_enabled: false,
            migrations_dir: PathBuf::from("/usr/share/php/passbolt/config/Migrations"),
            migration_timeout_secs: 300,
            log_dir: None,
        }
    }
}

impl InstallerConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse installer configuration (TOML)")
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read installer configuration: {:?}", path))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid installer configuration: {:?}", path))
    }

    pub fn config_file_path(&self) -> PathBuf {
        self.config_dir.join("passbolt.php")
    }

    pub fn license_file_path(&self) -> PathBuf {
        self.config_dir.join("license")
    }

    pub fn migration_timeout(&self) -> Duration {
        Duration::from_secs(self.migration_timeout_secs.max(1))
    }

    pub fn gpg_timeout(&self) -> Duration {
        Duration::from_secs(self.gpg_timeout_secs.max(1))
    }
}
