use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Which kinds of actions a run is allowed to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Create, update and expire.
    #[default]
    Full,
    /// Create and update only; expiry is suppressed.
    NewOnly,
    /// Expire only; creates and updates are suppressed.
    ExpiredOnly,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Full => write!(f, "full"),
            RunMode::NewOnly => write!(f, "new-only"),
            RunMode::ExpiredOnly => write!(f, "expired-only"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetBoxConfig {
    pub url: String,
    pub token: String,
    pub verify_tls: bool,
    pub timeout_seconds: u64,
    pub tag: String,
    pub retired_status: String,
}

impl Default for NetBoxConfig {
    fn default() -> Self {
        Self {
            url: "http://netbox.local/api/".to_string(),
            token: String::new(),
            verify_tls: true,
            timeout_seconds: 30,
            tag: "dhcp".to_string(),
            retired_status: "reserved".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub leases_file: PathBuf,
    pub snapshot_file: PathBuf,
    pub netbox: NetBoxConfig,
    pub mode: RunMode,
    pub dry_run: bool,
    pub log_file: Option<PathBuf>,
    pub dry_run_log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            leases_file: PathBuf::from("/var/lib/dhcp/dhcpd.leases"),
            snapshot_file: PathBuf::from("leases-snapshot.json"),
            netbox: NetBoxConfig::default(),
            mode: RunMode::Full,
            dry_run: false,
            log_file: None,
            dry_run_log_file: None,
        }
    }
}

impl Config {
    /// Loads the configuration at `path`, writing the defaults there first
    /// if the file does not exist.
    ///
    /// Validation is left to the caller so command-line overrides can be
    /// applied before [`Config::validate`] runs.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.netbox.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "netbox.url must be an http or https URL, got {:?}",
                self.netbox.url
            )));
        }

        if self.netbox.token.trim().is_empty() && !self.dry_run {
            return Err(Error::InvalidConfig(
                "netbox.token must be set unless running in dry-run mode".to_string(),
            ));
        }

        if self.netbox.timeout_seconds == 0 {
            return Err(Error::InvalidConfig(
                "netbox.timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.netbox.tag.trim().is_empty() {
            return Err(Error::InvalidConfig("netbox.tag must not be empty".to_string()));
        }

        if self.netbox.retired_status.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "netbox.retired_status must not be empty".to_string(),
            ));
        }

        if self.snapshot_file.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "snapshot_file must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns the log file for this run, if one is configured.
    ///
    /// Dry runs log to `dry_run_log_file` so they never interleave with the
    /// record of real changes.
    pub fn active_log_file(&self) -> Option<&Path> {
        if self.dry_run {
            self.dry_run_log_file.as_deref()
        } else {
            self.log_file.as_deref()
        }
    }
}
