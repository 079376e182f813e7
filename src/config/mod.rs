//! Virtual display configuration
//!
//! Tunables for device probing, post-connect settling, and discovery polling.
//! Loaded from TOML; every field has a documented default matching the
//! shipped behavior, so an empty file is a valid configuration.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::utils::RetryPolicy;

/// Virtual display subsystem configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VdisplayConfig {
    /// EVDI sysfs control directory (module presence indicator)
    #[serde(default = "default_sysfs_path")]
    pub sysfs_path: PathBuf,

    /// Directory containing DRM card nodes
    #[serde(default = "default_dri_dir")]
    pub dri_dir: PathBuf,

    /// DRM class directory used for device classification
    #[serde(default = "default_drm_class_dir")]
    pub drm_class_dir: PathBuf,

    /// How many card indices to probe for a free device (card0..cardN-1)
    #[serde(default = "default_probe_limit")]
    pub probe_limit: u32,

    /// Milliseconds to wait after connect for KMS to settle
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Interval between discovery polls in milliseconds
    #[serde(default = "default_discovery_interval_ms")]
    pub discovery_interval_ms: u64,

    /// Maximum discovery poll attempts before proceeding anyway
    #[serde(default = "default_discovery_max_attempts")]
    pub discovery_max_attempts: u32,
}

fn default_sysfs_path() -> PathBuf {
    PathBuf::from("/sys/devices/evdi")
}

fn default_dri_dir() -> PathBuf {
    PathBuf::from("/dev/dri")
}

fn default_drm_class_dir() -> PathBuf {
    PathBuf::from("/sys/class/drm")
}

fn default_probe_limit() -> u32 {
    16
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_discovery_interval_ms() -> u64 {
    100
}

fn default_discovery_max_attempts() -> u32 {
    50
}

impl Default for VdisplayConfig {
    fn default() -> Self {
        Self {
            sysfs_path: default_sysfs_path(),
            dri_dir: default_dri_dir(),
            drm_class_dir: default_drm_class_dir(),
            probe_limit: default_probe_limit(),
            settle_delay_ms: default_settle_delay_ms(),
            discovery_interval_ms: default_discovery_interval_ms(),
            discovery_max_attempts: default_discovery_max_attempts(),
        }
    }
}

impl VdisplayConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let config: VdisplayConfig =
            toml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.probe_limit == 0 {
            bail!("probe_limit must be at least 1");
        }
        if self.discovery_max_attempts == 0 {
            bail!("discovery_max_attempts must be at least 1");
        }
        Ok(())
    }

    /// Retry policy for the discovery-handoff poll loop
    pub fn discovery_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.discovery_interval_ms, self.discovery_max_attempts)
    }
}
