//! Discovery configuration
//!
//! Loaded from YAML; every field has a default so an empty file is valid.
//!
//! ```yaml
//! probe_timeout_secs: 10
//! probe_concurrency: 4
//! smart_enabled: true
//! pool_enabled: true
//! excluded_major_numbers: [7, 11]
//! restricted_hypervisors: [amazon, microsoft, google]
//! tools:
//!   smartctl: /usr/sbin/smartctl
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hardware::discovery::enumerator::{LOOP_MAJOR, SCSI_CDROM_MAJOR};
use crate::hardware::discovery::smart::CloudPolicy;

/// Binary names or absolute paths of the external probes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub lsblk: String,
    pub udevadm: String,
    pub smartctl: String,
    pub zpool: String,
    #[serde(rename = "systemd-detect-virt", alias = "detect_virt")]
    pub detect_virt: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            lsblk: "lsblk".to_string(),
            udevadm: "udevadm".to_string(),
            smartctl: "smartctl".to_string(),
            zpool: "zpool".to_string(),
            detect_virt: "systemd-detect-virt".to_string(),
        }
    }
}

/// Configuration for the discovery engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Deadline for each probe invocation
    pub probe_timeout_secs: u64,

    /// Disks probed concurrently during identity and SMART stages
    pub probe_concurrency: usize,

    /// Run the SMART stage
    pub smart_enabled: bool,

    /// Run the pool membership stage
    pub pool_enabled: bool,

    /// Kernel major numbers that never denote a physical disk
    pub excluded_major_numbers: Vec<u32>,

    /// Platforms on which SMART probing is skipped
    #[serde(flatten)]
    pub cloud_policy: CloudPolicy,

    /// External probe binaries
    pub tools: ToolPaths,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: 30,
            probe_concurrency: 1,
            smart_enabled: true,
            pool_enabled: true,
            excluded_major_numbers: vec![LOOP_MAJOR, SCSI_CDROM_MAJOR],
            cloud_policy: CloudPolicy::default(),
            tools: ToolPaths::default(),
        }
    }
}

impl DiscoveryConfig {
    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.probe_timeout_secs == 0 {
            return Err(Error::Config("probe_timeout_secs must be greater than 0".into()));
        }
        if self.probe_concurrency == 0 {
            return Err(Error::Config("probe_concurrency must be greater than 0".into()));
        }
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}
