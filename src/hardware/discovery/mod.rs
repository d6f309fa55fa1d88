//! Disk Discovery Components
//!
//! The inventory record for a physical disk and the enrichment stages that
//! fill it in.

pub mod enumerator;
pub mod identity;
pub mod pool;
pub mod properties;
pub mod smart;
pub mod stage;
pub mod usage;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

// =============================================================================
// Disk Types
// =============================================================================

/// Technology class of a disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DiskType {
    /// NVMe SSD
    Nvme,
    /// SATA/SAS SSD
    Ssd,
    /// Spinning HDD
    Hdd,
    /// Unknown device type
    #[default]
    Unknown,
}

impl DiskType {
    /// How much a probe has told us about the technology.
    ///
    /// A later probe may only replace the type with a strictly more specific one.
    pub fn specificity(&self) -> u8 {
        match self {
            DiskType::Unknown => 0,
            DiskType::Hdd | DiskType::Ssd => 1,
            DiskType::Nvme => 2,
        }
    }
}

impl std::fmt::Display for DiskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiskType::Nvme => write!(f, "NVMe"),
            DiskType::Ssd => write!(f, "SSD"),
            DiskType::Hdd => write!(f, "HDD"),
            DiskType::Unknown => write!(f, "Unknown"),
        }
    }
}

// =============================================================================
// Identity
// =============================================================================

/// Which identity tier produced a disk's `device_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceIdSource {
    /// Drive serial number
    Serial,
    /// World wide name
    Wwn,
    /// First `/dev/disk/by-id/` link
    ById,
    /// Kernel device node
    #[default]
    Path,
}

impl std::fmt::Display for DeviceIdSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceIdSource::Serial => write!(f, "serial"),
            DeviceIdSource::Wwn => write!(f, "wwn"),
            DeviceIdSource::ById => write!(f, "by-id"),
            DeviceIdSource::Path => write!(f, "path"),
        }
    }
}

// =============================================================================
// State
// =============================================================================

/// Role / health of a disk as classified by the last scan.
///
/// `Available` disks are free capacity, `System` disks carry a mounted file
/// system, the remaining states mirror the health of the pool member the disk
/// was matched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DiskState {
    #[default]
    Available,
    System,
    Online,
    Degraded,
    Faulted,
    Unavail,
    Offline,
}

impl DiskState {
    /// All states, in declaration order
    pub const ALL: [DiskState; 7] = [
        DiskState::Available,
        DiskState::System,
        DiskState::Online,
        DiskState::Degraded,
        DiskState::Faulted,
        DiskState::Unavail,
        DiskState::Offline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DiskState::Available => "Available",
            DiskState::System => "System",
            DiskState::Online => "Online",
            DiskState::Degraded => "Degraded",
            DiskState::Faulted => "Faulted",
            DiskState::Unavail => "Unavail",
            DiskState::Offline => "Offline",
        }
    }
}

impl std::fmt::Display for DiskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall SMART self-assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiskHealth {
    /// No assessment available
    #[default]
    Unknown,
    /// SMART overall-health test passed
    Passed,
    /// SMART overall-health test failed
    Failed,
}

// =============================================================================
// Physical Disk
// =============================================================================

/// Inventory record for one physical block device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalDisk {
    /// Kernel device node (e.g., /dev/sda), primary lookup key
    pub device_path: String,
    /// Alternate stable paths (by-id, by-path, by-uuid...), in probe order
    pub device_links: Vec<String>,
    /// Canonical stable identity
    pub device_id: String,
    /// Identity tier that produced `device_id`
    pub device_id_source: DeviceIdSource,
    pub serial: Option<String>,
    pub wwn: Option<String>,
    pub model: Option<String>,
    pub vendor: Option<String>,
    /// Technology class
    pub disk_type: DiskType,
    /// Capacity in bytes
    pub size_bytes: u64,
    /// Transport reported by the enumerator (sata, nvme, usb...)
    pub transport: Option<String>,
    pub state: DiskState,
    pub health: DiskHealth,
    /// Pool the disk belongs to, if any
    pub pool_name: Option<String>,
    pub smart_available: bool,
    pub smart_enabled: bool,
    pub smart_tests_supported: bool,
    /// Raw SMART probe payload
    pub smart_info: Option<serde_json::Value>,
}

impl PhysicalDisk {
    /// Create a record seeded with enumerator defaults.
    pub fn new(device_path: impl Into<String>) -> Self {
        let device_path = device_path.into();
        Self {
            device_id: device_path.clone(),
            device_path,
            device_links: Vec::new(),
            device_id_source: DeviceIdSource::Path,
            serial: None,
            wwn: None,
            model: None,
            vendor: None,
            disk_type: DiskType::Unknown,
            size_bytes: 0,
            transport: None,
            state: DiskState::Available,
            health: DiskHealth::Unknown,
            pool_name: None,
            smart_available: false,
            smart_enabled: false,
            smart_tests_supported: false,
            smart_info: None,
        }
    }

    /// Replace the link list, dropping empty entries and duplicates while
    /// keeping the first occurrence of each.
    pub fn set_device_links<I, S>(&mut self, links: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = BTreeSet::new();
        self.device_links = links
            .into_iter()
            .map(Into::into)
            .filter(|link: &String| !link.is_empty() && seen.insert(link.clone()))
            .collect();
    }

    /// Every path this disk is known by: its links plus the device node.
    pub fn lookup_paths(&self) -> BTreeSet<&str> {
        self.device_links
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.device_path.as_str()))
            .collect()
    }

    /// Check whether `path` names this disk
    pub fn is_known_as(&self, path: &str) -> bool {
        self.device_path == path || self.device_links.iter().any(|l| l == path)
    }

    /// Reset all SMART fields to their "unsupported" values.
    pub fn clear_smart(&mut self) {
        self.smart_available = false;
        self.smart_enabled = false;
        self.smart_tests_supported = false;
        self.smart_info = None;
    }
}
