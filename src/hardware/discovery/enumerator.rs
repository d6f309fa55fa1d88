//! Block-Device Enumerator
//!
//! Lists the host's block devices, drops the ones that are containers for
//! other storage (loopback files, optical drives) and seeds one
//! [`PhysicalDisk`] per remaining disk.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tracing::debug;

use super::{DiskType, PhysicalDisk};
use crate::domain::ports::{BlockDevice, BlockDeviceSource, ProbeContext, ToolLocator};
use crate::error::{Error, Result};

/// Kernel major number of loop devices.
pub const LOOP_MAJOR: u32 = 7;
/// Kernel major number of SCSI CD-ROM devices.
pub const SCSI_CDROM_MAJOR: u32 = 11;

/// A seeded disk plus the enumerator's view of what sits on it
#[derive(Debug, Clone)]
pub struct EnumeratedDisk {
    pub disk: PhysicalDisk,
    /// Mount points of the whole-disk node
    pub mountpoints: Vec<String>,
    /// Partitions and their descendants
    pub children: Vec<BlockDevice>,
}

/// Enumerator stage
pub struct Enumerator {
    source: Arc<dyn BlockDeviceSource>,
    tools: Arc<dyn ToolLocator>,
    excluded_majors: BTreeSet<u32>,
}

impl Enumerator {
    pub fn new(
        source: Arc<dyn BlockDeviceSource>,
        tools: Arc<dyn ToolLocator>,
        excluded_majors: impl IntoIterator<Item = u32>,
    ) -> Self {
        Self {
            source,
            tools,
            excluded_majors: excluded_majors.into_iter().collect(),
        }
    }

    /// Enumerate physical disks with their child devices.
    ///
    /// `scope` restricts enumeration to a single device node. Any failure
    /// here is fatal to the scan: there is nothing to enrich without a
    /// device list.
    pub async fn enumerate_with_children(
        &self,
        scope: Option<&str>,
        ctx: &ProbeContext,
    ) -> Result<Vec<EnumeratedDisk>> {
        let probe = self.source.required_tool().unwrap_or("block-devices");
        if let Some(tool) = self.source.required_tool() {
            if !self.tools.tool_available(tool) {
                return Err(Error::ToolUnavailable {
                    tool: tool.to_string(),
                });
            }
        }

        let devices = ctx
            .run(probe, self.source.enumerate_block_devices(scope, ctx))
            .await?;

        let disks = select_physical_disks(devices, &self.excluded_majors);
        debug!("Enumerated {} physical disks", disks.len());
        Ok(disks)
    }
}

/// Check whether an enumerated top-level node is a physical disk.
pub fn is_physical_disk(device: &BlockDevice, excluded_majors: &BTreeSet<u32>) -> bool {
    if device.device_type != "disk" {
        return false;
    }
    match device.major {
        Some(major) => !excluded_majors.contains(&major),
        None => true,
    }
}

/// Filter the device tree down to physical disks and seed their records.
///
/// The first node wins if the tool reports the same path twice.
pub fn select_physical_disks(
    devices: Vec<BlockDevice>,
    excluded_majors: &BTreeSet<u32>,
) -> Vec<EnumeratedDisk> {
    let mut seen = HashSet::new();
    let mut disks = Vec::new();

    for device in devices {
        if device.path.is_empty() {
            debug!("Skipping device {} without a device node", device.name);
            continue;
        }
        if !is_physical_disk(&device, excluded_majors) {
            debug!(
                "Skipping {} ({}, major {:?})",
                device.path, device.device_type, device.major
            );
            continue;
        }
        if !seen.insert(device.path.clone()) {
            continue;
        }

        let disk = seed_disk(&device);
        disks.push(EnumeratedDisk {
            disk,
            mountpoints: device.mountpoints,
            children: device.children,
        });
    }

    disks
}

fn seed_disk(device: &BlockDevice) -> PhysicalDisk {
    let mut disk = PhysicalDisk::new(device.path.clone());
    disk.size_bytes = device.size_bytes;
    disk.transport = non_blank(device.transport.as_deref());
    disk.model = non_blank(device.model.as_deref());
    disk.vendor = non_blank(device.vendor.as_deref());
    disk.disk_type = disk_type_from_enumeration(device.transport.as_deref(), device.rotational);
    disk
}

/// Best guess of the technology from transport and rotational flag.
pub fn disk_type_from_enumeration(transport: Option<&str>, rotational: Option<bool>) -> DiskType {
    if transport.is_some_and(|t| t.eq_ignore_ascii_case("nvme")) {
        return DiskType::Nvme;
    }
    match rotational {
        Some(true) => DiskType::Hdd,
        Some(false) => DiskType::Ssd,
        None => DiskType::Unknown,
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
