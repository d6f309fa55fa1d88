//! System-Usage Classifier
//!
//! A disk that carries a mounted file system anywhere in its device tree is
//! in use by the host (boot, root, swap on a partition...) and is not free
//! capacity.

use tracing::debug;

use super::stage::StageOutcome;
use super::{DiskState, PhysicalDisk};
use crate::domain::ports::BlockDevice;

/// Check whether the disk node or anything below it is mounted.
pub fn has_mounted_filesystem(mountpoints: &[String], children: &[BlockDevice]) -> bool {
    mountpoints.iter().any(|m| !m.trim().is_empty())
        || children
            .iter()
            .any(|child| child.is_mounted() || child.has_mounted_descendant())
}

/// Move an `Available` disk to `System` if it hosts a mounted file system.
///
/// Disks in any other state are left alone.
pub fn classify_system_usage(
    disk: &mut PhysicalDisk,
    mountpoints: &[String],
    children: &[BlockDevice],
) -> StageOutcome {
    if disk.state != DiskState::Available {
        return StageOutcome::Unchanged;
    }
    if !has_mounted_filesystem(mountpoints, children) {
        return StageOutcome::Unchanged;
    }

    debug!("{} hosts a mounted file system, marking as system disk", disk.device_path);
    disk.state = DiskState::System;
    StageOutcome::Applied
}
