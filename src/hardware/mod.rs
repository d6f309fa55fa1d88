//! Hardware Discovery Module
//!
//! Inventory of the physical disks attached to a Linux host.
//!
//! # Features
//!
//! - Whole-disk enumeration via lsblk, with loop and optical devices excluded
//! - Stable device identity from udev (serial, WWN, by-id link)
//! - System disk detection from mounted filesystems
//! - SMART status and self-test support via smartctl, skipped on cloud disks
//! - ZFS pool membership and health via zpool
//! - A read-mostly cache that always holds one complete scan
//!
//! # Example
//!
//! ```no_run
//! use disk_inventory::adapters::system_probes;
//! use disk_inventory::hardware::{DiscoveryEngine, DiskState};
//! use disk_inventory::DiscoveryConfig;
//!
//! # async fn example() -> disk_inventory::Result<()> {
//! let config = DiscoveryConfig::default();
//! let engine = DiscoveryEngine::new(config.clone(), system_probes(&config));
//! let disks = engine.discover_all(&engine.probe_context()).await?;
//!
//! for disk in disks.iter().filter(|d| d.state == DiskState::Available) {
//!     println!(
//!         "  {} - {} ({})",
//!         disk.device_path,
//!         disk.model.as_deref().unwrap_or("unknown"),
//!         disk.disk_type
//!     );
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod discovery;
pub mod engine;

pub use cache::{CacheSnapshot, DiscoveryCache};
pub use discovery::stage::{SkipReason, Stage, StageOutcome, StageRecord};
pub use discovery::{DeviceIdSource, DiskHealth, DiskState, DiskType, PhysicalDisk};
pub use engine::{DiscoveryEngine, ProbeSet, ScanReport};
