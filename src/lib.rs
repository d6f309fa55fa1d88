//! Disk Inventory - Physical Disk Discovery for Storage Nodes
//!
//! Builds an inventory of the physical disks attached to a Linux host and
//! decides which of them are free for a storage pool.
//!
//! # Architecture
//!
//! Each scan runs a fixed pipeline of probes; only enumeration is fatal:
//!
//! ```text
//! lsblk → udevadm → mounts → smartctl → zpool → cache
//! ```
//!
//! # Features
//!
//! - Stable device identity (serial, WWN, by-id link, path)
//! - System disk and ZFS pool membership detection
//! - SMART health with cloud platform restrictions
//! - Per-probe timeouts and scan cancellation
//! - Partial results with a per-stage outcome log
//! - Prometheus metrics and structured discovery events
//!
//! # Modules
//!
//! - [`adapters`] - Probe implementations backed by host tools, plus test doubles
//! - [`config`] - Engine configuration
//! - [`domain`] - Ports and events
//! - [`error`] - Error types
//! - [`hardware`] - Discovery pipeline, engine and cache
//! - [`metrics`] - Prometheus metrics

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod hardware;
pub mod metrics;

// Re-export commonly used types
pub use config::DiscoveryConfig;
pub use domain::events::DiscoveryEvent;
pub use domain::ports::ProbeContext;
pub use error::{Error, Result};
pub use hardware::{DiscoveryEngine, DiskState, PhysicalDisk, ProbeSet, ScanReport};
pub use metrics::DiscoveryMetrics;
