//! Discovery Events
//!
//! Immutable records of things that happened during discovery: scans
//! starting and finishing, stages degrading, single devices being refreshed
//! or dropped from the cache. Published through the
//! [`EventPublisher`](super::ports::EventPublisher) port.
//!
//! # Example
//!
//! ```ignore
//! let event = DiscoveryEvent::scan_completed(scan_id, 4, 1, 850);
//! event_publisher.publish(event).await?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hardware::discovery::stage::{Stage, StageOutcome};
use crate::hardware::discovery::DiskState;

/// Event emitted by the discovery engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DiscoveryEvent {
    // =========================================================================
    // Scan Events
    // =========================================================================
    /// A full scan started.
    ScanStarted {
        scan_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// A full scan committed its results to the cache.
    ScanCompleted {
        scan_id: Uuid,
        disk_count: usize,
        degraded_stages: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A full scan could not enumerate devices.
    ScanFailed {
        scan_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A stage failed or was skipped for a device.
    StageDegraded {
        scan_id: Uuid,
        stage: Stage,
        device: Option<String>,
        outcome: StageOutcome,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Device Events
    // =========================================================================
    /// A single device was re-scanned and its cache entry replaced.
    DeviceRefreshed {
        device_path: String,
        device_id: String,
        state: DiskState,
        timestamp: DateTime<Utc>,
    },

    /// A device vanished during a refresh and was dropped from the cache.
    DeviceEvicted {
        device_path: String,
        timestamp: DateTime<Utc>,
    },
}

impl DiscoveryEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            DiscoveryEvent::ScanStarted { .. } => "ScanStarted",
            DiscoveryEvent::ScanCompleted { .. } => "ScanCompleted",
            DiscoveryEvent::ScanFailed { .. } => "ScanFailed",
            DiscoveryEvent::StageDegraded { .. } => "StageDegraded",
            DiscoveryEvent::DeviceRefreshed { .. } => "DeviceRefreshed",
            DiscoveryEvent::DeviceEvicted { .. } => "DeviceEvicted",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DiscoveryEvent::ScanStarted { timestamp, .. }
            | DiscoveryEvent::ScanCompleted { timestamp, .. }
            | DiscoveryEvent::ScanFailed { timestamp, .. }
            | DiscoveryEvent::StageDegraded { timestamp, .. }
            | DiscoveryEvent::DeviceRefreshed { timestamp, .. }
            | DiscoveryEvent::DeviceEvicted { timestamp, .. } => *timestamp,
        }
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    pub fn scan_started(scan_id: Uuid) -> Self {
        DiscoveryEvent::ScanStarted {
            scan_id,
            timestamp: Utc::now(),
        }
    }

    pub fn scan_completed(
        scan_id: Uuid,
        disk_count: usize,
        degraded_stages: usize,
        duration_ms: u64,
    ) -> Self {
        DiscoveryEvent::ScanCompleted {
            scan_id,
            disk_count,
            degraded_stages,
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn scan_failed(scan_id: Uuid, reason: impl Into<String>) -> Self {
        DiscoveryEvent::ScanFailed {
            scan_id,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn stage_degraded(
        scan_id: Uuid,
        stage: Stage,
        device: Option<String>,
        outcome: StageOutcome,
    ) -> Self {
        DiscoveryEvent::StageDegraded {
            scan_id,
            stage,
            device,
            outcome,
            timestamp: Utc::now(),
        }
    }

    pub fn device_refreshed(
        device_path: impl Into<String>,
        device_id: impl Into<String>,
        state: DiskState,
    ) -> Self {
        DiscoveryEvent::DeviceRefreshed {
            device_path: device_path.into(),
            device_id: device_id.into(),
            state,
            timestamp: Utc::now(),
        }
    }

    pub fn device_evicted(device_path: impl Into<String>) -> Self {
        DiscoveryEvent::DeviceEvicted {
            device_path: device_path.into(),
            timestamp: Utc::now(),
        }
    }
}
