//! Metrics module
//!
//! Prometheus metrics describing discovery scans, held in a private
//! [`Registry`] so several engines (and tests) can coexist in one process.
//!
//! | metric | type | labels |
//! |---|---|---|
//! | `disk_inventory_scans_total` | counter | `result` |
//! | `disk_inventory_scan_duration_seconds` | histogram | |
//! | `disk_inventory_stage_outcomes_total` | counter | `stage`, `outcome` |
//! | `disk_inventory_disks` | gauge | |
//! | `disk_inventory_disks_by_state` | gauge | `state` |

use std::collections::HashMap;
use std::time::Duration;

use prometheus::{
    Histogram, HistogramOpts, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};

use crate::error::Result;
use crate::hardware::discovery::stage::StageRecord;
use crate::hardware::discovery::{DiskState, PhysicalDisk};

const NAMESPACE: &str = "disk_inventory";

/// Result label of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanResult {
    Success,
    Failure,
    Refresh,
}

impl ScanResult {
    fn as_str(&self) -> &'static str {
        match self {
            ScanResult::Success => "success",
            ScanResult::Failure => "failure",
            ScanResult::Refresh => "refresh",
        }
    }
}

/// Discovery metrics
#[derive(Clone)]
pub struct DiscoveryMetrics {
    registry: Registry,
    scans_total: IntCounterVec,
    scan_duration: Histogram,
    stage_outcomes: IntCounterVec,
    disks: IntGauge,
    disks_by_state: IntGaugeVec,
}

impl DiscoveryMetrics {
    /// Create and register every metric in a fresh registry.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let scans_total = IntCounterVec::new(
            Opts::new("scans_total", "Discovery scans by result").namespace(NAMESPACE),
            &["result"],
        )?;
        let scan_duration = Histogram::with_opts(
            HistogramOpts::new("scan_duration_seconds", "Duration of full discovery scans")
                .namespace(NAMESPACE)
                .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;
        let stage_outcomes = IntCounterVec::new(
            Opts::new("stage_outcomes_total", "Enrichment stage outcomes").namespace(NAMESPACE),
            &["stage", "outcome"],
        )?;
        let disks = IntGauge::with_opts(
            Opts::new("disks", "Physical disks in the last committed scan").namespace(NAMESPACE),
        )?;
        let disks_by_state = IntGaugeVec::new(
            Opts::new("disks_by_state", "Physical disks by classified state").namespace(NAMESPACE),
            &["state"],
        )?;

        registry.register(Box::new(scans_total.clone()))?;
        registry.register(Box::new(scan_duration.clone()))?;
        registry.register(Box::new(stage_outcomes.clone()))?;
        registry.register(Box::new(disks.clone()))?;
        registry.register(Box::new(disks_by_state.clone()))?;

        Ok(Self {
            registry,
            scans_total,
            scan_duration,
            stage_outcomes,
            disks,
            disks_by_state,
        })
    }

    /// Count a finished scan or refresh.
    pub fn record_scan(&self, result: ScanResult, duration: Option<Duration>) {
        self.scans_total.with_label_values(&[result.as_str()]).inc();
        if let Some(duration) = duration {
            self.scan_duration.observe(duration.as_secs_f64());
        }
    }

    /// Count stage outcomes.
    pub fn record_stages(&self, records: &[StageRecord]) {
        for record in records {
            self.stage_outcomes
                .with_label_values(&[record.stage.as_str(), record.outcome.label()])
                .inc();
        }
    }

    /// Set the disk gauges from a committed result.
    pub fn record_inventory<'a>(&self, disks: impl IntoIterator<Item = &'a PhysicalDisk>) {
        let mut by_state: HashMap<DiskState, i64> = HashMap::new();
        let mut total = 0;
        for disk in disks {
            *by_state.entry(disk.state).or_default() += 1;
            total += 1;
        }

        self.disks.set(total);
        for state in DiskState::ALL {
            self.disks_by_state
                .with_label_values(&[state.as_str()])
                .set(by_state.get(&state).copied().unwrap_or(0));
        }
    }

    /// Render the registry in the Prometheus text format.
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        Ok(encoder.encode_to_string(&self.registry.gather())?)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for DiscoveryMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryMetrics").finish_non_exhaustive()
    }
}
