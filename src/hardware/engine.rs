//! Discovery Engine
//!
//! Runs the enrichment pipeline and publishes its result to the cache.
//!
//! ```text
//! ┌────────────┐   ┌──────────┐   ┌──────────────┐   ┌───────┐   ┌──────────────┐   ┌───────┐
//! │ Enumerator │──▶│ Identity │──▶│ System usage │──▶│ SMART │──▶│ Pool members │──▶│ Cache │
//! └────────────┘   └──────────┘   └──────────────┘   └───────┘   └──────────────┘   └───────┘
//!    fatal            best-effort per disk / per scan                                 one swap
//! ```
//!
//! Only enumeration can fail a scan. Every other stage records a
//! [`StageOutcome`] and leaves the affected fields at their defaults.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::cache::DiscoveryCache;
use super::discovery::enumerator::{EnumeratedDisk, Enumerator};
use super::discovery::identity::IdentityResolver;
use super::discovery::pool::{apply_membership, PoolResolver};
use super::discovery::smart::SmartProber;
use super::discovery::stage::{SkipReason, Stage, StageOutcome, StageRecord};
use super::discovery::usage::classify_system_usage;
use super::discovery::PhysicalDisk;
use crate::config::DiscoveryConfig;
use crate::domain::events::DiscoveryEvent;
use crate::domain::ports::{
    BlockDeviceSource, DevicePropertySource, Environment, EnvironmentDetector, EventPublisher,
    PoolStatusSource, ProbeContext, SmartProbe, ToolLocator,
};
use crate::error::{Error, Result};
use crate::metrics::{DiscoveryMetrics, ScanResult};

// =============================================================================
// Probe Set
// =============================================================================

/// Every collaborator the engine consumes
#[derive(Clone)]
pub struct ProbeSet {
    pub block_devices: Arc<dyn BlockDeviceSource>,
    pub properties: Arc<dyn DevicePropertySource>,
    pub smart: Arc<dyn SmartProbe>,
    pub pools: Arc<dyn PoolStatusSource>,
    pub environment: Arc<dyn EnvironmentDetector>,
    pub tools: Arc<dyn ToolLocator>,
}

impl ProbeSet {
    /// Use one object for every port.
    pub fn from_shared<P>(probes: Arc<P>) -> Self
    where
        P: BlockDeviceSource
            + DevicePropertySource
            + SmartProbe
            + PoolStatusSource
            + EnvironmentDetector
            + ToolLocator
            + 'static,
    {
        Self {
            block_devices: probes.clone(),
            properties: probes.clone(),
            smart: probes.clone(),
            pools: probes.clone(),
            environment: probes.clone(),
            tools: probes,
        }
    }
}

// =============================================================================
// Scan Report
// =============================================================================

/// Result of one full scan
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scan_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub environment: Environment,
    /// Disks sorted by device path
    pub disks: Vec<PhysicalDisk>,
    pub stages: Vec<StageRecord>,
}

impl ScanReport {
    /// Stages that failed or were skipped
    pub fn degraded(&self) -> impl Iterator<Item = &StageRecord> {
        self.stages.iter().filter(|r| r.is_degraded())
    }

    /// Outcome of `stage` for one device.
    pub fn outcome(&self, stage: Stage, device: &str) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|r| r.stage == stage && r.device.as_deref() == Some(device))
            .map(|r| &r.outcome)
    }

    /// Outcome of a scan-wide stage.
    pub fn scan_outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|r| r.stage == stage && r.device.is_none())
            .map(|r| &r.outcome)
    }

    pub fn disk(&self, device_path: &str) -> Option<&PhysicalDisk> {
        self.disks.iter().find(|d| d.device_path == device_path)
    }
}

struct PipelineOutput {
    disks: Vec<PhysicalDisk>,
    environment: Environment,
    stages: Vec<StageRecord>,
}

// =============================================================================
// Engine
// =============================================================================

/// Physical disk discovery engine
pub struct DiscoveryEngine {
    config: DiscoveryConfig,
    enumerator: Enumerator,
    identity: IdentityResolver,
    smart: SmartProber,
    pools: PoolResolver,
    cache: DiscoveryCache,
    events: Option<Arc<dyn EventPublisher>>,
    metrics: Option<Arc<DiscoveryMetrics>>,
    /// Serializes cache writers (scans and refreshes)
    write_lock: Mutex<()>,
}

impl DiscoveryEngine {
    pub fn new(config: DiscoveryConfig, probes: ProbeSet) -> Self {
        let enumerator = Enumerator::new(
            probes.block_devices,
            probes.tools.clone(),
            config.excluded_major_numbers.iter().copied(),
        );
        let identity = IdentityResolver::new(probes.properties, probes.tools.clone());
        let smart = SmartProber::new(
            probes.smart,
            probes.environment,
            probes.tools.clone(),
            config.cloud_policy.clone(),
        );
        let pools = PoolResolver::new(probes.pools, probes.tools);

        Self {
            config,
            enumerator,
            identity,
            smart,
            pools,
            cache: DiscoveryCache::new(),
            events: None,
            metrics: None,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(publisher);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<DiscoveryMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn cache(&self) -> &DiscoveryCache {
        &self.cache
    }

    /// A probe context with the configured timeout and a fresh token.
    pub fn probe_context(&self) -> ProbeContext {
        ProbeContext::new(self.config.probe_timeout())
    }

    // =========================================================================
    // Public Operations
    // =========================================================================

    /// Run a full scan and replace the cache with its result.
    #[instrument(skip(self, ctx), fields(scan_id = tracing::field::Empty))]
    pub async fn scan(&self, ctx: &ProbeContext) -> Result<ScanReport> {
        let _write = self.write_lock.lock().await;

        let scan_id = Uuid::new_v4();
        tracing::Span::current().record("scan_id", tracing::field::display(scan_id));
        let started_at = Utc::now();
        let timer = Instant::now();

        info!("Starting discovery scan");
        self.publish(DiscoveryEvent::scan_started(scan_id)).await;

        let output = match self.run_pipeline(None, ctx).await {
            Ok(output) => output,
            Err(e) => {
                error!("Discovery scan failed: {}", e);
                if let Some(metrics) = &self.metrics {
                    metrics.record_scan(ScanResult::Failure, Some(timer.elapsed()));
                }
                self.publish(DiscoveryEvent::scan_failed(scan_id, e.to_string())).await;
                return Err(e);
            }
        };

        let PipelineOutput {
            mut disks,
            environment,
            stages,
        } = output;
        disks.sort_by(|a, b| a.device_path.cmp(&b.device_path));

        let finished_at = Utc::now();
        self.cache.replace_all(disks.clone(), finished_at);

        let elapsed = timer.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.record_scan(ScanResult::Success, Some(elapsed));
            metrics.record_stages(&stages);
            metrics.record_inventory(&disks);
        }

        let degraded = self.publish_degraded(scan_id, &stages).await;
        self.publish(DiscoveryEvent::scan_completed(
            scan_id,
            disks.len(),
            degraded,
            elapsed.as_millis() as u64,
        ))
        .await;

        info!(
            "Discovery scan complete: {} disks, {} degraded stages in {:?}",
            disks.len(),
            degraded,
            elapsed
        );

        Ok(ScanReport {
            scan_id,
            started_at,
            finished_at,
            environment,
            disks,
            stages,
        })
    }

    /// Run a full scan and return the disks, sorted by device path.
    pub async fn discover_all(&self, ctx: &ProbeContext) -> Result<Vec<PhysicalDisk>> {
        Ok(self.scan(ctx).await?.disks)
    }

    /// Re-scan one device and replace only its cache entry.
    ///
    /// `path` may be the device node or any of its cached links. A device
    /// that no longer exists is evicted and reported as not found. The last
    /// scan time is left alone.
    #[instrument(skip(self, ctx))]
    pub async fn refresh_device(&self, ctx: &ProbeContext, path: &str) -> Result<PhysicalDisk> {
        let _write = self.write_lock.lock().await;

        let target = self
            .cache
            .current()
            .resolve_path(path)
            .map(str::to_string)
            .unwrap_or_else(|| path.to_string());

        debug!("Refreshing {}", target);
        let output = match self.run_pipeline(Some(&target), ctx).await {
            Ok(output) => output,
            Err(e) => {
                warn!("Refresh of {} failed: {}", target, e);
                if let Some(metrics) = &self.metrics {
                    metrics.record_scan(ScanResult::Failure, None);
                }
                return Err(e);
            }
        };

        let disk = output
            .disks
            .into_iter()
            .find(|d| d.device_path == target || d.is_known_as(path));

        let Some(disk) = disk else {
            if self.cache.remove(&target).is_some() {
                info!("{} is gone, evicted from cache", target);
                self.publish(DiscoveryEvent::device_evicted(&target)).await;
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_scan(ScanResult::Failure, None);
                metrics.record_inventory(self.cache.current().devices.values());
            }
            return Err(Error::DeviceNotFound {
                operation: "refresh",
                device: path.to_string(),
            });
        };

        self.cache.upsert(disk.clone());

        if let Some(metrics) = &self.metrics {
            metrics.record_scan(ScanResult::Refresh, None);
            metrics.record_stages(&output.stages);
            metrics.record_inventory(self.cache.current().devices.values());
        }
        self.publish_degraded(Uuid::nil(), &output.stages).await;
        self.publish(DiscoveryEvent::device_refreshed(
            &disk.device_path,
            &disk.device_id,
            disk.state,
        ))
        .await;

        info!("Refreshed {} ({}, {})", disk.device_path, disk.device_id, disk.state);
        Ok(disk)
    }

    /// Deep copy of the cached inventory.
    pub fn cached_devices(&self) -> std::collections::HashMap<String, PhysicalDisk> {
        self.cache.snapshot()
    }

    pub fn last_scan_time(&self) -> Option<DateTime<Utc>> {
        self.cache.last_scan_time()
    }

    // =========================================================================
    // Pipeline
    // =========================================================================

    async fn run_pipeline(&self, scope: Option<&str>, ctx: &ProbeContext) -> Result<PipelineOutput> {
        let mut stages = Vec::new();
        let concurrency = self.config.probe_concurrency.max(1);

        // Enumeration
        let entries: Vec<EnumeratedDisk> = self
            .enumerator
            .enumerate_with_children(scope, ctx)
            .await
            .map_err(|e| Error::discovery("enumerate", scope, e))?;
        stages.push(StageRecord::new(Stage::Enumeration, scope, StageOutcome::Applied));

        // Identity
        // Entries are moved through the stream; the scan future must be Send
        let identity = &self.identity;
        let resolved: Vec<(EnumeratedDisk, StageOutcome)> =
            stream::iter(entries.into_iter().map(move |mut entry| async move {
                let outcome = identity.resolve(&mut entry.disk, ctx).await;
                (entry, outcome)
            }))
            .buffered(concurrency)
            .collect()
            .await;
        let mut entries = split_outcomes(&mut stages, Stage::Identity, resolved);

        // System usage
        for entry in entries.iter_mut() {
            let outcome = classify_system_usage(&mut entry.disk, &entry.mountpoints, &entry.children);
            stages.push(StageRecord::new(Stage::SystemUsage, Some(&entry.disk.device_path), outcome));
        }

        // SMART
        let environment = if self.config.smart_enabled {
            let (environment, outcome) = self.smart.resolve_environment(ctx).await;
            stages.push(StageRecord::new(Stage::Environment, None, outcome));

            let smart = &self.smart;
            let env = &environment;
            let probed: Vec<(EnumeratedDisk, StageOutcome)> =
                stream::iter(entries.into_iter().map(move |mut entry| async move {
                    let outcome = smart.probe(&mut entry.disk, env, ctx).await;
                    (entry, outcome)
                }))
                .buffered(concurrency)
                .collect()
                .await;
            entries = split_outcomes(&mut stages, Stage::Smart, probed);
            environment
        } else {
            debug!("SMART stage disabled");
            for entry in &entries {
                stages.push(StageRecord::new(
                    Stage::Smart,
                    Some(&entry.disk.device_path),
                    StageOutcome::Skipped(SkipReason::Disabled),
                ));
            }
            Environment::bare_metal()
        };

        // Pool membership
        if self.config.pool_enabled {
            let (pools, outcome) = self.pools.load(ctx).await;
            stages.push(StageRecord::new(Stage::PoolMembership, None, outcome));
            if let Some(pools) = pools {
                for entry in entries.iter_mut() {
                    let outcome = apply_membership(&mut entry.disk, &pools);
                    stages.push(StageRecord::new(
                        Stage::PoolMembership,
                        Some(&entry.disk.device_path),
                        outcome,
                    ));
                }
            }
        } else {
            debug!("Pool membership stage disabled");
            stages.push(StageRecord::new(
                Stage::PoolMembership,
                None,
                StageOutcome::Skipped(SkipReason::Disabled),
            ));
        }

        Ok(PipelineOutput {
            disks: entries.into_iter().map(|e| e.disk).collect(),
            environment,
            stages,
        })
    }

    // =========================================================================
    // Events
    // =========================================================================

    async fn publish(&self, event: DiscoveryEvent) {
        if let Some(events) = &self.events {
            if let Err(e) = events.publish(event).await {
                warn!("Failed to publish discovery event: {}", e);
            }
        }
    }

    /// Publish one event per degraded stage; returns how many there were.
    async fn publish_degraded(&self, scan_id: Uuid, stages: &[StageRecord]) -> usize {
        let degraded: Vec<DiscoveryEvent> = stages
            .iter()
            .filter(|r| r.is_degraded())
            .map(|r| DiscoveryEvent::stage_degraded(scan_id, r.stage, r.device.clone(), r.outcome.clone()))
            .collect();
        let count = degraded.len();

        if let (Some(events), false) = (&self.events, degraded.is_empty()) {
            if let Err(e) = events.publish_all(degraded).await {
                warn!("Failed to publish discovery events: {}", e);
            }
        }
        count
    }
}

/// Record one stage outcome per disk and hand the disks back in order.
fn split_outcomes(
    stages: &mut Vec<StageRecord>,
    stage: Stage,
    results: Vec<(EnumeratedDisk, StageOutcome)>,
) -> Vec<EnumeratedDisk> {
    results
        .into_iter()
        .map(|(entry, outcome)| {
            stages.push(StageRecord::new(stage, Some(entry.disk.device_path.as_str()), outcome));
            entry
        })
        .collect()
}

impl std::fmt::Debug for DiscoveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryEngine")
            .field("config", &self.config)
            .field("cached_devices", &self.cache.len())
            .finish_non_exhaustive()
    }
}
