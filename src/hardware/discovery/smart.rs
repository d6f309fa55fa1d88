//! SMART Capability Prober
//!
//! Records whether each disk supports SMART, whether it is switched on and
//! whether the drive can run self-tests.
//!
//! # Cloud Platforms
//!
//! Virtual disks on public clouds (EBS, Persistent Disk, Azure managed
//! disks...) never expose SMART and `smartctl` can hang for the full
//! timeout on them. When the host is virtualized on one of those platforms
//! the probe is skipped outright:
//!
//! ```text
//! virtualized? ──no──▶ probe
//!      │
//!     yes
//!      ▼
//! hypervisor / cloud provider / disk model restricted? ──yes──▶ skip, flags false
//!      │
//!      no
//!      ▼
//!    probe
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::stage::{SkipReason, StageOutcome};
use super::{DiskHealth, DiskType, PhysicalDisk};
use crate::domain::ports::{
    Environment, EnvironmentDetector, ProbeContext, SmartProbe, SmartReport, ToolLocator,
};

// =============================================================================
// Cloud Policy
// =============================================================================

/// Platforms on which SMART probing is never attempted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudPolicy {
    /// Hypervisor tags as reported by the environment detector
    pub restricted_hypervisors: Vec<String>,
    /// Cloud provider tags
    pub restricted_cloud_providers: Vec<String>,
    /// Model substrings of cloud virtual disk products
    pub cloud_disk_models: Vec<String>,
}

impl Default for CloudPolicy {
    fn default() -> Self {
        Self {
            restricted_hypervisors: vec![
                "amazon".to_string(),
                "microsoft".to_string(),
                "google".to_string(),
            ],
            restricted_cloud_providers: vec![
                "aws".to_string(),
                "azure".to_string(),
                "gcp".to_string(),
                "oracle".to_string(),
                "alibaba".to_string(),
                "digitalocean".to_string(),
            ],
            cloud_disk_models: vec![
                "Amazon Elastic Block Store".to_string(),
                "PersistentDisk".to_string(),
                "Virtual Disk".to_string(),
                "BlockVolume".to_string(),
            ],
        }
    }
}

impl CloudPolicy {
    /// Name of the restricted platform this disk runs on, if any.
    ///
    /// Bare metal hosts are never restricted.
    pub fn restricted_platform(&self, env: &Environment, model: Option<&str>) -> Option<String> {
        if !env.virtualized {
            return None;
        }

        let listed = |list: &[String], value: &str| list.iter().any(|v| v.eq_ignore_ascii_case(value));

        if let Some(hypervisor) = env.hypervisor.as_deref() {
            if listed(&self.restricted_hypervisors, hypervisor) {
                return Some(hypervisor.to_string());
            }
        }
        if let Some(provider) = env.cloud_provider.as_deref() {
            if listed(&self.restricted_cloud_providers, provider) {
                return Some(provider.to_string());
            }
        }
        if let Some(model) = model {
            let model = normalize_model(model);
            if let Some(product) = self.cloud_disk_models.iter().find(|p| {
                let product = normalize_model(p);
                !product.is_empty() && model.contains(&product)
            }) {
                return Some(product.clone());
            }
        }
        None
    }
}

/// Lowercase a model string and fold udev's `_` escaping and runs of
/// whitespace into single spaces.
fn normalize_model(model: &str) -> String {
    model
        .to_ascii_lowercase()
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// =============================================================================
// Report Application
// =============================================================================

/// Keep `current` unless `reported` is strictly more specific.
pub fn refine_disk_type(current: DiskType, reported: Option<DiskType>) -> DiskType {
    match reported {
        Some(reported) if reported.specificity() > current.specificity() => reported,
        _ => current,
    }
}

/// Copy a SMART report's flags, technology and health into `disk`.
///
/// `smart_tests_supported` is left for the caller.
pub fn apply_smart_report(disk: &mut PhysicalDisk, report: SmartReport) {
    disk.smart_available = report.available;
    disk.smart_enabled = report.available && report.enabled;
    disk.disk_type = refine_disk_type(disk.disk_type, report.disk_type);
    disk.health = match report.passed {
        Some(true) => DiskHealth::Passed,
        Some(false) => DiskHealth::Failed,
        None => disk.health,
    };
    disk.smart_info = (!report.raw.is_null()).then_some(report.raw);
}

// =============================================================================
// Prober
// =============================================================================

/// SMART stage
pub struct SmartProber {
    probe: Arc<dyn SmartProbe>,
    environment: Arc<dyn EnvironmentDetector>,
    tools: Arc<dyn ToolLocator>,
    policy: CloudPolicy,
}

impl SmartProber {
    pub fn new(
        probe: Arc<dyn SmartProbe>,
        environment: Arc<dyn EnvironmentDetector>,
        tools: Arc<dyn ToolLocator>,
        policy: CloudPolicy,
    ) -> Self {
        Self {
            probe,
            environment,
            tools,
            policy,
        }
    }

    /// Detect the environment once for a scan.
    ///
    /// Detection failures fall back to bare metal.
    pub async fn resolve_environment(&self, ctx: &ProbeContext) -> (Environment, StageOutcome) {
        let probe = self.environment.required_tool().unwrap_or("environment");
        if let Some(tool) = self.environment.required_tool() {
            if !self.tools.tool_available(tool) {
                debug!("{} not installed, assuming bare metal", tool);
                return (
                    Environment::bare_metal(),
                    StageOutcome::Skipped(SkipReason::ToolUnavailable(tool.to_string())),
                );
            }
        }

        match ctx.run(probe, self.environment.detect_environment(ctx)).await {
            Ok(env) => {
                info!(
                    "Environment: virtualized={} hypervisor={:?} cloud={:?}",
                    env.virtualized, env.hypervisor, env.cloud_provider
                );
                (env, StageOutcome::Applied)
            }
            Err(e) => {
                warn!("Environment detection failed, assuming bare metal: {}", e);
                (Environment::bare_metal(), StageOutcome::failed(&e))
            }
        }
    }

    /// Probe one disk's SMART capabilities.
    pub async fn probe(
        &self,
        disk: &mut PhysicalDisk,
        env: &Environment,
        ctx: &ProbeContext,
    ) -> StageOutcome {
        if let Some(platform) = self.policy.restricted_platform(env, disk.model.as_deref()) {
            debug!("Skipping SMART for {} on cloud platform {}", disk.device_path, platform);
            disk.clear_smart();
            return StageOutcome::Skipped(SkipReason::CloudPlatform(platform));
        }

        let probe = self.probe.required_tool().unwrap_or("smart");
        if let Some(tool) = self.probe.required_tool() {
            if !self.tools.tool_available(tool) {
                debug!("Skipping SMART for {}: {} not installed", disk.device_path, tool);
                disk.clear_smart();
                return StageOutcome::Skipped(SkipReason::ToolUnavailable(tool.to_string()));
            }
        }

        let report = match ctx.run(probe, self.probe.probe_smart_info(&disk.device_path, ctx)).await {
            Ok(report) => report,
            Err(e) => {
                warn!("SMART probe failed for {}: {}", disk.device_path, e);
                disk.clear_smart();
                return StageOutcome::failed(&e);
            }
        };

        let available = report.available;
        apply_smart_report(disk, report);

        disk.smart_tests_supported = if available {
            match ctx
                .run(probe, self.probe.probe_self_test_capability(&disk.device_path, ctx))
                .await
            {
                Ok(supported) => supported,
                Err(e) => {
                    warn!("Self-test capability probe failed for {}: {}", disk.device_path, e);
                    false
                }
            }
        } else {
            false
        };

        debug!(
            "SMART for {}: available={} enabled={} self-tests={}",
            disk.device_path, disk.smart_available, disk.smart_enabled, disk.smart_tests_supported
        );
        StageOutcome::Applied
    }
}
