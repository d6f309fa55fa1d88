//! Stage Outcomes
//!
//! Every enrichment stage reports what it did for a disk as a tagged outcome
//! instead of propagating errors. "The tool is not installed" and "the probe
//! ran and failed" stay distinguishable so callers and tests can tell a
//! policy skip from a degraded result.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Pipeline stage of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Enumeration,
    Identity,
    SystemUsage,
    Environment,
    Smart,
    PoolMembership,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Enumeration => "enumeration",
            Stage::Identity => "identity",
            Stage::SystemUsage => "system_usage",
            Stage::Environment => "environment",
            Stage::Smart => "smart",
            Stage::PoolMembership => "pool_membership",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a stage did not run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// The probe's binary is not installed
    ToolUnavailable(String),
    /// Cloud block storage never exposes SMART
    CloudPlatform(String),
    /// Turned off in configuration
    Disabled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::ToolUnavailable(tool) => write!(f, "tool '{}' not available", tool),
            SkipReason::CloudPlatform(platform) => write!(f, "cloud platform {}", platform),
            SkipReason::Disabled => write!(f, "disabled"),
        }
    }
}

/// What a stage did for one disk (or for the whole scan)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum StageOutcome {
    /// The stage ran and updated the record
    Applied,
    /// The stage ran and had nothing to record
    Unchanged,
    /// The stage was not run by policy
    Skipped(SkipReason),
    /// The probe failed; affected fields kept their defaults
    Failed(String),
}

impl StageOutcome {
    /// Build a failure outcome from a probe error.
    pub fn failed(err: &Error) -> Self {
        StageOutcome::Failed(err.to_string())
    }

    /// Metric / log label
    pub fn label(&self) -> &'static str {
        match self {
            StageOutcome::Applied => "applied",
            StageOutcome::Unchanged => "unchanged",
            StageOutcome::Skipped(_) => "skipped",
            StageOutcome::Failed(_) => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StageOutcome::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StageOutcome::Skipped(_))
    }
}

impl std::fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageOutcome::Applied => write!(f, "applied"),
            StageOutcome::Unchanged => write!(f, "unchanged"),
            StageOutcome::Skipped(reason) => write!(f, "skipped ({})", reason),
            StageOutcome::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// Outcome of one stage, for one device or for the scan as a whole
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    /// `None` for scan-wide stages (environment, pool status query)
    pub device: Option<String>,
    pub outcome: StageOutcome,
}

impl StageRecord {
    pub fn new(stage: Stage, device: Option<&str>, outcome: StageOutcome) -> Self {
        Self {
            stage,
            device: device.map(str::to_string),
            outcome,
        }
    }

    /// True if the stage failed or was skipped
    pub fn is_degraded(&self) -> bool {
        self.outcome.is_failed() || self.outcome.is_skipped()
    }
}
