//! Domain Ports (Port/Adapter Pattern)
//!
//! The discovery engine never talks to the operating system directly. Every
//! external probe it consumes is a trait defined here; infrastructure
//! adapters in [`crate::adapters`] implement them on top of command line
//! tools, and [`crate::adapters::memory`] implements them from fixtures.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Domain Layer                             │
//! │  BlockDeviceSource │ DevicePropertySource │ SmartProbe           │
//! │  PoolStatusSource  │ EnvironmentDetector  │ ToolLocator          │
//! └──────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Infrastructure Layer                         │
//! │  LsblkEnumerator │ UdevadmPropertySource │ SmartctlProbe         │
//! │  ZpoolStatusProbe │ SystemEnvironmentDetector │ PathToolLocator  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::hardware::discovery::DiskType;

/// Default deadline for a single probe invocation.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Probe Context
// =============================================================================

/// Deadline and cancellation signal handed to every probe call.
///
/// The timeout applies to each probe invocation individually; the token is
/// shared by all probes of one scan so cancelling it stops the whole scan.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    cancel: CancellationToken,
    timeout: Duration,
}

impl ProbeContext {
    /// Create a context with a fresh cancellation token.
    pub fn new(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            timeout,
        }
    }

    /// Create a context bound to an existing cancellation token.
    pub fn with_cancellation(cancel: CancellationToken, timeout: Duration) -> Self {
        Self { cancel, timeout }
    }

    /// Per-probe deadline
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The token shared by every probe run under this context
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Check if the caller asked to stop
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel every probe run under this context.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run a probe future under this context's deadline and cancellation.
    ///
    /// Dropping the future on timeout/cancellation also drops any child
    /// process it spawned.
    pub async fn run<T, F>(&self, probe: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::ProbeCancelled {
                probe: probe.to_string(),
            });
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::ProbeCancelled {
                probe: probe.to_string(),
            }),
            result = tokio::time::timeout(self.timeout, fut) => match result {
                Ok(inner) => inner,
                Err(_) => Err(Error::probe_timeout(probe, self.timeout)),
            },
        }
    }
}

impl Default for ProbeContext {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

// =============================================================================
// Value Objects
// =============================================================================

/// Normalized `KEY=value` property set of one device.
pub type PropertySet = BTreeMap<String, String>;

/// One node of the enumerator's device tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    /// Kernel name (e.g., sda)
    pub name: String,
    /// Device node (e.g., /dev/sda)
    pub path: String,
    /// Device class as reported by the tool (disk, part, loop, rom, lvm...)
    pub device_type: String,
    /// Kernel major number
    pub major: Option<u32>,
    /// Kernel minor number
    pub minor: Option<u32>,
    pub size_bytes: u64,
    pub rotational: Option<bool>,
    pub transport: Option<String>,
    pub model: Option<String>,
    pub vendor: Option<String>,
    pub fs_type: Option<String>,
    /// Non-empty mount points of this node
    pub mountpoints: Vec<String>,
    pub children: Vec<BlockDevice>,
}

impl BlockDevice {
    /// Create a node of the given class.
    pub fn new(path: impl Into<String>, device_type: impl Into<String>) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        Self {
            name,
            path,
            device_type: device_type.into(),
            ..Default::default()
        }
    }

    /// Set the kernel device number.
    pub fn with_dev_num(mut self, major: u32, minor: u32) -> Self {
        self.major = Some(major);
        self.minor = Some(minor);
        self
    }

    /// Add a mount point.
    pub fn with_mountpoint(mut self, mountpoint: impl Into<String>) -> Self {
        self.mountpoints.push(mountpoint.into());
        self
    }

    /// Add a child node.
    pub fn with_child(mut self, child: BlockDevice) -> Self {
        self.children.push(child);
        self
    }

    /// Check whether this node itself has a non-blank mount point
    pub fn is_mounted(&self) -> bool {
        self.mountpoints.iter().any(|m| !m.trim().is_empty())
    }

    /// Check whether any descendant of this node is mounted
    pub fn has_mounted_descendant(&self) -> bool {
        self.children
            .iter()
            .any(|c| c.is_mounted() || c.has_mounted_descendant())
    }
}

/// Result of a SMART information probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmartReport {
    /// Device supports SMART
    pub available: bool,
    /// SMART is switched on
    pub enabled: bool,
    /// Technology reported by the probe, if it knows
    pub disk_type: Option<DiskType>,
    /// Overall health self-assessment, if reported
    pub passed: Option<bool>,
    /// Raw probe payload
    pub raw: serde_json::Value,
}

/// Node of a storage pool's redundancy tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VdevNode {
    /// Device path for leaves, group name otherwise (mirror-0, raidz1-0, logs...)
    pub name: String,
    /// Health token as reported (ONLINE, DEGRADED...)
    pub state: Option<String>,
    pub children: Vec<VdevNode>,
}

impl VdevNode {
    /// Create a node with a reported health token.
    pub fn new(name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Some(state.into()),
            children: Vec::new(),
        }
    }

    /// Create a section node that carries no state (logs, cache, spares...).
    pub fn section(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: None,
            children: Vec::new(),
        }
    }

    /// Add a child node.
    pub fn with_child(mut self, child: VdevNode) -> Self {
        self.children.push(child);
        self
    }

    /// Check if this node has no children
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Pool name → root of that pool's device tree.
pub type PoolStatusMap = BTreeMap<String, VdevNode>;

/// Where the engine is running.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub virtualized: bool,
    /// Hypervisor tag (kvm, amazon, microsoft, ...)
    pub hypervisor: Option<String>,
    /// Cloud provider tag (aws, gcp, azure, ...)
    pub cloud_provider: Option<String>,
}

impl Environment {
    /// Bare metal, no cloud.
    pub fn bare_metal() -> Self {
        Self::default()
    }

    /// A virtual machine with the given hypervisor tag.
    pub fn virtualized(hypervisor: impl Into<String>) -> Self {
        Self {
            virtualized: true,
            hypervisor: Some(hypervisor.into()),
            cloud_provider: None,
        }
    }

    /// Attach a cloud provider tag.
    pub fn with_cloud_provider(mut self, provider: impl Into<String>) -> Self {
        self.cloud_provider = Some(provider.into());
        self
    }
}

/// Captured result of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if terminated by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Check if the command exited with status 0
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// First non-empty stderr line, for error messages.
    pub fn error_summary(&self) -> String {
        let line = self
            .stderr
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("no error output");
        match self.status {
            Some(code) => format!("exit status {}: {}", code, line),
            None => format!("terminated by signal: {}", line),
        }
    }
}

// =============================================================================
// Command Execution Port
// =============================================================================

/// Port for running external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, bounded by `ctx`.
    ///
    /// A non-zero exit status is not an error at this level; callers decide
    /// how to interpret it.
    async fn run(&self, program: &str, args: &[&str], ctx: &ProbeContext) -> Result<CommandOutput>;
}

/// Port for checking whether a probe's binary is installed.
pub trait ToolLocator: Send + Sync {
    fn tool_available(&self, name: &str) -> bool;
}

// =============================================================================
// Probe Ports
// =============================================================================

/// Port for listing the host's block devices.
#[async_trait]
pub trait BlockDeviceSource: Send + Sync {
    /// Binary this source depends on, if any.
    fn required_tool(&self) -> Option<&str> {
        None
    }

    /// List top-level devices with their children.
    ///
    /// `scope` restricts the listing to one device node.
    async fn enumerate_block_devices(
        &self,
        scope: Option<&str>,
        ctx: &ProbeContext,
    ) -> Result<Vec<BlockDevice>>;
}

/// Port for querying udev-style device properties.
#[async_trait]
pub trait DevicePropertySource: Send + Sync {
    fn required_tool(&self) -> Option<&str> {
        None
    }

    async fn query_device_properties(&self, path: &str, ctx: &ProbeContext)
        -> Result<PropertySet>;
}

/// Port for SMART diagnostics.
#[async_trait]
pub trait SmartProbe: Send + Sync {
    fn required_tool(&self) -> Option<&str> {
        None
    }

    /// Query SMART support, enablement and device technology.
    async fn probe_smart_info(&self, path: &str, ctx: &ProbeContext) -> Result<SmartReport>;

    /// Query whether the device can run SMART self-tests.
    async fn probe_self_test_capability(&self, path: &str, ctx: &ProbeContext) -> Result<bool>;
}

/// Port for storage pool status.
#[async_trait]
pub trait PoolStatusSource: Send + Sync {
    fn required_tool(&self) -> Option<&str> {
        None
    }

    async fn query_pool_status(&self, ctx: &ProbeContext) -> Result<PoolStatusMap>;
}

/// Port for virtualization / cloud detection.
#[async_trait]
pub trait EnvironmentDetector: Send + Sync {
    fn required_tool(&self) -> Option<&str> {
        None
    }

    async fn detect_environment(&self, ctx: &ProbeContext) -> Result<Environment>;
}

// =============================================================================
// Event Publisher Port
// =============================================================================

use super::events::DiscoveryEvent;

/// Port for publishing discovery events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a discovery event.
    async fn publish(&self, event: DiscoveryEvent) -> Result<()>;

    /// Publish multiple events.
    async fn publish_all(&self, events: Vec<DiscoveryEvent>) -> Result<()>;
}

// =============================================================================
// Tests
// =============================================================================
