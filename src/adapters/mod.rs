//! Infrastructure Adapters
//!
//! Implementations of the domain ports, following the Port/Adapter
//! (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │  BlockDeviceSource │ DevicePropertySource │ SmartProbe     │ │
//! │  │  PoolStatusSource │ EnvironmentDetector │ EventPublisher   │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ LsblkEnumerator │ UdevadmPropertySource │ SmartctlProbe    │ │
//! │  │ ZpoolStatusProbe │ SystemEnvironmentDetector               │ │
//! │  │ SystemCommandRunner │ PathToolLocator │ InMemoryProbes     │ │
//! │  │ LoggingEventPublisher │ InMemoryEventCollector             │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use disk_inventory::adapters::system_probes;
//! use disk_inventory::{DiscoveryConfig, DiscoveryEngine};
//!
//! let config = DiscoveryConfig::default();
//! let engine = DiscoveryEngine::new(config.clone(), system_probes(&config));
//! let disks = engine.discover_all(&engine.probe_context()).await?;
//! ```

pub mod command;
pub mod environment;
pub mod lsblk;
pub mod memory;
pub mod smartctl;
pub mod udevadm;
pub mod zpool;

mod event_publisher;

use std::sync::Arc;

use crate::config::DiscoveryConfig;
use crate::domain::ports::CommandRunner;
use crate::hardware::engine::ProbeSet;

pub use command::{PathToolLocator, SystemCommandRunner};
pub use environment::SystemEnvironmentDetector;
pub use event_publisher::{CompositeEventPublisher, InMemoryEventCollector, LoggingEventPublisher};
pub use lsblk::LsblkEnumerator;
pub use memory::{FailurePoint, InMemoryProbes};
pub use smartctl::SmartctlProbe;
pub use udevadm::UdevadmPropertySource;
pub use zpool::ZpoolStatusProbe;

/// Probes backed by the host's command-line tools.
pub fn system_probes(config: &DiscoveryConfig) -> ProbeSet {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner::new());
    let tools = &config.tools;

    ProbeSet {
        block_devices: Arc::new(LsblkEnumerator::new(runner.clone(), &tools.lsblk)),
        properties: Arc::new(UdevadmPropertySource::new(runner.clone(), &tools.udevadm)),
        smart: Arc::new(SmartctlProbe::new(runner.clone(), &tools.smartctl)),
        pools: Arc::new(ZpoolStatusProbe::new(runner.clone(), &tools.zpool)),
        environment: Arc::new(SystemEnvironmentDetector::new(runner, &tools.detect_virt)),
        tools: Arc::new(PathToolLocator::new()),
    }
}
