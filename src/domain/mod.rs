//! Domain Layer
//!
//! Ports the discovery engine depends on and the events it emits.
//!
//! - **Ports** (`ports.rs`) - Trait abstractions for every external probe
//! - **Events** (`events.rs`) - Discovery events for audit and decoupling
//!
//! # Usage
//!
//! ```ignore
//! use disk_inventory::domain::ports::{DevicePropertySource, ProbeContext};
//!
//! async fn serial_of<P: DevicePropertySource>(probe: &P, path: &str) -> Result<Option<String>> {
//!     let ctx = ProbeContext::default();
//!     let props = probe.query_device_properties(path, &ctx).await?;
//!     Ok(props.get("ID_SERIAL_SHORT").cloned())
//! }
//! ```

pub mod events;
pub mod ports;

pub use events::DiscoveryEvent;
pub use ports::{
    BlockDevice, BlockDeviceSource, CommandOutput, CommandRunner, DevicePropertySource,
    Environment, EnvironmentDetector, EventPublisher, PoolStatusMap, PoolStatusSource,
    ProbeContext, PropertySet, SmartProbe, SmartReport, ToolLocator, VdevNode,
};
