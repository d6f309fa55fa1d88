//! In-Memory Probes
//!
//! Implements every probe port from fixtures so the discovery pipeline can
//! run without touching the host. Failures, missing tools and slow probes
//! can be injected per probe; call counters show which probes ran.
//!
//! ```ignore
//! let probes = Arc::new(
//!     InMemoryProbes::new()
//!         .with_device(BlockDevice::new("/dev/sda", "disk").with_dev_num(8, 0))
//!         .with_properties("/dev/sda", [("ID_SERIAL_SHORT", "ABC123")])
//!         .failing(FailurePoint::Pools),
//! );
//! let engine = DiscoveryEngine::new(DiscoveryConfig::default(), ProbeSet::from_shared(probes));
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::ports::{
    BlockDevice, BlockDeviceSource, DevicePropertySource, Environment, EnvironmentDetector,
    PoolStatusMap, PoolStatusSource, ProbeContext, PropertySet, SmartProbe, SmartReport,
    ToolLocator, VdevNode,
};
use crate::error::{Error, Result};

/// A probe call, for injecting failures and delays
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    Enumerate,
    Properties(String),
    SmartInfo(String),
    SelfTest(String),
    Pools,
    Environment,
}

/// Number of calls made to each probe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeCallCounts {
    pub enumerate: usize,
    pub properties: usize,
    pub smart_info: usize,
    pub self_test: usize,
    pub pools: usize,
    pub environment: usize,
}

#[derive(Debug, Default)]
struct Fixtures {
    devices: Vec<BlockDevice>,
    properties: HashMap<String, PropertySet>,
    smart: HashMap<String, SmartReport>,
    self_test: HashMap<String, bool>,
    pools: PoolStatusMap,
    environment: Environment,
    failures: HashSet<FailurePoint>,
    missing_tools: HashSet<String>,
    delay: Option<Duration>,
    slow: HashMap<FailurePoint, Duration>,
}

#[derive(Debug, Default)]
struct Counters {
    enumerate: AtomicUsize,
    properties: AtomicUsize,
    smart_info: AtomicUsize,
    self_test: AtomicUsize,
    pools: AtomicUsize,
    environment: AtomicUsize,
}

/// Fixture-backed implementation of every probe port
#[derive(Debug, Default)]
pub struct InMemoryProbes {
    fixtures: RwLock<Fixtures>,
    counters: Counters,
}

impl InMemoryProbes {
    /// Tool names reported by `required_tool()`
    pub const LSBLK: &'static str = "lsblk";
    pub const UDEVADM: &'static str = "udevadm";
    pub const SMARTCTL: &'static str = "smartctl";
    pub const ZPOOL: &'static str = "zpool";
    pub const DETECT_VIRT: &'static str = "systemd-detect-virt";

    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Builders
    // =========================================================================

    pub fn with_device(self, device: BlockDevice) -> Self {
        self.fixtures.write().devices.push(device);
        self
    }

    pub fn with_properties<I, K, V>(self, path: &str, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let set: PropertySet = properties
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.fixtures.write().properties.insert(path.to_string(), set);
        self
    }

    pub fn with_smart(self, path: &str, report: SmartReport) -> Self {
        self.fixtures.write().smart.insert(path.to_string(), report);
        self
    }

    pub fn with_self_test(self, path: &str, supported: bool) -> Self {
        self.fixtures.write().self_test.insert(path.to_string(), supported);
        self
    }

    pub fn with_pool(self, name: &str, root: VdevNode) -> Self {
        self.fixtures.write().pools.insert(name.to_string(), root);
        self
    }

    pub fn with_environment(self, environment: Environment) -> Self {
        self.fixtures.write().environment = environment;
        self
    }

    pub fn failing(self, point: FailurePoint) -> Self {
        self.fixtures.write().failures.insert(point);
        self
    }

    pub fn without_tool(self, tool: &str) -> Self {
        self.fixtures.write().missing_tools.insert(tool.to_string());
        self
    }

    /// Delay every probe response.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.fixtures.write().delay = Some(delay);
        self
    }

    /// Delay one probe only, overriding `with_delay`.
    pub fn slow_on(self, point: FailurePoint, delay: Duration) -> Self {
        self.fixtures.write().slow.insert(point, delay);
        self
    }

    // =========================================================================
    // Runtime Changes
    // =========================================================================

    /// Drop a top-level device, as if it was unplugged.
    pub fn remove_device(&self, path: &str) {
        self.fixtures.write().devices.retain(|d| d.path != path);
    }

    /// Replace the properties of a device.
    pub fn set_properties(&self, path: &str, properties: PropertySet) {
        self.fixtures.write().properties.insert(path.to_string(), properties);
    }

    /// Replace a pool's tree.
    pub fn set_pool(&self, name: &str, root: VdevNode) {
        self.fixtures.write().pools.insert(name.to_string(), root);
    }

    pub fn set_failure(&self, point: FailurePoint, failing: bool) {
        let mut fixtures = self.fixtures.write();
        if failing {
            fixtures.failures.insert(point);
        } else {
            fixtures.failures.remove(&point);
        }
    }

    pub fn calls(&self) -> ProbeCallCounts {
        let c = &self.counters;
        ProbeCallCounts {
            enumerate: c.enumerate.load(Ordering::SeqCst),
            properties: c.properties.load(Ordering::SeqCst),
            smart_info: c.smart_info.load(Ordering::SeqCst),
            self_test: c.self_test.load(Ordering::SeqCst),
            pools: c.pools.load(Ordering::SeqCst),
            environment: c.environment.load(Ordering::SeqCst),
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn respond(&self, counter: &AtomicUsize, probe: &str, point: FailurePoint) -> Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);

        let (delay, failing) = {
            let fixtures = self.fixtures.read();
            let delay = fixtures.slow.get(&point).copied().or(fixtures.delay);
            (delay, fixtures.failures.contains(&point))
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if failing {
            return Err(Error::probe_failed(probe, "injected failure"));
        }
        Ok(())
    }
}

impl ToolLocator for InMemoryProbes {
    fn tool_available(&self, name: &str) -> bool {
        !self.fixtures.read().missing_tools.contains(name)
    }
}

#[async_trait]
impl BlockDeviceSource for InMemoryProbes {
    fn required_tool(&self) -> Option<&str> {
        Some(Self::LSBLK)
    }

    async fn enumerate_block_devices(
        &self,
        scope: Option<&str>,
        _ctx: &ProbeContext,
    ) -> Result<Vec<BlockDevice>> {
        self.respond(&self.counters.enumerate, Self::LSBLK, FailurePoint::Enumerate)
            .await?;

        let fixtures = self.fixtures.read();
        Ok(fixtures
            .devices
            .iter()
            .filter(|d| scope.map_or(true, |s| d.path == s))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DevicePropertySource for InMemoryProbes {
    fn required_tool(&self) -> Option<&str> {
        Some(Self::UDEVADM)
    }

    async fn query_device_properties(&self, path: &str, _ctx: &ProbeContext) -> Result<PropertySet> {
        self.respond(
            &self.counters.properties,
            Self::UDEVADM,
            FailurePoint::Properties(path.to_string()),
        )
        .await?;

        self.fixtures
            .read()
            .properties
            .get(path)
            .cloned()
            .ok_or_else(|| Error::probe_failed(Self::UDEVADM, format!("unknown device {}", path)))
    }
}

#[async_trait]
impl SmartProbe for InMemoryProbes {
    fn required_tool(&self) -> Option<&str> {
        Some(Self::SMARTCTL)
    }

    async fn probe_smart_info(&self, path: &str, _ctx: &ProbeContext) -> Result<SmartReport> {
        self.respond(
            &self.counters.smart_info,
            Self::SMARTCTL,
            FailurePoint::SmartInfo(path.to_string()),
        )
        .await?;

        self.fixtures
            .read()
            .smart
            .get(path)
            .cloned()
            .ok_or_else(|| Error::probe_failed(Self::SMARTCTL, format!("{}: No such device", path)))
    }

    async fn probe_self_test_capability(&self, path: &str, _ctx: &ProbeContext) -> Result<bool> {
        self.respond(
            &self.counters.self_test,
            Self::SMARTCTL,
            FailurePoint::SelfTest(path.to_string()),
        )
        .await?;

        Ok(self.fixtures.read().self_test.get(path).copied().unwrap_or(false))
    }
}

#[async_trait]
impl PoolStatusSource for InMemoryProbes {
    fn required_tool(&self) -> Option<&str> {
        Some(Self::ZPOOL)
    }

    async fn query_pool_status(&self, _ctx: &ProbeContext) -> Result<PoolStatusMap> {
        self.respond(&self.counters.pools, Self::ZPOOL, FailurePoint::Pools)
            .await?;
        Ok(self.fixtures.read().pools.clone())
    }
}

#[async_trait]
impl EnvironmentDetector for InMemoryProbes {
    fn required_tool(&self) -> Option<&str> {
        Some(Self::DETECT_VIRT)
    }

    async fn detect_environment(&self, _ctx: &ProbeContext) -> Result<Environment> {
        self.respond(
            &self.counters.environment,
            Self::DETECT_VIRT,
            FailurePoint::Environment,
        )
        .await?;
        Ok(self.fixtures.read().environment.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_scoped_enumeration() {
        let probes = InMemoryProbes::new()
            .with_device(BlockDevice::new("/dev/sda", "disk"))
            .with_device(BlockDevice::new("/dev/sdb", "disk"));
        let ctx = ProbeContext::default();

        assert_eq!(probes.enumerate_block_devices(None, &ctx).await.unwrap().len(), 2);
        let scoped = probes.enumerate_block_devices(Some("/dev/sdb"), &ctx).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].path, "/dev/sdb");
        assert_eq!(probes.calls().enumerate, 2);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let probes = InMemoryProbes::new()
            .with_properties("/dev/sda", [("ID_SERIAL_SHORT", "A")])
            .failing(FailurePoint::Properties("/dev/sda".into()));
        let ctx = ProbeContext::default();

        assert_matches!(
            probes.query_device_properties("/dev/sda", &ctx).await,
            Err(Error::ProbeFailed { .. })
        );

        probes.set_failure(FailurePoint::Properties("/dev/sda".into()), false);
        assert_eq!(
            probes.query_device_properties("/dev/sda", &ctx).await.unwrap()["ID_SERIAL_SHORT"],
            "A"
        );
        assert_eq!(probes.calls().properties, 2);
    }

    #[test]
    fn test_missing_tools() {
        let probes = InMemoryProbes::new().without_tool(InMemoryProbes::SMARTCTL);
        assert!(!probes.tool_available("smartctl"));
        assert!(probes.tool_available("lsblk"));
    }
}
