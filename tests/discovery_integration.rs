//! Disk Discovery Integration Tests
//!
//! Runs the full pipeline against in-memory probes:
//! - Identity, system usage, SMART and pool stages end to end
//! - Partial failures and skipped stages
//! - Single-device refresh and eviction
//! - Timeouts, cancellation and concurrency
//! - Events and metrics

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;

use disk_inventory::adapters::{FailurePoint, InMemoryEventCollector, InMemoryProbes};
use disk_inventory::domain::ports::{BlockDevice, Environment, SmartReport, VdevNode};
use disk_inventory::hardware::{
    DeviceIdSource, DiskHealth, DiskType, SkipReason, Stage, StageOutcome,
};
use disk_inventory::{
    DiscoveryConfig, DiscoveryEngine, DiscoveryEvent, DiscoveryMetrics, DiskState, Error,
    ProbeContext, ProbeSet,
};

// =============================================================================
// Fixtures
// =============================================================================

fn sata(path: &str, minor: u32) -> BlockDevice {
    let mut device = BlockDevice::new(path, "disk").with_dev_num(8, minor);
    device.size_bytes = 500_107_862_016;
    device.rotational = Some(false);
    device.transport = Some("sata".to_string());
    device
}

fn healthy_smart() -> SmartReport {
    SmartReport {
        available: true,
        enabled: true,
        disk_type: Some(DiskType::Ssd),
        passed: Some(true),
        raw: json!({"smart_status": {"passed": true}}),
    }
}

fn build(probes: InMemoryProbes) -> (DiscoveryEngine, Arc<InMemoryProbes>) {
    build_with(probes, DiscoveryConfig::default())
}

fn build_with(probes: InMemoryProbes, config: DiscoveryConfig) -> (DiscoveryEngine, Arc<InMemoryProbes>) {
    let probes = Arc::new(probes);
    let engine = DiscoveryEngine::new(config, ProbeSet::from_shared(probes.clone()));
    (engine, probes)
}

fn ctx() -> ProbeContext {
    ProbeContext::new(Duration::from_secs(5))
}

// =============================================================================
// Pipeline
// =============================================================================

mod pipeline_tests {
    use super::*;

    #[tokio::test]
    async fn test_single_healthy_disk() {
        let (engine, _) = build(
            InMemoryProbes::new()
                .with_device(sata("/dev/sda", 0))
                .with_properties(
                    "/dev/sda",
                    [
                        ("ID_SERIAL_SHORT", "ABC123"),
                        ("ID_MODEL", "Samsung_SSD_860"),
                        ("DEVLINKS", "/dev/disk/by-id/ata-Samsung_SSD_860_ABC123 /dev/disk/by-path/pci-0000:00:17.0-ata-1"),
                    ],
                )
                .with_smart("/dev/sda", healthy_smart())
                .with_self_test("/dev/sda", true),
        );

        let disks = engine.discover_all(&ctx()).await.unwrap();

        assert_eq!(disks.len(), 1);
        let disk = &disks[0];
        assert_eq!(disk.device_id, "ABC123");
        assert_eq!(disk.device_id_source, DeviceIdSource::Serial);
        assert_eq!(disk.model.as_deref(), Some("Samsung_SSD_860"));
        assert_eq!(disk.device_links.len(), 2);
        assert_eq!(disk.disk_type, DiskType::Ssd);
        assert_eq!(disk.state, DiskState::Available);
        assert_eq!(disk.health, DiskHealth::Passed);
        assert!(disk.smart_available && disk.smart_enabled && disk.smart_tests_supported);
        assert!(disk.smart_info.is_some());
        assert!(disk.pool_name.is_none());

        assert_eq!(engine.cached_devices().len(), 1);
        assert!(engine.last_scan_time().is_some());
    }

    #[tokio::test]
    async fn test_identity_failure_falls_back_to_path() {
        let (engine, probes) = build(
            InMemoryProbes::new()
                .with_device(sata("/dev/sda", 0))
                .with_smart("/dev/sda", healthy_smart())
                .with_pool(
                    "tank",
                    VdevNode::new("tank", "ONLINE").with_child(VdevNode::new("/dev/sda1", "ONLINE")),
                )
                .failing(FailurePoint::Properties("/dev/sda".into())),
        );

        let report = engine.scan(&ctx()).await.unwrap();
        let disk = &report.disks[0];

        assert_eq!(disk.device_id, "/dev/sda");
        assert_eq!(disk.device_id_source, DeviceIdSource::Path);
        assert_matches!(report.outcome(Stage::Identity, "/dev/sda"), Some(StageOutcome::Failed(_)));

        // Later stages still ran
        assert_eq!(probes.calls().smart_info, 1);
        assert!(disk.smart_available);
        assert_eq!(disk.pool_name.as_deref(), Some("tank"));
        assert_eq!(disk.state, DiskState::Online);
    }

    #[tokio::test]
    async fn test_partial_smart_failure() {
        let (engine, _) = build(
            InMemoryProbes::new()
                .with_device(sata("/dev/sda", 0))
                .with_device(sata("/dev/sdb", 16))
                .with_properties("/dev/sda", [("ID_SERIAL_SHORT", "A")])
                .with_properties("/dev/sdb", [("ID_SERIAL_SHORT", "B")])
                .with_smart("/dev/sda", healthy_smart())
                .with_smart("/dev/sdb", healthy_smart())
                .failing(FailurePoint::SmartInfo("/dev/sdb".into())),
        );

        let report = engine.scan(&ctx()).await.unwrap();

        let a = report.disk("/dev/sda").unwrap();
        let b = report.disk("/dev/sdb").unwrap();
        assert!(a.smart_available);
        assert_eq!(a.health, DiskHealth::Passed);
        assert!(!b.smart_available && !b.smart_enabled && !b.smart_tests_supported);
        assert!(b.smart_info.is_none());
        assert_eq!(b.health, DiskHealth::Unknown);
        assert_eq!(b.device_id, "B");

        assert_eq!(report.degraded().count(), 1);
        assert_matches!(report.outcome(Stage::Smart, "/dev/sdb"), Some(StageOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_identity_failure_is_per_disk() {
        let (engine, probes) = build(
            InMemoryProbes::new()
                .with_device(sata("/dev/sda", 0))
                .with_device(sata("/dev/sdb", 16))
                .with_properties(
                    "/dev/sda",
                    [
                        ("ID_SERIAL_SHORT", "S1A"),
                        ("DEVLINKS", "/dev/disk/by-id/ata-Disk_S1A"),
                    ],
                )
                .with_properties("/dev/sdb", [("ID_SERIAL_SHORT", "S1B")])
                .failing(FailurePoint::Properties("/dev/sdb".into())),
        );

        let report = engine.scan(&ctx()).await.unwrap();

        let a = report.disk("/dev/sda").unwrap();
        assert_eq!(a.device_id, "S1A");
        assert_eq!(a.device_id_source, DeviceIdSource::Serial);
        assert_eq!(report.outcome(Stage::Identity, "/dev/sda"), Some(&StageOutcome::Applied));

        let b = report.disk("/dev/sdb").unwrap();
        assert_eq!(b.device_id, "/dev/sdb");
        assert_eq!(b.device_id_source, DeviceIdSource::Path);
        assert!(b.serial.is_none());
        assert_matches!(report.outcome(Stage::Identity, "/dev/sdb"), Some(StageOutcome::Failed(_)));

        assert_eq!(probes.calls().properties, 2);
        assert_eq!(engine.cached_devices().len(), 2);
    }

    #[tokio::test]
    async fn test_mounted_partition_marks_system_disk() {
        let root_disk = sata("/dev/sda", 0)
            .with_child(BlockDevice::new("/dev/sda1", "part").with_mountpoint("/boot/efi"))
            .with_child(BlockDevice::new("/dev/sda2", "part").with_mountpoint("/"));
        let (engine, _) = build(
            InMemoryProbes::new()
                .with_device(root_disk)
                .with_device(sata("/dev/sdb", 16))
                .with_properties("/dev/sda", [("ID_SERIAL_SHORT", "ROOT")])
                .with_properties("/dev/sdb", [("ID_SERIAL_SHORT", "DATA")]),
        );

        let report = engine.scan(&ctx()).await.unwrap();

        assert_eq!(report.disk("/dev/sda").unwrap().state, DiskState::System);
        assert_eq!(report.disk("/dev/sdb").unwrap().state, DiskState::Available);
        assert_eq!(
            report.outcome(Stage::SystemUsage, "/dev/sda"),
            Some(&StageOutcome::Applied)
        );
    }

    #[tokio::test]
    async fn test_non_disks_are_excluded() {
        let (engine, probes) = build(
            InMemoryProbes::new()
                .with_device(sata("/dev/sda", 0))
                .with_device(BlockDevice::new("/dev/loop0", "loop").with_dev_num(7, 0))
                .with_device(BlockDevice::new("/dev/sr0", "disk").with_dev_num(11, 0))
                .with_device(BlockDevice::new("/dev/dm-0", "lvm").with_dev_num(253, 0))
                .with_properties("/dev/sda", [("ID_SERIAL_SHORT", "A")]),
        );

        let disks = engine.discover_all(&ctx()).await.unwrap();

        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].device_path, "/dev/sda");
        assert_eq!(probes.calls().properties, 1);
    }

    #[tokio::test]
    async fn test_empty_host() {
        let (engine, _) = build(InMemoryProbes::new());

        let report = engine.scan(&ctx()).await.unwrap();

        assert!(report.disks.is_empty());
        assert!(engine.cache().is_empty());
        assert!(engine.last_scan_time().is_some());
    }
}

// =============================================================================
// Pool Membership
// =============================================================================

mod pool_tests {
    use super::*;

    #[tokio::test]
    async fn test_degraded_pool_overrides_system() {
        let root_disk = sata("/dev/sda", 0)
            .with_child(BlockDevice::new("/dev/sda1", "part").with_mountpoint("/"));
        let (engine, _) = build(
            InMemoryProbes::new()
                .with_device(root_disk)
                .with_properties("/dev/sda", [("ID_SERIAL_SHORT", "A")])
                .with_pool(
                    "rpool",
                    VdevNode::new("rpool", "DEGRADED").with_child(
                        VdevNode::new("mirror-0", "DEGRADED")
                            .with_child(VdevNode::new("/dev/sda1", "DEGRADED"))
                            .with_child(VdevNode::new("/dev/sdz1", "UNAVAIL")),
                    ),
                ),
        );

        let disk = engine.discover_all(&ctx()).await.unwrap().remove(0);

        assert_eq!(disk.state, DiskState::Degraded);
        assert_eq!(disk.pool_name.as_deref(), Some("rpool"));
    }

    #[tokio::test]
    async fn test_member_matched_through_by_id_link() {
        let (engine, _) = build(
            InMemoryProbes::new()
                .with_device(sata("/dev/sdb", 16))
                .with_properties(
                    "/dev/sdb",
                    [
                        ("ID_SERIAL_SHORT", "WD-1"),
                        ("DEVLINKS", "/dev/disk/by-id/ata-WDC_WD40_WD-1"),
                    ],
                )
                .with_pool(
                    "tank",
                    VdevNode::new("tank", "ONLINE").with_child(
                        VdevNode::new("raidz1-0", "ONLINE")
                            .with_child(VdevNode::new("/dev/disk/by-id/ata-WDC_WD40_WD-1-part1", "FAULTED")),
                    ),
                ),
        );

        let disk = engine.discover_all(&ctx()).await.unwrap().remove(0);

        assert_eq!(disk.state, DiskState::Faulted);
        assert_eq!(disk.pool_name.as_deref(), Some("tank"));
    }

    #[tokio::test]
    async fn test_similar_names_do_not_match() {
        let (engine, _) = build(
            InMemoryProbes::new()
                .with_device(sata("/dev/sda", 0))
                .with_properties("/dev/sda", [("ID_SERIAL_SHORT", "A")])
                .with_pool(
                    "tank",
                    VdevNode::new("tank", "ONLINE").with_child(VdevNode::new("/dev/sdaa", "ONLINE")),
                ),
        );

        let disk = engine.discover_all(&ctx()).await.unwrap().remove(0);

        assert_eq!(disk.state, DiskState::Available);
        assert!(disk.pool_name.is_none());
    }

    #[tokio::test]
    async fn test_pool_probe_failure_keeps_states() {
        let (engine, _) = build(
            InMemoryProbes::new()
                .with_device(sata("/dev/sda", 0))
                .with_properties("/dev/sda", [("ID_SERIAL_SHORT", "A")])
                .failing(FailurePoint::Pools),
        );

        let report = engine.scan(&ctx()).await.unwrap();

        assert_eq!(report.disks[0].state, DiskState::Available);
        assert_matches!(report.scan_outcome(Stage::PoolMembership), Some(StageOutcome::Failed(_)));
    }
}

// =============================================================================
// SMART and Environment
// =============================================================================

mod smart_tests {
    use super::*;

    #[tokio::test]
    async fn test_cloud_platform_skips_smart() {
        let (engine, probes) = build(
            InMemoryProbes::new()
                .with_device(sata("/dev/nvme1n1", 0))
                .with_properties("/dev/nvme1n1", [("ID_SERIAL_SHORT", "vol0abc")])
                .with_smart("/dev/nvme1n1", healthy_smart())
                .with_environment(Environment::virtualized("amazon").with_cloud_provider("aws")),
        );

        let report = engine.scan(&ctx()).await.unwrap();
        let disk = &report.disks[0];

        assert_eq!(probes.calls().smart_info, 0);
        assert!(!disk.smart_available && !disk.smart_enabled);
        assert!(disk.smart_info.is_none());
        assert_matches!(
            report.outcome(Stage::Smart, "/dev/nvme1n1"),
            Some(StageOutcome::Skipped(SkipReason::CloudPlatform(p))) if p == "amazon"
        );
        assert!(report.environment.virtualized);
    }

    #[tokio::test]
    async fn test_udev_cloud_model_skips_smart() {
        let mut device = sata("/dev/xvdf", 80);
        device.model = Some("Amazon Elastic Block Store".to_string());
        let (engine, probes) = build(
            InMemoryProbes::new()
                .with_device(device)
                .with_properties(
                    "/dev/xvdf",
                    [("ID_SERIAL_SHORT", "vol0def"), ("ID_MODEL", "Amazon_Elastic_Block_Store")],
                )
                .with_smart("/dev/xvdf", healthy_smart())
                .with_environment(Environment::virtualized("xen")),
        );

        let report = engine.scan(&ctx()).await.unwrap();
        let disk = &report.disks[0];

        assert_eq!(disk.model.as_deref(), Some("Amazon_Elastic_Block_Store"));
        assert_eq!(probes.calls().smart_info, 0);
        assert!(!disk.smart_available && !disk.smart_enabled && !disk.smart_tests_supported);
        assert_matches!(
            report.outcome(Stage::Smart, "/dev/xvdf"),
            Some(StageOutcome::Skipped(SkipReason::CloudPlatform(p))) if p == "Amazon Elastic Block Store"
        );
    }

    #[tokio::test]
    async fn test_self_test_failure_keeps_smart_available() {
        let (engine, probes) = build(
            InMemoryProbes::new()
                .with_device(sata("/dev/sda", 0))
                .with_properties("/dev/sda", [("ID_SERIAL_SHORT", "A")])
                .with_smart("/dev/sda", healthy_smart())
                .with_self_test("/dev/sda", true)
                .failing(FailurePoint::SelfTest("/dev/sda".into())),
        );

        let report = engine.scan(&ctx()).await.unwrap();
        let disk = &report.disks[0];

        assert_eq!(probes.calls().self_test, 1);
        assert!(disk.smart_available && disk.smart_enabled);
        assert!(!disk.smart_tests_supported);
        assert_eq!(disk.health, DiskHealth::Passed);
        assert_eq!(report.outcome(Stage::Smart, "/dev/sda"), Some(&StageOutcome::Applied));
    }

    #[tokio::test]
    async fn test_local_hypervisor_still_probes() {
        let (engine, probes) = build(
            InMemoryProbes::new()
                .with_device(sata("/dev/sda", 0))
                .with_properties("/dev/sda", [("ID_SERIAL_SHORT", "QM0001")])
                .with_smart("/dev/sda", healthy_smart())
                .with_environment(Environment::virtualized("kvm")),
        );

        engine.scan(&ctx()).await.unwrap();

        assert_eq!(probes.calls().smart_info, 1);
    }

    #[tokio::test]
    async fn test_environment_failure_assumes_bare_metal() {
        let (engine, probes) = build(
            InMemoryProbes::new()
                .with_device(sata("/dev/sda", 0))
                .with_properties("/dev/sda", [("ID_SERIAL_SHORT", "A")])
                .with_smart("/dev/sda", healthy_smart())
                .failing(FailurePoint::Environment),
        );

        let report = engine.scan(&ctx()).await.unwrap();

        assert!(!report.environment.virtualized);
        assert_eq!(probes.calls().smart_info, 1);
        assert_matches!(report.scan_outcome(Stage::Environment), Some(StageOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_missing_smartctl() {
        let (engine, probes) = build(
            InMemoryProbes::new()
                .with_device(sata("/dev/sda", 0))
                .with_properties("/dev/sda", [("ID_SERIAL_SHORT", "A")])
                .with_smart("/dev/sda", healthy_smart())
                .without_tool(InMemoryProbes::SMARTCTL),
        );

        let report = engine.scan(&ctx()).await.unwrap();

        assert_eq!(probes.calls().smart_info, 0);
        assert!(!report.disks[0].smart_available);
        assert_matches!(
            report.outcome(Stage::Smart, "/dev/sda"),
            Some(StageOutcome::Skipped(SkipReason::ToolUnavailable(_)))
        );
    }
}

// =============================================================================
// Refresh
// =============================================================================

mod refresh_tests {
    use super::*;
    use disk_inventory::domain::ports::PropertySet;

    fn two_disks() -> InMemoryProbes {
        InMemoryProbes::new()
            .with_device(sata("/dev/sda", 0))
            .with_device(sata("/dev/sdb", 16))
            .with_properties(
                "/dev/sda",
                [("ID_SERIAL_SHORT", "A"), ("DEVLINKS", "/dev/disk/by-id/ata-DISK_A")],
            )
            .with_properties("/dev/sdb", [("ID_SERIAL_SHORT", "B")])
    }

    #[tokio::test]
    async fn test_refresh_by_link_updates_one_entry() {
        let (engine, probes) = build(two_disks());
        let ctx = ctx();
        engine.scan(&ctx).await.unwrap();
        let scanned_at = engine.last_scan_time();

        let mut updated = PropertySet::new();
        updated.insert("ID_WWN".to_string(), "0x5000c500a1b2c3d4".to_string());
        updated.insert("DEVLINKS".to_string(), "/dev/disk/by-id/ata-DISK_A".to_string());
        probes.set_properties("/dev/sda", updated);

        let disk = engine.refresh_device(&ctx, "/dev/disk/by-id/ata-DISK_A").await.unwrap();

        assert_eq!(disk.device_path, "/dev/sda");
        assert_eq!(disk.device_id, "0x5000c500a1b2c3d4");
        assert_eq!(disk.device_id_source, DeviceIdSource::Wwn);
        assert_eq!(engine.cache().get("/dev/sda").unwrap().device_id, "0x5000c500a1b2c3d4");
        assert_eq!(engine.cache().get("/dev/sdb").unwrap().device_id, "B");
        assert_eq!(engine.last_scan_time(), scanned_at);
    }

    #[tokio::test]
    async fn test_refresh_evicts_vanished_device() {
        let events = Arc::new(InMemoryEventCollector::new());
        let probes = Arc::new(two_disks());
        let engine = DiscoveryEngine::new(DiscoveryConfig::default(), ProbeSet::from_shared(probes.clone()))
            .with_event_publisher(events.clone());
        let ctx = ctx();
        engine.scan(&ctx).await.unwrap();

        probes.remove_device("/dev/sdb");
        let result = engine.refresh_device(&ctx, "/dev/sdb").await;

        assert_matches!(result, Err(Error::DeviceNotFound { ref device, .. }) if device == "/dev/sdb");
        assert!(engine.cache().get("/dev/sdb").is_none());
        assert_eq!(engine.cache().len(), 1);
        assert_eq!(events.events_of_type("DeviceEvicted").len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_of_unknown_device() {
        let (engine, _) = build(two_disks());

        let result = engine.refresh_device(&ctx(), "/dev/sdq").await;

        assert_matches!(result, Err(Error::DeviceNotFound { .. }));
        assert!(engine.cache().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_enumeration_failure() {
        let (engine, probes) = build(two_disks());
        let ctx = ctx();
        engine.scan(&ctx).await.unwrap();

        probes.set_failure(FailurePoint::Enumerate, true);
        let result = engine.refresh_device(&ctx, "/dev/sda").await;

        assert_matches!(
            result,
            Err(Error::Discovery { operation: "enumerate", device: Some(ref d), .. }) if d == "/dev/sda"
        );
        assert_eq!(engine.cache().len(), 2);
    }
}

// =============================================================================
// Deadlines and Cancellation
// =============================================================================

mod interruption_tests {
    use super::*;

    #[tokio::test]
    async fn test_cancelled_before_scan() {
        let (engine, probes) = build(
            InMemoryProbes::new()
                .with_device(sata("/dev/sda", 0))
                .with_properties("/dev/sda", [("ID_SERIAL_SHORT", "A")]),
        );
        let ctx = ctx();
        ctx.cancel();

        let result = engine.scan(&ctx).await;

        assert_matches!(result, Err(ref e) if e.is_interrupted());
        assert_eq!(probes.calls().enumerate, 0);
        assert!(engine.last_scan_time().is_none());
    }

    #[tokio::test]
    async fn test_cancel_during_scan() {
        let (engine, _) = build(
            InMemoryProbes::new()
                .with_device(sata("/dev/sda", 0))
                .with_properties("/dev/sda", [("ID_SERIAL_SHORT", "A")])
                .with_delay(Duration::from_secs(10)),
        );
        let ctx = ctx();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let result = engine.scan(&ctx).await;

        assert_matches!(result, Err(ref e) if e.is_interrupted());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_enrichment_timeout_is_stage_local() {
        let (engine, _) = build(
            InMemoryProbes::new()
                .with_device(sata("/dev/sda", 0))
                .with_properties("/dev/sda", [("ID_SERIAL_SHORT", "A")])
                .with_smart("/dev/sda", healthy_smart())
                .slow_on(FailurePoint::SmartInfo("/dev/sda".into()), Duration::from_secs(10)),
        );

        let report = engine
            .scan(&ProbeContext::new(Duration::from_millis(100)))
            .await
            .unwrap();

        let disk = &report.disks[0];
        assert_eq!(disk.device_id, "A");
        assert!(!disk.smart_available);
        assert_matches!(
            report.outcome(Stage::Smart, "/dev/sda"),
            Some(StageOutcome::Failed(reason)) if reason.contains("timed out")
        );
        assert_eq!(engine.cached_devices().len(), 1);
    }
}

// =============================================================================
// Concurrency
// =============================================================================

mod concurrency_tests {
    use super::*;

    #[tokio::test]
    async fn test_parallel_probing_matches_sequential() {
        let fixtures = || {
            let mut probes = InMemoryProbes::new().with_delay(Duration::from_millis(2));
            for i in 0..8u32 {
                let path = format!("/dev/sd{}", (b'a' + i as u8) as char);
                probes = probes
                    .with_device(sata(&path, i * 16))
                    .with_properties(&path, [("ID_SERIAL_SHORT", format!("S{}", i))])
                    .with_smart(&path, healthy_smart());
            }
            probes
        };

        let (sequential, _) = build(fixtures());
        let (parallel, _) = build_with(
            fixtures(),
            DiscoveryConfig {
                probe_concurrency: 4,
                ..Default::default()
            },
        );

        let a = sequential.discover_all(&ctx()).await.unwrap();
        let b = parallel.discover_all(&ctx()).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(b.len(), 8);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_engine_futures_are_send() {
        let (engine, _) = build(InMemoryProbes::new());
        let ctx = ctx();

        assert_send(&engine.scan(&ctx));
        assert_send(&engine.discover_all(&ctx));
        assert_send(&engine.refresh_device(&ctx, "/dev/sda"));
    }

    #[tokio::test]
    async fn test_readers_during_scan() {
        let (engine, _) = build(
            InMemoryProbes::new()
                .with_device(sata("/dev/sda", 0))
                .with_properties("/dev/sda", [("ID_SERIAL_SHORT", "A")])
                .with_delay(Duration::from_millis(20)),
        );
        let engine = Arc::new(engine);
        engine.scan(&ctx()).await.unwrap();

        let scanner = engine.clone();
        let scan = tokio::spawn(async move { scanner.scan(&ctx()).await });

        for _ in 0..10 {
            assert_eq!(engine.cached_devices().len(), 1);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        scan.await.unwrap().unwrap();
    }
}

// =============================================================================
// Events and Metrics
// =============================================================================

mod observability_tests {
    use super::*;

    #[tokio::test]
    async fn test_scan_events() {
        let events = Arc::new(InMemoryEventCollector::new());
        let probes = Arc::new(
            InMemoryProbes::new()
                .with_device(sata("/dev/sda", 0))
                .with_properties("/dev/sda", [("ID_SERIAL_SHORT", "A")])
                .failing(FailurePoint::SmartInfo("/dev/sda".into())),
        );
        let engine = DiscoveryEngine::new(DiscoveryConfig::default(), ProbeSet::from_shared(probes))
            .with_event_publisher(events.clone());

        let report = engine.scan(&ctx()).await.unwrap();

        let types: Vec<_> = events
            .events_for_scan(report.scan_id)
            .iter()
            .map(|e| e.event_type())
            .collect();
        assert_eq!(types, vec!["ScanStarted", "StageDegraded", "ScanCompleted"]);

        assert_matches!(
            events.events_of_type("ScanCompleted").as_slice(),
            [DiscoveryEvent::ScanCompleted { disk_count: 1, degraded_stages: 1, .. }]
        );
    }

    #[tokio::test]
    async fn test_failed_scan_event() {
        let events = Arc::new(InMemoryEventCollector::new());
        let probes = Arc::new(InMemoryProbes::new().failing(FailurePoint::Enumerate));
        let engine = DiscoveryEngine::new(DiscoveryConfig::default(), ProbeSet::from_shared(probes))
            .with_event_publisher(events.clone());

        assert!(engine.scan(&ctx()).await.is_err());
        assert_eq!(events.events_of_type("ScanFailed").len(), 1);
        assert!(events.events_of_type("ScanCompleted").is_empty());
    }

    #[tokio::test]
    async fn test_metrics_after_scans() {
        let metrics = Arc::new(DiscoveryMetrics::new().unwrap());
        let probes = Arc::new(
            InMemoryProbes::new()
                .with_device(sata("/dev/sda", 0))
                .with_device(sata("/dev/sdb", 16))
                .with_properties("/dev/sda", [("ID_SERIAL_SHORT", "A")])
                .with_properties("/dev/sdb", [("ID_SERIAL_SHORT", "B")]),
        );
        let engine = DiscoveryEngine::new(DiscoveryConfig::default(), ProbeSet::from_shared(probes.clone()))
            .with_metrics(metrics.clone());

        engine.scan(&ctx()).await.unwrap();
        probes.set_failure(FailurePoint::Enumerate, true);
        assert!(engine.scan(&ctx()).await.is_err());

        let text = metrics.encode().unwrap();
        assert!(text.contains("disk_inventory_scans_total{result=\"success\"} 1"));
        assert!(text.contains("disk_inventory_scans_total{result=\"failure\"} 1"));
        assert!(text.contains("disk_inventory_disks 2"));
        assert!(text.contains("disk_inventory_disks_by_state{state=\"Available\"} 2"));
    }
}
