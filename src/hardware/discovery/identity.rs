//! Identity Resolver
//!
//! Fills a disk's identity attributes from its udev properties and derives
//! one canonical device ID that survives reboots and path renumbering.
//!
//! # Identity Priority
//!
//! ```text
//! serial ──▶ wwn ──▶ first /dev/disk/by-id/ link ──▶ device_path
//! ```
//!
//! The first non-blank tier wins; `device_path` always exists so the ID is
//! never empty.

use std::sync::Arc;

use tracing::{debug, warn};

use super::properties::first_non_empty;
use super::stage::{SkipReason, StageOutcome};
use super::{DeviceIdSource, PhysicalDisk};
use crate::domain::ports::{DevicePropertySource, ProbeContext, PropertySet, ToolLocator};

/// Property keys carrying the drive serial, most specific first.
pub const SERIAL_KEYS: &[&str] = &[
    "SCSI_IDENT_SERIAL",
    "ID_SCSI_SERIAL",
    "ID_SERIAL_SHORT",
    "ID_SERIAL",
];

/// Property keys carrying the world wide name.
pub const WWN_KEYS: &[&str] = &["ID_WWN_WITH_EXTENSION", "ID_WWN"];

const MODEL_KEYS: &[&str] = &["ID_MODEL"];
const VENDOR_KEYS: &[&str] = &["ID_VENDOR"];
const LINKS_KEY: &str = "DEVLINKS";

/// Check whether a link lives under a `by-id` directory
pub fn is_by_id_link(link: &str) -> bool {
    link.contains("/by-id/")
}

/// Derive the canonical device ID and the tier that produced it.
pub fn compute_device_id(
    device_path: &str,
    serial: Option<&str>,
    wwn: Option<&str>,
    links: &[String],
) -> (String, DeviceIdSource) {
    fn non_blank(value: Option<&str>) -> Option<&str> {
        value.map(str::trim).filter(|v| !v.is_empty())
    }

    if let Some(serial) = non_blank(serial) {
        return (serial.to_string(), DeviceIdSource::Serial);
    }
    if let Some(wwn) = non_blank(wwn) {
        return (wwn.to_string(), DeviceIdSource::Wwn);
    }
    if let Some(link) = links.iter().find(|l| is_by_id_link(l)) {
        return (link.clone(), DeviceIdSource::ById);
    }
    (device_path.to_string(), DeviceIdSource::Path)
}

/// Copy identity attributes from a property set into `disk` and recompute
/// its device ID.
///
/// Model and vendor only replace the enumerator's values when the property
/// set has them.
pub fn apply_properties(disk: &mut PhysicalDisk, properties: &PropertySet) {
    disk.serial = first_non_empty(properties, SERIAL_KEYS).map(str::to_string);
    disk.wwn = first_non_empty(properties, WWN_KEYS).map(str::to_string);

    if let Some(model) = first_non_empty(properties, MODEL_KEYS) {
        disk.model = Some(model.to_string());
    }
    if let Some(vendor) = first_non_empty(properties, VENDOR_KEYS) {
        disk.vendor = Some(vendor.to_string());
    }

    let links = properties
        .get(LINKS_KEY)
        .map(|value| value.split_whitespace().map(str::to_string).collect::<Vec<_>>())
        .unwrap_or_default();
    disk.set_device_links(links);

    let (device_id, source) = compute_device_id(
        &disk.device_path,
        disk.serial.as_deref(),
        disk.wwn.as_deref(),
        &disk.device_links,
    );
    disk.device_id = device_id;
    disk.device_id_source = source;
}

/// Identity stage
pub struct IdentityResolver {
    source: Arc<dyn DevicePropertySource>,
    tools: Arc<dyn ToolLocator>,
}

impl IdentityResolver {
    pub fn new(source: Arc<dyn DevicePropertySource>, tools: Arc<dyn ToolLocator>) -> Self {
        Self { source, tools }
    }

    /// Resolve one disk's identity.
    ///
    /// On probe failure the disk keeps its enumerator defaults
    /// (`device_id == device_path`).
    pub async fn resolve(&self, disk: &mut PhysicalDisk, ctx: &ProbeContext) -> StageOutcome {
        let probe = self.source.required_tool().unwrap_or("device-properties");
        if let Some(tool) = self.source.required_tool() {
            if !self.tools.tool_available(tool) {
                debug!("Skipping identity probe for {}: {} not installed", disk.device_path, tool);
                return StageOutcome::Skipped(SkipReason::ToolUnavailable(tool.to_string()));
            }
        }

        let result = ctx
            .run(probe, self.source.query_device_properties(&disk.device_path, ctx))
            .await;

        match result {
            Ok(properties) => {
                apply_properties(disk, &properties);
                debug!(
                    "Resolved {} to {} ({})",
                    disk.device_path, disk.device_id, disk.device_id_source
                );
                StageOutcome::Applied
            }
            Err(e) => {
                warn!("Failed to query properties of {}: {}", disk.device_path, e);
                StageOutcome::failed(&e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::discovery::properties::parse_properties;
    use proptest::prelude::*;

    fn links(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_serial_wins_over_everything() {
        let (id, source) = compute_device_id(
            "/dev/sda",
            Some("ABC123"),
            Some("0x5000c500a1b2c3d4"),
            &links(&["/dev/disk/by-id/ata-DISK_ABC123"]),
        );
        assert_eq!(id, "ABC123");
        assert_eq!(source, DeviceIdSource::Serial);
    }

    #[test]
    fn test_fallback_chain() {
        let by_id = links(&[
            "/dev/disk/by-path/pci-0000:00:1f.2-ata-1",
            "/dev/disk/by-id/ata-DISK_1",
            "/dev/disk/by-id/wwn-0x1",
        ]);

        assert_eq!(
            compute_device_id("/dev/sda", Some("  "), Some("0x5000c500a1b2c3d4"), &by_id),
            ("0x5000c500a1b2c3d4".to_string(), DeviceIdSource::Wwn)
        );
        assert_eq!(
            compute_device_id("/dev/sda", Some(" S3Z1NB0K \n"), None, &by_id),
            ("S3Z1NB0K".to_string(), DeviceIdSource::Serial)
        );
        assert_eq!(
            compute_device_id("/dev/sda", None, Some(""), &by_id),
            ("/dev/disk/by-id/ata-DISK_1".to_string(), DeviceIdSource::ById)
        );
        assert_eq!(
            compute_device_id("/dev/sda", None, None, &links(&["/dev/disk/by-uuid/1234"])),
            ("/dev/sda".to_string(), DeviceIdSource::Path)
        );
    }

    #[test]
    fn test_apply_properties_serial_key_priority() {
        let props = parse_properties(
            "ID_SERIAL=Samsung_SSD_860_EVO_500GB_S3Z1NB0K123456A\n\
             ID_SERIAL_SHORT=S3Z1NB0K123456A\n\
             ID_WWN=0x5002538e40a1b2c3\n\
             ID_WWN_WITH_EXTENSION=0x5002538e40a1b2c3ff\n\
             ID_MODEL=Samsung_SSD_860_EVO_500GB\n\
             ID_VENDOR=ATA\n\
             DEVLINKS=/dev/disk/by-path/pci-0000:00:17.0-ata-1 /dev/disk/by-id/ata-Samsung_SSD_860\n",
        );
        let mut disk = PhysicalDisk::new("/dev/sda");
        disk.model = Some("Samsung SSD 860".to_string());

        apply_properties(&mut disk, &props);

        assert_eq!(disk.serial.as_deref(), Some("S3Z1NB0K123456A"));
        assert_eq!(disk.wwn.as_deref(), Some("0x5002538e40a1b2c3ff"));
        assert_eq!(disk.model.as_deref(), Some("Samsung_SSD_860_EVO_500GB"));
        assert_eq!(disk.vendor.as_deref(), Some("ATA"));
        assert_eq!(disk.device_links.len(), 2);
        assert_eq!(disk.device_id, "S3Z1NB0K123456A");
        assert_eq!(disk.device_id_source, DeviceIdSource::Serial);
    }

    #[test]
    fn test_apply_properties_keeps_enumerated_model() {
        let mut disk = PhysicalDisk::new("/dev/vdb");
        disk.model = Some("QEMU HARDDISK".to_string());

        apply_properties(&mut disk, &parse_properties("DEVNAME=/dev/vdb\n"));

        assert_eq!(disk.model.as_deref(), Some("QEMU HARDDISK"));
        assert_eq!(disk.device_id, "/dev/vdb");
        assert_eq!(disk.device_id_source, DeviceIdSource::Path);
    }

    fn optional_value() -> impl Strategy<Value = Option<String>> {
        prop_oneof![
            Just(None),
            Just(Some(String::new())),
            Just(Some("   ".to_string())),
            "[A-Z0-9]{4,12}".prop_map(Some),
        ]
    }

    fn link() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z0-9-]{3,10}".prop_map(|s| format!("/dev/disk/by-id/{}", s)),
            "[a-z0-9-]{3,10}".prop_map(|s| format!("/dev/disk/by-path/{}", s)),
            "[a-f0-9-]{8}".prop_map(|s| format!("/dev/disk/by-uuid/{}", s)),
        ]
    }

    proptest! {
        #[test]
        fn prop_device_id_precedence(
            serial in optional_value(),
            wwn in optional_value(),
            links in proptest::collection::vec(link(), 0..5),
        ) {
            let (id, source) = compute_device_id("/dev/sdx", serial.as_deref(), wwn.as_deref(), &links);
            let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());

            prop_assert!(!id.is_empty());
            if !blank(&serial) {
                prop_assert_eq!(source, DeviceIdSource::Serial);
                prop_assert_eq!(Some(id.as_str()), serial.as_deref());
            } else if !blank(&wwn) {
                prop_assert_eq!(source, DeviceIdSource::Wwn);
            } else if let Some(first) = links.iter().find(|l| l.contains("/by-id/")) {
                prop_assert_eq!(source, DeviceIdSource::ById);
                prop_assert_eq!(&id, first);
            } else {
                prop_assert_eq!(source, DeviceIdSource::Path);
                prop_assert_eq!(id.as_str(), "/dev/sdx");
            }

            // Same inputs, same answer.
            let again = compute_device_id("/dev/sdx", serial.as_deref(), wwn.as_deref(), &links);
            prop_assert_eq!(again, (id, source));
        }
    }
}
