//! Virtualization and cloud detection
//!
//! The hypervisor comes from `systemd-detect-virt --vm`, the cloud provider
//! from the DMI strings the firmware exposes under `/sys/class/dmi/id`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::ports::{CommandRunner, Environment, EnvironmentDetector, ProbeContext};
use crate::error::{Error, Result};

const DEFAULT_DMI_ROOT: &str = "/sys/class/dmi/id";

/// DMI strings relevant to cloud detection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DmiInfo {
    pub sys_vendor: Option<String>,
    pub product_name: Option<String>,
    pub bios_vendor: Option<String>,
    pub chassis_asset_tag: Option<String>,
}

impl DmiInfo {
    /// Read DMI strings; unreadable files are left empty.
    pub async fn read(root: &Path) -> Self {
        async fn field(root: &Path, name: &str) -> Option<String> {
            tokio::fs::read_to_string(root.join(name))
                .await
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        }

        Self {
            sys_vendor: field(root, "sys_vendor").await,
            product_name: field(root, "product_name").await,
            bios_vendor: field(root, "bios_vendor").await,
            chassis_asset_tag: field(root, "chassis_asset_tag").await,
        }
    }
}

/// Map DMI strings to a cloud provider tag.
pub fn classify_cloud_provider(dmi: &DmiInfo) -> Option<&'static str> {
    let has = |value: &Option<String>, needle: &str| {
        value
            .as_deref()
            .is_some_and(|v| v.to_ascii_lowercase().contains(needle))
    };

    if has(&dmi.sys_vendor, "amazon") || has(&dmi.bios_vendor, "amazon") {
        Some("aws")
    } else if has(&dmi.sys_vendor, "google") || has(&dmi.product_name, "google compute engine") {
        Some("gcp")
    } else if has(&dmi.sys_vendor, "microsoft corporation") && has(&dmi.product_name, "virtual machine") {
        // Hyper-V on premises reports the same strings; Azure also sets this tag.
        if dmi.chassis_asset_tag.as_deref() == Some("7783-7084-3265-9085-8269-3286-77") {
            Some("azure")
        } else {
            None
        }
    } else if has(&dmi.chassis_asset_tag, "oraclecloud.com") {
        Some("oracle")
    } else if has(&dmi.sys_vendor, "alibaba cloud") {
        Some("alibaba")
    } else if has(&dmi.sys_vendor, "digitalocean") {
        Some("digitalocean")
    } else {
        None
    }
}

/// `EnvironmentDetector` for Linux hosts
pub struct SystemEnvironmentDetector {
    runner: Arc<dyn CommandRunner>,
    program: String,
    dmi_root: PathBuf,
}

impl SystemEnvironmentDetector {
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
            dmi_root: PathBuf::from(DEFAULT_DMI_ROOT),
        }
    }

    /// Read DMI strings from another directory.
    pub fn with_dmi_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.dmi_root = root.into();
        self
    }
}

#[async_trait]
impl EnvironmentDetector for SystemEnvironmentDetector {
    fn required_tool(&self) -> Option<&str> {
        Some(self.program.as_str())
    }

    async fn detect_environment(&self, ctx: &ProbeContext) -> Result<Environment> {
        let output = self.runner.run(&self.program, &["--vm"], ctx).await?;
        let tag = output.stdout.trim();

        // Exits 1 and prints "none" on bare metal.
        let mut env = if tag == "none" {
            Environment::bare_metal()
        } else if output.success() && !tag.is_empty() {
            Environment::virtualized(tag)
        } else {
            return Err(Error::probe_failed(&self.program, output.error_summary()));
        };

        let dmi = DmiInfo::read(&self.dmi_root).await;
        if let Some(provider) = classify_cloud_provider(&dmi) {
            env = env.with_cloud_provider(provider);
        }
        debug!("Detected environment {:?} from DMI {:?}", env, dmi);
        Ok(env)
    }
}
