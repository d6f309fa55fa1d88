//! Block device enumeration via `lsblk`
//!
//! `lsblk --json` output varies between util-linux releases: numbers and
//! booleans may be strings, `mountpoint` was joined by a `mountpoints`
//! array, `path` is missing on old versions. The parser accepts all of
//! these.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::domain::ports::{BlockDevice, BlockDeviceSource, CommandRunner, ProbeContext};
use crate::error::{Error, Result};

// PATH is left out so util-linux < 2.33 accepts the column list; `--paths`
// puts the device node in NAME instead.
const COLUMNS: &str = "NAME,TYPE,MAJ:MIN,SIZE,ROTA,TRAN,MODEL,VENDOR,FSTYPE,MOUNTPOINT";

/// lsblk exit status when none of the requested devices exist
const EXIT_NOT_FOUND: i32 = 32;

/// `BlockDeviceSource` backed by `lsblk`
pub struct LsblkEnumerator {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl LsblkEnumerator {
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }
}

#[async_trait]
impl BlockDeviceSource for LsblkEnumerator {
    fn required_tool(&self) -> Option<&str> {
        Some(self.program.as_str())
    }

    async fn enumerate_block_devices(
        &self,
        scope: Option<&str>,
        ctx: &ProbeContext,
    ) -> Result<Vec<BlockDevice>> {
        let mut args = vec!["--json", "--bytes", "--paths", "-o", COLUMNS];
        if let Some(device) = scope {
            args.push(device);
        }

        let output = self.runner.run(&self.program, &args, ctx).await?;

        if scope.is_some() && output.status == Some(EXIT_NOT_FOUND) {
            return Ok(Vec::new());
        }
        if !output.success() {
            return Err(Error::probe_failed(&self.program, output.error_summary()));
        }

        parse_lsblk_output(&output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(rename = "type", default)]
    device_type: Option<String>,
    #[serde(rename = "maj:min", default)]
    maj_min: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    size: Option<u64>,
    #[serde(default, deserialize_with = "lenient_bool")]
    rota: Option<bool>,
    #[serde(default)]
    tran: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    vendor: Option<String>,
    #[serde(default)]
    fstype: Option<String>,
    #[serde(default)]
    mountpoint: Option<String>,
    #[serde(default)]
    mountpoints: Vec<Option<String>>,
    #[serde(default)]
    children: Vec<LsblkDevice>,
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<u64>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<bool>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::Number(n)) => n.as_u64().map(|n| n != 0),
        Some(Value::String(s)) => match s.trim() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

fn parse_dev_num(maj_min: &str) -> (Option<u32>, Option<u32>) {
    match maj_min.trim().split_once(':') {
        Some((major, minor)) => (major.trim().parse().ok(), minor.trim().parse().ok()),
        None => (None, None),
    }
}

impl From<LsblkDevice> for BlockDevice {
    fn from(raw: LsblkDevice) -> Self {
        let path = match raw.path {
            Some(path) if !path.is_empty() => path,
            _ if raw.name.starts_with('/') => raw.name.clone(),
            _ => format!("/dev/{}", raw.name),
        };
        let name = path.rsplit('/').next().unwrap_or(&raw.name).to_string();
        let (major, minor) = raw.maj_min.as_deref().map(parse_dev_num).unwrap_or((None, None));

        let mut mountpoints: Vec<String> = raw
            .mountpoints
            .into_iter()
            .flatten()
            .chain(raw.mountpoint)
            .filter(|m| !m.trim().is_empty())
            .collect();
        mountpoints.dedup();

        BlockDevice {
            name,
            path,
            device_type: raw.device_type.unwrap_or_default(),
            major,
            minor,
            size_bytes: raw.size.unwrap_or(0),
            rotational: raw.rota,
            transport: raw.tran,
            model: raw.model,
            vendor: raw.vendor,
            fs_type: raw.fstype,
            mountpoints,
            children: raw.children.into_iter().map(BlockDevice::from).collect(),
        }
    }
}

/// Parse `lsblk --json` output into device trees.
pub fn parse_lsblk_output(text: &str) -> Result<Vec<BlockDevice>> {
    let output: LsblkOutput =
        serde_json::from_str(text).map_err(|e| Error::probe_parse("lsblk", e.to_string()))?;
    Ok(output.blockdevices.into_iter().map(BlockDevice::from).collect())
}
