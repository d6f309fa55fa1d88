//! SMART diagnostics via `smartctl --json`
//!
//! smartctl's exit status is a bit mask. Bits 0 and 1 mean the command line
//! was rejected or the device could not be opened; the higher bits report
//! disk problems and still come with valid output.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::ports::{CommandOutput, CommandRunner, ProbeContext, SmartProbe, SmartReport};
use crate::error::{Error, Result};
use crate::hardware::discovery::DiskType;

const FATAL_EXIT_BITS: i32 = 0b11;

/// `SmartProbe` backed by smartmontools
pub struct SmartctlProbe {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl SmartctlProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    async fn run_json(&self, args: &[&str], ctx: &ProbeContext) -> Result<Value> {
        let output = self.runner.run(&self.program, args, ctx).await?;
        let json: Option<Value> = serde_json::from_str(&output.stdout).ok();

        if is_fatal(&output) {
            let reason = json
                .as_ref()
                .and_then(first_message)
                .unwrap_or_else(|| output.error_summary());
            return Err(Error::probe_failed(&self.program, reason));
        }

        json.ok_or_else(|| Error::probe_parse(&self.program, "output is not JSON"))
    }
}

fn is_fatal(output: &CommandOutput) -> bool {
    match output.status {
        Some(code) => code & FATAL_EXIT_BITS != 0,
        None => true,
    }
}

fn first_message(json: &Value) -> Option<String> {
    json["smartctl"]["messages"]
        .as_array()?
        .iter()
        .find_map(|m| m["string"].as_str())
        .map(str::to_string)
}

#[async_trait]
impl SmartProbe for SmartctlProbe {
    fn required_tool(&self) -> Option<&str> {
        Some(self.program.as_str())
    }

    async fn probe_smart_info(&self, path: &str, ctx: &ProbeContext) -> Result<SmartReport> {
        let json = self.run_json(&["--json", "-i", "-H", path], ctx).await?;
        Ok(parse_smart_info(json))
    }

    async fn probe_self_test_capability(&self, path: &str, ctx: &ProbeContext) -> Result<bool> {
        let json = self.run_json(&["--json", "-c", path], ctx).await?;
        Ok(parse_self_test_capability(&json))
    }
}

fn is_nvme(json: &Value) -> bool {
    let eq = |v: &Value| v.as_str().is_some_and(|s| s.eq_ignore_ascii_case("nvme"));
    eq(&json["device"]["type"]) || eq(&json["device"]["protocol"])
}

/// Build a report from `smartctl --json -i -H` output.
pub fn parse_smart_info(json: Value) -> SmartReport {
    let nvme = is_nvme(&json);

    // NVMe devices always carry the health log and have no on/off switch.
    let support = &json["smart_support"];
    let available = support["available"]
        .as_bool()
        .unwrap_or(nvme || json["nvme_smart_health_information_log"].is_object());
    let enabled = support["enabled"].as_bool().unwrap_or(available && nvme);

    let disk_type = if nvme {
        Some(DiskType::Nvme)
    } else {
        match json["rotation_rate"].as_u64() {
            Some(0) => Some(DiskType::Ssd),
            Some(_) => Some(DiskType::Hdd),
            None => None,
        }
    };

    let passed = json["smart_status"]["passed"].as_bool();

    SmartReport {
        available,
        enabled,
        disk_type,
        passed,
        raw: json,
    }
}

/// Read self-test support from `smartctl --json -c` output.
pub fn parse_self_test_capability(json: &Value) -> bool {
    json["ata_smart_data"]["capabilities"]["self_tests_supported"]
        .as_bool()
        .or_else(|| json["nvme_optional_admin_commands"]["self_test"].as_bool())
        .unwrap_or_else(|| json["nvme_self_test_log"].is_object())
}
