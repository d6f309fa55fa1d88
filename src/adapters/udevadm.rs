//! Device properties via `udevadm info`

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::ports::{CommandRunner, DevicePropertySource, ProbeContext, PropertySet};
use crate::error::{Error, Result};
use crate::hardware::discovery::properties::parse_properties;

/// `DevicePropertySource` backed by the udev database
pub struct UdevadmPropertySource {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl UdevadmPropertySource {
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }
}

#[async_trait]
impl DevicePropertySource for UdevadmPropertySource {
    fn required_tool(&self) -> Option<&str> {
        Some(self.program.as_str())
    }

    async fn query_device_properties(&self, path: &str, ctx: &ProbeContext) -> Result<PropertySet> {
        let name = format!("--name={}", path);
        let output = self
            .runner
            .run(&self.program, &["info", "--query=property", &name], ctx)
            .await?;

        if !output.success() {
            return Err(Error::probe_failed(&self.program, output.error_summary()));
        }

        let properties = parse_properties(&output.stdout);
        if properties.is_empty() {
            return Err(Error::probe_parse(&self.program, format!("no properties for {}", path)));
        }
        Ok(properties)
    }
}
