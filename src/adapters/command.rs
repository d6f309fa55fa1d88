//! Command Execution Adapter
//!
//! Runs probe binaries with `tokio::process` and locates them on `PATH`.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::domain::ports::{CommandOutput, CommandRunner, ProbeContext, ToolLocator};
use crate::error::{Error, Result};

/// Runs commands as child processes.
///
/// The child is killed when the probe is cancelled or times out. Output is
/// forced to the C locale so parsers see stable text.
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[&str], ctx: &ProbeContext) -> Result<CommandOutput> {
        debug!("Running {} {}", program, args.join(" "));

        let mut command = Command::new(program);
        command
            .args(args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = ctx
            .run(program, async {
                command.output().await.map_err(|e| match e.kind() {
                    std::io::ErrorKind::NotFound => Error::ToolUnavailable {
                        tool: program.to_string(),
                    },
                    _ => Error::probe_failed(program, format!("failed to spawn: {}", e)),
                })
            })
            .await?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Finds probe binaries with `which`.
///
/// Names containing a `/` are checked as paths.
#[derive(Debug, Clone, Default)]
pub struct PathToolLocator;

impl PathToolLocator {
    pub fn new() -> Self {
        Self
    }
}

impl ToolLocator for PathToolLocator {
    fn tool_available(&self, name: &str) -> bool {
        which::which(name).is_ok()
    }
}
