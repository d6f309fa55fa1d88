//! Error types for the disk inventory engine

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while discovering disks
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Probe Errors
    // =========================================================================
    /// A probe ran but reported failure
    #[error("Probe '{probe}' failed: {reason}")]
    ProbeFailed { probe: String, reason: String },

    /// A probe produced output that could not be understood
    #[error("Failed to parse output of probe '{probe}': {reason}")]
    ProbeParse { probe: String, reason: String },

    /// A probe did not finish within its deadline
    #[error("Probe '{probe}' timed out after {timeout_ms}ms")]
    ProbeTimeout { probe: String, timeout_ms: u64 },

    /// A probe was cancelled by its caller
    #[error("Probe '{probe}' was cancelled")]
    ProbeCancelled { probe: String },

    /// The binary backing a probe is not installed
    #[error("Required tool '{tool}' is not available")]
    ToolUnavailable { tool: String },

    // =========================================================================
    // Discovery Errors
    // =========================================================================
    /// A scan-level operation failed
    #[error("Discovery operation '{operation}' failed{}: {source}", device_suffix(.device))]
    Discovery {
        operation: &'static str,
        device: Option<String>,
        #[source]
        source: Box<Error>,
    },

    /// The requested device was not present after enumeration
    #[error("Device {device} not found during '{operation}'")]
    DeviceNotFound {
        operation: &'static str,
        device: String,
    },
}

fn device_suffix(device: &Option<String>) -> String {
    match device {
        Some(device) => format!(" for {}", device),
        None => String::new(),
    }
}

impl Error {
    /// Build a probe failure
    pub fn probe_failed(probe: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ProbeFailed {
            probe: probe.into(),
            reason: reason.into(),
        }
    }

    /// Build a probe parse error
    pub fn probe_parse(probe: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ProbeParse {
            probe: probe.into(),
            reason: reason.into(),
        }
    }

    /// Build a probe timeout error
    pub fn probe_timeout(probe: impl Into<String>, timeout: Duration) -> Self {
        Error::ProbeTimeout {
            probe: probe.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Wrap an error with the scan operation and device it happened in
    pub fn discovery(operation: &'static str, device: Option<&str>, source: Error) -> Self {
        Error::Discovery {
            operation,
            device: device.map(str::to_string),
            source: Box::new(source),
        }
    }

    /// True for the errors produced when a caller cancels or a deadline expires
    pub fn is_interrupted(&self) -> bool {
        match self {
            Error::ProbeTimeout { .. } | Error::ProbeCancelled { .. } => true,
            Error::Discovery { source, .. } => source.is_interrupted(),
            _ => false,
        }
    }
}
