//! Error types for mcp-netcli.
//!
//! [`ConfigurationError`] is fatal at startup. Everything else is scoped to a
//! single tool call: [`RelayError`] is what a tool handler reports back to the
//! agent, and [`SessionError`] is the provider-level cause wrapped inside it.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// The inventory could not be loaded. The process must not start serving.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to read inventory {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse inventory {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid inventory {}: must contain a non-empty 'devices' mapping", .path.display())]
    MissingDevices { path: PathBuf },
}

/// Low-level failure reported by a session provider.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("timed out after {}s during {stage}", .after.as_secs_f32())]
    Timeout { after: Duration, stage: &'static str },
    #[error("ssh error: {0}")]
    Ssh(#[from] russh::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("authentication rejected for user '{0}'")]
    AuthRejected(String),
    #[error(
        "unsupported device_type '{0}' (supported: {supported})",
        supported = crate::dialect::supported_device_types().join(", ")
    )]
    UnsupportedDeviceType(String),
    #[error("session closed by device")]
    ChannelClosed,
    #[error("no stable prompt after login")]
    PromptNotFound,
    #[error("device did not enter config mode")]
    ConfigModeRefused,
    #[error("device rejected config line '{line}': {reason}")]
    ConfigRejected { line: String, reason: String },
}

/// A send that failed after the session was established.
///
/// Whatever the device printed before the failure is kept in
/// `partial_output` so the caller can see how far a config push got.
#[derive(Debug, Error)]
#[error("{cause}")]
pub struct SendFailure {
    pub cause: SessionError,
    pub partial_output: String,
}

impl SendFailure {
    pub fn new(cause: SessionError, partial_output: impl Into<String>) -> Self {
        Self {
            cause,
            partial_output: partial_output.into(),
        }
    }

    /// Put output captured by earlier steps of the same call in front.
    pub fn preceded_by(mut self, mut earlier: String) -> Self {
        earlier.push_str(&self.partial_output);
        self.partial_output = earlier;
        self
    }
}

/// Per-call failure of a relay operation.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("device not found: '{device}'")]
    DeviceNotFound { device: String },
    #[error("failed to connect to device '{device}': {source}")]
    Connection {
        device: String,
        #[source]
        source: SessionError,
    },
    #[error("command execution failed on device '{device}': {source}")]
    CommandExecution {
        device: String,
        #[source]
        source: SessionError,
        partial_output: String,
    },
}

impl RelayError {
    pub(crate) fn execution(device: &str, failure: SendFailure) -> Self {
        RelayError::CommandExecution {
            device: device.to_string(),
            source: failure.cause,
            partial_output: failure.partial_output,
        }
    }

    /// Output captured before the failure, if any.
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            RelayError::CommandExecution { partial_output, .. } if !partial_output.is_empty() => {
                Some(partial_output)
            }
            _ => None,
        }
    }
}
