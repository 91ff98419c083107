//! Error types for fcd.
//!
//! Every failure the daemon can hit while reconciling a session is one
//! variant of [`FcdError`]. The main loop uses the classification helpers
//! at the bottom of this file to decide how loudly to log and whether the
//! session has to be torn down.

use std::io;
use thiserror::Error;

/// Result type alias for fcd operations.
pub type FcdResult<T> = Result<T, FcdError>;

/// Errors that can occur while reconciling a telemetry session.
#[derive(Debug, Error)]
pub enum FcdError {
    /// A mandatory session field is absent or empty.
    #[error("Missing mandatory param: {field}")]
    MissingMandatoryField {
        /// The missing field.
        field: String,
    },

    /// A field failed its value check.
    #[error("Invalid param {field}:{value}")]
    InvalidParamValue {
        /// The offending field.
        field: String,
        /// The rejected value.
        value: String,
    },

    /// A field that belongs to another sampler mode was supplied.
    #[error("Param={field} should not be specified for sampler_mode {mode}")]
    ConflictingModeParam {
        /// The offending field.
        field: String,
        /// The selected sampler mode.
        mode: String,
    },

    /// More than one session row exists for a single-instance table.
    #[error("{table}: only one session supported; configured={keys:?}")]
    AmbiguousSession {
        /// The CONFIG_DB table.
        table: String,
        /// All keys found.
        keys: Vec<String>,
    },

    /// Route or ASIC object not (yet) present in the device state.
    #[error("Topology unresolved: {0}")]
    TopologyUnresolved(String),

    /// The collector path uses a construct the daemon does not program.
    #[error("Unsupported topology: {0}")]
    UnsupportedTopology(String),

    /// Vendor CLI command failed (non-zero exit or error marker in output).
    #[error("Hardware command failed: '{command}': {message}")]
    HardwareCommand {
        /// The CLI command string.
        command: String,
        /// Exit code or reply text.
        message: String,
    },

    /// Queue monitoring could not be applied to one port.
    #[error("Port apply failed on {port}: {message}")]
    PortApply {
        /// The port name.
        port: String,
        /// Failure detail.
        message: String,
    },

    /// Two session kinds want the same hardware resource.
    #[error("Cannot configure same {resource} for BDC and HDC")]
    ConflictingResource {
        /// Resource name, e.g. "cpu_queue 5".
        resource: String,
    },

    /// Failed to spawn a child process.
    #[error("Failed to execute '{command}': {source}")]
    ShellExec {
        /// The command that failed to start.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Redis operation failed.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Daemon configuration error (config file, CLI).
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FcdError {
    /// Creates an invalid param error.
    pub fn invalid_param(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidParamValue {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Creates a missing mandatory field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingMandatoryField {
            field: field.into(),
        }
    }

    /// Creates a topology unresolved error.
    pub fn unresolved(message: impl Into<String>) -> Self {
        Self::TopologyUnresolved(message.into())
    }

    /// Creates an unsupported topology error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedTopology(message.into())
    }

    /// Creates a hardware command error.
    pub fn hardware(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HardwareCommand {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Creates a per-port apply error.
    pub fn port_apply(port: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PortApply {
            port: port.into(),
            message: message.into(),
        }
    }

    /// Returns true for errors caused by the user's session record.
    ///
    /// These leave the session state untouched; the record is re-read on
    /// the next poll.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            FcdError::MissingMandatoryField { .. }
                | FcdError::InvalidParamValue { .. }
                | FcdError::ConflictingModeParam { .. }
                | FcdError::AmbiguousSession { .. }
        )
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry without any operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FcdError::TopologyUnresolved(_) | FcdError::Redis(_) | FcdError::PortApply { .. }
        )
    }

    /// Returns true if a partially programmed session must be torn down
    /// after this error.
    pub fn requires_cleanup(&self) -> bool {
        !self.is_config_error() && !matches!(self, FcdError::Redis(_) | FcdError::Config(_))
    }
}
