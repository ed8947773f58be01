//! Error types for cloud printer operations.

use thiserror::Error;

use crate::provider::Capability;
use crate::report::ExitCode;

/// Errors from cloud session and command operations.
#[derive(Error, Debug)]
pub enum CloudError {
    /// Bad arguments or unreadable input files.
    #[error("{0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("invalid config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The provider could not be instantiated.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The credentials payload has no `token` field.
    #[error("no token found in credentials")]
    MissingToken,

    /// Login was rejected or never confirmed.
    #[error("login failed: {0}")]
    LoginFailed(String),

    /// The broker connection was never confirmed.
    #[error("could not connect to MQTT server after {attempts} polls")]
    ConnectTimeout {
        /// Number of connection polls made.
        attempts: u32,
    },

    /// Every send primitive reported failure.
    #[error("send to {device_id} failed (code {code})")]
    SendFailed {
        /// Target device.
        device_id: String,
        /// Last provider return code.
        code: i32,
    },

    /// The device published nothing within the collection window.
    #[error("no status received from printer {device_id}")]
    NoStatusReceived {
        /// Target device.
        device_id: String,
    },

    /// The provider does not expose a required operation.
    #[error("{0} not available from provider")]
    CapabilityMissing(Capability),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Cloud API returned a non-success status.
    #[error("cloud API returned {status}: {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body (truncated).
        body: String,
    },

    /// MQTT client error.
    #[error("MQTT error: {0}")]
    Mqtt(String),
}

impl CloudError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CloudError::NoStatusReceived { .. } => ExitCode::NoData,
            _ => ExitCode::Failure,
        }
    }
}

/// Result type for cloud operations.
pub type Result<T> = std::result::Result<T, CloudError>;
