//! Shared error type across reqlens crates.

use std::net::SocketAddr;

use thiserror::Error;

/// Stable error codes, used as the `code` field in logs and asserted by tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Same instrument name registered with a different shape.
    RegistrationConflict,
    /// Observation labels do not match the instrument's declared labels.
    LabelMismatch,
    /// Series limit of an instrument reached.
    CardinalityExceeded,
    /// Unexpected failure while recording a metric.
    InstrumentationFailure,
    /// Configuration rejected by validation.
    InvalidConfig,
    /// Unsupported configuration version.
    UnsupportedVersion,
    /// A listener could not bind its address.
    ListenerBind,
    /// Grace period elapsed with connections still open.
    ShutdownTimeout,
    /// Profiling request failed.
    Profiling,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and admin responses.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::RegistrationConflict => "REGISTRATION_CONFLICT",
            ErrorCode::LabelMismatch => "LABEL_MISMATCH",
            ErrorCode::CardinalityExceeded => "CARDINALITY_EXCEEDED",
            ErrorCode::InstrumentationFailure => "INSTRUMENTATION_FAILURE",
            ErrorCode::InvalidConfig => "INVALID_CONFIG",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::ListenerBind => "LISTENER_BIND",
            ErrorCode::ShutdownTimeout => "SHUTDOWN_TIMEOUT",
            ErrorCode::Profiling => "PROFILING",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, ReqlensError>;

/// Unified error type used by core and server.
#[derive(Debug, Error)]
pub enum ReqlensError {
    #[error("instrument {name} already registered with a different shape")]
    RegistrationConflict { name: String },
    #[error("label mismatch for {instrument}: expected [{expected}], got [{got}]")]
    LabelMismatch {
        instrument: String,
        expected: String,
        got: String,
    },
    #[error("instrument {instrument} reached its limit of {limit} series")]
    CardinalityExceeded { instrument: String, limit: usize },
    #[error("instrumentation failure: {0}")]
    InstrumentationFailure(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("unsupported config version")]
    UnsupportedVersion,
    #[error("failed to bind {listener} listener on {addr}: {source}")]
    ListenerBind {
        listener: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("shutdown grace period elapsed with {forced} connection(s) still open")]
    ShutdownTimeout { forced: usize },
    #[error("profiling: {0}")]
    Profiling(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl ReqlensError {
    /// Map the error to its stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            ReqlensError::RegistrationConflict { .. } => ErrorCode::RegistrationConflict,
            ReqlensError::LabelMismatch { .. } => ErrorCode::LabelMismatch,
            ReqlensError::CardinalityExceeded { .. } => ErrorCode::CardinalityExceeded,
            ReqlensError::InstrumentationFailure(_) => ErrorCode::InstrumentationFailure,
            ReqlensError::InvalidConfig(_) => ErrorCode::InvalidConfig,
            ReqlensError::UnsupportedVersion => ErrorCode::UnsupportedVersion,
            ReqlensError::ListenerBind { .. } => ErrorCode::ListenerBind,
            ReqlensError::ShutdownTimeout { .. } => ErrorCode::ShutdownTimeout,
            ReqlensError::Profiling(_) => ErrorCode::Profiling,
            ReqlensError::Internal(_) => ErrorCode::Internal,
        }
    }
}
