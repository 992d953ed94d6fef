// ── Core error types ──
//
// Errors surfaced by the reactive store, health registry, poll supervisor
// and value pipeline. Protocol clients translate their own failures into
// driver-level errors; only conversion and lookup failures live here.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Lookup errors ────────────────────────────────────────────────
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} already exists: {key}")]
    AlreadyExists { kind: &'static str, key: String },

    // ── Write errors ─────────────────────────────────────────────────
    #[error("Precondition failed: {message}")]
    PreconditionFailed { message: String },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    // ── Conversion errors ────────────────────────────────────────────
    #[error("Cannot convert {from} value to {to}")]
    UnsupportedConversion {
        from: &'static str,
        to: &'static str,
    },

    #[error("Unknown enum value: {value}")]
    UnknownEnumValue { value: String },

    #[error("Value {value} out of range for {target}")]
    ValueOutOfRange { value: String, target: &'static str },

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Operation cancelled")]
    Cancelled,

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub(crate) fn already_exists(kind: &'static str, key: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            key: key.into(),
        }
    }

    /// Build a `PreconditionFailed` error, typically from a write interceptor.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            message: message.into(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// `true` for [`CoreError::Cancelled`]. Cancellation is always
    /// recoverable and never logged as a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// `true` for errors raised while converting a raw point value.
    pub fn is_conversion(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedConversion { .. }
                | Self::UnknownEnumValue { .. }
                | Self::ValueOutOfRange { .. }
        )
    }
}
