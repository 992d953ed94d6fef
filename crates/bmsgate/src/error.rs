//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use bmsgate_config::ConfigError;
use bmsgate_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file not found: {path}")]
    #[diagnostic(
        code(bmsgate::no_config),
        help(
            "Pass a config with --config <PATH> or set BMSGATE_CONFIG.\n\
             Default location: {default_path}"
        )
    )]
    NoConfig { path: String, default_path: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(
        code(bmsgate::validation),
        help("Fix the field in your gateway config and run: bmsgate check")
    )]
    Validation { field: String, reason: String },

    #[error("{message}")]
    #[diagnostic(code(bmsgate::config))]
    Config { message: String },

    #[error("No devices to run")]
    #[diagnostic(
        code(bmsgate::no_devices),
        help("Add [[devices]] to the gateway config, or check the --device filter.")
    )]
    NoDevices,

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(code(bmsgate::not_found))]
    NotFound {
        resource_type: String,
        identifier: String,
    },

    #[error("{resource_type} '{identifier}' already exists")]
    #[diagnostic(
        code(bmsgate::conflict),
        help("Trait and check names must be unique per device.")
    )]
    Conflict {
        resource_type: String,
        identifier: String,
    },

    #[error("Gateway error: {message}")]
    #[diagnostic(code(bmsgate::core))]
    Core { message: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render output: {0}")]
    #[diagnostic(code(bmsgate::render))]
    Render(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoConfig { .. } | Self::Validation { .. } | Self::Config { .. } => {
                exit_code::CONFIG
            }
            Self::NoDevices => exit_code::USAGE,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } => exit_code::CONFLICT,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ──────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NotFound { path } => Self::NoConfig {
                path: path.display().to_string(),
                default_path: bmsgate_config::config_path().display().to_string(),
            },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::Io(err) => Self::Io(err),
            other @ (ConfigError::DuplicateCheck { .. }
            | ConfigError::UnknownCheck { .. }
            | ConfigError::Serialization(_)
            | ConfigError::Figment(_)) => Self::Config {
                message: other.to_string(),
            },
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { kind, key } => Self::NotFound {
                resource_type: kind.into(),
                identifier: key,
            },
            CoreError::AlreadyExists { kind, key } => Self::Conflict {
                resource_type: kind.into(),
                identifier: key,
            },
            CoreError::InvalidArgument { message } => Self::Validation {
                field: "input".into(),
                reason: message,
            },
            other => Self::Core {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn config_errors_exit_with_config_code() {
        let err = CliError::from(ConfigError::Validation {
            field: "devices[0].name".into(),
            reason: "must not be empty".into(),
        });
        assert_eq!(err.exit_code(), exit_code::CONFIG);

        let missing = CliError::from(ConfigError::NotFound {
            path: PathBuf::from("/nope.toml"),
        });
        assert!(matches!(missing, CliError::NoConfig { .. }));
        assert_eq!(missing.exit_code(), exit_code::CONFIG);
    }

    #[test]
    fn core_errors_map_by_kind() {
        let err = CliError::from(CoreError::AlreadyExists {
            kind: "trait",
            key: "ahu-1/supply".into(),
        });
        assert_eq!(err.exit_code(), exit_code::CONFLICT);
        assert_eq!(
            CliError::from(CoreError::Cancelled).exit_code(),
            exit_code::GENERAL
        );
    }
}
