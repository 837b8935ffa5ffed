//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use nwmng_config::ConfigError;
use nwmng_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const NCP: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Startup ──────────────────────────────────────────────────────
    #[error("No NCP transport available for {transport}")]
    #[diagnostic(
        code(nwmng::no_transport),
        help(
            "This build only links the simulated NCP.\n\
             Try: nwmng --simulate 3"
        )
    )]
    NoTransport { transport: String },

    #[error("Network bootstrap failed: {reason}")]
    #[diagnostic(
        code(nwmng::bootstrap),
        help(
            "Check the provisioner profile at {path}.\n\
             A key mismatch means the NCP holds a network created elsewhere: \
             factory-reset the NCP or restore the matching profile."
        )
    )]
    Bootstrap { reason: String, path: String },

    // ── NCP / manager ────────────────────────────────────────────────
    #[error("{what} not found")]
    #[diagnostic(code(nwmng::not_found), help("Run: list  (or: backlog)"))]
    NotFound { what: String },

    #[error("NCP error: {message}")]
    #[diagnostic(code(nwmng::ncp))]
    Ncp { message: String },

    #[error("Timed out: {message}")]
    #[diagnostic(code(nwmng::timeout), help("Check that the NCP is powered and responsive."))]
    Timeout { message: String },

    #[error("{message}")]
    #[diagnostic(code(nwmng::manager))]
    Manager { message: String },

    // ── Validation / configuration ───────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(nwmng::validation))]
    Validation { field: String, reason: String },

    #[error("Malformed argument cache, line {line}: {reason}")]
    #[diagnostic(
        code(nwmng::args_cache),
        help("Delete the argument cache or pass every transport flag explicitly.")
    )]
    ArgsCache { line: usize, reason: String },

    #[error(transparent)]
    #[diagnostic(code(nwmng::config))]
    Config(ConfigError),

    // ── IO ───────────────────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoTransport { .. } | Self::Validation { .. } | Self::ArgsCache { .. } => {
                exit_code::USAGE
            }
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Bootstrap { .. } | Self::Ncp { .. } => exit_code::NCP,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::Format { line, reason } => Self::ArgsCache { line, reason },
            ConfigError::Io(e) => Self::Io(e),
            other => Self::Config(other),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotExist { what } => Self::NotFound { what },
            CoreError::ParamInvalid { message } => Self::Validation {
                field: "input".into(),
                reason: message,
            },
            CoreError::Timeout { .. } => Self::Timeout {
                message: err.to_string(),
            },
            CoreError::Command { .. }
            | CoreError::Event { .. }
            | CoreError::OutOfMemory
            | CoreError::Ncp(_)
            | CoreError::KeyMismatch => Self::Ncp {
                message: err.to_string(),
            },
            CoreError::State { message } => Self::Manager { message },
            CoreError::WorkerStopped | CoreError::Format { .. } | CoreError::Unspecified(_) => {
                Self::Manager {
                    message: err.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_exit_codes() {
        let err = CliError::from(CoreError::NotExist {
            what: "node 0x0101".into(),
        });
        assert_eq!(err.exit_code(), exit_code::NOT_FOUND);

        let err = CliError::from(CoreError::KeyMismatch);
        assert_eq!(err.exit_code(), exit_code::NCP);

        let err = CliError::from(ConfigError::Format {
            line: 3,
            reason: "x".into(),
        });
        assert_eq!(err.exit_code(), exit_code::USAGE);
    }
}
