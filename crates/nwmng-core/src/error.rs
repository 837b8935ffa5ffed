// ── Core error types ──
//
// Errors surfaced by nwmng-core. Consumers never see raw transport
// failures directly: the `From<nwmng_ncp::Error>` impl folds link-level
// problems into the same taxonomy the manager uses internally.

use nwmng_ncp::ResultCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Caller errors ────────────────────────────────────────────────
    #[error("Invalid parameter: {message}")]
    ParamInvalid { message: String },

    #[error("Invalid state: {message}")]
    State { message: String },

    #[error("Not found: {what}")]
    NotExist { what: String },

    // ── NCP errors ───────────────────────────────────────────────────
    #[error("NCP rejected {request} with result {code}")]
    Command {
        request: &'static str,
        code: ResultCode,
    },

    #[error("NCP reported failure {code}")]
    Event { code: ResultCode },

    #[error("NCP is out of memory")]
    OutOfMemory,

    #[error("Timed out after {timeout_ms}ms waiting for {what}")]
    Timeout { what: String, timeout_ms: u64 },

    #[error("NCP link error: {0}")]
    Ncp(nwmng_ncp::Error),

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Malformed data: {message}")]
    Format { message: String },

    #[error("Network key mismatch: the NCP already holds a network this provisioner did not create")]
    KeyMismatch,

    // ── Runtime errors ───────────────────────────────────────────────
    #[error("Manager worker is not running")]
    WorkerStopped,

    #[error("Internal error: {0}")]
    Unspecified(String),
}

impl CoreError {
    pub(crate) fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    pub(crate) fn param(message: impl Into<String>) -> Self {
        Self::ParamInvalid {
            message: message.into(),
        }
    }

    pub(crate) fn not_exist(what: impl Into<String>) -> Self {
        Self::NotExist { what: what.into() }
    }

    /// Map a rejected acknowledgement to the matching variant.
    pub(crate) fn rejected(request: &'static str, code: ResultCode) -> Self {
        if code == ResultCode::OutOfMemory {
            Self::OutOfMemory
        } else {
            Self::Command { request, code }
        }
    }
}

// ── Conversion from link-layer errors ────────────────────────────────

impl From<nwmng_ncp::Error> for CoreError {
    fn from(err: nwmng_ncp::Error) -> Self {
        match err {
            nwmng_ncp::Error::Timeout { timeout_ms } => CoreError::Timeout {
                what: "NCP response".into(),
                timeout_ms,
            },
            nwmng_ncp::Error::Malformed { message } => CoreError::Format { message },
            other => CoreError::Ncp(other),
        }
    }
}

/// Where a node-level failure was detected.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum ErrorCategory {
    /// The synchronous acknowledgement carried a failure code.
    Command,
    /// The asynchronous status event carried a failure code, or never came.
    Event,
    /// The manager itself could not continue (bad composition data, stray event).
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_timeout_maps_to_timeout() {
        let err = CoreError::from(nwmng_ncp::Error::Timeout { timeout_ms: 500 });
        assert!(matches!(err, CoreError::Timeout { timeout_ms: 500, .. }));
    }

    #[test]
    fn rejected_oom_is_backpressure() {
        assert!(matches!(
            CoreError::rejected("scan_beacons", ResultCode::OutOfMemory),
            CoreError::OutOfMemory
        ));
        assert!(matches!(
            CoreError::rejected("scan_beacons", ResultCode::LimitReached),
            CoreError::Command { .. }
        ));
    }
}
