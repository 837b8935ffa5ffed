use thiserror::Error;

/// Top-level error type for the `nwmng-ncp` crate.
///
/// These are link-level failures: the request never produced an
/// acknowledgement. A request the NCP *answered* with a non-success
/// [`ResultCode`](crate::ResultCode) is not an error at this layer;
/// `nwmng-core` decides what each code means.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// The underlying transport failed (serial I/O, socket error, ...).
    #[error("NCP transport error: {0}")]
    Transport(String),

    /// The link was closed by the other side or shut down locally.
    #[error("NCP link closed")]
    Closed,

    /// No acknowledgement arrived in time.
    #[error("NCP did not acknowledge within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // ── Protocol ────────────────────────────────────────────────────
    /// A packet could not be decoded into a known message.
    #[error("Malformed NCP packet: {message}")]
    Malformed { message: String },
}
