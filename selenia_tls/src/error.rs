//! Error taxonomy (§7 of the design: DESIGN.md / SPEC_FULL.md).
//!
//! Every fallible operation in this crate returns `Result<T, TlsError>`.
//! Each variant knows which alert it maps to (`TlsError::alert`) so callers
//! driving the wire don't need a second lookup table.

use crate::protocol::{AlertDescription, AlertLevel};

/// The crate-wide error type. Variants line up 1:1 with §7's taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// Malformed on-the-wire bytes.
    #[error("decode error: {0}")]
    Decode(String),

    /// Peer violated a negotiation rule (bad extension combination, version
    /// outside the offered range echoed back, etc).
    #[error("illegal parameter: {0}")]
    IllegalParameter(String),

    /// A message arrived that is not valid for the current handshake state.
    #[error("unexpected message: expected {expected}, got {got}")]
    UnexpectedMessage { expected: String, got: String },

    /// AEAD tag or CBC MAC verification failed. Must never leak *why* it
    /// failed through timing -- see `crate::record::cipher_state`.
    #[error("bad record mac")]
    BadRecordMac,

    /// Peer's protocol version is unsupported or falls outside our
    /// configured [min_version, max_version] range.
    #[error("protocol version: {0}")]
    ProtocolVersion(String),

    /// A negotiated parameter doesn't meet our security floor (DH modulus
    /// too small, SRP group unknown, …).
    #[error("insufficient security: {0}")]
    InsufficientSecurity(String),

    /// An invariant was violated inside this engine (sequence number
    /// overflow, impossible state transition). Always fatal, always a bug
    /// either here or in a caller that bypassed the public API.
    #[error("internal error: {0}")]
    Internal(String),

    /// Call made to a connection that is already closed.
    #[error("connection closed")]
    ClosedConnection,

    /// The peer sent us a fatal alert.
    #[error("remote alert: {0:?}")]
    RemoteAlert(AlertDescription),

    /// We are about to send (or just sent) a fatal alert ourselves. Carries
    /// the description so tests can assert on exactly what we sent.
    #[error("local alert: {0:?}")]
    LocalAlert(AlertDescription),

    /// Transport I/O failure (the underlying `Read`/`Write` returned `Err`).
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TlsError {
    /// The alert level+description this error should be reported to the
    /// peer with, if any. `ClosedConnection` and `RemoteAlert` have no
    /// outbound alert of their own (we already know the connection is dead,
    /// or the peer already told us theirs).
    pub fn outbound_alert(&self) -> Option<(AlertLevel, AlertDescription)> {
        use TlsError::*;
        let desc = match self {
            Decode(_) => AlertDescription::DecodeError,
            IllegalParameter(_) => AlertDescription::IllegalParameter,
            UnexpectedMessage { .. } => AlertDescription::UnexpectedMessage,
            BadRecordMac => AlertDescription::BadRecordMac,
            ProtocolVersion(_) => AlertDescription::ProtocolVersion,
            InsufficientSecurity(_) => AlertDescription::InsufficientSecurity,
            Internal(_) => AlertDescription::InternalError,
            LocalAlert(d) => *d,
            ClosedConnection | RemoteAlert(_) | Io(_) => return None,
        };
        Some((AlertLevel::Fatal, desc))
    }

    /// True if this error is fatal to the connection (almost everything is;
    /// only warning-level alerts surfaced through other paths are not).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TlsError::ClosedConnection)
    }
}
