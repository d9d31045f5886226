//! Error taxonomy for the issue channel.
//!
//! Three classes of failure, handled differently:
//!
//! | Class        | Example                       | Handling                          |
//! |--------------|-------------------------------|-----------------------------------|
//! | Transport    | socket drop, connect refused  | logged, automatic reconnect       |
//! | Decode       | malformed frame, missing `id` | logged, frame dropped, stay open  |
//! | Consistency  | projection mutation fails     | propagated, channel task errors   |
//!
//! Transport and consistency failures travel as `anyhow::Error` through the
//! channel task; decode failures get their own type so the read loop can
//! absorb them per frame without tearing the channel down.

use thiserror::Error;

/// A single inbound frame could not be turned into a typed change event.
///
/// Always non-fatal: the frame is dropped, no mutation occurs, and the
/// channel stays open.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame has no usable `type` field")]
    MissingKind,

    #[error("unrecognized event kind `{0}`")]
    UnknownKind(String),

    /// The payload is missing a field required for this event kind to be
    /// applied safely. Applying it partially would corrupt projection
    /// membership, so the whole event is rejected instead.
    #[error("`{kind}` payload is missing `{field}`")]
    IncompletePayload {
        kind: &'static str,
        field: &'static str,
    },
}

impl DecodeError {
    /// Unknown kinds are dropped silently at debug level; everything else
    /// is a malformed frame worth a warning.
    pub fn is_unknown_kind(&self) -> bool {
        matches!(self, DecodeError::UnknownKind(_))
    }
}
