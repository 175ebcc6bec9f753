//! Error types
//!
//! Transport failures, protocol failures and lifecycle failures are kept in
//! separate variants so callers can tell "retry the connection" apart from
//! "this peer speaks an incompatible catalog".

use crate::transport::TransportError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for catalog and broadcast operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Opening a new group on a track writer failed
    #[error("openGroup failed: {0}")]
    OpenGroup(#[source] TransportError),

    /// Writing the leading `CatalogInit` frame failed
    #[error("failed to write catalog init: {0}")]
    WriteInit(#[source] TransportError),

    /// Writing one of the track entry frames failed
    #[error("failed to write existing tracks: {0}")]
    WriteTracks(#[source] TransportError),

    /// Accepting the next group from a track reader failed
    #[error("acceptGroup failed: {0}")]
    AcceptGroup(#[source] TransportError),

    /// Reading a frame from a group failed
    #[error("readFrame failed: {0}")]
    ReadFrame(#[source] TransportError),

    /// Subscribing to a remote track failed
    #[error("subscribe failed for {path}/{track}: {source}")]
    Subscribe {
        path: String,
        track: String,
        #[source]
        source: TransportError,
    },

    /// The peer's catalog version is not the one we accept
    #[error("catalog version mismatch: expected {expected:?}, received {received:?}")]
    VersionMismatch { expected: String, received: String },

    /// A catalog frame was not valid JSON or had the wrong shape
    #[error("malformed catalog frame ({reason}): {content}")]
    Decode { reason: String, content: String },

    /// A catalog frame could not be serialized
    #[error("failed to encode catalog frame: {0}")]
    Encode(#[from] serde_json::Error),

    /// The supplied context was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// The broadcast or decoder has been closed
    #[error("broadcast closed")]
    Closed,

    /// No track with this name is registered
    #[error("track not found: {0}")]
    TrackNotFound(String),

    /// The name is reserved for the catalog track
    #[error("track name is reserved for the catalog: {0}")]
    ReservedTrack(String),

    /// A per-track encoder or decoder failed
    #[error("track codec error: {0}")]
    Codec(String),
}

impl Error {
    /// Build a decode error, keeping a bounded excerpt of the offending payload
    pub(crate) fn decode(reason: impl Into<String>, payload: &[u8]) -> Self {
        const MAX_EXCERPT: usize = 256;

        let text = String::from_utf8_lossy(payload);
        let text = text.trim_end();
        let content = match text.char_indices().nth(MAX_EXCERPT) {
            Some((idx, _)) => format!("{}...", &text[..idx]),
            None => text.to_string(),
        };

        Error::Decode {
            reason: reason.into(),
            content,
        }
    }

    /// Whether this error came from the transport (worth retrying)
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::OpenGroup(_)
                | Error::WriteInit(_)
                | Error::WriteTracks(_)
                | Error::AcceptGroup(_)
                | Error::ReadFrame(_)
                | Error::Subscribe { .. }
        )
    }

    /// Whether this error is a protocol violation by the peer
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::VersionMismatch { .. } | Error::Decode { .. })
    }
}
