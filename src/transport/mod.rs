//! Track-based pub/sub transport boundary
//!
//! The catalog layer only needs five capabilities from the transport:
//!
//! ```text
//!   Session ──subscribe(path, track)──► TrackReader ──accept_group()──► GroupReader ──read_frame()
//!                                       TrackWriter ──open_group(id)──► GroupWriter ──write_frame()
//! ```
//!
//! Connection setup, multiplexing and congestion control live below this
//! boundary. [`memory::MemoryRelay`] is an in-process implementation.

pub mod memory;

use std::future::Future;

use bytes::Bytes;

pub use memory::{MemoryRelay, MemoryTrackReader, MemoryTrackWriter};

/// Errors reported by the transport
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The track, group or session has been closed
    #[error("closed")]
    Closed,

    /// The remote side aborted with an application error code
    #[error("reset (code {code}): {reason}")]
    Reset { code: u32, reason: String },

    /// The track is already being published
    #[error("track already published: {0}")]
    Duplicate(String),

    /// Any other transport-specific failure
    #[error("{0}")]
    Other(String),
}

/// Write side of a track: produces groups
pub trait TrackWriter: Send {
    /// Group writer type produced by this track
    type Group: GroupWriter;

    /// Name of the track being written
    fn track_name(&self) -> &str;

    /// Open a new group with the given sequence number
    fn open_group(
        &mut self,
        sequence: u64,
    ) -> impl Future<Output = Result<Self::Group, TransportError>> + Send;
}

/// Write side of a group: an ordered run of frames
pub trait GroupWriter: Send {
    /// Append one frame to the group
    fn write_frame(&mut self, frame: Bytes)
        -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Finish the group; readers see a clean end after the last frame
    fn close(self) -> Result<(), TransportError>;
}

/// Read side of a track: yields groups in arrival order
pub trait TrackReader: Send {
    /// Group reader type produced by this track
    type Group: GroupReader;

    /// Name of the track being read
    fn track_name(&self) -> &str;

    /// Wait for the next group, or `None` once the track has finished
    fn accept_group(
        &mut self,
    ) -> impl Future<Output = Result<Option<Self::Group>, TransportError>> + Send;

    /// Abort the subscription with an application error code
    fn close_with_error(&mut self, code: u32, reason: &str);
}

/// Read side of a group
pub trait GroupReader: Send {
    /// Sequence number the writer assigned to this group
    fn sequence(&self) -> u64;

    /// Read the next frame, or `None` once the group has ended
    fn read_frame(&mut self) -> impl Future<Output = Result<Option<Bytes>, TransportError>> + Send;

    /// Stop reading this group
    fn cancel(&mut self);
}

/// A session able to subscribe to remote tracks
pub trait Session: Send + Sync + 'static {
    /// Track reader type returned by [`Session::subscribe`]
    type Reader: TrackReader + 'static;

    /// Subscribe to `track` within the broadcast at `path`
    fn subscribe(
        &self,
        path: &str,
        track: &str,
    ) -> impl Future<Output = Result<Self::Reader, TransportError>> + Send;
}
