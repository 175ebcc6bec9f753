//! In-process relay
//!
//! Routes groups from one [`MemoryTrackWriter`] to any number of
//! [`MemoryTrackReader`]s, keyed by `(path, track)`.
//!
//! ```text
//!                         MemoryRelay
//!                ┌──────────────────────────┐
//!                │ tracks: HashMap<TrackKey,│
//!                │   TrackState {           │
//!                │     latest,              │
//!                │     groups: broadcast::Tx│
//!                │   }>                     │
//!                └────────────┬─────────────┘
//!          ┌──────────────────┼──────────────────┐
//!          ▼                  ▼                  ▼
//!    [TrackWriter]       [TrackReader]      [TrackReader]
//!     open_group()       accept_group()     accept_group()
//! ```
//!
//! A reader that subscribes late starts at the most recent group, which is
//! enough for catalog tracks since every group is a full snapshot. Readers that
//! fall behind skip to newer groups instead of buffering without bound.
//!
//! A finished track keeps its last group until a new writer replaces it or it
//! is dropped with [`MemoryRelay::remove`] / [`MemoryRelay::prune`].

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};

use super::{GroupReader, GroupWriter, Session, TrackReader, TrackWriter, TransportError};

/// Default number of groups buffered per reader
pub const DEFAULT_GROUP_CAPACITY: usize = 8;

/// Identifies a track within the relay (broadcast path + track name)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackKey {
    /// Broadcast path (e.g., "room/alice")
    pub path: String,
    /// Track name within the broadcast
    pub track: String,
}

impl TrackKey {
    /// Create a new track key
    pub fn new(path: impl Into<String>, track: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            track: track.into(),
        }
    }
}

impl std::fmt::Display for TrackKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.path, self.track)
    }
}

/// A group as seen by readers: its sequence and a view of its frames
#[derive(Debug, Clone)]
struct SharedGroup {
    sequence: u64,
    frames: watch::Receiver<Vec<Bytes>>,
}

struct TrackState {
    /// Most recent group, handed to readers that subscribe late
    latest: Mutex<Option<SharedGroup>>,
    groups: broadcast::Sender<SharedGroup>,
    finished: watch::Sender<bool>,
    has_writer: Mutex<bool>,
}

impl TrackState {
    fn new(capacity: usize) -> Self {
        let (groups, _) = broadcast::channel(capacity);
        let (finished, _) = watch::channel(false);
        Self {
            latest: Mutex::new(None),
            groups,
            finished,
            has_writer: Mutex::new(false),
        }
    }

    fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }
}

struct RelayInner {
    tracks: Mutex<HashMap<TrackKey, Arc<TrackState>>>,
    group_capacity: usize,
}

/// In-process track relay
///
/// Cheap to clone; clones share the same set of tracks.
#[derive(Clone)]
pub struct MemoryRelay {
    inner: Arc<RelayInner>,
}

impl MemoryRelay {
    /// Create a relay with the default per-reader group capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_GROUP_CAPACITY)
    }

    /// Create a relay buffering up to `group_capacity` groups per reader
    pub fn with_capacity(group_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                tracks: Mutex::new(HashMap::new()),
                group_capacity: group_capacity.max(1),
            }),
        }
    }

    /// Get the state for a key
    ///
    /// Readers attach to whatever state exists, finished or not, so a late
    /// reader still gets the last group. Only a new writer replaces a
    /// finished track.
    fn track_state(&self, key: &TrackKey, replace_finished: bool) -> Arc<TrackState> {
        let mut tracks = self.inner.tracks.lock();

        match tracks.get(key) {
            Some(state) if !(replace_finished && state.is_finished()) => Arc::clone(state),
            _ => {
                let state = Arc::new(TrackState::new(self.inner.group_capacity));
                tracks.insert(key.clone(), Arc::clone(&state));
                state
            }
        }
    }

    /// Start publishing a track
    ///
    /// Readers that subscribed before the writer existed start receiving
    /// groups as soon as they are opened. Only one writer may exist per track.
    pub fn publish(
        &self,
        path: &str,
        track: &str,
    ) -> Result<MemoryTrackWriter, TransportError> {
        let key = TrackKey::new(path, track);
        let state = self.track_state(&key, true);

        {
            let mut has_writer = state.has_writer.lock();
            if *has_writer {
                return Err(TransportError::Duplicate(key.to_string()));
            }
            *has_writer = true;
        }

        tracing::debug!(track = %key, "Track writer registered");

        Ok(MemoryTrackWriter {
            name: key.track.clone(),
            key,
            state,
        })
    }

    /// Subscribe to a track, whether or not it is being published yet
    pub fn subscribe_track(&self, path: &str, track: &str) -> MemoryTrackReader {
        let key = TrackKey::new(path, track);
        let state = self.track_state(&key, false);

        // Same lock as `open_group`, so a group is either the catchup group or
        // arrives on the channel, never both.
        let (groups, pending) = {
            let latest = state.latest.lock();
            (state.groups.subscribe(), latest.clone())
        };

        tracing::debug!(
            track = %key,
            catchup = pending.is_some(),
            "Track reader subscribed"
        );

        MemoryTrackReader {
            name: key.track.clone(),
            key,
            groups,
            pending,
            finished: state.finished.subscribe(),
            error: None,
        }
    }

    /// Number of tracks currently known to the relay
    pub fn track_count(&self) -> usize {
        self.inner.tracks.lock().len()
    }

    /// Forget a finished track and its last group
    ///
    /// Finished tracks are kept so late readers can still catch up; call this
    /// once nobody will subscribe again. Returns `false` if the track is
    /// unknown or still has a writer.
    pub fn remove(&self, path: &str, track: &str) -> bool {
        let key = TrackKey::new(path, track);
        let mut tracks = self.inner.tracks.lock();

        match tracks.get(&key) {
            Some(state) if state.is_finished() => {
                tracks.remove(&key);
                tracing::debug!(track = %key, "Finished track removed");
                true
            }
            _ => false,
        }
    }

    /// Forget every finished track that no reader is attached to
    ///
    /// Returns the number of tracks removed.
    pub fn prune(&self) -> usize {
        let mut tracks = self.inner.tracks.lock();
        let before = tracks.len();

        tracks.retain(|_, state| !state.is_finished() || state.groups.receiver_count() > 0);

        let removed = before - tracks.len();
        if removed > 0 {
            tracing::debug!(removed, "Pruned finished tracks");
        }
        removed
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl Session for MemoryRelay {
    type Reader = MemoryTrackReader;

    async fn subscribe(&self, path: &str, track: &str) -> Result<MemoryTrackReader, TransportError> {
        Ok(self.subscribe_track(path, track))
    }
}

/// Writer for one relay track
pub struct MemoryTrackWriter {
    key: TrackKey,
    name: String,
    state: Arc<TrackState>,
}

impl MemoryTrackWriter {
    /// Finish the track; readers drain pending groups and then see its end
    pub fn finish(self) {
        // Drop does the work
    }
}

impl TrackWriter for MemoryTrackWriter {
    type Group = MemoryGroupWriter;

    fn track_name(&self) -> &str {
        &self.name
    }

    async fn open_group(&mut self, sequence: u64) -> Result<MemoryGroupWriter, TransportError> {
        if self.state.is_finished() {
            return Err(TransportError::Closed);
        }

        let (frames_tx, frames_rx) = watch::channel(Vec::new());
        let group = SharedGroup {
            sequence,
            frames: frames_rx,
        };

        {
            let mut latest = self.state.latest.lock();
            *latest = Some(group.clone());
            // No receivers is fine: late joiners pick the group up from `latest`
            let _ = self.state.groups.send(group);
        }

        tracing::trace!(track = %self.key, group = sequence, "Group opened");

        Ok(MemoryGroupWriter { frames: frames_tx })
    }
}

impl Drop for MemoryTrackWriter {
    fn drop(&mut self) {
        self.state.finished.send_replace(true);
        *self.state.has_writer.lock() = false;
        tracing::debug!(track = %self.key, "Track writer finished");
    }
}

/// Writer for one relay group
pub struct MemoryGroupWriter {
    frames: watch::Sender<Vec<Bytes>>,
}

impl GroupWriter for MemoryGroupWriter {
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.frames.send_modify(|frames| frames.push(frame));
        Ok(())
    }

    fn close(self) -> Result<(), TransportError> {
        // Dropping the sender ends the group for every reader
        Ok(())
    }
}

/// Reader for one relay track
pub struct MemoryTrackReader {
    key: TrackKey,
    name: String,
    groups: broadcast::Receiver<SharedGroup>,
    pending: Option<SharedGroup>,
    finished: watch::Receiver<bool>,
    error: Option<TransportError>,
}

impl MemoryTrackReader {
    fn group_reader(group: SharedGroup) -> MemoryGroupReader {
        MemoryGroupReader {
            sequence: group.sequence,
            frames: group.frames,
            index: 0,
            cancelled: false,
        }
    }

    /// Take whatever is still queued once the writer has finished
    fn drain(&mut self) -> Option<MemoryGroupReader> {
        loop {
            match self.groups.try_recv() {
                Ok(group) => return Some(Self::group_reader(group)),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::debug!(track = %self.key, skipped, "Reader lagged, skipping groups");
                }
                Err(_) => return None,
            }
        }
    }
}

impl TrackReader for MemoryTrackReader {
    type Group = MemoryGroupReader;

    fn track_name(&self) -> &str {
        &self.name
    }

    async fn accept_group(&mut self) -> Result<Option<MemoryGroupReader>, TransportError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        if let Some(group) = self.pending.take() {
            return Ok(Some(Self::group_reader(group)));
        }

        loop {
            let finished = *self.finished.borrow_and_update();
            if finished {
                return Ok(self.drain());
            }

            tokio::select! {
                biased;
                result = self.groups.recv() => match result {
                    Ok(group) => return Ok(Some(Self::group_reader(group))),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(track = %self.key, skipped, "Reader lagged, skipping groups");
                    }
                    Err(RecvError::Closed) => return Ok(None),
                },
                changed = self.finished.changed() => {
                    if changed.is_err() {
                        return Ok(self.drain());
                    }
                }
            }
        }
    }

    fn close_with_error(&mut self, code: u32, reason: &str) {
        tracing::debug!(track = %self.key, code, reason, "Track reader closed");
        self.pending = None;
        self.error = Some(TransportError::Reset {
            code,
            reason: reason.to_string(),
        });
    }
}

/// Reader for one relay group
#[derive(Debug)]
pub struct MemoryGroupReader {
    sequence: u64,
    frames: watch::Receiver<Vec<Bytes>>,
    index: usize,
    cancelled: bool,
}

impl MemoryGroupReader {
    fn next_buffered(&mut self) -> Option<Bytes> {
        let frame = self.frames.borrow_and_update().get(self.index).cloned();
        if frame.is_some() {
            self.index += 1;
        }
        frame
    }
}

impl GroupReader for MemoryGroupReader {
    fn sequence(&self) -> u64 {
        self.sequence
    }

    async fn read_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        if self.cancelled {
            return Err(TransportError::Closed);
        }

        loop {
            if let Some(frame) = self.next_buffered() {
                return Ok(Some(frame));
            }

            // Err means the writer is gone: the group is complete
            if self.frames.changed().await.is_err() {
                return Ok(self.next_buffered());
            }
        }
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }
}
