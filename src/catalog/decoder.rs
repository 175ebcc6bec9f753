//! Catalog decoder
//!
//! Reads catalog groups from a track and fans every parsed snapshot out to
//! all registered destinations.
//!
//! # Fan-out
//!
//! Snapshots go through a `tokio::sync::broadcast` channel. Each destination
//! owns a bounded queue; when a destination falls behind, its oldest queued
//! snapshots are dropped. The decode loop itself never waits on a
//! destination. Because every snapshot is complete, a destination that lost
//! some snapshots still converges on the newest state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};

use super::schema::SchemaRegistry;
use super::track::{RemoteTrack, TrackCatalog, TrackDescriptor};
use super::wire::{self, CatalogInit, TrackEntry};
use crate::config::{CatalogConfig, DEFAULT_FANOUT_CAPACITY};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::stats::metrics::DecoderCounters;
use crate::stats::DecoderStats;
use crate::transport::{GroupReader, TrackReader};

/// One decoded catalog group
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    /// Sequence of the group this snapshot came from
    pub sequence: u64,
    /// The publisher's init frame
    pub init: CatalogInit,
    /// Live tracks, in the order the publisher wrote them
    pub tracks: Vec<RemoteTrack>,
    /// Tracks the group explicitly reported as ended
    pub ended: Vec<TrackDescriptor>,
}

impl CatalogSnapshot {
    /// Find a live track by name
    pub fn track(&self, name: &str) -> Option<&RemoteTrack> {
        self.tracks.iter().find(|track| track.name() == name)
    }

    /// Names of the live tracks
    pub fn names(&self) -> Vec<&str> {
        self.tracks.iter().map(|track| track.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// Parses catalog groups and distributes the resulting snapshots
pub struct CatalogDecoder {
    version: String,
    registry: SchemaRegistry,

    snapshots: broadcast::Sender<CatalogSnapshot>,

    /// Live catalogs from the previous group, reconciled against the next one
    known: Mutex<Vec<TrackCatalog>>,

    closed: watch::Sender<bool>,
    closed_flag: AtomicBool,

    counters: Arc<DecoderCounters>,
}

impl CatalogDecoder {
    /// Create a decoder accepting only `version`
    pub fn new(version: impl Into<String>) -> Self {
        Self::build(version.into(), DEFAULT_FANOUT_CAPACITY)
    }

    /// Create a decoder from configuration
    pub fn with_config(config: &CatalogConfig) -> Self {
        Self::build(config.version.clone(), config.fanout_capacity)
    }

    fn build(version: String, fanout_capacity: usize) -> Self {
        let (snapshots, _) = broadcast::channel(fanout_capacity.max(1));
        let (closed, _) = watch::channel(false);

        Self {
            version,
            registry: SchemaRegistry::default(),
            snapshots,
            known: Mutex::new(Vec::new()),
            closed,
            closed_flag: AtomicBool::new(false),
            counters: Arc::new(DecoderCounters::default()),
        }
    }

    /// Use a custom schema registry for track configs
    pub fn with_registry(mut self, registry: SchemaRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Version this decoder accepts
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Read catalog groups from `reader` until the track ends or fails
    ///
    /// Returns `Ok(())` when the track finishes cleanly. Transport errors,
    /// version mismatches and malformed frames end the call; retrying is up
    /// to the caller.
    pub async fn decode_from<R: TrackReader>(&self, ctx: &Context, reader: &mut R) -> Result<()> {
        loop {
            if self.is_closed() {
                return Err(Error::Closed);
            }

            let group = ctx
                .run(reader.accept_group())
                .await?
                .map_err(Error::AcceptGroup)?;

            let Some(mut group) = group else {
                tracing::debug!(track = reader.track_name(), "Catalog track finished");
                return Ok(());
            };

            let sequence = group.sequence();
            let (init, entries) = match self.read_group(ctx, &mut group).await {
                Ok(parsed) => parsed,
                Err(e) => {
                    group.cancel();
                    tracing::debug!(
                        track = reader.track_name(),
                        group = sequence,
                        error = %e,
                        "Catalog group rejected"
                    );
                    return Err(e);
                }
            };

            self.counters.group_decoded(entries.len() as u64);
            let Some(snapshot) = self.reconcile(sequence, init, entries) else {
                return Err(Error::Closed);
            };

            tracing::debug!(
                track = reader.track_name(),
                group = sequence,
                tracks = snapshot.len(),
                ended = snapshot.ended.len(),
                "Catalog snapshot decoded"
            );

            self.publish(snapshot);
        }
    }

    async fn read_group<G: GroupReader>(
        &self,
        ctx: &Context,
        group: &mut G,
    ) -> Result<(CatalogInit, Vec<TrackEntry>)> {
        let first = ctx
            .run(group.read_frame())
            .await?
            .map_err(Error::ReadFrame)?
            .ok_or_else(|| Error::decode("group ended before catalog init", &[]))?;

        let init = wire::decode_init(&first)?;
        if init.version != self.version {
            return Err(Error::VersionMismatch {
                expected: self.version.clone(),
                received: init.version,
            });
        }

        let mut entries = Vec::new();
        while let Some(frame) = ctx
            .run(group.read_frame())
            .await?
            .map_err(Error::ReadFrame)?
        {
            entries.push(wire::decode_entry(&frame, &self.registry)?);
        }

        Ok((init, entries))
    }

    /// Turn parsed entries into a snapshot, carrying entities across groups
    ///
    /// A track announced again with an identical descriptor keeps its
    /// `TrackCatalog`. A track that disappeared, was reported inactive, or
    /// changed its descriptor has its previous entity ended.
    fn reconcile(
        &self,
        sequence: u64,
        init: CatalogInit,
        entries: Vec<TrackEntry>,
    ) -> Option<CatalogSnapshot> {
        let mut known = self.known.lock();

        // `close` sets the flag before draining `known` under this lock
        if self.is_closed() {
            return None;
        }

        let mut previous = std::mem::take(&mut *known);

        let mut tracks: Vec<TrackCatalog> = Vec::new();
        let mut ended = Vec::new();

        for entry in entries {
            if !entry.active {
                ended.push(entry.track);
                continue;
            }

            if tracks.iter().any(|track| track.name() == entry.track.name()) {
                tracing::warn!(
                    track = entry.track.name(),
                    group = sequence,
                    "Duplicate track name in catalog group, keeping the first"
                );
                continue;
            }

            let catalog = match previous
                .iter()
                .position(|track| track.descriptor() == &entry.track)
            {
                Some(pos) => previous.swap_remove(pos),
                None => TrackCatalog::new(entry.track),
            };
            tracks.push(catalog);
        }

        for stale in previous {
            if stale.end() {
                tracing::debug!(track = stale.name(), group = sequence, "Remote track ended");
            }
        }

        let views = tracks.iter().cloned().map(RemoteTrack::new).collect();
        *known = tracks;

        Some(CatalogSnapshot {
            sequence,
            init,
            tracks: views,
            ended,
        })
    }

    fn publish(&self, snapshot: CatalogSnapshot) {
        self.counters.snapshot_published();
        // No destinations is fine: the next group carries the full state again
        let _ = self.snapshots.send(snapshot);
    }

    /// Register a destination and return its receiving end
    ///
    /// Registration happens immediately, so every snapshot published after
    /// this call is observed by the receiver.
    pub fn register(&self) -> SnapshotReceiver {
        SnapshotReceiver {
            snapshots: self.snapshots.subscribe(),
            closed: self.closed.subscribe(),
            counters: Arc::clone(&self.counters),
        }
    }

    /// Forward every future snapshot to `destination`
    ///
    /// Runs until `ctx` is cancelled, the decoder is closed, or the
    /// destination's receiver is dropped. The registration is removed when
    /// this returns.
    pub async fn decode_to(
        &self,
        ctx: &Context,
        destination: mpsc::Sender<CatalogSnapshot>,
    ) -> Result<()> {
        self.register().forward(ctx, destination).await
    }

    /// Number of currently registered destinations
    pub fn destination_count(&self) -> usize {
        self.snapshots.receiver_count()
    }

    /// Live tracks as of the last decoded group
    pub fn tracks(&self) -> Vec<RemoteTrack> {
        self.known.lock().iter().cloned().map(RemoteTrack::new).collect()
    }

    /// Stop decoding, end all known tracks and release every destination
    pub fn close(&self) {
        if self.closed_flag.swap(true, Ordering::SeqCst) {
            return;
        }

        self.closed.send_replace(true);

        let known = std::mem::take(&mut *self.known.lock());
        for track in &known {
            track.end();
        }

        tracing::debug!(tracks = known.len(), "Catalog decoder closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed_flag.load(Ordering::SeqCst)
    }

    /// Decoder statistics
    pub fn stats(&self) -> DecoderStats {
        self.counters.snapshot()
    }
}

/// Receiving end of one fan-out registration
pub struct SnapshotReceiver {
    snapshots: broadcast::Receiver<CatalogSnapshot>,
    closed: watch::Receiver<bool>,
    counters: Arc<DecoderCounters>,
}

impl SnapshotReceiver {
    /// Wait for the next snapshot
    ///
    /// Returns `None` once `ctx` is cancelled or the decoder is closed.
    pub async fn recv(&mut self, ctx: &Context) -> Option<CatalogSnapshot> {
        loop {
            let closed = *self.closed.borrow_and_update();
            if closed {
                return None;
            }

            tokio::select! {
                biased;
                _ = ctx.cancelled() => return None,
                changed = self.closed.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                result = self.snapshots.recv() => match result {
                    Ok(snapshot) => return Some(snapshot),
                    Err(RecvError::Lagged(skipped)) => {
                        self.counters.snapshots_dropped(skipped);
                        tracing::warn!(skipped, "Catalog destination lagging, dropped oldest snapshots");
                    }
                    Err(RecvError::Closed) => return None,
                },
            }
        }
    }

    /// Forward snapshots into an mpsc channel until cancelled or closed
    pub async fn forward(
        mut self,
        ctx: &Context,
        destination: mpsc::Sender<CatalogSnapshot>,
    ) -> Result<()> {
        while let Some(snapshot) = self.recv(ctx).await {
            let sent = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Ok(()),
                sent = destination.send(snapshot) => sent,
            };

            if sent.is_err() {
                tracing::debug!("Catalog destination dropped");
                break;
            }
        }

        Ok(())
    }
}
