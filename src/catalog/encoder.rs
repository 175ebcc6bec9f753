//! Catalog encoder
//!
//! Holds the working set of [`TrackCatalog`]s for one participant and writes
//! it out as a self-contained group on demand.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use super::track::TrackCatalog;
use super::wire::{self, CatalogInit};
use crate::config::CatalogConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::stats::metrics::EncoderCounters;
use crate::stats::EncoderStats;
use crate::transport::{GroupWriter, TrackWriter};

/// Serializes the current track set into catalog groups
///
/// `set` may be called from anywhere; `encode_to` must not run concurrently
/// with itself for the same encoder (one group in flight per catalog).
pub struct CatalogEncoder {
    init: CatalogInit,

    /// Working set in insertion order; names are unique
    tracks: Mutex<Vec<TrackCatalog>>,

    /// Sequence number for the next group
    next_group: AtomicU64,

    closed: AtomicBool,

    counters: EncoderCounters,
}

impl CatalogEncoder {
    /// Create an encoder writing the given protocol version
    pub fn new(version: impl Into<String>) -> Self {
        Self::with_init(CatalogInit::new(version))
    }

    /// Create an encoder from configuration
    pub fn with_config(config: &CatalogConfig) -> Self {
        let mut init = CatalogInit::new(config.version.clone());
        init.schema = config.schema_url.clone();
        Self::with_init(init)
    }

    fn with_init(init: CatalogInit) -> Self {
        Self {
            init,
            tracks: Mutex::new(Vec::new()),
            next_group: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            counters: EncoderCounters::default(),
        }
    }

    /// Protocol version written into every init frame
    pub fn version(&self) -> &str {
        &self.init.version
    }

    /// Replace the working set with exactly `tracks`
    ///
    /// Catalogs that have already ended are skipped. If a name appears more
    /// than once, the last one wins.
    pub fn set<I>(&self, tracks: I)
    where
        I: IntoIterator<Item = TrackCatalog>,
    {
        if self.is_closed() {
            tracing::debug!("Ignoring catalog update on closed encoder");
            return;
        }

        let mut next: Vec<TrackCatalog> = Vec::new();

        for track in tracks {
            if !track.is_active() {
                tracing::trace!(track = track.name(), "Skipping ended track");
                continue;
            }

            match next.iter().position(|t| t.name() == track.name()) {
                Some(pos) => {
                    tracing::warn!(track = track.name(), "Duplicate track name in catalog update");
                    next[pos] = track;
                }
                None => next.push(track),
            }
        }

        tracing::debug!(tracks = next.len(), "Catalog working set updated");
        *self.tracks.lock() = next;
    }

    /// Current working set (ended tracks included until the next `set`)
    pub fn tracks(&self) -> Vec<TrackCatalog> {
        self.tracks.lock().clone()
    }

    /// Serialize the current snapshot: the init frame, then one frame per
    /// track that is still active
    pub fn frames(&self) -> Result<(Bytes, Vec<Bytes>)> {
        let init = wire::encode_init(&self.init)?;

        let tracks = self.tracks.lock();
        let entries = tracks
            .iter()
            .filter(|track| track.is_active())
            .map(|track| wire::encode_entry(true, track.descriptor()))
            .collect::<Result<Vec<_>>>()?;

        Ok((init, entries))
    }

    /// Publish the current snapshot as one new group on `writer`
    ///
    /// Returns the sequence number of the group that was written.
    pub async fn encode_to<W: TrackWriter>(&self, ctx: &Context, writer: &mut W) -> Result<u64> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let (init, entries) = self.frames()?;
        let sequence = self.next_group.fetch_add(1, Ordering::Relaxed);
        let frames = entries.len() as u64 + 1;

        match Self::write_group(ctx, writer, sequence, init, entries).await {
            Ok(()) => {
                self.counters.group_written(frames);
                tracing::debug!(
                    track = writer.track_name(),
                    group = sequence,
                    frames = frames,
                    "Catalog group written"
                );
                Ok(sequence)
            }
            Err(e) => {
                self.counters.failure();
                tracing::debug!(
                    track = writer.track_name(),
                    group = sequence,
                    error = %e,
                    "Catalog group failed"
                );
                Err(e)
            }
        }
    }

    async fn write_group<W: TrackWriter>(
        ctx: &Context,
        writer: &mut W,
        sequence: u64,
        init: Bytes,
        entries: Vec<Bytes>,
    ) -> Result<()> {
        let mut group = ctx
            .run(writer.open_group(sequence))
            .await?
            .map_err(Error::OpenGroup)?;

        ctx.run(group.write_frame(init))
            .await?
            .map_err(Error::WriteInit)?;

        for entry in entries {
            ctx.run(group.write_frame(entry))
                .await?
                .map_err(Error::WriteTracks)?;
        }

        group.close().map_err(Error::WriteTracks)
    }

    /// End every tracked catalog and stop accepting updates
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let tracks = std::mem::take(&mut *self.tracks.lock());
        for track in &tracks {
            track.end();
        }

        tracing::debug!(tracks = tracks.len(), "Catalog encoder closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Encoder statistics
    pub fn stats(&self) -> EncoderStats {
        self.counters.snapshot()
    }
}
