//! Broadcast publisher
//!
//! Owns one participant's outgoing tracks and keeps its catalog in step with
//! them. Inbound subscriptions arrive as track writers and are dispatched by
//! track name: the reserved catalog track is served by the catalog encoder,
//! everything else by the registered per-track encoder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use super::codec::TrackEncoder;
use crate::catalog::{CatalogEncoder, SchemaRegistry, TrackCatalog, TrackDescriptor};
use crate::config::CatalogConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::transport::TrackWriter;

/// A published track: its catalog entity and the encoder serving it
struct PublishedTrack<E> {
    catalog: TrackCatalog,
    encoder: Arc<E>,
}

/// One participant's outgoing broadcast
pub struct BroadcastPublisher<E: TrackEncoder> {
    name: String,
    config: CatalogConfig,
    catalog: CatalogEncoder,

    /// Descriptors must parse under this registry before they are announced
    registry: SchemaRegistry,

    /// Published tracks in registration order
    ///
    /// The catalog encoder is updated while this lock is held, so the
    /// announced set always matches the map.
    tracks: RwLock<Vec<PublishedTrack<E>>>,

    /// Bumped on every catalog change; wakes catalog serving loops
    revision: watch::Sender<u64>,

    closed: AtomicBool,
}

impl<E: TrackEncoder> BroadcastPublisher<E> {
    /// Create a publisher with default configuration
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CatalogConfig::default())
    }

    /// Create a publisher with custom configuration
    pub fn with_config(name: impl Into<String>, config: CatalogConfig) -> Self {
        let (revision, _) = watch::channel(0);

        Self {
            name: name.into(),
            catalog: CatalogEncoder::with_config(&config),
            config,
            registry: SchemaRegistry::default(),
            tracks: RwLock::new(Vec::new()),
            revision,
            closed: AtomicBool::new(false),
        }
    }

    /// Validate descriptors against a custom schema registry
    pub fn with_registry(mut self, registry: SchemaRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the reserved catalog track
    pub fn catalog_track(&self) -> &str {
        &self.config.catalog_track
    }

    /// The catalog encoder backing this broadcast
    pub fn catalog(&self) -> &CatalogEncoder {
        &self.catalog
    }

    /// Check whether a track is published under `name`
    pub fn has_track(&self, name: &str) -> bool {
        self.tracks.read().iter().any(|t| t.catalog.name() == name)
    }

    /// Get the encoder published under `name`
    pub fn get_track(&self, name: &str) -> Option<Arc<E>> {
        self.tracks
            .read()
            .iter()
            .find(|t| t.catalog.name() == name)
            .map(|t| Arc::clone(&t.encoder))
    }

    /// Names of all published tracks, in registration order
    pub fn track_names(&self) -> Vec<String> {
        self.tracks
            .read()
            .iter()
            .map(|t| t.catalog.name().to_string())
            .collect()
    }

    /// Publish a track and announce it in the catalog
    ///
    /// Replacing an existing name ends the previous catalog entity and
    /// returns the encoder it was served by. A descriptor whose config would
    /// not parse on the receiving side is rejected with `Error::Decode`.
    pub fn set_track(&self, descriptor: TrackDescriptor, encoder: E) -> Result<Option<Arc<E>>> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        if descriptor.name() == self.config.catalog_track {
            return Err(Error::ReservedTrack(descriptor.name().to_string()));
        }
        descriptor.validate(&self.registry)?;

        let name = descriptor.name().to_string();
        let published = PublishedTrack {
            catalog: TrackCatalog::new(descriptor),
            encoder: Arc::new(encoder),
        };

        let replaced = {
            let mut tracks = self.tracks.write();

            // `close` flips the flag before draining the map under this lock
            if self.is_closed() {
                return Err(Error::Closed);
            }

            let replaced = match tracks.iter().position(|t| t.catalog.name() == name) {
                Some(pos) => Some(std::mem::replace(&mut tracks[pos], published)),
                None => {
                    tracks.push(published);
                    None
                }
            };
            if let Some(old) = &replaced {
                old.catalog.end();
            }
            self.announce(&tracks);
            replaced
        };

        tracing::info!(
            broadcast = %self.name,
            track = %name,
            replaced = replaced.is_some(),
            "Track published"
        );

        self.bump_revision();
        Ok(replaced.map(|old| old.encoder))
    }

    /// Stop publishing a track and mark its catalog entry ended
    pub fn remove_track(&self, name: &str) -> Option<Arc<E>> {
        let removed = {
            let mut tracks = self.tracks.write();
            let pos = tracks.iter().position(|t| t.catalog.name() == name)?;
            let removed = tracks.remove(pos);
            removed.catalog.end();
            self.announce(&tracks);
            removed
        };

        tracing::info!(broadcast = %self.name, track = %name, "Track removed");

        self.bump_revision();
        Some(removed.encoder)
    }

    /// Push the live track set into the catalog and wake catalog subscribers
    pub fn sync_catalog(&self) {
        if self.is_closed() {
            return;
        }

        self.announce(&self.tracks.read());
        self.bump_revision();
    }

    /// Replace the catalog's working set; callers hold the `tracks` lock
    fn announce(&self, tracks: &[PublishedTrack<E>]) {
        self.catalog.set(tracks.iter().map(|t| t.catalog.clone()));
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    /// Serve an inbound subscription
    ///
    /// The catalog track gets the current snapshot immediately and a fresh
    /// group after every catalog change, until `ctx` is cancelled or the
    /// publisher closes. Any other name is handed to its track encoder.
    pub async fn serve_track<W: TrackWriter>(&self, ctx: &Context, writer: &mut W) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        if writer.track_name() == self.config.catalog_track {
            return self.serve_catalog(ctx, writer).await;
        }

        let name = writer.track_name().to_string();
        let encoder = self
            .get_track(&name)
            .ok_or_else(|| Error::TrackNotFound(name.clone()))?;

        tracing::debug!(broadcast = %self.name, track = %name, "Serving track");
        encoder.encode_to(ctx, writer).await
    }

    async fn serve_catalog<W: TrackWriter>(&self, ctx: &Context, writer: &mut W) -> Result<()> {
        let mut revision = self.revision.subscribe();

        tracing::debug!(broadcast = %self.name, "Serving catalog");

        loop {
            // Mark the current revision seen before encoding it
            revision.borrow_and_update();

            if self.is_closed() {
                return Ok(());
            }

            match self.catalog.encode_to(ctx, writer).await {
                Ok(_) => {}
                // Closed between the check above and the encode
                Err(Error::Closed) => return Ok(()),
                Err(e) => return Err(e),
            }

            if ctx.run(revision.changed()).await?.is_err() {
                return Ok(());
            }
        }
    }

    /// Close the catalog and release every track encoder
    ///
    /// Idempotent. Failures while closing encoders are logged and ignored.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.catalog.close();
        let tracks = std::mem::take(&mut *self.tracks.write());

        // Wake catalog serving loops so they observe the close
        self.bump_revision();

        for track in &tracks {
            track.catalog.end();
            if let Err(e) = track.encoder.close().await {
                tracing::warn!(
                    broadcast = %self.name,
                    track = track.catalog.name(),
                    error = %e,
                    "Failed to close track encoder"
                );
            }
        }

        tracing::info!(broadcast = %self.name, tracks = tracks.len(), "Broadcast closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
