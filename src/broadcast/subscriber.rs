//! Broadcast subscriber
//!
//! Follows one remote participant: subscribes to their catalog track on
//! construction, keeps the discovered track set current in the background,
//! and binds caller-supplied decoders to individual remote tracks on demand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::codec::TrackDecoder;
use crate::catalog::{CatalogDecoder, CatalogSnapshot, RemoteTrack, SnapshotReceiver};
use crate::config::CatalogConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::stats::DecoderStats;
use crate::transport::{Session, TrackReader};

/// Application error code sent when the peer's catalog is unusable
pub const CATALOG_PROTOCOL_ERROR: u32 = 0x10;

/// One remote participant's broadcast, as seen by a subscriber
pub struct BroadcastSubscriber<S: Session> {
    path: String,
    name: String,
    session: Arc<S>,
    decoder: Arc<CatalogDecoder>,

    /// Cancelled on close; parent of every background task
    ctx: Context,

    /// Background catalog task, taken by `catalog_closed`
    task: Mutex<Option<JoinHandle<Result<()>>>>,

    closed: AtomicBool,
}

impl<S: Session> BroadcastSubscriber<S> {
    /// Subscribe to the catalog at `path` and start decoding it
    ///
    /// The catalog subscription happens before this returns, so a refused
    /// subscription is reported here. Decoding continues in a background task
    /// bound to a child of `ctx`.
    pub async fn new(
        ctx: &Context,
        session: Arc<S>,
        path: impl Into<String>,
        config: CatalogConfig,
    ) -> Result<Self> {
        let path = path.into();
        let name = display_name(&path).to_string();
        let ctx = ctx.child();

        let mut reader = ctx
            .run(session.subscribe(&path, &config.catalog_track))
            .await?
            .map_err(|source| Error::Subscribe {
                path: path.clone(),
                track: config.catalog_track.clone(),
                source,
            })?;

        let decoder = Arc::new(CatalogDecoder::with_config(&config));

        // Registered before the task starts so the first snapshot is observed
        let listener = decoder.register();

        let task = tokio::spawn({
            let decoder = Arc::clone(&decoder);
            let ctx = ctx.clone();
            let name = name.clone();

            async move {
                let decode = async {
                    let result = decoder.decode_from(&ctx, &mut reader).await;

                    match &result {
                        Err(e) if e.is_protocol() => {
                            tracing::warn!(broadcast = %name, error = %e, "Rejecting remote catalog");
                            reader.close_with_error(CATALOG_PROTOCOL_ERROR, &e.to_string());
                        }
                        Err(e) => {
                            tracing::debug!(broadcast = %name, error = %e, "Catalog decode stopped");
                        }
                        Ok(()) => {
                            tracing::debug!(broadcast = %name, "Remote catalog finished");
                        }
                    }

                    decoder.close();
                    result
                };

                let (result, ()) = tokio::join!(decode, watch_tracks(&ctx, &name, listener));
                result
            }
        });

        tracing::info!(broadcast = %name, path = %path, "Subscribed to broadcast");

        Ok(Self {
            path,
            name,
            session,
            decoder,
            ctx,
            task: Mutex::new(Some(task)),
            closed: AtomicBool::new(false),
        })
    }

    /// Display name of the remote participant
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The catalog decoder fed by this subscription
    pub fn catalog(&self) -> &CatalogDecoder {
        &self.decoder
    }

    /// Remote tracks known as of the last catalog group
    pub fn tracks(&self) -> Vec<RemoteTrack> {
        self.decoder.tracks()
    }

    /// Look up a known remote track by name
    pub fn track(&self, name: &str) -> Option<RemoteTrack> {
        self.decoder.tracks().into_iter().find(|t| t.name() == name)
    }

    /// Register for every future catalog snapshot
    pub fn register(&self) -> SnapshotReceiver {
        self.decoder.register()
    }

    /// Forward every future catalog snapshot to `destination`
    pub async fn decode_to(
        &self,
        ctx: &Context,
        destination: mpsc::Sender<CatalogSnapshot>,
    ) -> Result<()> {
        self.decoder.decode_to(ctx, destination).await
    }

    /// Subscribe to a remote track and feed it to `decoder`
    ///
    /// A refused subscription is returned without invoking the decoder.
    /// Otherwise runs until the decoder returns, `ctx` is cancelled, or this
    /// subscriber is closed.
    pub async fn subscribe_track<D: TrackDecoder>(
        &self,
        ctx: &Context,
        name: &str,
        decoder: &D,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let mut reader = ctx
            .run(self.session.subscribe(&self.path, name))
            .await?
            .map_err(|source| Error::Subscribe {
                path: self.path.clone(),
                track: name.to_string(),
                source,
            })?;

        tracing::debug!(broadcast = %self.name, track = %name, "Subscribed to remote track");

        tokio::select! {
            biased;
            _ = self.ctx.cancelled() => Err(Error::Closed),
            result = decoder.decode_from(ctx, &mut reader) => result,
        }
    }

    /// Wait for the background catalog task and return its outcome
    ///
    /// Only the first call observes the outcome; later calls return `Ok(())`.
    pub async fn catalog_closed(&self) -> Result<()> {
        let task = self.task.lock().take();
        let Some(task) = task else {
            return Ok(());
        };

        match task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(broadcast = %self.name, error = %e, "Catalog task failed");
                Err(Error::Closed)
            }
        }
    }

    /// Decoder statistics for the catalog track
    pub fn stats(&self) -> DecoderStats {
        self.decoder.stats()
    }

    /// Stop decoding the catalog and release every listener
    ///
    /// Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.ctx.cancel();
        self.decoder.close();

        tracing::info!(broadcast = %self.name, "Broadcast subscription closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl<S: Session> Drop for BroadcastSubscriber<S> {
    fn drop(&mut self) {
        self.ctx.cancel();
    }
}

/// Last non-empty path segment, e.g. `room/alice` → `alice`
fn display_name(path: &str) -> &str {
    path.rsplit('/').find(|s| !s.is_empty()).unwrap_or(path)
}

/// Log remote tracks as they appear and disappear
async fn watch_tracks(ctx: &Context, broadcast: &str, mut listener: SnapshotReceiver) {
    let mut known: Vec<RemoteTrack> = Vec::new();

    while let Some(snapshot) = listener.recv(ctx).await {
        for track in &snapshot.tracks {
            if !known.iter().any(|k| RemoteTrack::ptr_eq(k, track)) {
                tracing::info!(
                    broadcast = %broadcast,
                    track = track.name(),
                    schema = track.descriptor().schema(),
                    "Remote track discovered"
                );
            }
        }
        for track in &known {
            if !track.is_active() {
                tracing::info!(broadcast = %broadcast, track = track.name(), "Remote track ended");
            }
        }

        known = snapshot.tracks;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::catalog::{CatalogEncoder, TrackCatalog, TrackDescriptor, VideoConfig};
    use crate::transport::memory::{MemoryRelay, MemoryTrackReader};
    use crate::transport::TransportError;

    /// Relay session that refuses everything except the catalog track
    struct CatalogOnlySession {
        relay: MemoryRelay,
        refuse_catalog: bool,
    }

    impl Session for CatalogOnlySession {
        type Reader = MemoryTrackReader;

        async fn subscribe(
            &self,
            path: &str,
            track: &str,
        ) -> std::result::Result<MemoryTrackReader, TransportError> {
            if track != crate::catalog::CATALOG_TRACK || self.refuse_catalog {
                return Err(TransportError::Other("refused".into()));
            }
            Ok(self.relay.subscribe_track(path, track))
        }
    }

    struct CountingDecoder {
        calls: AtomicUsize,
    }

    impl TrackDecoder for CountingDecoder {
        async fn decode_from<R: TrackReader>(&self, _ctx: &Context, _reader: &mut R) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn video(name: &str) -> TrackCatalog {
        TrackCatalog::new(TrackDescriptor::video(name, VideoConfig::new("vp8")))
    }

    async fn recv(rx: &mut SnapshotReceiver, ctx: &Context) -> CatalogSnapshot {
        tokio::time::timeout(Duration::from_secs(1), rx.recv(ctx))
            .await
            .expect("no catalog snapshot")
            .expect("decoder closed")
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("room/alice"), "alice");
        assert_eq!(display_name("room/alice/"), "alice");
        assert_eq!(display_name("alice"), "alice");
        assert_eq!(display_name(""), "");
    }

    #[tokio::test]
    async fn test_discovers_remote_tracks() {
        let relay = MemoryRelay::new();
        let ctx = Context::new();
        let mut writer = relay.publish("room/alice", "catalog").unwrap();

        let subscriber = BroadcastSubscriber::new(
            &ctx,
            Arc::new(relay.clone()),
            "room/alice",
            CatalogConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(subscriber.name(), "alice");

        let mut rx = subscriber.register();
        let encoder = CatalogEncoder::new("1");
        encoder.set([video("camera"), video("screen")]);
        encoder.encode_to(&ctx, &mut writer).await.unwrap();

        let snapshot = recv(&mut rx, &ctx).await;
        assert_eq!(snapshot.names(), vec!["camera", "screen"]);

        let names: Vec<String> = subscriber.tracks().iter().map(|t| t.name().to_string()).collect();
        assert_eq!(names, vec!["camera", "screen"]);
        assert!(subscriber.track("camera").is_some());
        assert!(subscriber.track("mic").is_none());
        assert_eq!(subscriber.stats().snapshots_published, 1);

        subscriber.close();
    }

    #[tokio::test]
    async fn test_refused_catalog_subscription() {
        let session = CatalogOnlySession {
            relay: MemoryRelay::new(),
            refuse_catalog: true,
        };

        let result = BroadcastSubscriber::new(
            &Context::new(),
            Arc::new(session),
            "room/alice",
            CatalogConfig::default(),
        )
        .await;

        let Err(err) = result else {
            panic!("catalog subscription should be refused");
        };
        assert!(matches!(err, Error::Subscribe { ref track, .. } if track == "catalog"));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_refused_track_skips_decoder() {
        let session = CatalogOnlySession {
            relay: MemoryRelay::new(),
            refuse_catalog: false,
        };
        let ctx = Context::new();
        let subscriber = BroadcastSubscriber::new(&ctx, Arc::new(session), "room/alice", CatalogConfig::default())
            .await
            .unwrap();

        let decoder = CountingDecoder {
            calls: AtomicUsize::new(0),
        };
        let err = assert_err!(subscriber.subscribe_track(&ctx, "camera", &decoder).await);

        assert!(matches!(err, Error::Subscribe { ref track, .. } if track == "camera"));
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_subscribe_track_runs_decoder() {
        let relay = MemoryRelay::new();
        let ctx = Context::new();
        let subscriber = BroadcastSubscriber::new(&ctx, Arc::new(relay.clone()), "room/alice", CatalogConfig::default())
            .await
            .unwrap();

        // A second catalog-shaped track, followed with a plain catalog decoder
        let mut writer = relay.publish("room/alice", "roster").unwrap();
        let encoder = CatalogEncoder::new("1");
        encoder.set([video("bob")]);
        encoder.encode_to(&ctx, &mut writer).await.unwrap();

        let roster = CatalogDecoder::new("1");
        let mut rx = roster.register();

        let drive = async {
            let snapshot = recv(&mut rx, &ctx).await;
            writer.finish();
            snapshot
        };
        let (result, snapshot) = tokio::join!(subscriber.subscribe_track(&ctx, "roster", &roster), drive);

        assert_ok!(result);
        assert_eq!(snapshot.names(), vec!["bob"]);
    }

    #[tokio::test]
    async fn test_close_stops_delivery() {
        let relay = MemoryRelay::new();
        let ctx = Context::new();
        let mut writer = relay.publish("room/alice", "catalog").unwrap();
        let subscriber = Arc::new(
            BroadcastSubscriber::new(&ctx, Arc::new(relay.clone()), "room/alice", CatalogConfig::default())
                .await
                .unwrap(),
        );

        let (tx, mut updates) = mpsc::channel(8);
        let destination = tokio::spawn({
            let subscriber = Arc::clone(&subscriber);
            let ctx = ctx.clone();
            async move { subscriber.decode_to(&ctx, tx).await }
        });
        while subscriber.catalog().destination_count() < 2 {
            tokio::task::yield_now().await;
        }

        let encoder = CatalogEncoder::new("1");
        encoder.set([video("camera")]);
        encoder.encode_to(&ctx, &mut writer).await.unwrap();
        let snapshot = tokio::time::timeout(Duration::from_secs(1), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.names(), vec!["camera"]);
        let camera = subscriber.track("camera").unwrap();

        subscriber.close();
        subscriber.close();

        assert_ok!(destination.await.unwrap());
        assert!(!camera.is_active());
        assert!(subscriber.tracks().is_empty());

        encoder.encode_to(&ctx, &mut writer).await.unwrap();
        assert!(updates.recv().await.is_none());

        assert!(subscriber.catalog_closed().await.is_err());
        assert_ok!(subscriber.catalog_closed().await);

        let decoder = CountingDecoder {
            calls: AtomicUsize::new(0),
        };
        let err = assert_err!(subscriber.subscribe_track(&ctx, "camera", &decoder).await);
        assert!(matches!(err, Error::Closed));
    }

    #[tokio::test]
    async fn test_version_mismatch_rejects_catalog() {
        let relay = MemoryRelay::new();
        let ctx = Context::new();
        let mut writer = relay.publish("room/alice", "catalog").unwrap();

        let encoder = CatalogEncoder::new("2");
        encoder.set([video("camera")]);
        encoder.encode_to(&ctx, &mut writer).await.unwrap();

        let subscriber = BroadcastSubscriber::new(&ctx, Arc::new(relay.clone()), "room/alice", CatalogConfig::default())
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), subscriber.catalog_closed())
            .await
            .unwrap();
        let err = assert_err!(result);
        assert!(matches!(err, Error::VersionMismatch { .. }));
        assert!(subscriber.catalog().is_closed());
        assert!(subscriber.tracks().is_empty());
    }
}
