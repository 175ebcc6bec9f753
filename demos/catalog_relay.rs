//! Catalog Relay - One publisher, one subscriber, an in-process relay
//!
//! Run with: cargo run --example catalog_relay
//!
//! This example demonstrates:
//! - Publishing tracks with `BroadcastPublisher` and serving the live catalog
//! - Discovering remote tracks with `BroadcastSubscriber`
//! - Subscribing a per-track decoder to a discovered track
//! - Catalog updates as tracks are added and removed
//!
//! # Architecture
//!
//! ```text
//!   BroadcastPublisher ──publish──►  MemoryRelay  ──subscribe──► BroadcastSubscriber
//!     "catalog" (live)               room/alice/*                  decode_to ─► log
//!     "camera"  (ticks)                                            subscribe_track("camera")
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use broadcast_catalog::catalog::{AudioConfig, VideoConfig};
use broadcast_catalog::transport::{GroupReader, GroupWriter, MemoryRelay, TrackReader, TrackWriter};
use broadcast_catalog::{
    BroadcastPublisher, BroadcastSubscriber, CatalogConfig, Context, Error, Result, TrackDecoder,
    TrackDescriptor, TrackEncoder,
};

const PATH: &str = "room/alice";

/// Writes a few single-frame groups per subscription
struct TickEncoder {
    ticks: u64,
}

impl TrackEncoder for TickEncoder {
    async fn encode_to<W: TrackWriter>(&self, ctx: &Context, writer: &mut W) -> Result<()> {
        for sequence in 0..self.ticks {
            let mut group = ctx
                .run(writer.open_group(sequence))
                .await?
                .map_err(Error::OpenGroup)?;

            let frame = Bytes::from(format!("tick {}", sequence));
            ctx.run(group.write_frame(frame))
                .await?
                .map_err(Error::WriteTracks)?;
            group.close().map_err(Error::WriteTracks)?;

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Logs every frame it receives
struct LogDecoder;

impl TrackDecoder for LogDecoder {
    async fn decode_from<R: TrackReader>(&self, ctx: &Context, reader: &mut R) -> Result<()> {
        while let Some(mut group) = ctx
            .run(reader.accept_group())
            .await?
            .map_err(Error::AcceptGroup)?
        {
            while let Some(frame) = ctx
                .run(group.read_frame())
                .await?
                .map_err(Error::ReadFrame)?
            {
                tracing::info!(
                    track = reader.track_name(),
                    group = group.sequence(),
                    frame = %String::from_utf8_lossy(&frame),
                    "Media frame"
                );
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("broadcast_catalog=info".parse()?)
                .add_directive("catalog_relay=info".parse()?),
        )
        .init();

    let ctx = Context::new();
    let relay = MemoryRelay::new();
    let config = CatalogConfig::default();

    // Publisher side
    let publisher = Arc::new(BroadcastPublisher::with_config(PATH, config.clone()));
    publisher.set_track(
        TrackDescriptor::video("camera", VideoConfig::new("vp8").dimensions(1280, 720)),
        TickEncoder { ticks: 3 },
    )?;
    publisher.set_track(
        TrackDescriptor::audio("mic", AudioConfig::new("opus").format(48_000, 2)),
        TickEncoder { ticks: 3 },
    )?;

    let catalog_task = tokio::spawn({
        let publisher = Arc::clone(&publisher);
        let ctx = ctx.clone();
        let mut writer = relay.publish(PATH, publisher.catalog_track())?;
        async move { publisher.serve_track(&ctx, &mut writer).await }
    });

    // Subscriber side
    let subscriber = Arc::new(
        BroadcastSubscriber::new(&ctx, Arc::new(relay.clone()), PATH, config).await?,
    );

    let (tx, mut snapshots) = mpsc::channel(16);
    let listener = tokio::spawn({
        let subscriber = Arc::clone(&subscriber);
        let ctx = ctx.clone();
        async move { subscriber.decode_to(&ctx, tx).await }
    });

    let printer = tokio::spawn(async move {
        while let Some(snapshot) = snapshots.recv().await {
            tracing::info!(
                group = snapshot.sequence,
                tracks = ?snapshot.names(),
                "Catalog snapshot"
            );
        }
    });

    // Follow the camera once it shows up
    let camera = tokio::spawn({
        let subscriber = Arc::clone(&subscriber);
        let ctx = ctx.clone();
        async move { subscriber.subscribe_track(&ctx, "camera", &LogDecoder).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut camera_writer = relay.publish(PATH, "camera")?;
    publisher.serve_track(&ctx, &mut camera_writer).await?;
    camera_writer.finish();
    camera.await??;

    // Change the track set; the subscriber sees a new snapshot each time
    publisher.remove_track("mic");
    tokio::time::sleep(Duration::from_millis(50)).await;
    publisher.set_track(
        TrackDescriptor::video("screen", VideoConfig::new("av1").framerate(30.0)),
        TickEncoder { ticks: 1 },
    )?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    tracing::info!(
        known = ?subscriber.tracks().iter().map(|t| t.name().to_string()).collect::<Vec<_>>(),
        "Remote tracks"
    );

    publisher.close().await;
    subscriber.close();

    catalog_task.await??;
    listener.await??;
    printer.await?;

    tracing::info!(stats = ?subscriber.stats(), "Done");
    Ok(())
}
