//! Track descriptors and their catalog lifecycle

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use super::schema::{AudioConfig, ProfileConfig, SchemaRegistry, TrackConfig, VideoConfig};
use crate::error::{Error, Result};

/// Immutable description of one published track
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackDescriptor {
    name: String,
    schema: String,
    config: TrackConfig,
}

impl TrackDescriptor {
    /// Create a descriptor with an explicit schema tag
    pub fn new(name: impl Into<String>, schema: impl Into<String>, config: TrackConfig) -> Self {
        Self {
            name: name.into(),
            schema: schema.into(),
            config,
        }
    }

    /// Video track descriptor
    pub fn video(name: impl Into<String>, config: VideoConfig) -> Self {
        Self::typed(name, TrackConfig::Video(config))
    }

    /// Audio track descriptor
    pub fn audio(name: impl Into<String>, config: AudioConfig) -> Self {
        Self::typed(name, TrackConfig::Audio(config))
    }

    /// Profile track descriptor
    pub fn profile(name: impl Into<String>, config: ProfileConfig) -> Self {
        Self::typed(name, TrackConfig::Profile(config))
    }

    /// Descriptor for a schema whose config is passed through untouched
    pub fn opaque(name: impl Into<String>, schema: impl Into<String>, config: Value) -> Self {
        Self::new(name, schema, TrackConfig::Opaque(config))
    }

    fn typed(name: impl Into<String>, config: TrackConfig) -> Self {
        let schema = config.schema().unwrap_or_default();
        Self::new(name, schema, config)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn config(&self) -> &TrackConfig {
        &self.config
    }

    /// Check that a peer decoding with `registry` would accept this descriptor
    ///
    /// A typed config must sit under its own schema tag, and the config must
    /// parse under the tag the way the receiving side parses it.
    pub fn validate(&self, registry: &SchemaRegistry) -> Result<()> {
        let raw = serde_json::to_value(&self.config)?;

        if let Some(implied) = self.config.schema() {
            if implied != self.schema {
                return Err(Error::decode(
                    format!("{implied} config under schema {:?}", self.schema),
                    raw.to_string().as_bytes(),
                ));
            }
        }

        registry.parse(&self.schema, raw.clone()).map_err(|e| {
            Error::decode(
                format!("invalid config for schema {:?}: {e}", self.schema),
                raw.to_string().as_bytes(),
            )
        })?;

        Ok(())
    }
}

struct TrackCatalogInner {
    descriptor: TrackDescriptor,
    /// `true` while live; flips to `false` exactly once
    active: watch::Sender<bool>,
}

/// A track descriptor plus its liveness
///
/// Cloning yields another handle to the same entity: ending one clone ends
/// them all. Once ended, a catalog is never reactivated; a track restarted
/// under the same name is a new `TrackCatalog`.
#[derive(Clone)]
pub struct TrackCatalog {
    inner: Arc<TrackCatalogInner>,
}

impl TrackCatalog {
    /// Create a new, active catalog entry
    pub fn new(descriptor: TrackDescriptor) -> Self {
        let (active, _) = watch::channel(true);
        Self {
            inner: Arc::new(TrackCatalogInner { descriptor, active }),
        }
    }

    pub fn descriptor(&self) -> &TrackDescriptor {
        &self.inner.descriptor
    }

    pub fn name(&self) -> &str {
        self.inner.descriptor.name()
    }

    /// Whether the track is still live
    pub fn is_active(&self) -> bool {
        *self.inner.active.borrow()
    }

    /// Mark the track as ended
    ///
    /// Returns `true` only for the call that actually ended it.
    pub fn end(&self) -> bool {
        self.inner.active.send_if_modified(|active| {
            if *active {
                *active = false;
                true
            } else {
                false
            }
        })
    }

    /// Wait until the track has ended
    pub async fn ended(&self) {
        let mut rx = self.inner.active.subscribe();
        loop {
            let active = *rx.borrow_and_update();
            if !active {
                return;
            }
            // Sender is owned by `self`, so this cannot fail while we wait
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Whether two handles refer to the same entity
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

/// Read-only handle to a catalog entity owned by someone else
///
/// Decoders hand these out: consumers can watch a remote track's liveness but
/// only the decoder that discovered it can end it.
#[derive(Clone)]
pub struct RemoteTrack {
    catalog: TrackCatalog,
}

impl RemoteTrack {
    pub(crate) fn new(catalog: TrackCatalog) -> Self {
        Self { catalog }
    }

    pub fn descriptor(&self) -> &TrackDescriptor {
        self.catalog.descriptor()
    }

    pub fn name(&self) -> &str {
        self.catalog.name()
    }

    /// Whether the remote track is still live
    pub fn is_active(&self) -> bool {
        self.catalog.is_active()
    }

    /// Wait until the remote track has ended
    pub async fn ended(&self) {
        self.catalog.ended().await
    }

    /// Whether two handles refer to the same entity
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        TrackCatalog::ptr_eq(&a.catalog, &b.catalog)
    }
}

impl std::fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.catalog.fmt(f)
    }
}

impl std::fmt::Debug for TrackCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackCatalog")
            .field("name", &self.name())
            .field("schema", &self.descriptor().schema())
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::catalog::schema::SCHEMA_VIDEO;

    #[test]
    fn test_typed_descriptor_sets_schema() {
        let descriptor = TrackDescriptor::video("camera", VideoConfig::new("vp8"));

        assert_eq!(descriptor.name(), "camera");
        assert_eq!(descriptor.schema(), SCHEMA_VIDEO);
    }

    #[test]
    fn test_descriptor_serializes_flat_config() {
        let descriptor = TrackDescriptor::opaque("video1", "vp8", json!({}));
        let value = serde_json::to_value(&descriptor).unwrap();

        assert_eq!(value, json!({ "name": "video1", "schema": "vp8", "config": {} }));
    }

    #[test]
    fn test_validate_accepts_matching_configs() {
        let registry = SchemaRegistry::default();

        assert!(TrackDescriptor::video("camera", VideoConfig::new("vp8"))
            .validate(&registry)
            .is_ok());
        assert!(TrackDescriptor::opaque("chat", "json", json!({ "any": 1 }))
            .validate(&registry)
            .is_ok());
    }

    #[test]
    fn test_validate_rejects_config_the_peer_cannot_parse() {
        let registry = SchemaRegistry::default();

        // Known tag, untyped payload without the required codec
        let bare = TrackDescriptor::new("cam", SCHEMA_VIDEO, TrackConfig::Opaque(json!({})));
        let err = bare.validate(&registry).unwrap_err();
        assert!(matches!(err, Error::Decode { ref reason, .. } if reason.contains("\"video\"")));

        // Typed config under someone else's tag
        let swapped = TrackDescriptor::new(
            "mic",
            "audio",
            TrackConfig::Video(VideoConfig::new("vp8")),
        );
        let err = swapped.validate(&registry).unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn test_remote_track_is_read_only_view() {
        let catalog = TrackCatalog::new(TrackDescriptor::opaque("t", "data", json!(null)));
        let view = RemoteTrack::new(catalog.clone());
        let other = view.clone();

        assert_eq!(view.name(), "t");
        assert!(view.is_active());
        assert!(RemoteTrack::ptr_eq(&view, &other));

        catalog.end();
        assert!(!other.is_active());
    }

    #[test]
    fn test_end_is_idempotent() {
        let catalog = TrackCatalog::new(TrackDescriptor::opaque("t", "data", json!(null)));
        assert!(catalog.is_active());

        assert!(catalog.end());
        assert!(!catalog.end());
        assert!(!catalog.is_active());
    }

    #[test]
    fn test_clones_share_state() {
        let catalog = TrackCatalog::new(TrackDescriptor::opaque("t", "data", json!(null)));
        let other = catalog.clone();

        other.end();

        assert!(!catalog.is_active());
        assert!(TrackCatalog::ptr_eq(&catalog, &other));
    }

    #[test]
    fn test_same_descriptor_is_new_entity() {
        let descriptor = TrackDescriptor::opaque("t", "data", json!(null));
        let a = TrackCatalog::new(descriptor.clone());
        let b = TrackCatalog::new(descriptor);

        assert!(!TrackCatalog::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_ended_fires_on_end() {
        let catalog = TrackCatalog::new(TrackDescriptor::opaque("t", "data", json!(null)));
        let waiter = catalog.clone();

        let handle = tokio::spawn(async move { waiter.ended().await });
        tokio::task::yield_now().await;
        catalog.end();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_ended_returns_immediately_when_already_ended() {
        let catalog = TrackCatalog::new(TrackDescriptor::opaque("t", "data", json!(null)));
        catalog.end();

        tokio::time::timeout(Duration::from_millis(100), catalog.ended())
            .await
            .unwrap();
    }
}
