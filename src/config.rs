//! Catalog configuration

use crate::catalog::{CATALOG_TRACK, CATALOG_VERSION};

/// Default number of snapshots buffered per `decode_to` destination
pub const DEFAULT_FANOUT_CAPACITY: usize = 16;

/// Configuration shared by publishers, subscribers, encoders and decoders
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Protocol version written by encoders and required by decoders
    pub version: String,

    /// Optional `$schema` URL written into the init frame (informational)
    pub schema_url: Option<String>,

    /// Name of the reserved catalog track
    pub catalog_track: String,

    /// Snapshots buffered per destination before the oldest are dropped
    pub fanout_capacity: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            version: CATALOG_VERSION.to_string(),
            schema_url: None,
            catalog_track: CATALOG_TRACK.to_string(),
            fanout_capacity: DEFAULT_FANOUT_CAPACITY,
        }
    }
}

impl CatalogConfig {
    /// Set the protocol version
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the `$schema` URL
    pub fn schema_url(mut self, url: impl Into<String>) -> Self {
        self.schema_url = Some(url.into());
        self
    }

    /// Set the reserved catalog track name
    pub fn catalog_track(mut self, name: impl Into<String>) -> Self {
        self.catalog_track = name.into();
        self
    }

    /// Set the per-destination fan-out capacity
    pub fn fanout_capacity(mut self, capacity: usize) -> Self {
        // tokio's broadcast channel rejects a zero capacity
        self.fanout_capacity = capacity.max(1);
        self
    }
}
