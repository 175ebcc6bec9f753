//! Catalog encoding and decoding
//!
//! A catalog is the set of tracks one participant currently publishes. The
//! [`CatalogEncoder`] writes it as one transport group per snapshot; the
//! [`CatalogDecoder`] reads those groups back and fans each snapshot out to
//! any number of destinations.
//!
//! # Snapshots, not diffs
//!
//! Every group re-emits the full set of active tracks. A decoder joining at
//! any group boundary reconstructs the complete state from that group alone.

pub mod decoder;
pub mod encoder;
pub mod schema;
pub mod track;
pub mod wire;

pub use decoder::{CatalogDecoder, CatalogSnapshot, SnapshotReceiver};
pub use encoder::CatalogEncoder;
pub use schema::{AudioConfig, ProfileConfig, SchemaRegistry, TrackConfig, VideoConfig};
pub use track::{RemoteTrack, TrackCatalog, TrackDescriptor};
pub use wire::{CatalogInit, TrackEntry};

/// Default name of the reserved catalog track
pub const CATALOG_TRACK: &str = "catalog";

/// Catalog protocol version written and accepted by default
pub const CATALOG_VERSION: &str = "1";
