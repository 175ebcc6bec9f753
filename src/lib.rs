//! Catalog synchronization and broadcast orchestration
//!
//! A participant publishes a *catalog* track describing every media or data
//! track it currently offers. Other participants read that catalog, discover
//! the tracks, and subscribe to the ones they want as the set changes.
//!
//! # Architecture
//!
//! ```text
//!   BroadcastPublisher                                 BroadcastSubscriber
//!  ┌──────────────────────┐                          ┌──────────────────────┐
//!  │ tracks: name → enc   │                          │ session.subscribe()  │
//!  │ CatalogEncoder ──────┼── group{init, entry*} ──►│ CatalogDecoder       │
//!  └──────────────────────┘      (transport)         │   └─ fan-out ──┬──►  │ decode_to()
//!                                                    └────────────────┴──►  │ decode_to()
//! ```
//!
//! Every catalog group is a full snapshot: a decoder that joins late only
//! needs the most recent group to know the complete track set.
//!
//! The transport itself is abstract (see [`transport`]); an in-process
//! [`transport::memory::MemoryRelay`] is provided for tests and demos.

pub mod broadcast;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod stats;
pub mod transport;

pub use broadcast::{BroadcastPublisher, BroadcastSubscriber, TrackDecoder, TrackEncoder};
pub use catalog::{
    CatalogDecoder, CatalogEncoder, CatalogInit, CatalogSnapshot, RemoteTrack, TrackCatalog,
    TrackConfig, TrackDescriptor, CATALOG_TRACK, CATALOG_VERSION,
};
pub use config::CatalogConfig;
pub use context::Context;
pub use error::{Error, Result};
