//! Broadcast orchestration
//!
//! A broadcast is one participant's bundle of tracks plus the catalog that
//! describes them. [`BroadcastPublisher`] owns the outgoing side,
//! [`BroadcastSubscriber`] follows a remote participant's catalog.

pub mod codec;
pub mod publisher;
pub mod subscriber;

pub use codec::{TrackDecoder, TrackEncoder};
pub use publisher::BroadcastPublisher;
pub use subscriber::BroadcastSubscriber;
