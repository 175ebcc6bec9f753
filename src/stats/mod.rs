//! Statistics for catalog encoding and decoding

pub mod metrics;

pub use metrics::{DecoderStats, EncoderStats};
