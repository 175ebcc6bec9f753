//! Counters for catalog encoders and decoders
//!
//! The live counters are atomics so they can be bumped from `&self`; callers
//! read them through plain `Clone` snapshot structs.

use std::sync::atomic::{AtomicU64, Ordering};

/// Encoder-side statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncoderStats {
    /// Catalog groups fully written
    pub groups_written: u64,
    /// Frames written (init frames included)
    pub frames_written: u64,
    /// Encode attempts that ended in an error
    pub failures: u64,
}

/// Decoder-side statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Catalog groups accepted and parsed successfully
    pub groups_decoded: u64,
    /// Track entry frames parsed
    pub entries_decoded: u64,
    /// Snapshots handed to the fan-out
    pub snapshots_published: u64,
    /// Snapshots skipped by slow destinations
    pub snapshots_dropped: u64,
}

#[derive(Debug, Default)]
pub(crate) struct EncoderCounters {
    groups_written: AtomicU64,
    frames_written: AtomicU64,
    failures: AtomicU64,
}

impl EncoderCounters {
    pub(crate) fn group_written(&self, frames: u64) {
        self.groups_written.fetch_add(1, Ordering::Relaxed);
        self.frames_written.fetch_add(frames, Ordering::Relaxed);
    }

    pub(crate) fn failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> EncoderStats {
        EncoderStats {
            groups_written: self.groups_written.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct DecoderCounters {
    groups_decoded: AtomicU64,
    entries_decoded: AtomicU64,
    snapshots_published: AtomicU64,
    snapshots_dropped: AtomicU64,
}

impl DecoderCounters {
    pub(crate) fn group_decoded(&self, entries: u64) {
        self.groups_decoded.fetch_add(1, Ordering::Relaxed);
        self.entries_decoded.fetch_add(entries, Ordering::Relaxed);
    }

    pub(crate) fn snapshot_published(&self) {
        self.snapshots_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshots_dropped(&self, count: u64) {
        self.snapshots_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DecoderStats {
        DecoderStats {
            groups_decoded: self.groups_decoded.load(Ordering::Relaxed),
            entries_decoded: self.entries_decoded.load(Ordering::Relaxed),
            snapshots_published: self.snapshots_published.load(Ordering::Relaxed),
            snapshots_dropped: self.snapshots_dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_counters_new() {
        let counters = EncoderCounters::default();
        assert_eq!(counters.snapshot(), EncoderStats::default());
    }

    #[test]
    fn test_encoder_counters_accumulate() {
        let counters = EncoderCounters::default();
        counters.group_written(3);
        counters.group_written(1);
        counters.failure();

        let stats = counters.snapshot();
        assert_eq!(stats.groups_written, 2);
        assert_eq!(stats.frames_written, 4);
        assert_eq!(stats.failures, 1);
    }

    #[test]
    fn test_decoder_counters_accumulate() {
        let counters = DecoderCounters::default();
        counters.group_decoded(2);
        counters.snapshot_published();
        counters.snapshots_dropped(5);

        let stats = counters.snapshot();
        assert_eq!(stats.groups_decoded, 1);
        assert_eq!(stats.entries_decoded, 2);
        assert_eq!(stats.snapshots_published, 1);
        assert_eq!(stats.snapshots_dropped, 5);
    }
}
