//! Per-track codec boundary
//!
//! Media encoders and decoders are external to this crate. A broadcast only
//! needs to hand them a transport track and a cancellation context.

use std::future::Future;

use crate::catalog::CatalogDecoder;
use crate::context::Context;
use crate::error::Result;
use crate::transport::{TrackReader, TrackWriter};

/// Produces the groups of one published track
pub trait TrackEncoder: Send + Sync + 'static {
    /// Serve one subscription: write groups to `writer` until done or cancelled
    fn encode_to<W: TrackWriter>(
        &self,
        ctx: &Context,
        writer: &mut W,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Release the encoder's resources
    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Consumes the groups of one subscribed track
pub trait TrackDecoder: Send + Sync {
    /// Read from `reader` until the track ends, fails, or `ctx` is cancelled
    fn decode_from<R: TrackReader>(
        &self,
        ctx: &Context,
        reader: &mut R,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// A catalog decoder can consume any catalog-shaped track, e.g. to follow a
/// second participant's catalog through `BroadcastSubscriber::subscribe_track`
impl TrackDecoder for CatalogDecoder {
    fn decode_from<R: TrackReader>(
        &self,
        ctx: &Context,
        reader: &mut R,
    ) -> impl Future<Output = Result<()>> + Send {
        CatalogDecoder::decode_from(self, ctx, reader)
    }
}
