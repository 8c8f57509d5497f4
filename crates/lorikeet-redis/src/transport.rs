//! Bus transport abstraction

use std::future::Future;

use crate::error::Result;

/// A single inbound pub/sub message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub channel: String,
    pub payload: String,
}

/// Publish/subscribe operations against the bus.
///
/// `publish` returns the number of connections subscribed to the channel at
/// the instant of delivery; the ask operation uses that count as its decline
/// budget, so implementations must report it faithfully. Inbound messages
/// for everything this connection is subscribed to arrive on the feed handed
/// out alongside the transport.
///
/// Implemented by [`RedisTransport`](crate::redis::RedisTransport) (live)
/// and [`MemoryTransport`](crate::memory::MemoryTransport) (in-process).
pub trait Transport: Send + Sync + Clone + 'static {
    fn publish(&self, channel: &str, payload: &str)
        -> impl Future<Output = Result<u64>> + Send;

    fn subscribe(&self, channels: &[String]) -> impl Future<Output = Result<()>> + Send;

    fn unsubscribe(&self, channels: &[String]) -> impl Future<Output = Result<()>> + Send;
}
