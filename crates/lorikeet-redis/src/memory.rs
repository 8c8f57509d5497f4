//! In-memory bus for tests and single-process deployments.
//!
//! `MemoryBus` plays the broker; each [`MemoryBus::endpoint`] call mints one
//! simulated process with its own subscription set and inbound feed.
//! Delivery is synchronous and `publish` returns the subscriber count the
//! same way Redis `PUBLISH` does, so the scatter-gather protocol behaves
//! identically to a live bus, minus the network.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::Result;
use crate::transport::{ChannelMessage, Transport};

/// In-process broker shared by any number of endpoints.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<BusInner>>,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    endpoints: HashMap<u64, Endpoint>,
}

struct Endpoint {
    channels: HashSet<String>,
    inbound: UnboundedSender<ChannelMessage>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a new endpoint: one simulated process on the bus.
    /// Returns the transport plus the inbound feed for [`PubSub::new`](crate::PubSub::new).
    pub fn endpoint(&self) -> (MemoryTransport, UnboundedReceiver<ChannelMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.endpoints.insert(
            id,
            Endpoint {
                channels: HashSet::new(),
                inbound: tx,
            },
        );
        (
            MemoryTransport {
                bus: self.clone(),
                id,
            },
            rx,
        )
    }

    /// Number of endpoints currently subscribed to a channel.
    pub fn subscriber_count(&self, channel: &str) -> u64 {
        self.inner
            .lock()
            .unwrap()
            .endpoints
            .values()
            .filter(|ep| ep.channels.contains(channel))
            .count() as u64
    }

    fn deliver(&self, channel: &str, payload: &str) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let mut delivered = 0;
        // An endpoint whose feed was dropped is gone; forget it.
        inner.endpoints.retain(|_, ep| {
            if !ep.channels.contains(channel) {
                return true;
            }
            let sent = ep
                .inbound
                .send(ChannelMessage {
                    channel: channel.to_string(),
                    payload: payload.to_string(),
                })
                .is_ok();
            if sent {
                delivered += 1;
            }
            sent
        });
        delivered
    }

    fn with_endpoint(&self, id: u64, f: impl FnOnce(&mut Endpoint)) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(ep) = inner.endpoints.get_mut(&id) {
            f(ep);
        }
    }
}

/// One endpoint's [`Transport`] handle onto a [`MemoryBus`].
#[derive(Clone)]
pub struct MemoryTransport {
    bus: MemoryBus,
    id: u64,
}

impl Transport for MemoryTransport {
    async fn publish(&self, channel: &str, payload: &str) -> Result<u64> {
        Ok(self.bus.deliver(channel, payload))
    }

    async fn subscribe(&self, channels: &[String]) -> Result<()> {
        self.bus.with_endpoint(self.id, |ep| {
            for channel in channels {
                ep.channels.insert(channel.clone());
            }
        });
        Ok(())
    }

    async fn unsubscribe(&self, channels: &[String]) -> Result<()> {
        self.bus.with_endpoint(self.id, |ep| {
            for channel in channels {
                ep.channels.remove(channel);
            }
        });
        Ok(())
    }
}
