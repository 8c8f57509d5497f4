//! Listener registry and message dispatch.
//!
//! The registry is the one shared mutable structure in the protocol. Every
//! pending ask, responder and channel listener is an explicit record behind
//! a single lock, and every inbound message flows through
//! [`Registry::dispatch`], so resolution is a visible branch instead of
//! state captured in ad hoc callbacks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tracing::{trace, warn};

use crate::channels;
use crate::pubsub::Respond;
use crate::transport::{ChannelMessage, Transport};

/// Terminal outcome delivered to a waiting ask call.
#[derive(Debug)]
pub(crate) enum Reply {
    Success(String),
    AllDeclined(u64),
    Unreachable,
}

/// Pending scatter-gather query, keyed in the registry by its success channel.
struct AskEntry {
    fail_channel: String,
    /// Decline budget; unknown until the query publish reports its delivery count.
    expected: Option<u64>,
    declines: u64,
    slot: oneshot::Sender<Reply>,
}

struct ResponderEntry {
    prefix: String,
    responder: Arc<dyn Respond>,
}

#[derive(Default)]
struct RegistryInner {
    /// Success channel -> pending ask. Removal from this map IS resolution,
    /// so a second assignment attempt finds nothing and becomes a no-op.
    asks: HashMap<String, AskEntry>,
    /// Fail channel -> success channel of the same ask
    fail_routes: HashMap<String, String>,
    /// Query channel -> this process's responder for the prefix
    responders: HashMap<String, ResponderEntry>,
    /// Channel -> plain broadcast listeners
    listeners: HashMap<String, Vec<(u64, mpsc::UnboundedSender<String>)>>,
    next_listener_id: u64,
}

#[derive(Default)]
pub(crate) struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending ask and hand back its completion slot.
    /// Returns `None` when an ask with the same derived channels is already
    /// in flight on this client.
    pub fn register_ask(
        &self,
        success_channel: &str,
        fail_channel: &str,
    ) -> Option<oneshot::Receiver<Reply>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.asks.contains_key(success_channel) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        inner.asks.insert(
            success_channel.to_string(),
            AskEntry {
                fail_channel: fail_channel.to_string(),
                expected: None,
                declines: 0,
                slot: tx,
            },
        );
        inner
            .fail_routes
            .insert(fail_channel.to_string(), success_channel.to_string());
        Some(rx)
    }

    /// Record the delivery count of the query publish. Zero resolves the ask
    /// as unreachable on the spot. Otherwise declines that raced in before
    /// the count came back are settled against the budget now.
    pub fn set_decline_budget(&self, success_channel: &str, delivered: u64) {
        let mut inner = self.inner.lock().unwrap();
        let reply = match inner.asks.get_mut(success_channel) {
            None => return,
            Some(_) if delivered == 0 => Some(Reply::Unreachable),
            Some(entry) => {
                entry.expected = Some(delivered);
                if entry.declines >= delivered {
                    Some(Reply::AllDeclined(delivered))
                } else {
                    None
                }
            }
        };
        if let Some(reply) = reply {
            Self::resolve_locked(&mut inner, success_channel, reply);
        }
    }

    /// Drop a pending ask without resolving it (deadline or caller gone).
    pub fn remove_ask(&self, success_channel: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.asks.remove(success_channel) {
            inner.fail_routes.remove(&entry.fail_channel);
        }
    }

    /// Register this process's responder for a prefix.
    /// Returns false when the prefix already has one: the delivery count
    /// counts subscriptions, and the protocol allows exactly one terminal
    /// message per notified process.
    pub fn register_responder(&self, prefix: &str, responder: Arc<dyn Respond>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let query_channel = channels::query(prefix);
        if inner.responders.contains_key(&query_channel) {
            return false;
        }
        inner.responders.insert(
            query_channel,
            ResponderEntry {
                prefix: prefix.to_string(),
                responder,
            },
        );
        true
    }

    pub fn remove_responder(&self, prefix: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.responders.remove(&channels::query(prefix));
    }

    /// Add a plain broadcast listener on a channel.
    pub fn add_listener(&self, channel: &str) -> (u64, mpsc::UnboundedReceiver<String>) {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_listener_id;
        inner.next_listener_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        inner
            .listeners
            .entry(channel.to_string())
            .or_default()
            .push((id, tx));
        (id, rx)
    }

    /// Remove a broadcast listener. Returns true when the channel has no
    /// listeners left and its subscription can be dropped.
    pub fn remove_listener(&self, channel: &str, id: u64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(list) = inner.listeners.get_mut(channel) else {
            return true;
        };
        list.retain(|(listener_id, _)| *listener_id != id);
        let empty = list.is_empty();
        if empty {
            inner.listeners.remove(channel);
        }
        empty
    }

    /// Route one inbound message to its record: resolve or tally a pending
    /// ask, run a responder, or fan out to listeners. Unmatched messages,
    /// late replies to completed asks included, are dropped.
    pub fn dispatch<T: Transport>(&self, msg: ChannelMessage, transport: &T) {
        let mut inner = self.inner.lock().unwrap();

        if inner.asks.contains_key(&msg.channel) {
            Self::resolve_locked(&mut inner, &msg.channel, Reply::Success(msg.payload));
            return;
        }

        if let Some(success_channel) = inner.fail_routes.get(&msg.channel).cloned() {
            let reply = match inner.asks.get_mut(&success_channel) {
                None => None,
                Some(entry) => {
                    entry.declines += 1;
                    match entry.expected {
                        Some(expected) if entry.declines >= expected => {
                            Some(Reply::AllDeclined(expected))
                        }
                        _ => None,
                    }
                }
            };
            if let Some(reply) = reply {
                Self::resolve_locked(&mut inner, &success_channel, reply);
            }
            return;
        }

        if let Some(entry) = inner.responders.get(&msg.channel) {
            let responder = Arc::clone(&entry.responder);
            let prefix = entry.prefix.clone();
            let transport = transport.clone();
            let key = msg.payload;
            // The dispatcher must not block; answers run on their own task.
            tokio::spawn(async move {
                let answer = responder.respond(&key).await;
                let (channel, payload) = match answer {
                    Some(result) => (channels::success(&prefix, &key), result),
                    None => (channels::fail(&prefix, &key), String::new()),
                };
                if let Err(e) = transport.publish(&channel, &payload).await {
                    warn!(channel = %channel, error = %e, "failed to publish query response");
                }
            });
            return;
        }

        if let Some(list) = inner.listeners.get_mut(&msg.channel) {
            list.retain(|(_, tx)| tx.send(msg.payload.clone()).is_ok());
            let empty = list.is_empty();
            if empty {
                inner.listeners.remove(&msg.channel);
            }
            return;
        }

        trace!(channel = %msg.channel, "dropping message with no registered listener");
    }

    /// Assign the ask's single-assignment slot and drop its routes.
    /// The first assignment wins; the entry is gone afterwards.
    fn resolve_locked(inner: &mut RegistryInner, success_channel: &str, reply: Reply) {
        let Some(entry) = inner.asks.remove(success_channel) else {
            return;
        };
        inner.fail_routes.remove(&entry.fail_channel);
        if entry.slot.send(reply).is_err() {
            trace!(channel = %success_channel, "ask caller went away before resolution");
        }
    }
}

/// Removes a pending ask's registry record when the calling future goes away
/// without completing, and makes a best-effort attempt to release the bus
/// subscriptions it owned. Disarmed on the normal completion path, which
/// cleans up inline.
pub(crate) struct AskGuard<T: Transport> {
    registry: Arc<Registry>,
    transport: T,
    success_channel: String,
    fail_channel: String,
    armed: bool,
}

impl<T: Transport> AskGuard<T> {
    pub fn new(
        registry: Arc<Registry>,
        transport: T,
        success_channel: String,
        fail_channel: String,
    ) -> Self {
        Self {
            registry,
            transport,
            success_channel,
            fail_channel,
            armed: true,
        }
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<T: Transport> Drop for AskGuard<T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.registry.remove_ask(&self.success_channel);
        let transport = self.transport.clone();
        let subscriptions = [self.success_channel.clone(), self.fail_channel.clone()];
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = transport.unsubscribe(&subscriptions).await;
            });
        }
    }
}
