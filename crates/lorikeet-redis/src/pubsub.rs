//! The pub/sub client: broadcasts, responders, and scatter-gather asks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, trace, warn};

use crate::channels;
use crate::error::{AskError, Error, Result};
use crate::registry::{AskGuard, Registry, Reply};
use crate::transport::{ChannelMessage, Transport};

/// Default deadline applied by [`PubSub::ask`].
pub const DEFAULT_ASK_TIMEOUT: Duration = Duration::from_secs(5);

/// Answers queries received on a channel prefix on behalf of this process.
///
/// Return `Some(result)` when this process has the answer, `None` to
/// decline. Either way exactly one terminal message goes back on the bus;
/// a responder that stays silent leaves every asker waiting out its
/// deadline, which is the one failure the protocol cannot recover from.
#[async_trait]
pub trait Respond: Send + Sync + 'static {
    async fn respond(&self, query: &str) -> Option<String>;
}

/// Pub/sub client bound to one bus connection.
///
/// Cheap to clone; clones share the connection and the listener registry.
#[derive(Clone)]
pub struct PubSub<T: Transport> {
    transport: T,
    registry: Arc<Registry>,
    ask_timeout: Duration,
}

impl<T: Transport> PubSub<T> {
    /// Create a client over a transport and its inbound message feed.
    /// Spawns the dispatch task that routes every inbound message through
    /// the registry.
    pub fn new(transport: T, inbound: UnboundedReceiver<ChannelMessage>) -> Self {
        let registry = Arc::new(Registry::new());
        tokio::spawn(dispatch_loop(
            Arc::clone(&registry),
            transport.clone(),
            inbound,
        ));
        Self {
            transport,
            registry,
            ask_timeout: DEFAULT_ASK_TIMEOUT,
        }
    }

    /// Override the default ask deadline.
    pub fn with_ask_timeout(mut self, timeout: Duration) -> Self {
        self.ask_timeout = timeout;
        self
    }

    /// Publish a payload to a channel.
    /// Returns how many connections received it.
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<u64> {
        trace!(channel = %channel, size = payload.len(), "publishing");
        self.transport.publish(channel, payload).await
    }

    /// Stream every payload published to `channel`.
    /// Dropping the returned listener deregisters it.
    pub async fn listen(&self, channel: &str) -> Result<Listening<T>> {
        // The registry record must exist before the subscription takes
        // effect, or a message arriving in between would find no listener
        // and be dropped.
        let (id, rx) = self.registry.add_listener(channel);
        if let Err(e) = self.transport.subscribe(&[channel.to_string()]).await {
            self.registry.remove_listener(channel, id);
            return Err(e);
        }
        debug!(channel = %channel, "listening");
        Ok(Listening {
            registry: Arc::clone(&self.registry),
            transport: self.transport.clone(),
            channel: channel.to_string(),
            id,
            rx,
        })
    }

    /// Register this process's responder for a query prefix.
    ///
    /// The responder lives for the client's lifetime and answers every query
    /// broadcast on the prefix. One responder per prefix per client: the
    /// asking side budgets exactly one terminal message per subscription it
    /// reached, so a second registration is an error.
    pub async fn add_responder(&self, prefix: &str, responder: impl Respond) -> Result<()> {
        if !self.registry.register_responder(prefix, Arc::new(responder)) {
            return Err(Error::Responder(format!(
                "a responder is already registered for prefix {}",
                prefix
            )));
        }
        let query_channel = channels::query(prefix);
        if let Err(e) = self.transport.subscribe(&[query_channel]).await {
            self.registry.remove_responder(prefix);
            return Err(e);
        }
        debug!(prefix = %prefix, "responder registered");
        Ok(())
    }

    /// Scatter-gather query with the client's default deadline.
    ///
    /// Broadcasts `key` on the prefix's query channel, then resolves to the
    /// first of: a success reply (wins over any number of declines), every
    /// notified responder declining, nobody being subscribed at all, or the
    /// deadline expiring. Resolution is exactly once; replies arriving after
    /// it are discarded.
    pub async fn ask(&self, key: &str, prefix: &str) -> std::result::Result<String, AskError> {
        self.ask_with_timeout(key, prefix, self.ask_timeout).await
    }

    /// [`ask`](Self::ask) with an explicit deadline.
    pub async fn ask_with_timeout(
        &self,
        key: &str,
        prefix: &str,
        timeout: Duration,
    ) -> std::result::Result<String, AskError> {
        let success_channel = channels::success(prefix, key);
        let fail_channel = channels::fail(prefix, key);

        let Some(slot) = self.registry.register_ask(&success_channel, &fail_channel) else {
            return Err(AskError::Pending);
        };
        let mut guard = AskGuard::new(
            Arc::clone(&self.registry),
            self.transport.clone(),
            success_channel.clone(),
            fail_channel.clone(),
        );

        // Response channels must be live before the query goes out, or a
        // fast responder could answer into the void.
        self.transport
            .subscribe(&[success_channel.clone(), fail_channel.clone()])
            .await?;
        let delivered = self
            .transport
            .publish(&channels::query(prefix), key)
            .await?;
        trace!(prefix = %prefix, key = %key, delivered, "query published");
        self.registry.set_decline_budget(&success_channel, delivered);

        let outcome = tokio::time::timeout(timeout, slot).await;

        guard.disarm();
        self.registry.remove_ask(&success_channel);
        if let Err(e) = self
            .transport
            .unsubscribe(&[success_channel, fail_channel])
            .await
        {
            warn!(error = %e, "failed to release completed query channels");
        }

        match outcome {
            Ok(Ok(Reply::Success(payload))) => Ok(payload),
            Ok(Ok(Reply::AllDeclined(responders))) => Err(AskError::Declined(responders)),
            Ok(Ok(Reply::Unreachable)) => Err(AskError::Unreachable),
            Ok(Err(_)) => Err(AskError::Transport(Error::Other(anyhow::anyhow!(
                "ask completion slot dropped before resolution"
            )))),
            Err(_) => Err(AskError::TimedOut(timeout)),
        }
    }
}

/// Live subscription to one channel's broadcasts.
pub struct Listening<T: Transport> {
    registry: Arc<Registry>,
    transport: T,
    channel: String,
    id: u64,
    rx: UnboundedReceiver<String>,
}

impl<T: Transport> Listening<T> {
    /// Next payload published to the channel.
    /// `None` once the client's dispatch task has shut down.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// The channel this listener is bound to.
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl<T: Transport> Drop for Listening<T> {
    fn drop(&mut self) {
        let last = self.registry.remove_listener(&self.channel, self.id);
        if last {
            let transport = self.transport.clone();
            let channel = vec![self.channel.clone()];
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = transport.unsubscribe(&channel).await;
                });
            }
        }
    }
}

async fn dispatch_loop<T: Transport>(
    registry: Arc<Registry>,
    transport: T,
    mut inbound: UnboundedReceiver<ChannelMessage>,
) {
    while let Some(msg) = inbound.recv().await {
        registry.dispatch(msg, &transport);
    }
    debug!("bus message feed closed, dispatch loop exiting");
}
