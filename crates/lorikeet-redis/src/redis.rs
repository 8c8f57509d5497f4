//! Live Redis transport.
//!
//! Publishing goes through a [`ConnectionManager`]; the Redis `PUBLISH`
//! reply is the number of receiving connections, which the ask operation
//! uses as its decline budget. Subscriptions live on a dedicated pub/sub
//! connection owned by a control task, which also forwards every inbound
//! message to the dispatcher's feed. Reconnection is the connection
//! manager's business, not this module's.

use futures::StreamExt;
use redis::aio::ConnectionManager;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::RedisConfig;
use crate::error::{Error, Result};
use crate::transport::{ChannelMessage, Transport};

enum Control {
    Subscribe(Vec<String>, oneshot::Sender<Result<()>>),
    Unsubscribe(Vec<String>, oneshot::Sender<Result<()>>),
}

/// Redis-backed [`Transport`].
#[derive(Clone)]
pub struct RedisTransport {
    publisher: ConnectionManager,
    control: mpsc::UnboundedSender<Control>,
}

/// Connect to Redis and return the transport plus the inbound message feed
/// to hand to [`PubSub::new`](crate::PubSub::new).
pub async fn connect(
    config: &RedisConfig,
) -> Result<(RedisTransport, mpsc::UnboundedReceiver<ChannelMessage>)> {
    info!(url = %config.url, "connecting to Redis");

    let client = redis::Client::open(config.url.as_str())
        .map_err(|e| Error::Connection(format!("invalid Redis URL: {}", e)))?;

    let publisher = client
        .get_connection_manager()
        .await
        .map_err(|e| Error::Connection(format!("failed to connect to Redis: {}", e)))?;

    let pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| Error::Connection(format!("failed to open pub/sub connection: {}", e)))?;

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    tokio::spawn(pubsub_task(pubsub, control_rx, inbound_tx));

    info!("connected to Redis");
    Ok((
        RedisTransport {
            publisher,
            control: control_tx,
        },
        inbound_rx,
    ))
}

impl RedisTransport {
    async fn send_control(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<()>>) -> Control,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(build(tx))
            .map_err(|_| Error::Connection("pub/sub connection task is gone".to_string()))?;
        rx.await
            .map_err(|_| Error::Connection("pub/sub connection task is gone".to_string()))?
    }
}

impl Transport for RedisTransport {
    async fn publish(&self, channel: &str, payload: &str) -> Result<u64> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Publish(format!("failed to publish to {}: {}", channel, e)))?;
        Ok(receivers.max(0) as u64)
    }

    async fn subscribe(&self, channels: &[String]) -> Result<()> {
        self.send_control(|done| Control::Subscribe(channels.to_vec(), done))
            .await
    }

    async fn unsubscribe(&self, channels: &[String]) -> Result<()> {
        self.send_control(|done| Control::Unsubscribe(channels.to_vec(), done))
            .await
    }
}

/// Owns the pub/sub connection: applies subscription changes and forwards
/// inbound messages. Exits when the transport is dropped or the connection
/// stream ends.
async fn pubsub_task(
    mut pubsub: redis::aio::PubSub,
    mut control: mpsc::UnboundedReceiver<Control>,
    inbound: mpsc::UnboundedSender<ChannelMessage>,
) {
    loop {
        let mut messages = pubsub.on_message();
        tokio::select! {
            maybe_msg = messages.next() => {
                drop(messages);
                match maybe_msg {
                    Some(msg) => forward(msg, &inbound),
                    None => {
                        warn!("Redis pub/sub stream closed");
                        break;
                    }
                }
            }
            maybe_cmd = control.recv() => {
                drop(messages);
                match maybe_cmd {
                    Some(Control::Subscribe(channels, done)) => {
                        let _ = done.send(subscribe_all(&mut pubsub, &channels).await);
                    }
                    Some(Control::Unsubscribe(channels, done)) => {
                        let _ = done.send(unsubscribe_all(&mut pubsub, &channels).await);
                    }
                    None => {
                        debug!("transport dropped, closing pub/sub connection");
                        break;
                    }
                }
            }
        }
    }
}

async fn subscribe_all(pubsub: &mut redis::aio::PubSub, channels: &[String]) -> Result<()> {
    for channel in channels {
        pubsub.subscribe(channel).await.map_err(|e| {
            Error::Subscribe(format!("failed to subscribe to {}: {}", channel, e))
        })?;
    }
    Ok(())
}

async fn unsubscribe_all(pubsub: &mut redis::aio::PubSub, channels: &[String]) -> Result<()> {
    for channel in channels {
        pubsub.unsubscribe(channel).await.map_err(|e| {
            Error::Subscribe(format!("failed to unsubscribe from {}: {}", channel, e))
        })?;
    }
    Ok(())
}

fn forward(msg: redis::Msg, inbound: &mpsc::UnboundedSender<ChannelMessage>) {
    let channel = msg.get_channel_name().to_string();
    match msg.get_payload::<String>() {
        Ok(payload) => {
            let _ = inbound.send(ChannelMessage { channel, payload });
        }
        Err(e) => error!(channel = %channel, error = %e, "dropping undecodable pub/sub payload"),
    }
}

#[cfg(test)]
mod tests {
    //! Require a running Redis; each test skips itself when none is listening.

    use super::*;

    const REDIS_URL: &str = "redis://localhost:6379";

    async fn try_connect() -> Option<(RedisTransport, mpsc::UnboundedReceiver<ChannelMessage>)> {
        connect(&RedisConfig::from_url(REDIS_URL)).await.ok()
    }

    fn unique_channel(prefix: &str) -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("test:{}:{}", prefix, ts)
    }

    #[tokio::test]
    async fn test_publish_with_no_subscriber_reports_zero() {
        let Some((transport, _inbound)) = try_connect().await else {
            eprintln!("SKIP: Redis not available");
            return;
        };
        let channel = unique_channel("zero");
        assert_eq!(transport.publish(&channel, "x").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_then_publish_roundtrip() {
        let Some((transport, mut inbound)) = try_connect().await else {
            eprintln!("SKIP: Redis not available");
            return;
        };
        let channel = unique_channel("roundtrip");

        transport.subscribe(&[channel.clone()]).await.unwrap();
        let delivered = transport.publish(&channel, "hello").await.unwrap();
        assert_eq!(delivered, 1);

        let msg = inbound.recv().await.unwrap();
        assert_eq!(msg.channel, channel);
        assert_eq!(msg.payload, "hello");
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_counting() {
        let Some((transport, _inbound)) = try_connect().await else {
            eprintln!("SKIP: Redis not available");
            return;
        };
        let channel = unique_channel("unsub");

        transport.subscribe(&[channel.clone()]).await.unwrap();
        transport.unsubscribe(&[channel.clone()]).await.unwrap();
        assert_eq!(transport.publish(&channel, "x").await.unwrap(), 0);
    }
}
