//! End-to-end scatter-gather scenarios over the in-memory bus.
//!
//! Every `MemoryBus` endpoint plays one process: the asking side gets its
//! own `PubSub` client and each responding shard gets another, so these
//! tests exercise the real multi-process topology minus the network.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use lorikeet_redis::{channels, AskError, MemoryBus, MemoryTransport, PubSub, Respond};

const PREFIX: &str = "Test:Config";

fn client(bus: &MemoryBus) -> PubSub<MemoryTransport> {
    let (transport, inbound) = bus.endpoint();
    PubSub::new(transport, inbound)
}

/// Shard that knows the config for exactly one guild.
struct OneGuildShard {
    guild_id: String,
    config: String,
}

#[async_trait]
impl Respond for OneGuildShard {
    async fn respond(&self, query: &str) -> Option<String> {
        (query == self.guild_id).then(|| self.config.clone())
    }
}

/// Shard that declines everything, optionally after a delay.
struct DecliningShard {
    delay: Duration,
}

#[async_trait]
impl Respond for DecliningShard {
    async fn respond(&self, _query: &str) -> Option<String> {
        tokio::time::sleep(self.delay).await;
        None
    }
}

/// Shard that received the query but never answers at all.
struct SilentShard;

#[async_trait]
impl Respond for SilentShard {
    async fn respond(&self, _query: &str) -> Option<String> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn one_success_wins_over_surrounding_declines() {
    let bus = MemoryBus::new();
    let asker = client(&bus);

    let shard_a = client(&bus);
    shard_a
        .add_responder(
            PREFIX,
            DecliningShard {
                delay: Duration::from_millis(50),
            },
        )
        .await
        .unwrap();
    let shard_b = client(&bus);
    shard_b
        .add_responder(
            PREFIX,
            OneGuildShard {
                guild_id: "42".to_string(),
                config: r#"{"theme":"dark"}"#.to_string(),
            },
        )
        .await
        .unwrap();
    let shard_c = client(&bus);
    shard_c
        .add_responder(
            PREFIX,
            DecliningShard {
                delay: Duration::from_millis(50),
            },
        )
        .await
        .unwrap();

    let config = asker.ask("42", PREFIX).await.unwrap();
    assert_eq!(config, r#"{"theme":"dark"}"#);
}

#[tokio::test]
async fn unreachable_when_no_responder_is_subscribed() {
    let bus = MemoryBus::new();
    let asker = client(&bus);

    let started = Instant::now();
    let err = asker.ask("99", PREFIX).await.unwrap_err();

    assert!(matches!(err, AskError::Unreachable));
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "zero delivery must resolve without waiting for any message"
    );
}

#[tokio::test]
async fn declined_only_after_every_responder_declines() {
    let bus = MemoryBus::new();
    let asker = client(&bus);

    let quick = client(&bus);
    quick
        .add_responder(PREFIX, DecliningShard { delay: Duration::ZERO })
        .await
        .unwrap();
    let slow = client(&bus);
    slow.add_responder(
        PREFIX,
        DecliningShard {
            delay: Duration::from_millis(100),
        },
    )
    .await
    .unwrap();

    let started = Instant::now();
    let err = asker.ask("7", PREFIX).await.unwrap_err();

    assert!(matches!(err, AskError::Declined(2)));
    assert!(
        started.elapsed() >= Duration::from_millis(100),
        "must wait for the slow responder's decline, not just the first"
    );
}

#[tokio::test]
async fn concurrent_asks_with_distinct_keys_resolve_independently() {
    let bus = MemoryBus::new();
    let asker = client(&bus);

    let shard_one = client(&bus);
    shard_one
        .add_responder(
            PREFIX,
            OneGuildShard {
                guild_id: "1".to_string(),
                config: "config-one".to_string(),
            },
        )
        .await
        .unwrap();
    let shard_two = client(&bus);
    shard_two
        .add_responder(PREFIX, DecliningShard { delay: Duration::ZERO })
        .await
        .unwrap();

    let (first, second) = tokio::join!(asker.ask("1", PREFIX), asker.ask("2", PREFIX));

    assert_eq!(first.unwrap(), "config-one");
    assert!(matches!(second.unwrap_err(), AskError::Declined(2)));
}

#[tokio::test]
async fn success_wins_even_after_some_declines() {
    struct SlowSuccess;

    #[async_trait]
    impl Respond for SlowSuccess {
        async fn respond(&self, _query: &str) -> Option<String> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Some("late-but-right".to_string())
        }
    }

    let bus = MemoryBus::new();
    let asker = client(&bus);

    let decliner = client(&bus);
    decliner
        .add_responder(PREFIX, DecliningShard { delay: Duration::ZERO })
        .await
        .unwrap();
    let winner = client(&bus);
    winner.add_responder(PREFIX, SlowSuccess).await.unwrap();

    assert_eq!(asker.ask("3", PREFIX).await.unwrap(), "late-but-right");
}

#[tokio::test]
async fn times_out_when_a_responder_stays_silent() {
    let bus = MemoryBus::new();
    let asker = client(&bus);

    let shard = client(&bus);
    shard.add_responder(PREFIX, SilentShard).await.unwrap();

    let err = asker
        .ask_with_timeout("13", PREFIX, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, AskError::TimedOut(_)));
}

#[tokio::test]
async fn duplicate_in_flight_key_is_rejected() {
    let bus = MemoryBus::new();
    let asker = client(&bus);

    let shard = client(&bus);
    shard.add_responder(PREFIX, SilentShard).await.unwrap();

    let slow = asker.ask_with_timeout("5", PREFIX, Duration::from_millis(200));
    let racing = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        asker.ask("5", PREFIX).await
    };
    let (slow, racing) = tokio::join!(slow, racing);

    assert!(matches!(slow.unwrap_err(), AskError::TimedOut(_)));
    assert!(matches!(racing.unwrap_err(), AskError::Pending));
}

#[tokio::test]
async fn late_replies_are_discarded_and_channels_are_released() {
    let bus = MemoryBus::new();
    let asker = client(&bus);

    let winner = client(&bus);
    winner
        .add_responder(
            PREFIX,
            OneGuildShard {
                guild_id: "8".to_string(),
                config: "cfg".to_string(),
            },
        )
        .await
        .unwrap();
    let straggler = client(&bus);
    straggler
        .add_responder(
            PREFIX,
            DecliningShard {
                delay: Duration::from_millis(50),
            },
        )
        .await
        .unwrap();

    assert_eq!(asker.ask("8", PREFIX).await.unwrap(), "cfg");

    // Let the straggler's decline land after completion, then reuse the
    // key: the previous ask must have fully released its record and
    // subscriptions.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(asker.ask("8", PREFIX).await.unwrap(), "cfg");
}

#[tokio::test]
async fn responder_emits_exactly_one_terminal_message_per_query() {
    let bus = MemoryBus::new();

    let shard = client(&bus);
    shard
        .add_responder(
            PREFIX,
            OneGuildShard {
                guild_id: "21".to_string(),
                config: "cfg".to_string(),
            },
        )
        .await
        .unwrap();

    let observer = client(&bus);
    let mut success = observer
        .listen(&channels::success(PREFIX, "21"))
        .await
        .unwrap();
    let mut fail = observer.listen(&channels::fail(PREFIX, "21")).await.unwrap();

    let sender = client(&bus);
    let delivered = sender.publish(&channels::query(PREFIX), "21").await.unwrap();
    assert_eq!(delivered, 1);

    assert_eq!(success.recv().await.unwrap(), "cfg");
    let extra_fail = tokio::time::timeout(Duration::from_millis(50), fail.recv()).await;
    assert!(extra_fail.is_err(), "responder must not also decline");
}

#[tokio::test]
async fn second_responder_on_one_prefix_is_rejected() {
    let bus = MemoryBus::new();
    let shard = client(&bus);

    shard
        .add_responder(PREFIX, DecliningShard { delay: Duration::ZERO })
        .await
        .unwrap();
    let err = shard.add_responder(PREFIX, SilentShard).await.unwrap_err();
    assert!(err.to_string().contains("already registered"));
}

#[tokio::test]
async fn broadcast_reaches_every_listening_process() {
    let bus = MemoryBus::new();
    let publisher = client(&bus);

    let shard_a = client(&bus);
    let mut refresh_a = shard_a
        .listen(channels::known::CONFIG_REFRESH)
        .await
        .unwrap();
    let shard_b = client(&bus);
    let mut refresh_b = shard_b
        .listen(channels::known::CONFIG_REFRESH)
        .await
        .unwrap();

    let delivered = publisher
        .publish(channels::known::CONFIG_REFRESH, "314")
        .await
        .unwrap();
    assert_eq!(delivered, 2);
    assert_eq!(refresh_a.recv().await.unwrap(), "314");
    assert_eq!(refresh_b.recv().await.unwrap(), "314");
}
