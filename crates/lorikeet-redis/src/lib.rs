//! # lorikeet-redis
//!
//! Shared Redis pub/sub infrastructure for lorikeet services.
//!
//! The shards and the config web service run as separate processes with
//! only a Redis pub/sub bus between them, and the bus has no native
//! request/reply. This crate provides:
//! - Channel naming for the query/response grammar
//! - A `Transport` abstraction over the bus (live Redis, or in-memory for
//!   tests and single-process runs)
//! - Responder registration that turns process-local knowledge into bus
//!   replies
//! - The scatter-gather `ask` operation: one broadcast question, first
//!   success wins, with "nobody listening" and "everybody declined"
//!   reported as distinct outcomes and a mandatory deadline on every call
//!
//! ## Example
//!
//! ```rust,no_run
//! use lorikeet_redis::{channels, PubSub, RedisConfig, SystemEnv};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RedisConfig::from_env(&SystemEnv);
//!     let (transport, inbound) = lorikeet_redis::redis::connect(&config).await?;
//!     let pubsub = PubSub::new(transport, inbound).with_ask_timeout(config.ask_timeout());
//!
//!     match pubsub.ask("4815162342", channels::known::CONFIG).await {
//!         Ok(config) => println!("guild config: {config}"),
//!         Err(e) => eprintln!("no config: {e}"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod channels;
pub mod config;
pub mod error;
pub mod memory;
pub mod pubsub;
pub mod redis;
mod registry;
pub mod transport;

pub use config::{InMemoryEnv, ReadEnv, RedisConfig, SystemEnv};
pub use error::{AskError, Error, Result};
pub use memory::{MemoryBus, MemoryTransport};
pub use pubsub::{Listening, PubSub, Respond, DEFAULT_ASK_TIMEOUT};
pub use transport::{ChannelMessage, Transport};

pub use crate::redis::{connect, RedisTransport};
