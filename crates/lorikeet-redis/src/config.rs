//! Redis connection configuration

use std::collections::HashMap;
use std::env::{self, VarError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

const ENV_REDIS_URL: &str = "REDIS_URL";
const ENV_ASK_TIMEOUT_MS: &str = "LORIKEET_ASK_TIMEOUT_MS";

const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
const DEFAULT_ASK_TIMEOUT_MS: u64 = 5_000;

/// Read access to the process environment.
/// Implement this trait to control the environment in tests.
pub trait ReadEnv {
    fn var(&self, key: &str) -> Result<String, VarError>;
}

/// Live implementation backed by `std::env`.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl ReadEnv for SystemEnv {
    fn var(&self, key: &str) -> Result<String, VarError> {
        env::var(key)
    }
}

/// In-memory environment for unit tests.
#[derive(Clone, Default)]
pub struct InMemoryEnv {
    vars: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, value: &str) {
        self.vars
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }
}

impl ReadEnv for InMemoryEnv {
    fn var(&self, key: &str) -> Result<String, VarError> {
        self.vars
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or(VarError::NotPresent)
    }
}

/// Redis connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Connection URI, e.g. `redis://localhost:6379`
    #[serde(default = "default_url")]
    pub url: String,
    /// Deadline applied to scatter-gather queries, in milliseconds
    #[serde(default = "default_ask_timeout_ms")]
    pub ask_timeout_ms: u64,
}

fn default_url() -> String {
    DEFAULT_REDIS_URL.to_string()
}

fn default_ask_timeout_ms() -> u64 {
    DEFAULT_ASK_TIMEOUT_MS
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            ask_timeout_ms: DEFAULT_ASK_TIMEOUT_MS,
        }
    }
}

impl RedisConfig {
    /// Create a config pointing at the given connection URI
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ask_timeout_ms: DEFAULT_ASK_TIMEOUT_MS,
        }
    }

    /// Build config from environment variables.
    ///
    /// - `REDIS_URL`: connection URI (default: `redis://localhost:6379`)
    /// - `LORIKEET_ASK_TIMEOUT_MS`: query deadline in milliseconds (default: 5000)
    pub fn from_env<E: ReadEnv>(env: &E) -> Self {
        let url = env
            .var(ENV_REDIS_URL)
            .unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string());
        let ask_timeout_ms = env
            .var(ENV_ASK_TIMEOUT_MS)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_ASK_TIMEOUT_MS);
        Self {
            url,
            ask_timeout_ms,
        }
    }

    /// The query deadline as a [`Duration`]
    pub fn ask_timeout(&self) -> Duration {
        Duration::from_millis(self.ask_timeout_ms)
    }
}
