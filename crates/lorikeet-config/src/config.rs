//! Configuration for the config service

use lorikeet_redis::{ReadEnv, RedisConfig};
use serde::{Deserialize, Serialize};

const ENV_PORT: &str = "CONFIG_PORT";
const DEFAULT_PORT: u16 = 8000;

/// Complete service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// HTTP listen port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Redis bus connection
    #[serde(default)]
    pub redis: RedisConfig,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            redis: RedisConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    ///
    /// - `CONFIG_PORT`: HTTP listen port (default: 8000)
    /// - Redis settings via [`RedisConfig::from_env`]
    pub fn from_env<E: ReadEnv>(env: &E) -> Self {
        let port = env
            .var(ENV_PORT)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        Self {
            port,
            redis: RedisConfig::from_env(env),
        }
    }
}
