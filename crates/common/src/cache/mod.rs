//! Redis integration
//!
//! Provides:
//! - Connection management
//! - Atomic windowed counters for rate accounting and usage metering
//! - Health checks

use crate::config::RedisConfig;
use crate::errors::{AppError, Result};
use crate::rate::CounterStore;
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client, Script};
use tracing::debug;

/// INCR plus EXPIRE in one round trip. The TTL is also repaired if a key
/// somehow lost it.
const INCREMENT_SCRIPT: &str = r"
local current = redis.call('INCR', KEYS[1])
if current == 1 or redis.call('TTL', KEYS[1]) == -1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return current
";

/// Redis client
pub struct Cache {
    connection: MultiplexedConnection,
    key_prefix: String,
    increment: Script,
}

impl Cache {
    /// Connect using the configured URL
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to create Redis client: {}", e),
            })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            connection,
            key_prefix: config.key_prefix.clone(),
            increment: Script::new(INCREMENT_SCRIPT),
        })
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    /// Multiplexed connections are cheap to clone; each call gets its own
    /// handle so no lock is held across an await
    fn conn(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    /// Ping Redis to check connectivity
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Redis ping failed: {}", e),
            })?;
        Ok(())
    }
}

#[async_trait]
impl CounterStore for Cache {
    async fn increment(&self, key: &str, window_secs: u64) -> Result<u64> {
        let full_key = self.key(key);
        let mut conn = self.conn();

        let count: u64 = self
            .increment
            .key(&full_key)
            .arg(window_secs.max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to increment '{}': {}", full_key, e),
            })?;

        debug!(key = %full_key, count, "Counter incremented");
        Ok(count)
    }

    async fn current(&self, key: &str) -> Result<u64> {
        let full_key = self.key(key);
        let mut conn = self.conn();

        let value: Option<u64> = conn.get(&full_key).await.map_err(|e| AppError::CacheError {
            message: format!("Failed to get key '{}': {}", full_key, e),
        })?;

        Ok(value.unwrap_or(0))
    }
}
