//! Connection pool shared by the repositories and the durable queue.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use forum_core::{Error, Result};

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Pool sizing for the worker.
///
/// Each in-flight handler holds at most one connection at a time and the
/// queue's claim loops borrow one per poll, so `max_connections` bounds
/// how many handlers can touch the database at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a handler waits for a free connection before failing the
    /// delivery (which is then redelivered).
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        }
    }
}

impl PoolConfig {
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DB_MAX_CONNECTIONS` | `10` | Pool size upper bound |
    /// | `DB_MIN_CONNECTIONS` | `1` | Connections kept open when idle |
    /// | `DB_ACQUIRE_TIMEOUT_SECS` | `30` | Wait for a free connection |
    pub fn from_env() -> Self {
        let base = Self::default();
        let parse = |name: &str| std::env::var(name).ok().and_then(|v| v.parse::<u64>().ok());
        Self {
            max_connections: parse("DB_MAX_CONNECTIONS")
                .map(|n| n as u32)
                .unwrap_or(base.max_connections),
            min_connections: parse("DB_MIN_CONNECTIONS")
                .map(|n| n as u32)
                .unwrap_or(base.min_connections),
            acquire_timeout: parse("DB_ACQUIRE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(base.acquire_timeout),
        }
        .normalized()
    }

    pub fn with_max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self.normalized()
    }

    pub fn with_min_connections(mut self, n: u32) -> Self {
        self.min_connections = n;
        self.normalized()
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// At least one connection, and never more kept open than allowed.
    fn normalized(mut self) -> Self {
        self.max_connections = self.max_connections.max(1);
        self.min_connections = self.min_connections.min(self.max_connections);
        self
    }
}

/// Open the pool and wait for the first connection.
pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(IDLE_TIMEOUT)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        pool_size = pool.size(),
        "Database pool ready"
    );
    Ok(pool)
}
