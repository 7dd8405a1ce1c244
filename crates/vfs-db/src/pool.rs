//! Connection pool setup.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use vfs_core::{Error, Result};

/// Environment variable overriding the pool size.
pub const ENV_MAX_CONNECTIONS: &str = "DATABASE_MAX_CONNECTIONS";

/// Environment variable overriding the connect timeout.
pub const ENV_CONNECT_TIMEOUT_SECS: &str = "DATABASE_CONNECT_TIMEOUT_SECS";

/// Pool size and acquire timeout.
///
/// A publish holds one connection for its whole transaction and the worker
/// polls on another, so the pool never drops below two connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Defaults overridden by `DATABASE_MAX_CONNECTIONS` and
    /// `DATABASE_CONNECT_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(
            std::env::var(ENV_MAX_CONNECTIONS).ok().as_deref(),
            std::env::var(ENV_CONNECT_TIMEOUT_SECS).ok().as_deref(),
        )
    }

    fn from_vars(max_connections: Option<&str>, connect_timeout: Option<&str>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(value) = max_connections {
            config.max_connections = parse_positive(ENV_MAX_CONNECTIONS, value)?.max(2);
        }
        if let Some(value) = connect_timeout {
            let secs = parse_positive(ENV_CONNECT_TIMEOUT_SECS, value)?;
            config.connect_timeout = Duration::from_secs(u64::from(secs));
        }
        Ok(config)
    }
}

fn parse_positive(name: &str, value: &str) -> Result<u32> {
    match value.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::Config(format!(
            "{} must be a positive integer, got '{}'",
            name, value
        ))),
    }
}

/// Connect with the default pool configuration.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::default()).await
}

pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database pool ready"
    );
    Ok(pool)
}
