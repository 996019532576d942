//! Valkey/Redis-backed cache adapter for the short-term cache and write
//! buffer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kari_observability::HealthReport;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::adapter::{AdapterError, CacheAdapter};

const SCAN_PAGE_SIZE: usize = 100;

/// Cache adapter over a multiplexed Valkey connection. Commands retry once
/// after reconnecting on failure.
pub struct ValkeyCacheAdapter {
    client: redis::Client,
    connection: Arc<Mutex<Option<redis::aio::MultiplexedConnection>>>,
}

impl ValkeyCacheAdapter {
    /// Create an adapter from a redis URL.
    pub fn new(redis_url: &str) -> Result<Self, AdapterError> {
        let client = redis::Client::open(redis_url)
            .map_err(|error| AdapterError::Unavailable(format!("invalid redis url: {error}")))?;
        Ok(Self {
            client,
            connection: Arc::new(Mutex::new(None)),
        })
    }

    async fn ensure_connection(
        &self,
        connection: &mut Option<redis::aio::MultiplexedConnection>,
    ) -> Result<(), AdapterError> {
        if connection.is_some() {
            return Ok(());
        }
        *connection = Some(
            self.client
                .get_multiplexed_async_connection()
                .await
                .map_err(|error| {
                    AdapterError::Unavailable(format!("valkey connect failed: {error}"))
                })?,
        );
        Ok(())
    }

    async fn run_command<T, F>(&self, operation: &'static str, build: F) -> Result<T, AdapterError>
    where
        T: redis::FromRedisValue + Send,
        F: Fn() -> redis::Cmd,
    {
        let mut last_error: Option<AdapterError> = None;
        for attempt in 0..2 {
            let mut guard = self.connection.lock().await;
            self.ensure_connection(&mut guard).await?;
            let Some(conn) = guard.as_mut() else {
                return Err(AdapterError::Unavailable(
                    "valkey connection unavailable".to_string(),
                ));
            };
            let result: redis::RedisResult<T> = build().query_async(conn).await;
            match result {
                Ok(value) => return Ok(value),
                Err(error) => {
                    tracing::warn!(
                        event = "memory.cache.valkey_command_failed",
                        operation,
                        attempt = attempt + 1,
                        error = %error,
                        "valkey command attempt failed; reconnecting"
                    );
                    *guard = None;
                    last_error = Some(AdapterError::Io(format!("{operation} failed: {error}")));
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| AdapterError::Io(format!("{operation} failed for unknown reason"))))
    }
}

#[async_trait]
impl CacheAdapter for ValkeyCacheAdapter {
    async fn get(&self, key: &str) -> Result<Option<String>, AdapterError> {
        self.run_command("get", || {
            let mut cmd = redis::cmd("GET");
            cmd.arg(key);
            cmd
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AdapterError> {
        let ttl_ms = ttl.as_millis().max(1) as u64;
        self.run_command::<(), _>("set", || {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value).arg("PX").arg(ttl_ms);
            cmd
        })
        .await
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, AdapterError> {
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, page): (u64, Vec<String>) = self
                .run_command("scan", || {
                    let mut cmd = redis::cmd("SCAN");
                    cmd.arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_PAGE_SIZE);
                    cmd
                })
                .await?;
            keys.extend(page);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), AdapterError> {
        let _: i64 = self
            .run_command("delete", || {
                let mut cmd = redis::cmd("DEL");
                cmd.arg(key);
                cmd
            })
            .await?;
        Ok(())
    }

    async fn close(&self) {
        *self.connection.lock().await = None;
    }

    async fn health(&self) -> HealthReport {
        let started = Instant::now();
        let mut guard = self.connection.lock().await;
        if let Err(error) = self.ensure_connection(&mut guard).await {
            return HealthReport::unhealthy(error.to_string());
        }
        let Some(conn) = guard.as_mut() else {
            return HealthReport::unhealthy("valkey connection unavailable");
        };
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(conn).await;
        match pong {
            Ok(_) => HealthReport::healthy(started.elapsed().as_millis() as u64),
            Err(error) => {
                *guard = None;
                HealthReport::unhealthy(format!("valkey ping failed: {error}"))
            }
        }
    }
}
