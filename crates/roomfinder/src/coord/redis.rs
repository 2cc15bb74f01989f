//! Redis-backed coordination shared by every worker.

use super::{CoordError, LockService, TaskMarkers, TaskState, WarmCache};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashSet;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Compare-and-delete, so a holder whose lock expired cannot free someone
/// else's.
static RELEASE_SCRIPT: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r#"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            return redis.call('DEL', KEYS[1])
        else
            return 0
        end
        "#,
    )
});

#[derive(Clone)]
pub struct RedisCoordinator {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisCoordinator {
    /// Connects with a reconnecting connection manager. Every later command is
    /// bounded by `op_timeout`.
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self, CoordError> {
        let client = redis::Client::open(url)?;
        let conn = timeout(op_timeout, client.get_connection_manager())
            .await
            .map_err(|_| CoordError::Timeout { op: "connect" })??;

        info!(url = %redact(url), "Connected to Redis");
        Ok(Self { conn, op_timeout })
    }

    async fn run<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T, CoordError>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        match timeout(self.op_timeout, f(self.conn.clone())).await {
            Ok(result) => result.map_err(CoordError::from),
            Err(_) => Err(CoordError::Timeout { op }),
        }
    }
}

/// Drops credentials from a Redis URL before it reaches the logs.
fn redact(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "<unparseable>".to_string(),
    }
}

#[async_trait]
impl LockService for RedisCoordinator {
    async fn acquire(&self, name: &str, token: &str, ttl: Duration) -> Result<bool, CoordError> {
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let reply: Option<String> = self
            .run("lock acquire", |mut conn| async move {
                redis::cmd("SET")
                    .arg(name)
                    .arg(token)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(reply.is_some())
    }

    async fn release(&self, name: &str, token: &str) -> Result<bool, CoordError> {
        let deleted: i64 = self
            .run("lock release", |mut conn| async move {
                RELEASE_SCRIPT.key(name).arg(token).invoke_async(&mut conn).await
            })
            .await?;
        debug!(lock = %name, deleted, "Released lock");
        Ok(deleted == 1)
    }
}

#[async_trait]
impl TaskMarkers for RedisCoordinator {
    async fn get_marker(&self, key: &str) -> Result<Option<TaskState>, CoordError> {
        let value: Option<String> = self
            .run("marker get", |mut conn| async move { conn.get(key).await })
            .await?;
        Ok(value.as_deref().and_then(TaskState::parse))
    }

    async fn set_marker(
        &self,
        key: &str,
        state: TaskState,
        ttl: Duration,
    ) -> Result<(), CoordError> {
        let secs = ttl.as_secs().max(1);
        self.run("marker set", |mut conn| async move {
            conn.set_ex(key, state.as_str(), secs).await
        })
        .await
    }
}

#[async_trait]
impl WarmCache for RedisCoordinator {
    async fn warm_entries(&self, key: &str) -> Result<Option<HashSet<String>>, CoordError> {
        let members: HashSet<String> = self
            .run("warm read", |mut conn| async move { conn.smembers(key).await })
            .await?;
        Ok(if members.is_empty() { None } else { Some(members) })
    }

    async fn store_warm_entries(
        &self,
        key: &str,
        entries: &[String],
        ttl: Duration,
    ) -> Result<(), CoordError> {
        if entries.is_empty() {
            return Ok(());
        }
        let secs = ttl.as_secs().max(1) as i64;
        self.run("warm write", |mut conn| async move {
            redis::pipe()
                .atomic()
                .del(key)
                .ignore()
                .sadd(key, entries)
                .ignore()
                .expire(key, secs)
                .ignore()
                .query_async(&mut conn)
                .await
        })
        .await
    }
}
