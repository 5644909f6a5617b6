//! Position queues in Redis sorted sets.
//!
//! One sorted set per sponsor root, key `{prefix}:positions:{root}`. Every
//! member is scored `0`, so Redis orders members lexicographically. The
//! member string starts with the zero-padded level followed by the tree
//! path, which makes lexicographic order equal breadth-first, left-first
//! order, and `ZPOPMIN` an atomic "take the next slot".
//!
//! A rebuilt queue is swapped in with `DEL` and `ZADD` inside one
//! `MULTI`/`EXEC`, so readers never see it half-written.
//!
//! Every call is bounded by a timeout. After `failure_threshold`
//! consecutive failures the backend stops calling Redis and reports itself
//! unavailable for `open_duration`.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisResult};
use sponsornet_core::network::{AvailablePosition, Side, TreePath};
use sponsornet_core::types::DbId;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::cache::{CacheLookup, PositionCache};
use crate::config::EngineConfig;
use crate::error::CacheError;

#[derive(Clone, Debug)]
pub struct RedisPolicy {
    pub timeout: Duration,
    pub failure_threshold: u32,
    pub open_duration: Duration,
}

impl RedisPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            timeout: config.cache_timeout,
            failure_threshold: config.breaker_failure_threshold.max(1),
            open_duration: config.breaker_open_duration,
        }
    }
}

#[derive(Default)]
struct BreakerState {
    failure_count: u32,
    open_until: Option<Instant>,
}

#[derive(Clone)]
pub struct RedisPositionCache {
    client: redis::Client,
    prefix: String,
    policy: RedisPolicy,
    breaker: Arc<Mutex<BreakerState>>,
    connection: Arc<Mutex<Option<MultiplexedConnection>>>,
}

impl RedisPositionCache {
    /// Build a client for `url`. No connection is opened until the first
    /// call.
    pub fn new(url: &str, prefix: &str, policy: RedisPolicy) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(Self {
            client,
            prefix: prefix.to_string(),
            policy,
            breaker: Arc::new(Mutex::new(BreakerState::default())),
            connection: Arc::new(Mutex::new(None)),
        })
    }

    pub fn from_config(url: &str, config: &EngineConfig) -> Result<Self, CacheError> {
        Self::new(url, &config.cache_key_prefix, RedisPolicy::from_config(config))
    }

    fn key(&self, root_id: DbId) -> String {
        format!("{}:positions:{root_id}", self.prefix)
    }

    async fn breaker_open(&self) -> bool {
        let state = self.breaker.lock().await;
        state.open_until.is_some_and(|until| Instant::now() < until)
    }

    async fn record_success(&self) {
        let mut state = self.breaker.lock().await;
        state.failure_count = 0;
        state.open_until = None;
    }

    async fn record_failure(&self) {
        let mut state = self.breaker.lock().await;
        state.failure_count += 1;
        if state.failure_count >= self.policy.failure_threshold {
            state.open_until = Some(Instant::now() + self.policy.open_duration);
            tracing::warn!(
                failures = state.failure_count,
                open_ms = self.policy.open_duration.as_millis() as u64,
                "Redis circuit breaker opened"
            );
        }
    }

    async fn connect(&self) -> RedisResult<MultiplexedConnection> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Run one command under the timeout and the breaker.
    async fn run<T, F, Fut>(&self, op: F) -> Result<T, CacheError>
    where
        T: Send,
        F: FnOnce(MultiplexedConnection) -> Fut + Send,
        Fut: Future<Output = RedisResult<T>> + Send,
    {
        if self.breaker_open().await {
            return Err(CacheError::Unavailable);
        }

        let call = async {
            let conn = self.connect().await?;
            op(conn).await
        };
        match timeout(self.policy.timeout, call).await {
            Ok(Ok(value)) => {
                self.record_success().await;
                Ok(value)
            }
            Ok(Err(e)) => {
                // Drop the connection so the next call reconnects.
                self.connection.lock().await.take();
                self.record_failure().await;
                Err(CacheError::Backend(e.to_string()))
            }
            Err(_) => {
                self.record_failure().await;
                Err(CacheError::Timeout(self.policy.timeout))
            }
        }
    }
}

/// Sorted-set member for a slot: `{level:010}:{path}:{parent}:{side}`.
fn encode_member(slot: &AvailablePosition) -> String {
    format!(
        "{:010}:{}:{}:{}",
        slot.level,
        slot.path,
        slot.parent_node_id,
        slot.side.as_str()
    )
}

fn scored_members(slots: &[AvailablePosition]) -> Vec<(i64, String)> {
    slots.iter().map(|s| (0, encode_member(s))).collect()
}

fn decode_member(root_id: DbId, member: &str) -> Result<AvailablePosition, CacheError> {
    let malformed = || CacheError::Backend(format!("Malformed position entry '{member}'"));

    let mut parts = member.splitn(4, ':');
    let (Some(level), Some(path), Some(parent), Some(side)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed());
    };

    let level: i32 = level.parse().map_err(|_| malformed())?;
    let path = TreePath::parse(path).map_err(|_| malformed())?;
    if path.depth() != level as usize {
        return Err(malformed());
    }

    Ok(AvailablePosition {
        root_sponsor_id: root_id,
        parent_node_id: parent.parse().map_err(|_| malformed())?,
        side: Side::from_str_value(side).map_err(|_| malformed())?,
        level,
        path,
    })
}

#[async_trait]
impl PositionCache for RedisPositionCache {
    async fn is_available(&self) -> bool {
        !self.breaker_open().await
    }

    async fn enqueue(&self, root_id: DbId, slots: &[AvailablePosition]) -> Result<(), CacheError> {
        if slots.is_empty() {
            return Ok(());
        }
        let key = self.key(root_id);
        let items = scored_members(slots);
        self.run(move |mut conn| async move {
            let _: i64 = conn.zadd_multiple(&key, items.as_slice()).await?;
            Ok(())
        })
        .await
    }

    async fn dequeue(&self, root_id: DbId) -> CacheLookup {
        let key = self.key(root_id);
        let popped = self
            .run(move |mut conn| async move {
                let head: Vec<(String, f64)> = conn.zpopmin(&key, 1).await?;
                Ok(head)
            })
            .await;

        let head = match popped {
            Ok(head) => head,
            Err(e) => {
                tracing::warn!(root_id, error = %e, "Position dequeue failed");
                return CacheLookup::Unavailable;
            }
        };
        let Some((member, _score)) = head.into_iter().next() else {
            return CacheLookup::Miss;
        };

        match decode_member(root_id, &member) {
            Ok(slot) => CacheLookup::Hit(slot),
            Err(e) => {
                // The entry is gone from Redis either way; the caller scans.
                tracing::warn!(root_id, error = %e, "Discarded unreadable position entry");
                CacheLookup::Unavailable
            }
        }
    }

    async fn remove(&self, root_id: DbId, slot: &AvailablePosition) -> Result<bool, CacheError> {
        let key = self.key(root_id);
        let member = encode_member(slot);
        self.run(move |mut conn| async move {
            let removed: i64 = conn.zrem(&key, &member).await?;
            Ok(removed > 0)
        })
        .await
    }

    async fn len(&self, root_id: DbId) -> Result<usize, CacheError> {
        let key = self.key(root_id);
        self.run(move |mut conn| async move { conn.zcard(&key).await })
            .await
    }

    async fn replace(&self, root_id: DbId, slots: &[AvailablePosition]) -> Result<(), CacheError> {
        let key = self.key(root_id);
        let items = scored_members(slots);
        self.run(move |mut conn| async move {
            let mut pipe = redis::pipe();
            pipe.atomic().del(&key).ignore();
            if !items.is_empty() {
                pipe.zadd_multiple(&key, items.as_slice()).ignore();
            }
            let _: () = pipe.query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    async fn clear(&self, root_id: DbId) -> Result<(), CacheError> {
        let key = self.key(root_id);
        self.run(move |mut conn| async move {
            let _: i64 = conn.del(&key).await?;
            Ok(())
        })
        .await
    }
}
