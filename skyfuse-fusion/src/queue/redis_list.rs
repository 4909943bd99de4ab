use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

use super::QueueBackend;
use crate::error::Result;

const QUEUE_KEY: &str = "skyfuse:ingest";
const DEAD_LETTER_KEY: &str = "skyfuse:ingest:dead";

/// BRPOP rejects a zero timeout as "block forever"
const MIN_POP_TIMEOUT_SECS: f64 = 0.1;

/// Redis list queue: LPUSH to enqueue, BRPOP to consume
///
/// A BRPOP stalls every other command on its connection until it returns,
/// so pops never touch the shared manager. Each worker gets a blocking
/// connection of its own; with one per worker, concurrent pops wait in
/// Redis in parallel instead of queueing behind each other here.
pub struct RedisListQueue {
    conn: ConnectionManager,
    blocking: Vec<Mutex<MultiplexedConnection>>,
    next_blocking: AtomicUsize,
}

impl RedisListQueue {
    /// Connect with `pop_connections` dedicated connections for BRPOP,
    /// normally one per queue worker
    pub async fn connect(url: &str, pop_connections: usize) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        let mut blocking = Vec::with_capacity(pop_connections.max(1));
        for _ in 0..pop_connections.max(1) {
            blocking.push(Mutex::new(client.get_multiplexed_async_connection().await?));
        }
        info!(
            url = %url,
            pop_connections = blocking.len(),
            "Connected ingestion queue to Redis"
        );
        Ok(Self {
            conn,
            blocking,
            next_blocking: AtomicUsize::new(0),
        })
    }
}

/// First idle slot at or after `start`, or wait for slot `start` when every
/// slot is busy
async fn acquire<T>(slots: &[Mutex<T>], start: usize) -> MutexGuard<'_, T> {
    let first = start % slots.len();
    let idle = slots[first..]
        .iter()
        .chain(&slots[..first])
        .find_map(|slot| slot.try_lock().ok());
    match idle {
        Some(guard) => guard,
        None => slots[first].lock().await,
    }
}

#[async_trait]
impl QueueBackend for RedisListQueue {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn push(&self, payloads: Vec<String>) -> Result<()> {
        if payloads.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("LPUSH")
            .arg(QUEUE_KEY)
            .arg(payloads)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<String>> {
        let wait = timeout.as_secs_f64().max(MIN_POP_TIMEOUT_SECS);
        let start = self.next_blocking.fetch_add(1, Ordering::Relaxed);
        let mut conn = acquire(&self.blocking, start).await;
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(QUEUE_KEY)
            .arg(wait)
            .query_async(&mut *conn)
            .await?;
        Ok(popped.map(|(_, payload)| payload))
    }

    async fn dead_letter(&self, payload: String) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("LPUSH")
            .arg(DEAD_LETTER_KEY)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn depth(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: usize = redis::cmd("LLEN").arg(QUEUE_KEY).query_async(&mut conn).await?;
        Ok(len)
    }

    async fn dead_letter_depth(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: usize = redis::cmd("LLEN")
            .arg(DEAD_LETTER_KEY)
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_concurrent_pops_get_distinct_connections() {
        let slots: Vec<Mutex<usize>> = (0..3).map(Mutex::new).collect();

        let first = acquire(&slots, 0).await;
        let second = acquire(&slots, 0).await;
        let third = acquire(&slots, 7).await;
        let mut held = vec![*first, *second, *third];
        held.sort_unstable();
        assert_eq!(held, vec![0, 1, 2]);

        drop(second);
        assert_eq!(*acquire(&slots, 0).await, 1);
    }
}
