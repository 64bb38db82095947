//! Durable work queues
//!
//! Pipeline state between loop ticks lives in Postgres so a crashed or
//! restarted process picks up where it left off. Items are FIFO per queue
//! key. A pop takes a lease instead of deleting: the item stays invisible
//! until the consumer removes it or the lease expires, so an item held by a
//! crashed consumer becomes reclaimable instead of lost. Consumers are
//! idempotent, which makes the resulting at-least-once delivery safe.

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::debug;

use crate::types::DeadLetterReason;

/// Queue key for items awaiting source-chain validation.
pub const VALIDATION_QUEUE: &str = "pending_validation";
/// Queue key for items awaiting attestation submission.
pub const ATTESTATION_QUEUE: &str = "pending_attestation";

/// An item popped under a lease. `id` is handed back to `remove` once the
/// consumer has resolved the item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoppedItem {
    pub id: i64,
    pub payload: Value,
}

/// Queue operations the pipeline loops run against.
///
/// The Postgres implementation below is the production one; tests swap in an
/// in-memory queue so loop logic runs without infrastructure.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append to the back of a queue.
    async fn push(&self, key: &str, payload: Value) -> Result<()>;
    /// Lease the oldest available item, or None when the queue is drained.
    async fn pop(&self, key: &str) -> Result<Option<PoppedItem>>;
    /// Resolve a leased item; it never reappears.
    async fn remove(&self, id: i64) -> Result<()>;
    /// Number of items currently available (not leased).
    async fn length(&self, key: &str) -> Result<u64>;
    /// Resolve a leased item into the dead-letter table.
    async fn dead_letter(
        &self,
        id: i64,
        key: &str,
        payload: Value,
        reason: DeadLetterReason,
    ) -> Result<()>;
}

/// Postgres-backed queue. Concurrent consumers are safe: the pop statement
/// uses `FOR UPDATE SKIP LOCKED`, so two coordinators never lease the same
/// row.
pub struct DurableQueue {
    pool: PgPool,
    lease: Duration,
}

impl DurableQueue {
    pub fn new(pool: PgPool, lease: Duration) -> Self {
        Self { pool, lease }
    }
}

#[async_trait]
impl WorkQueue for DurableQueue {
    async fn push(&self, key: &str, payload: Value) -> Result<()> {
        sqlx::query("INSERT INTO queue_items (queue_key, payload) VALUES ($1, $2)")
            .bind(key)
            .bind(&payload)
            .execute(&self.pool)
            .await
            .wrap_err("Failed to push queue item")?;
        Ok(())
    }

    async fn pop(&self, key: &str) -> Result<Option<PoppedItem>> {
        let row = sqlx::query(
            r#"
            WITH next AS (
                SELECT id FROM queue_items
                WHERE queue_key = $1
                  AND (leased_until IS NULL OR leased_until < NOW())
                ORDER BY id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE queue_items q
            SET leased_until = NOW() + make_interval(secs => $2)
            FROM next
            WHERE q.id = next.id
            RETURNING q.id, q.payload
            "#,
        )
        .bind(key)
        .bind(self.lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .wrap_err("Failed to pop queue item")?;

        Ok(row.map(|row| PoppedItem {
            id: row.get("id"),
            payload: row.get("payload"),
        }))
    }

    async fn remove(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM queue_items WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .wrap_err("Failed to remove queue item")?;
        Ok(())
    }

    async fn length(&self, key: &str) -> Result<u64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM queue_items
            WHERE queue_key = $1
              AND (leased_until IS NULL OR leased_until < NOW())
            "#,
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await
        .wrap_err("Failed to count queue items")?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }

    async fn dead_letter(
        &self,
        id: i64,
        key: &str,
        payload: Value,
        reason: DeadLetterReason,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM queue_items WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO dead_letters (queue_key, payload, reason) VALUES ($1, $2, $3)",
        )
        .bind(key)
        .bind(&payload)
        .bind(reason.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await.wrap_err("Failed to dead-letter item")?;

        debug!(queue = key, reason = %reason, "Dead-lettered queue item");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mem {
    //! In-memory queue for exercising loop logic without Postgres.

    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) struct DeadLetterEntry {
        pub key: String,
        pub payload: Value,
        pub reason: DeadLetterReason,
    }

    #[derive(Default)]
    struct MemState {
        next_id: i64,
        queues: HashMap<String, VecDeque<PoppedItem>>,
        leased: HashMap<i64, String>,
        dead: Vec<DeadLetterEntry>,
    }

    #[derive(Default)]
    pub(crate) struct MemQueue {
        state: Mutex<MemState>,
    }

    impl MemQueue {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn dead_letters(&self) -> Vec<DeadLetterEntry> {
            self.state.lock().unwrap().dead.clone()
        }
    }

    #[async_trait]
    impl WorkQueue for MemQueue {
        async fn push(&self, key: &str, payload: Value) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let id = state.next_id;
            state
                .queues
                .entry(key.to_string())
                .or_default()
                .push_back(PoppedItem { id, payload });
            Ok(())
        }

        async fn pop(&self, key: &str) -> Result<Option<PoppedItem>> {
            let mut state = self.state.lock().unwrap();
            let item = state
                .queues
                .get_mut(key)
                .and_then(|queue| queue.pop_front());
            if let Some(item) = &item {
                state.leased.insert(item.id, key.to_string());
            }
            Ok(item)
        }

        async fn remove(&self, id: i64) -> Result<()> {
            self.state.lock().unwrap().leased.remove(&id);
            Ok(())
        }

        async fn length(&self, key: &str) -> Result<u64> {
            let state = self.state.lock().unwrap();
            Ok(state.queues.get(key).map(|q| q.len()).unwrap_or(0) as u64)
        }

        async fn dead_letter(
            &self,
            id: i64,
            key: &str,
            payload: Value,
            reason: DeadLetterReason,
        ) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.leased.remove(&id);
            state.dead.push(DeadLetterEntry {
                key: key.to_string(),
                payload,
                reason,
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mem::MemQueue;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fifo_per_key() {
        let queue = MemQueue::new();
        queue.push("a", json!(1)).await.unwrap();
        queue.push("a", json!(2)).await.unwrap();
        queue.push("b", json!(99)).await.unwrap();

        assert_eq!(queue.pop("a").await.unwrap().unwrap().payload, json!(1));
        assert_eq!(queue.pop("a").await.unwrap().unwrap().payload, json!(2));
        assert!(queue.pop("a").await.unwrap().is_none());
        assert_eq!(queue.pop("b").await.unwrap().unwrap().payload, json!(99));
    }

    #[tokio::test]
    async fn test_length_tracks_available_items() {
        let queue = MemQueue::new();
        assert_eq!(queue.length("a").await.unwrap(), 0);
        queue.push("a", json!(1)).await.unwrap();
        queue.push("a", json!(2)).await.unwrap();
        assert_eq!(queue.length("a").await.unwrap(), 2);
        queue.pop("a").await.unwrap();
        assert_eq!(queue.length("a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dead_letter_records_reason() {
        let queue = MemQueue::new();
        queue.push("a", json!({"x": 1})).await.unwrap();
        let item = queue.pop("a").await.unwrap().unwrap();
        queue
            .dead_letter(item.id, "a", item.payload, DeadLetterReason::RetryExhausted)
            .await
            .unwrap();

        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, DeadLetterReason::RetryExhausted);
        assert_eq!(queue.length("a").await.unwrap(), 0);
    }
}
