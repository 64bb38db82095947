//! Database access layer
//!
//! Postgres holds everything that must survive a restart: the work queues,
//! per-chain block cursors, the dead-letter table, and the set of burn
//! hashes already taken in. Queries are runtime-built (no compile-time
//! checking) so the crate builds without a live database.

use chrono::{DateTime, Utc};
use eyre::{Result, WrapErr};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

/// Create a connection pool
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")?;
    Ok(pool)
}

/// Run pending migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run migrations")?;
    info!("Database migrations applied");
    Ok(())
}

/// Last block scanned by the watcher for a chain, or None before first scan.
pub async fn get_chain_cursor(pool: &PgPool, chain_name: &str) -> Result<Option<u64>> {
    let row = sqlx::query("SELECT last_block FROM chain_cursors WHERE chain_name = $1")
        .bind(chain_name)
        .fetch_optional(pool)
        .await
        .wrap_err("Failed to read chain cursor")?;
    Ok(row.map(|row| row.get::<i64, _>("last_block") as u64))
}

pub async fn update_chain_cursor(pool: &PgPool, chain_name: &str, last_block: u64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO chain_cursors (chain_name, last_block, updated_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (chain_name)
        DO UPDATE SET last_block = $2, updated_at = NOW()
        "#,
    )
    .bind(chain_name)
    .bind(last_block as i64)
    .execute(pool)
    .await
    .wrap_err("Failed to update chain cursor")?;
    Ok(())
}

/// Whether a burn hash has already been taken in for a chain.
pub async fn is_burn_observed(pool: &PgPool, chain_name: &str, burn_hash: &str) -> Result<bool> {
    let row = sqlx::query(
        "SELECT 1 AS one FROM observed_burns WHERE chain_name = $1 AND burn_hash = $2",
    )
    .bind(chain_name)
    .bind(burn_hash)
    .fetch_optional(pool)
    .await
    .wrap_err("Failed to check observed burn")?;
    Ok(row.is_some())
}

/// Record a burn hash the watcher has taken in. Returns false when the hash
/// was already known, which is the duplicate-suppression signal.
pub async fn record_observed_burn(pool: &PgPool, chain_name: &str, burn_hash: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO observed_burns (chain_name, burn_hash)
        VALUES ($1, $2)
        ON CONFLICT (chain_name, burn_hash) DO NOTHING
        "#,
    )
    .bind(chain_name)
    .bind(burn_hash)
    .execute(pool)
    .await
    .wrap_err("Failed to record observed burn")?;
    Ok(result.rows_affected() > 0)
}

/// An item that left the pipeline unresolved, kept for operator review.
#[derive(Debug, Clone)]
pub struct DeadLetterRecord {
    pub id: i64,
    pub queue_key: String,
    pub payload: Value,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Most recent dead letters, newest first.
pub async fn list_dead_letters(pool: &PgPool, limit: i64) -> Result<Vec<DeadLetterRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, queue_key, payload, reason, created_at
        FROM dead_letters
        ORDER BY id DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .wrap_err("Failed to list dead letters")?;

    Ok(rows
        .into_iter()
        .map(|row| DeadLetterRecord {
            id: row.get("id"),
            queue_key: row.get("queue_key"),
            payload: row.get("payload"),
            reason: row.get("reason"),
            created_at: row.get("created_at"),
        })
        .collect())
}

pub async fn dead_letter_count(pool: &PgPool) -> Result<u64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM dead_letters")
        .fetch_one(pool)
        .await
        .wrap_err("Failed to count dead letters")?;
    let n: i64 = row.get("n");
    Ok(n as u64)
}
