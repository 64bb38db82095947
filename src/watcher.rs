//! Import-request watcher
//!
//! Polls the destination chain for `ImportRequested` events and enqueues a
//! pending-validation item per new burn hash. The scan cursor is persisted
//! per chain, so a restart resumes where the last run stopped instead of
//! missing or rescanning events. Confirmation gating is not done here; the
//! validation loop owns that.
//!
//! Ingest ordering invariant: a burn hash is marked observed only after its
//! queue item has landed. A tick that dies between the two statements gets
//! rescanned and may enqueue the same burn twice, which the idempotent
//! consumers absorb; marking first would skip the burn forever on rescan.

use alloy::primitives::Address;
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::bridge::{receipt_from_import_event, BRIDGE_CONTRACT, VALIDATOR_CONTRACT};
use crate::chain::ChainClient;
use crate::db;
use crate::hash::bytes32_to_hex;
use crate::metrics;
use crate::queue::{WorkQueue, VALIDATION_QUEUE};
use crate::types::{ExportReceipt, PendingValidationItem};

/// Cap on blocks scanned per tick, so a long outage catches up in slices
const MAX_SCAN_BLOCKS: u64 = 1000;

/// Next inclusive block range to scan, or None when there is nothing new.
fn next_scan_range(cursor: u64, latest: u64) -> Option<(u64, u64)> {
    if latest <= cursor {
        return None;
    }
    let from = cursor + 1;
    let to = latest.min(cursor + MAX_SCAN_BLOCKS);
    Some((from, to))
}

/// Duplicate-suppression record of burn hashes already taken in.
#[async_trait]
pub trait ObservedBurns: Send + Sync {
    async fn is_observed(&self, chain_name: &str, burn_hash: &str) -> Result<bool>;
    async fn record(&self, chain_name: &str, burn_hash: &str) -> Result<()>;
}

pub struct PgObservedBurns {
    pool: PgPool,
}

impl PgObservedBurns {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ObservedBurns for PgObservedBurns {
    async fn is_observed(&self, chain_name: &str, burn_hash: &str) -> Result<bool> {
        db::is_burn_observed(&self.pool, chain_name, burn_hash).await
    }

    async fn record(&self, chain_name: &str, burn_hash: &str) -> Result<()> {
        // Re-recording after a retried tick is a no-op
        db::record_observed_burn(&self.pool, chain_name, burn_hash).await?;
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum IngestOutcome {
    Enqueued,
    Duplicate,
}

/// Take in one decoded import request: skip hashes already in flight,
/// enqueue the rest. Enqueue first, mark observed second; see the module
/// docs for why the order matters.
pub(crate) async fn ingest_import(
    queue: &dyn WorkQueue,
    observed: &dyn ObservedBurns,
    chain_name: &str,
    receipt: ExportReceipt,
    origin_block: u64,
) -> Result<IngestOutcome> {
    let hash_hex = bytes32_to_hex(&receipt.current_burn_hash.0);
    if observed.is_observed(chain_name, &hash_hex).await? {
        return Ok(IngestOutcome::Duplicate);
    }

    let item = PendingValidationItem {
        receipt,
        origin_block,
        failed_attempts: 0,
    };
    queue
        .push(
            VALIDATION_QUEUE,
            serde_json::to_value(&item).wrap_err("Failed to serialize queue item")?,
        )
        .await?;
    observed.record(chain_name, &hash_hex).await?;

    info!(
        burn_hash = %hash_hex,
        sequence = item.receipt.burn_sequence,
        block = item.origin_block,
        "Import request enqueued for validation"
    );
    Ok(IngestOutcome::Enqueued)
}

pub struct ImportWatcher {
    client: Arc<ChainClient>,
    pool: PgPool,
    queue: Arc<dyn WorkQueue>,
    observed: Arc<dyn ObservedBurns>,
    chain_name: String,
    bridge_addr: Address,
    poll_interval: Duration,
}

impl std::fmt::Debug for ImportWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportWatcher")
            .field("chain_name", &self.chain_name)
            .field("bridge_addr", &self.bridge_addr)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl ImportWatcher {
    pub fn new(
        client: Arc<ChainClient>,
        pool: PgPool,
        queue: Arc<dyn WorkQueue>,
        poll_interval: Duration,
    ) -> Result<Self> {
        let chain_name = client.name.clone();
        // Events come from the validator contract; the receipt records the
        // destination bridge, which is its own manifest entry
        client.registry().required(VALIDATOR_CONTRACT)?;
        let bridge_addr = client.registry().required(BRIDGE_CONTRACT)?.address;
        let observed = Arc::new(PgObservedBurns::new(pool.clone()));
        Ok(Self {
            client,
            pool,
            queue,
            observed,
            chain_name,
            bridge_addr,
            poll_interval,
        })
    }

    pub async fn run(&self, mut shutdown: mpsc::Receiver<()>) {
        info!(chain = %self.chain_name, "Import watcher started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(chain = %self.chain_name, "Import watcher shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    if let Err(e) = self.tick().await {
                        error!(chain = %self.chain_name, error = %e, "Watcher tick failed");
                    }
                }
            }
        }
    }

    async fn tick(&self) -> Result<()> {
        let latest = self.client.latest_block_number().await?;
        // First run starts at the tip; historical requests predate this
        // validator and are someone else's to have voted on
        let cursor = match db::get_chain_cursor(&self.pool, &self.chain_name).await? {
            Some(cursor) => cursor,
            None => {
                db::update_chain_cursor(&self.pool, &self.chain_name, latest).await?;
                return Ok(());
            }
        };

        let Some((from, to)) = next_scan_range(cursor, latest) else {
            return Ok(());
        };

        let logs = self
            .client
            .query_events(VALIDATOR_CONTRACT, "ImportRequested", from, to)
            .await?;
        debug!(chain = %self.chain_name, from, to, count = logs.len(), "Scanned for import requests");

        for log in logs {
            let receipt =
                match receipt_from_import_event(&log.values, &self.chain_name, self.bridge_addr) {
                    Ok(receipt) => receipt,
                    Err(e) => {
                        // A malformed event cannot be retried into shape
                        warn!(chain = %self.chain_name, block = log.block_number, error = %e,
                              "Skipping undecodable import request");
                        continue;
                    }
                };

            match ingest_import(
                self.queue.as_ref(),
                self.observed.as_ref(),
                &self.chain_name,
                receipt,
                log.block_number,
            )
            .await?
            {
                IngestOutcome::Enqueued => metrics::IMPORT_EVENTS_OBSERVED.inc(),
                IngestOutcome::Duplicate => {
                    debug!(block = log.block_number, "Burn hash already in flight, skipping");
                    metrics::DUPLICATE_EVENTS_SKIPPED.inc();
                }
            }
        }

        db::update_chain_cursor(&self.pool, &self.chain_name, to).await?;
        Ok(())
    }
}
