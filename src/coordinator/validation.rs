//! Validation loop
//!
//! Drains the pending-validation queue once per tick. Each item is an import
//! request observed on the destination chain; the loop decides whether the
//! burn it names really happened on the source chain and is irreversible.
//!
//! Per item, in order:
//!   1. destination confirmation gate: the import request itself must be
//!      `confirmation_depth` blocks deep before the source is queried at all;
//!   2. source inquiry: a receipt that exists, matches the declaration, and
//!      is source-confirmed promotes the item to the attestation queue;
//!   3. an absent receipt is only damning once the source node's clock has
//!      passed the declared export time by the sync-lag allowance; before
//!      that the node may simply be behind.
//!
//! Any reschedule bumps `failed_attempts`; past the retry bound the item is
//! dead-lettered for operator review instead of silently dropped.

use eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::bridge::{AttestationSink, BurnLedger};
use crate::hash::burn_hash_matches;
use crate::metrics;
use crate::queue::{PoppedItem, WorkQueue, ATTESTATION_QUEUE, VALIDATION_QUEUE};
use crate::retry::{classify_error, RetryConfig};
use crate::types::{DeadLetterReason, ExportReceipt, PendingValidationItem};

/// What to do with a pending-validation item after inspecting the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Burn is real and irreversible; hand over to the attestation loop
    Promote,
    /// Not decidable yet; try again next tick
    Reschedule(RescheduleCause),
    /// Burn provably never happened; vote against it
    Refute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescheduleCause {
    SourceUnconfirmed,
    SourceLagging,
}

/// Whether an event at `origin_block` is buried deep enough.
pub fn confirmation_gate(origin_block: u64, latest_block: u64, depth: u64) -> bool {
    latest_block >= origin_block.saturating_add(depth)
}

/// Whether the source receipt materially matches what the import request
/// declared. A mismatch on any of these fields means the declaration is a
/// fabrication, not a race.
fn receipt_matches(declared: &ExportReceipt, found: &ExportReceipt) -> bool {
    found.current_burn_hash == declared.current_burn_hash
        && found.prev_burn_hash == declared.prev_burn_hash
        && found.burn_sequence == declared.burn_sequence
        && found.destination_recipient_addr == declared.destination_recipient_addr
        && found.amount_burned == declared.amount_burned
        && found.fee == declared.fee
        && found.block_timestamp == declared.block_timestamp
}

/// Pure disposition of one item given a snapshot of the source chain.
pub fn decide(
    declared: &ExportReceipt,
    lookup: Option<&ExportReceipt>,
    source_latest_block: u64,
    source_latest_timestamp: u64,
    source_confirmation_depth: u64,
    sync_lag_tolerance: Duration,
) -> Disposition {
    // A declaration whose own hash does not recompute can never validate
    if !burn_hash_matches(declared) {
        return Disposition::Refute;
    }

    match lookup {
        Some(found) => {
            if !receipt_matches(declared, found) || !burn_hash_matches(found) {
                return Disposition::Refute;
            }
            if !confirmation_gate(found.export_block, source_latest_block, source_confirmation_depth)
            {
                return Disposition::Reschedule(RescheduleCause::SourceUnconfirmed);
            }
            Disposition::Promote
        }
        None => {
            // Absence proves nothing while the node may still be syncing
            // toward the declared export time
            let caught_up = source_latest_timestamp
                >= declared.block_timestamp.saturating_add(sync_lag_tolerance.as_secs());
            if caught_up {
                Disposition::Refute
            } else {
                Disposition::Reschedule(RescheduleCause::SourceLagging)
            }
        }
    }
}

pub struct ValidationLoop {
    queue: Arc<dyn WorkQueue>,
    source: Arc<dyn BurnLedger>,
    destination: Arc<dyn AttestationSink>,
    retry: RetryConfig,
    dest_confirmation_depth: u64,
    source_confirmation_depth: u64,
    sync_lag_tolerance: Duration,
}

impl ValidationLoop {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        source: Arc<dyn BurnLedger>,
        destination: Arc<dyn AttestationSink>,
        retry: RetryConfig,
        dest_confirmation_depth: u64,
        source_confirmation_depth: u64,
        sync_lag_tolerance: Duration,
    ) -> Self {
        Self {
            queue,
            source,
            destination,
            retry,
            dest_confirmation_depth,
            source_confirmation_depth,
            sync_lag_tolerance,
        }
    }

    /// One pass over the queue. The length snapshot bounds the pass, so items
    /// this tick pushes back are not reprocessed until the next one.
    pub async fn tick(&self) -> Result<()> {
        let snapshot = self.queue.length(VALIDATION_QUEUE).await?;
        metrics::set_queue_depth(VALIDATION_QUEUE, snapshot);
        if snapshot == 0 {
            return Ok(());
        }

        let dest_latest = self.destination.latest_block_number().await?;

        for _ in 0..snapshot {
            let Some(popped) = self.queue.pop(VALIDATION_QUEUE).await? else {
                break;
            };
            self.process(popped, dest_latest).await?;
        }
        Ok(())
    }

    async fn process(&self, popped: PoppedItem, dest_latest: u64) -> Result<()> {
        let item: PendingValidationItem = match serde_json::from_value(popped.payload.clone()) {
            Ok(item) => item,
            Err(e) => {
                warn!(id = popped.id, error = %e, "Discarding corrupt validation item");
                metrics::record_dead_lettered(VALIDATION_QUEUE, "corrupt_payload");
                return self
                    .queue
                    .dead_letter(
                        popped.id,
                        VALIDATION_QUEUE,
                        popped.payload,
                        DeadLetterReason::CorruptPayload,
                    )
                    .await;
            }
        };

        let burn_hash = item.receipt.current_burn_hash;

        // Gate on the destination first; no source traffic for fresh items
        if !confirmation_gate(item.origin_block, dest_latest, self.dest_confirmation_depth) {
            return self.reschedule(popped.id, item, "awaiting destination confirmations").await;
        }

        let lookup = match self.source.export_receipt(burn_hash).await {
            Ok(lookup) => lookup,
            Err(e) => {
                warn!(burn_hash = %burn_hash, error = %e, "Source receipt inquiry failed");
                return self.reschedule(popped.id, item, "source inquiry error").await;
            }
        };

        let (source_latest, source_timestamp) = match self.source_snapshot(lookup.is_some()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(burn_hash = %burn_hash, error = %e, "Source snapshot failed");
                return self.reschedule(popped.id, item, "source snapshot error").await;
            }
        };

        match decide(
            &item.receipt,
            lookup.as_ref(),
            source_latest,
            source_timestamp,
            self.source_confirmation_depth,
            self.sync_lag_tolerance,
        ) {
            Disposition::Promote => {
                let promoted = item.into_attestation();
                self.queue
                    .push(ATTESTATION_QUEUE, serde_json::to_value(&promoted)?)
                    .await?;
                self.queue.remove(popped.id).await?;
                metrics::ITEMS_PROMOTED.inc();
                info!(burn_hash = %burn_hash, "Burn validated, promoted for attestation");
                Ok(())
            }
            Disposition::Reschedule(cause) => {
                self.reschedule(popped.id, item, match cause {
                    RescheduleCause::SourceUnconfirmed => "awaiting source confirmations",
                    RescheduleCause::SourceLagging => "source node behind declared export time",
                })
                .await
            }
            Disposition::Refute => self.refute(popped.id, item).await,
        }
    }

    /// Block number and timestamp from the source. The timestamp is only
    /// consulted for absent receipts, so skip the extra round trip otherwise.
    async fn source_snapshot(&self, receipt_found: bool) -> Result<(u64, u64)> {
        let latest = self.source.latest_block_number().await?;
        if receipt_found {
            return Ok((latest, 0));
        }
        let timestamp = self.source.latest_block_timestamp().await?;
        Ok((latest, timestamp))
    }

    async fn reschedule(&self, id: i64, mut item: PendingValidationItem, why: &str) -> Result<()> {
        item.failed_attempts += 1;
        let payload = serde_json::to_value(&item)?;
        if !self.retry.should_retry(item.failed_attempts) {
            warn!(
                burn_hash = %item.receipt.current_burn_hash,
                attempts = item.failed_attempts,
                why,
                "Validation retries exhausted, dead-lettering"
            );
            metrics::record_dead_lettered(VALIDATION_QUEUE, "retry_exhausted");
            return self
                .queue
                .dead_letter(id, VALIDATION_QUEUE, payload, DeadLetterReason::RetryExhausted)
                .await;
        }
        self.queue.push(VALIDATION_QUEUE, payload).await?;
        self.queue.remove(id).await?;
        metrics::record_rescheduled(VALIDATION_QUEUE);
        Ok(())
    }

    async fn refute(&self, id: i64, item: PendingValidationItem) -> Result<()> {
        let burn_hash = item.receipt.current_burn_hash;
        match self.destination.refute(burn_hash).await {
            Ok(outcome) if outcome.success => {
                metrics::record_refutation_submitted(true);
                self.queue.remove(id).await?;
                info!(burn_hash = %burn_hash, tx = %outcome.tx_hash, "Refutation submitted");
                Ok(())
            }
            Ok(outcome) => {
                metrics::record_refutation_submitted(false);
                warn!(burn_hash = %burn_hash, tx = %outcome.tx_hash, "Refutation reverted");
                self.reschedule(id, item, "refutation reverted").await
            }
            Err(e) => {
                metrics::record_refutation_submitted(false);
                let class = classify_error(&e.to_string());
                if class.is_retryable() {
                    warn!(burn_hash = %burn_hash, error = %e, "Refutation failed, will retry");
                    return self.reschedule(id, item, "refutation error").await;
                }
                warn!(burn_hash = %burn_hash, error = %e, "Refutation rejected outright");
                metrics::record_dead_lettered(VALIDATION_QUEUE, "vote_rejected");
                self.queue
                    .dead_letter(
                        id,
                        VALIDATION_QUEUE,
                        serde_json::to_value(&item)?,
                        DeadLetterReason::VoteRejected,
                    )
                    .await
            }
        }
    }
}
