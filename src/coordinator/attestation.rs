//! Attestation loop
//!
//! Drains the pending-attestation queue once per tick. Every item here has
//! already been validated against the source chain; what remains is to cast
//! this validator's vote on the destination chain, carrying a Merkle proof
//! that the burn sits in the source ledger's recent window.
//!
//! The local quorum mirror is consulted before any transaction goes out:
//! votes the contract would reject (hash already claimed, already voted)
//! cost nothing and are resolved locally.

use eyre::Result;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::bridge::{AttestationSink, BurnLedger};
use crate::merkle;
use crate::metrics;
use crate::queue::{PoppedItem, WorkQueue, ATTESTATION_QUEUE};
use crate::quorum::{AttestationState, QuorumLedger};
use crate::retry::{classify_error, RetryConfig};
use crate::types::{DeadLetterReason, PendingAttestationItem};
use alloy::primitives::Address;

pub struct AttestationLoop {
    queue: Arc<dyn WorkQueue>,
    source: Arc<dyn BurnLedger>,
    destination: Arc<dyn AttestationSink>,
    ledger: Mutex<QuorumLedger>,
    own_address: Address,
    retry: RetryConfig,
}

impl AttestationLoop {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        source: Arc<dyn BurnLedger>,
        destination: Arc<dyn AttestationSink>,
        ledger: QuorumLedger,
        own_address: Address,
        retry: RetryConfig,
    ) -> Self {
        Self {
            queue,
            source,
            destination,
            ledger: Mutex::new(ledger),
            own_address,
            retry,
        }
    }

    pub async fn tick(&self) -> Result<()> {
        let snapshot = self.queue.length(ATTESTATION_QUEUE).await?;
        metrics::set_queue_depth(ATTESTATION_QUEUE, snapshot);

        for _ in 0..snapshot {
            let Some(popped) = self.queue.pop(ATTESTATION_QUEUE).await? else {
                break;
            };
            self.process(popped).await?;
        }
        Ok(())
    }

    async fn process(&self, popped: PoppedItem) -> Result<()> {
        let item: PendingAttestationItem = match serde_json::from_value(popped.payload.clone()) {
            Ok(item) => item,
            Err(e) => {
                warn!(id = popped.id, error = %e, "Discarding corrupt attestation item");
                metrics::record_dead_lettered(ATTESTATION_QUEUE, "corrupt_payload");
                return self
                    .queue
                    .dead_letter(
                        popped.id,
                        ATTESTATION_QUEUE,
                        popped.payload,
                        DeadLetterReason::CorruptPayload,
                    )
                    .await;
            }
        };

        let burn_hash = item.receipt.current_burn_hash;

        // Mirror pre-checks: resolve locally what the contract would reject
        {
            let (claimed, voted) = {
                let ledger = self.ledger.lock().unwrap();
                (
                    ledger.state(burn_hash) == AttestationState::Claimed,
                    ledger.has_voted(burn_hash, self.own_address),
                )
            };
            if claimed {
                info!(burn_hash = %burn_hash, "Hash already claimed, nothing to attest");
                return self.queue.remove(popped.id).await;
            }
            if voted {
                info!(burn_hash = %burn_hash, "Vote already cast, resolving item");
                return self.queue.remove(popped.id).await;
            }
        }

        // The chain is authoritative; another validator's vote may have
        // claimed the hash since our mirror last saw it
        match self.destination.is_claimed(burn_hash).await {
            Ok(true) => {
                self.ledger.lock().unwrap().observe_claimed(burn_hash);
                metrics::HASHES_CLAIMED.inc();
                info!(burn_hash = %burn_hash, "Hash claimed on-chain, resolving item");
                return self.queue.remove(popped.id).await;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(burn_hash = %burn_hash, error = %e, "Claimed-state query failed");
                return self.reschedule(popped.id, item, "claimed query error").await;
            }
        }

        let proof = match self.source.recent_burn_hashes().await {
            Ok(window) => match merkle::prove(&window, burn_hash) {
                Ok(proof) => proof,
                Err(e) => {
                    // The burn may have slid out of the recent window; the
                    // retry bound keeps this from spinning forever
                    warn!(burn_hash = %burn_hash, error = %e, "Could not build inclusion proof");
                    return self.reschedule(popped.id, item, "proof construction failed").await;
                }
            },
            Err(e) => {
                warn!(burn_hash = %burn_hash, error = %e, "Recent-burns query failed");
                return self.reschedule(popped.id, item, "recent burns error").await;
            }
        };

        match self.destination.attest(burn_hash, &proof).await {
            Ok(outcome) if outcome.success => {
                metrics::record_attestation_submitted(true);
                let state = {
                    let mut ledger = self.ledger.lock().unwrap();
                    // The mirror may disagree (e.g. after a restart); the
                    // receipt already proves the chain accepted the vote
                    ledger
                        .attest(burn_hash, self.own_address)
                        .unwrap_or_else(|_| ledger.state(burn_hash))
                };
                if state == AttestationState::Claimed {
                    metrics::HASHES_CLAIMED.inc();
                }
                info!(
                    burn_hash = %burn_hash,
                    tx = %outcome.tx_hash,
                    ?state,
                    "Attestation accepted"
                );
                self.queue.remove(popped.id).await
            }
            Ok(outcome) => {
                metrics::record_attestation_submitted(false);
                warn!(burn_hash = %burn_hash, tx = %outcome.tx_hash, "Attestation reverted");
                self.reschedule(popped.id, item, "attestation reverted").await
            }
            Err(e) => {
                metrics::record_attestation_submitted(false);
                let class = classify_error(&e.to_string());
                if class.is_retryable() {
                    warn!(burn_hash = %burn_hash, error = %e, "Attestation failed, will retry");
                    return self.reschedule(popped.id, item, "attestation error").await;
                }
                warn!(burn_hash = %burn_hash, error = %e, "Attestation rejected outright");
                metrics::record_dead_lettered(ATTESTATION_QUEUE, "vote_rejected");
                self.queue
                    .dead_letter(
                        popped.id,
                        ATTESTATION_QUEUE,
                        serde_json::to_value(&item)?,
                        DeadLetterReason::VoteRejected,
                    )
                    .await
            }
        }
    }

    async fn reschedule(&self, id: i64, mut item: PendingAttestationItem, why: &str) -> Result<()> {
        item.failed_attempts += 1;
        let payload = serde_json::to_value(&item)?;
        if !self.retry.should_retry(item.failed_attempts) {
            warn!(
                burn_hash = %item.receipt.current_burn_hash,
                attempts = item.failed_attempts,
                why,
                "Attestation retries exhausted, dead-lettering"
            );
            metrics::record_dead_lettered(ATTESTATION_QUEUE, "retry_exhausted");
            return self
                .queue
                .dead_letter(id, ATTESTATION_QUEUE, payload, DeadLetterReason::RetryExhausted)
                .await;
        }
        self.queue.push(ATTESTATION_QUEUE, payload).await?;
        self.queue.remove(id).await?;
        metrics::record_rescheduled(ATTESTATION_QUEUE);
        Ok(())
    }
}
