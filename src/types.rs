//! Common types for the burn/mint validation pipeline
//!
//! Queue payloads are serialized with serde_json so they survive a restart in
//! the durable queue; anything that cannot be deserialized back out of the
//! queue is treated as corrupt and dead-lettered, never re-enqueued.

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical description of a burn on the source chain.
///
/// Created once at burn time and immutable thereafter. Receipts form a hash
/// chain: `prev_burn_hash` of receipt N equals `current_burn_hash` of
/// receipt N-1, and `burn_sequence` increases by exactly 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportReceipt {
    /// Name of the chain the burned tokens are destined for
    pub destination_chain: String,
    /// Bridge contract address on the destination chain
    pub destination_bridge_addr: Address,
    /// Recipient of the minted tokens on the destination chain
    pub destination_recipient_addr: Address,
    /// Amount destroyed on the source chain
    pub amount_burned: U256,
    /// Fee paid to the validator set
    pub fee: U256,
    /// Hash of the previous burn on the source chain
    pub prev_burn_hash: B256,
    /// Hash of this burn; unique per source chain
    pub current_burn_hash: B256,
    /// Position of this burn in the source chain's burn ledger
    pub burn_sequence: u64,
    /// Block number the burn was included in on the source chain
    pub export_block: u64,
    /// Source chain block timestamp at burn time
    pub block_timestamp: u64,
    /// Token supply snapshot across all chains at burn time
    pub supply_on_all_chains: Vec<U256>,
    /// Opaque application data carried along with the transfer
    pub extra_data: Bytes,
}

/// Queue entry awaiting source-chain confirmation of a burn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingValidationItem {
    pub receipt: ExportReceipt,
    /// Destination chain block the import request was observed in
    pub origin_block: u64,
    /// Reschedule count; the item is dead-lettered once this exceeds the bound
    pub failed_attempts: u32,
}

/// Queue entry awaiting an attestation submission on the destination chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAttestationItem {
    pub receipt: ExportReceipt,
    pub failed_attempts: u32,
}

impl PendingValidationItem {
    /// Promote a validated item onto the attestation queue.
    ///
    /// The attempt counter starts over: validation retries and attestation
    /// retries are budgeted independently.
    pub fn into_attestation(self) -> PendingAttestationItem {
        PendingAttestationItem {
            receipt: self.receipt,
            failed_attempts: 0,
        }
    }
}

/// Why an item left the pipeline without being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// `failed_attempts` exceeded the retry bound
    RetryExhausted,
    /// Popped payload could not be deserialized
    CorruptPayload,
    /// The quorum layer rejected our vote outright (duplicate or late)
    VoteRejected,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::RetryExhausted => "retry_exhausted",
            DeadLetterReason::CorruptPayload => "corrupt_payload",
            DeadLetterReason::VoteRejected => "vote_rejected",
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Verify the hash-chain link between two consecutive receipts.
pub fn chain_link_intact(prev: &ExportReceipt, next: &ExportReceipt) -> bool {
    next.prev_burn_hash == prev.current_burn_hash && next.burn_sequence == prev.burn_sequence + 1
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::hash::compute_burn_hash;

    /// Build a structurally valid receipt whose hash matches its fields.
    pub(crate) fn receipt_with(sequence: u64, prev: B256) -> ExportReceipt {
        let recipient = Address::repeat_byte(0x42);
        let amount = U256::from(1_000_000_000_000_000_000u128);
        let fee = U256::from(1_000_000u64);
        let timestamp = 1_700_000_000 + sequence;
        let current = compute_burn_hash(prev, sequence, recipient, amount, fee, timestamp);
        ExportReceipt {
            destination_chain: "etc".to_string(),
            destination_bridge_addr: Address::repeat_byte(0x11),
            destination_recipient_addr: recipient,
            amount_burned: amount,
            fee,
            prev_burn_hash: prev,
            current_burn_hash: current,
            burn_sequence: sequence,
            export_block: 100 + sequence,
            block_timestamp: timestamp,
            supply_on_all_chains: vec![U256::from(10u64), U256::from(20u64)],
            extra_data: Bytes::new(),
        }
    }
}
