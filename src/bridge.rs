//! Bridge contract bindings over the chain clients
//!
//! The pipeline loops talk to these traits rather than to `ChainClient`
//! directly, so the loop logic can be exercised against in-memory fakes.
//! `SourceBridge` wraps the chain tokens are burned on; `DestinationBridge`
//! wraps the chain where the quorum contract lives and minting happens.

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use std::sync::Arc;

use crate::chain::{ChainClient, TxOutcome};
use crate::merkle::MerkleProof;
use crate::types::ExportReceipt;

/// Manifest name of the burn ledger contract on the source chain.
pub const BRIDGE_CONTRACT: &str = "bridge";
/// Manifest name of the quorum/attestation contract on the destination chain.
pub const VALIDATOR_CONTRACT: &str = "validator";

/// Read-only view of the source chain's burn ledger.
#[async_trait]
pub trait BurnLedger: Send + Sync {
    async fn latest_block_number(&self) -> Result<u64>;
    async fn latest_block_timestamp(&self) -> Result<u64>;
    /// Receipt for a burn hash, or None when the ledger has no such burn.
    async fn export_receipt(&self, burn_hash: B256) -> Result<Option<ExportReceipt>>;
    /// The most recent burn hashes, oldest first, bounded by the contract's
    /// proof window.
    async fn recent_burn_hashes(&self) -> Result<Vec<B256>>;
}

/// Vote submission surface on the destination chain.
#[async_trait]
pub trait AttestationSink: Send + Sync {
    async fn latest_block_number(&self) -> Result<u64>;
    async fn attest(&self, burn_hash: B256, proof: &MerkleProof) -> Result<TxOutcome>;
    async fn refute(&self, burn_hash: B256) -> Result<TxOutcome>;
    async fn is_claimed(&self, burn_hash: B256) -> Result<bool>;
}

// DynSolValue accessors; each names the field so a decoding mismatch
// pinpoints the manifest/contract drift.

fn as_string(value: &DynSolValue, field: &str) -> Result<String> {
    match value {
        DynSolValue::String(s) => Ok(s.clone()),
        other => Err(eyre!("Field '{field}' is not a string: {other:?}")),
    }
}

fn as_address(value: &DynSolValue, field: &str) -> Result<Address> {
    match value {
        DynSolValue::Address(a) => Ok(*a),
        other => Err(eyre!("Field '{field}' is not an address: {other:?}")),
    }
}

fn as_u256(value: &DynSolValue, field: &str) -> Result<U256> {
    match value {
        DynSolValue::Uint(v, _) => Ok(*v),
        other => Err(eyre!("Field '{field}' is not a uint: {other:?}")),
    }
}

fn as_u64(value: &DynSolValue, field: &str) -> Result<u64> {
    let wide = as_u256(value, field)?;
    wide.try_into()
        .map_err(|_| eyre!("Field '{field}' does not fit in u64: {wide}"))
}

fn as_b256(value: &DynSolValue, field: &str) -> Result<B256> {
    match value {
        DynSolValue::FixedBytes(word, 32) => Ok(*word),
        other => Err(eyre!("Field '{field}' is not bytes32: {other:?}")),
    }
}

fn as_bytes(value: &DynSolValue, field: &str) -> Result<Bytes> {
    match value {
        DynSolValue::Bytes(raw) => Ok(Bytes::from(raw.clone())),
        other => Err(eyre!("Field '{field}' is not bytes: {other:?}")),
    }
}

fn as_u256_array(value: &DynSolValue, field: &str) -> Result<Vec<U256>> {
    match value {
        DynSolValue::Array(items) => items
            .iter()
            .map(|item| as_u256(item, field))
            .collect::<Result<Vec<_>>>(),
        other => Err(eyre!("Field '{field}' is not an array: {other:?}")),
    }
}

fn as_b256_array(value: &DynSolValue, field: &str) -> Result<Vec<B256>> {
    match value {
        DynSolValue::Array(items) => items
            .iter()
            .map(|item| as_b256(item, field))
            .collect::<Result<Vec<_>>>(),
        other => Err(eyre!("Field '{field}' is not an array: {other:?}")),
    }
}

/// Decode the `exportReceipt` return values, declaration order:
/// destinationChain, destinationBridge, destinationRecipient, amountBurned,
/// fee, prevBurnHash, currentBurnHash, burnSequence, exportBlock,
/// blockTimestamp, supplyOnAllChains, extraData.
pub(crate) fn decode_export_receipt(values: &[DynSolValue]) -> Result<ExportReceipt> {
    if values.len() != 12 {
        return Err(eyre!(
            "exportReceipt returned {} values, expected 12",
            values.len()
        ));
    }
    Ok(ExportReceipt {
        destination_chain: as_string(&values[0], "destinationChain")?,
        destination_bridge_addr: as_address(&values[1], "destinationBridge")?,
        destination_recipient_addr: as_address(&values[2], "destinationRecipient")?,
        amount_burned: as_u256(&values[3], "amountBurned")?,
        fee: as_u256(&values[4], "fee")?,
        prev_burn_hash: as_b256(&values[5], "prevBurnHash")?,
        current_burn_hash: as_b256(&values[6], "currentBurnHash")?,
        burn_sequence: as_u64(&values[7], "burnSequence")?,
        export_block: as_u64(&values[8], "exportBlock")?,
        block_timestamp: as_u64(&values[9], "blockTimestamp")?,
        supply_on_all_chains: as_u256_array(&values[10], "supplyOnAllChains")?,
        extra_data: as_bytes(&values[11], "extraData")?,
    })
}

/// Decode an `ImportRequested` event into the receipt the requester claims
/// exists on the source chain. Declaration order: currentBurnHash,
/// prevBurnHash, destinationRecipient, amountBurned, fee, burnSequence,
/// exportBlock, exportTimestamp, supplyOnAllChains, extraData. The
/// destination chain name and bridge address are local knowledge.
pub(crate) fn receipt_from_import_event(
    values: &[DynSolValue],
    destination_chain: &str,
    destination_bridge: Address,
) -> Result<ExportReceipt> {
    if values.len() != 10 {
        return Err(eyre!(
            "ImportRequested carried {} values, expected 10",
            values.len()
        ));
    }
    Ok(ExportReceipt {
        destination_chain: destination_chain.to_string(),
        destination_bridge_addr: destination_bridge,
        destination_recipient_addr: as_address(&values[2], "destinationRecipient")?,
        amount_burned: as_u256(&values[3], "amountBurned")?,
        fee: as_u256(&values[4], "fee")?,
        prev_burn_hash: as_b256(&values[1], "prevBurnHash")?,
        current_burn_hash: as_b256(&values[0], "currentBurnHash")?,
        burn_sequence: as_u64(&values[5], "burnSequence")?,
        export_block: as_u64(&values[6], "exportBlock")?,
        block_timestamp: as_u64(&values[7], "exportTimestamp")?,
        supply_on_all_chains: as_u256_array(&values[8], "supplyOnAllChains")?,
        extra_data: as_bytes(&values[9], "extraData")?,
    })
}

pub struct SourceBridge {
    client: Arc<ChainClient>,
}

impl SourceBridge {
    pub fn new(client: Arc<ChainClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BurnLedger for SourceBridge {
    async fn latest_block_number(&self) -> Result<u64> {
        self.client.latest_block_number().await
    }

    async fn latest_block_timestamp(&self) -> Result<u64> {
        self.client.latest_block_timestamp().await
    }

    async fn export_receipt(&self, burn_hash: B256) -> Result<Option<ExportReceipt>> {
        let values = self
            .client
            .call(
                BRIDGE_CONTRACT,
                "exportReceipt",
                &[DynSolValue::FixedBytes(burn_hash, 32)],
            )
            .await?;
        let receipt = decode_export_receipt(&values)
            .wrap_err_with(|| format!("Malformed exportReceipt for {burn_hash}"))?;
        // The contract returns a zeroed struct for unknown hashes
        if receipt.export_block == 0 {
            return Ok(None);
        }
        Ok(Some(receipt))
    }

    async fn recent_burn_hashes(&self) -> Result<Vec<B256>> {
        let values = self
            .client
            .call(BRIDGE_CONTRACT, "recentBurns", &[])
            .await?;
        let first = values
            .first()
            .ok_or_else(|| eyre!("recentBurns returned nothing"))?;
        as_b256_array(first, "recentBurns")
    }
}

pub struct DestinationBridge {
    client: Arc<ChainClient>,
}

impl DestinationBridge {
    pub fn new(client: Arc<ChainClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AttestationSink for DestinationBridge {
    async fn latest_block_number(&self) -> Result<u64> {
        self.client.latest_block_number().await
    }

    async fn attest(&self, burn_hash: B256, proof: &MerkleProof) -> Result<TxOutcome> {
        let siblings = proof
            .sibling_hashes()
            .into_iter()
            .map(|hash| DynSolValue::FixedBytes(hash, 32))
            .collect::<Vec<_>>();
        self.client
            .send(
                VALIDATOR_CONTRACT,
                "attestHash",
                &[
                    DynSolValue::FixedBytes(burn_hash, 32),
                    DynSolValue::FixedBytes(proof.root, 32),
                    DynSolValue::Array(siblings),
                ],
            )
            .await
    }

    async fn refute(&self, burn_hash: B256) -> Result<TxOutcome> {
        self.client
            .send(
                VALIDATOR_CONTRACT,
                "refuteHash",
                &[DynSolValue::FixedBytes(burn_hash, 32)],
            )
            .await
    }

    async fn is_claimed(&self, burn_hash: B256) -> Result<bool> {
        let values = self
            .client
            .call(
                VALIDATOR_CONTRACT,
                "claimed",
                &[DynSolValue::FixedBytes(burn_hash, 32)],
            )
            .await?;
        match values.first() {
            Some(DynSolValue::Bool(flag)) => Ok(*flag),
            other => Err(eyre!("claimed() returned a non-bool: {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uint(v: u64) -> DynSolValue {
        DynSolValue::Uint(U256::from(v), 256)
    }

    fn receipt_values() -> Vec<DynSolValue> {
        vec![
            DynSolValue::String("destnet".to_string()),
            DynSolValue::Address(Address::repeat_byte(0x11)),
            DynSolValue::Address(Address::repeat_byte(0x42)),
            uint(1_000_000),
            uint(500),
            DynSolValue::FixedBytes(B256::repeat_byte(0x01), 32),
            DynSolValue::FixedBytes(B256::repeat_byte(0x02), 32),
            uint(7),
            uint(120),
            uint(1_700_000_000),
            DynSolValue::Array(vec![uint(10), uint(20)]),
            DynSolValue::Bytes(vec![0xDE, 0xAD]),
        ]
    }

    #[test]
    fn test_decode_export_receipt() {
        let receipt = decode_export_receipt(&receipt_values()).unwrap();
        assert_eq!(receipt.destination_chain, "destnet");
        assert_eq!(receipt.burn_sequence, 7);
        assert_eq!(receipt.export_block, 120);
        assert_eq!(receipt.current_burn_hash, B256::repeat_byte(0x02));
        assert_eq!(receipt.supply_on_all_chains, vec![U256::from(10u64), U256::from(20u64)]);
        assert_eq!(receipt.extra_data.as_ref(), &[0xDE, 0xAD]);
    }

    #[test]
    fn test_decode_rejects_wrong_arity() {
        let mut values = receipt_values();
        values.pop();
        assert!(decode_export_receipt(&values).is_err());
    }

    #[test]
    fn test_decode_rejects_wrong_type() {
        let mut values = receipt_values();
        values[3] = DynSolValue::Bool(true);
        let err = decode_export_receipt(&values).unwrap_err();
        assert!(err.to_string().contains("amountBurned"));
    }

    #[test]
    fn test_receipt_from_import_event() {
        let values = vec![
            DynSolValue::FixedBytes(B256::repeat_byte(0x02), 32),
            DynSolValue::FixedBytes(B256::repeat_byte(0x01), 32),
            DynSolValue::Address(Address::repeat_byte(0x42)),
            uint(1_000_000),
            uint(500),
            uint(7),
            uint(120),
            uint(1_700_000_000),
            DynSolValue::Array(vec![uint(10)]),
            DynSolValue::Bytes(vec![]),
        ];
        let receipt =
            receipt_from_import_event(&values, "destnet", Address::repeat_byte(0x11)).unwrap();
        assert_eq!(receipt.destination_chain, "destnet");
        assert_eq!(receipt.destination_bridge_addr, Address::repeat_byte(0x11));
        assert_eq!(receipt.current_burn_hash, B256::repeat_byte(0x02));
        assert_eq!(receipt.prev_burn_hash, B256::repeat_byte(0x01));
        assert_eq!(receipt.block_timestamp, 1_700_000_000);
    }
}
