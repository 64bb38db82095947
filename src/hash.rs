//! Burn hash computation
//!
//! Recomputes the hash the source chain's bridge contract assigns to each
//! burn, so a receipt fetched over RPC can be checked against the hash the
//! import request named. The layout matches the contract's abi.encode: six
//! 32-byte words, keccak256 over the concatenation.

use alloy::primitives::{Address, B256, U256};
use tiny_keccak::{Hasher, Keccak};

/// Compute keccak256 hash of data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Compute the canonical burn hash for a receipt's fields.
///
/// keccak256(abi.encode(prevBurnHash, burnSequence, recipient, amount, fee,
/// blockTimestamp)), each value a 32-byte big-endian word, the recipient
/// address right-aligned.
pub fn compute_burn_hash(
    prev_burn_hash: B256,
    burn_sequence: u64,
    recipient: Address,
    amount: U256,
    fee: U256,
    block_timestamp: u64,
) -> B256 {
    let mut data = [0u8; 192];

    // Word 0: prevBurnHash (bytes32)
    data[0..32].copy_from_slice(prev_burn_hash.as_slice());

    // Word 1: burnSequence (uint256, big-endian in last 8 bytes)
    data[32 + 24..64].copy_from_slice(&burn_sequence.to_be_bytes());

    // Word 2: recipient (address, right-aligned in 32 bytes)
    data[64 + 12..96].copy_from_slice(recipient.as_slice());

    // Word 3: amount (uint256)
    data[96..128].copy_from_slice(&amount.to_be_bytes::<32>());

    // Word 4: fee (uint256)
    data[128..160].copy_from_slice(&fee.to_be_bytes::<32>());

    // Word 5: blockTimestamp (uint256, big-endian in last 8 bytes)
    data[160 + 24..192].copy_from_slice(&block_timestamp.to_be_bytes());

    B256::from(keccak256(&data))
}

/// Check a receipt's claimed hash against a recomputation from its fields.
pub fn burn_hash_matches(receipt: &crate::types::ExportReceipt) -> bool {
    compute_burn_hash(
        receipt.prev_burn_hash,
        receipt.burn_sequence,
        receipt.destination_recipient_addr,
        receipt.amount_burned,
        receipt.fee,
        receipt.block_timestamp,
    ) == receipt.current_burn_hash
}

/// Convert bytes to hex string with 0x prefix
pub fn bytes32_to_hex(bytes: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak256() {
        let result = keccak256(b"hello");
        assert_eq!(
            bytes32_to_hex(&result),
            "0x1c8aff950685c2ed4bc3174f3472287b56d9517b9c948127319a09a7a36deac8"
        );
    }

    #[test]
    fn test_burn_hash_deterministic() {
        let prev = B256::repeat_byte(0x01);
        let recipient = Address::repeat_byte(0x42);
        let a = compute_burn_hash(prev, 5, recipient, U256::from(100u64), U256::from(1u64), 1000);
        let b = compute_burn_hash(prev, 5, recipient, U256::from(100u64), U256::from(1u64), 1000);
        assert_eq!(a, b);
    }

    #[test]
    fn test_burn_hash_every_field_matters() {
        let prev = B256::repeat_byte(0x01);
        let recipient = Address::repeat_byte(0x42);
        let base = compute_burn_hash(prev, 5, recipient, U256::from(100u64), U256::from(1u64), 1000);

        let variants = [
            compute_burn_hash(B256::ZERO, 5, recipient, U256::from(100u64), U256::from(1u64), 1000),
            compute_burn_hash(prev, 6, recipient, U256::from(100u64), U256::from(1u64), 1000),
            compute_burn_hash(prev, 5, Address::ZERO, U256::from(100u64), U256::from(1u64), 1000),
            compute_burn_hash(prev, 5, recipient, U256::from(101u64), U256::from(1u64), 1000),
            compute_burn_hash(prev, 5, recipient, U256::from(100u64), U256::from(2u64), 1000),
            compute_burn_hash(prev, 5, recipient, U256::from(100u64), U256::from(1u64), 1001),
        ];
        for variant in variants {
            assert_ne!(base, variant, "changing any input must change the hash");
        }
    }

    #[test]
    fn test_burn_hash_matches_receipt() {
        let receipt = crate::types::test_support::receipt_with(9, B256::repeat_byte(0x07));
        assert!(burn_hash_matches(&receipt));

        let mut tampered = receipt;
        tampered.amount_burned = U256::from(1u64);
        assert!(!burn_hash_matches(&tampered));
    }
}
