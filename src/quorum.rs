//! Quorum attestation state machine
//!
//! The authoritative copy of this state lives in the destination chain's
//! validator contract; the relayer keeps a local mirror so it can refuse to
//! pay gas for votes the contract would reject (duplicate vote, hash already
//! claimed). The transition rules here match the contract exactly, which is
//! what the unit tests pin down.
//!
//! Per burn hash: `Unattested → PartiallyAttested* → Claimed`, or `Refuted`
//! once enough refutations arrive that the threshold can no longer be met.
//! `Claimed` is terminal: no vote of either kind is accepted afterwards.
//! That is the linearizable finality point that prevents double-minting even
//! when several coordinators race to submit votes.

use alloy::primitives::{Address, B256};
use eyre::{eyre, Result};
use std::collections::HashMap;
use thiserror::Error;

/// Rejections a vote can hit. Callers treat all of these as hard failures:
/// the same vote resubmitted later will fail the same way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoteError {
    #[error("{0} is not in the validator set")]
    NotAValidator(Address),
    #[error("{validator} already voted on {burn_hash}")]
    AlreadyVoted { validator: Address, burn_hash: B256 },
    #[error("{0} is already claimed")]
    AlreadyClaimed(B256),
}

/// Where a burn hash stands with the quorum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationState {
    Unattested,
    PartiallyAttested { attests: u32, refutes: u32 },
    /// Threshold reached; the mint fired. Terminal.
    Claimed,
    /// Enough refutations that the threshold is unreachable.
    Refuted,
}

/// The fixed set of attestors for a destination chain.
///
/// Mutation happens through a governance flow outside this process; within a
/// run the set is immutable, so votes can never straddle a membership change.
#[derive(Debug, Clone)]
pub struct ValidatorSet {
    validators: Vec<Address>,
    threshold: u32,
}

impl ValidatorSet {
    pub fn new(validators: Vec<Address>, threshold: u32) -> Result<Self> {
        if threshold < 2 {
            return Err(eyre!("Quorum threshold must be at least 2, got {threshold}"));
        }
        if threshold as usize > validators.len() {
            return Err(eyre!(
                "Quorum threshold {} exceeds validator count {}",
                threshold,
                validators.len()
            ));
        }
        let mut deduped = validators.clone();
        deduped.sort();
        deduped.dedup();
        if deduped.len() != validators.len() {
            return Err(eyre!("Validator set contains duplicate identities"));
        }
        Ok(Self {
            validators,
            threshold,
        })
    }

    pub fn contains(&self, validator: Address) -> bool {
        self.validators.contains(&validator)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

#[derive(Debug, Default, Clone)]
struct HashVotes {
    /// validator → attested (true) or refuted (false)
    votes: HashMap<Address, bool>,
    claimed: bool,
}

/// Vote ledger over all burn hashes seen this run.
///
/// Records are created on first vote and never deleted.
#[derive(Debug, Clone)]
pub struct QuorumLedger {
    set: ValidatorSet,
    hashes: HashMap<B256, HashVotes>,
}

impl QuorumLedger {
    pub fn new(set: ValidatorSet) -> Self {
        Self {
            set,
            hashes: HashMap::new(),
        }
    }

    pub fn validator_set(&self) -> &ValidatorSet {
        &self.set
    }

    /// Record a positive attestation. On reaching the threshold the hash
    /// transitions to `Claimed` and the mint is considered triggered.
    pub fn attest(&mut self, burn_hash: B256, validator: Address) -> Result<AttestationState, VoteError> {
        self.vote(burn_hash, validator, true)
    }

    /// Record a refutation. Other validators may still attest afterwards;
    /// only `Claimed` shuts the door.
    pub fn refute(&mut self, burn_hash: B256, validator: Address) -> Result<AttestationState, VoteError> {
        self.vote(burn_hash, validator, false)
    }

    fn vote(
        &mut self,
        burn_hash: B256,
        validator: Address,
        attested: bool,
    ) -> Result<AttestationState, VoteError> {
        if !self.set.contains(validator) {
            return Err(VoteError::NotAValidator(validator));
        }
        let entry = self.hashes.entry(burn_hash).or_default();
        if entry.claimed {
            return Err(VoteError::AlreadyClaimed(burn_hash));
        }
        if entry.votes.contains_key(&validator) {
            return Err(VoteError::AlreadyVoted {
                validator,
                burn_hash,
            });
        }
        entry.votes.insert(validator, attested);

        let attests = entry.votes.values().filter(|v| **v).count() as u32;
        if attests >= self.set.threshold() {
            entry.claimed = true;
        }
        Ok(self.state(burn_hash))
    }

    /// Sync the claimed flag from the destination contract. The mirror may
    /// lag the chain when other validators' votes land first; this only ever
    /// moves a hash toward `Claimed`, never away from it.
    pub fn observe_claimed(&mut self, burn_hash: B256) {
        self.hashes.entry(burn_hash).or_default().claimed = true;
    }

    /// Whether this validator has already voted (either way) on a hash.
    pub fn has_voted(&self, burn_hash: B256, validator: Address) -> bool {
        self.hashes
            .get(&burn_hash)
            .map(|entry| entry.votes.contains_key(&validator))
            .unwrap_or(false)
    }

    pub fn state(&self, burn_hash: B256) -> AttestationState {
        let Some(entry) = self.hashes.get(&burn_hash) else {
            return AttestationState::Unattested;
        };
        if entry.claimed {
            return AttestationState::Claimed;
        }
        let attests = entry.votes.values().filter(|v| **v).count() as u32;
        let refutes = entry.votes.len() as u32 - attests;
        if entry.votes.is_empty() {
            return AttestationState::Unattested;
        }
        // Refuted means the threshold can no longer be met: too few
        // validators are left who have not refuted.
        let remaining = self.set.len() as u32 - refutes;
        if remaining < self.set.threshold() {
            return AttestationState::Refuted;
        }
        AttestationState::PartiallyAttested { attests, refutes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validators(n: usize) -> Vec<Address> {
        (0..n).map(|i| Address::repeat_byte(i as u8 + 1)).collect()
    }

    fn ledger(n: usize, threshold: u32) -> QuorumLedger {
        QuorumLedger::new(ValidatorSet::new(validators(n), threshold).unwrap())
    }

    #[test]
    fn test_threshold_bounds() {
        assert!(ValidatorSet::new(validators(3), 2).is_ok());
        assert!(ValidatorSet::new(validators(3), 3).is_ok());
        assert!(ValidatorSet::new(validators(3), 1).is_err(), "threshold below 2");
        assert!(ValidatorSet::new(validators(3), 4).is_err(), "threshold above count");
    }

    #[test]
    fn test_duplicate_validators_rejected() {
        let mut vals = validators(3);
        vals.push(vals[0]);
        assert!(ValidatorSet::new(vals, 2).is_err());
    }

    #[test]
    fn test_claim_at_threshold() {
        // Threshold 2, three validators: A attests, B attests, C's refute fails
        let mut ledger = ledger(3, 2);
        let hash = B256::repeat_byte(0x05);
        let [a, b, c] = [
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            Address::repeat_byte(3),
        ];

        assert_eq!(
            ledger.attest(hash, a).unwrap(),
            AttestationState::PartiallyAttested { attests: 1, refutes: 0 }
        );
        assert_eq!(ledger.attest(hash, b).unwrap(), AttestationState::Claimed);
        assert_eq!(
            ledger.refute(hash, c).unwrap_err(),
            VoteError::AlreadyClaimed(hash)
        );
        assert_eq!(ledger.state(hash), AttestationState::Claimed);
    }

    #[test]
    fn test_claimed_is_terminal_for_all_votes() {
        let mut ledger = ledger(3, 2);
        let hash = B256::repeat_byte(0x05);
        ledger.attest(hash, Address::repeat_byte(1)).unwrap();
        ledger.attest(hash, Address::repeat_byte(2)).unwrap();

        let c = Address::repeat_byte(3);
        assert!(matches!(
            ledger.attest(hash, c),
            Err(VoteError::AlreadyClaimed(_))
        ));
        assert!(matches!(
            ledger.refute(hash, c),
            Err(VoteError::AlreadyClaimed(_))
        ));
        // Still claimed, rejected votes change nothing
        assert_eq!(ledger.state(hash), AttestationState::Claimed);
    }

    #[test]
    fn test_vote_idempotence() {
        let mut ledger = ledger(3, 3);
        let hash = B256::repeat_byte(0x09);
        let a = Address::repeat_byte(1);

        ledger.attest(hash, a).unwrap();
        let before = ledger.state(hash);
        assert!(matches!(
            ledger.attest(hash, a),
            Err(VoteError::AlreadyVoted { .. })
        ));
        assert!(matches!(
            ledger.refute(hash, a),
            Err(VoteError::AlreadyVoted { .. })
        ));
        assert_eq!(ledger.state(hash), before, "failed votes must not change state");
    }

    #[test]
    fn test_outsider_rejected() {
        let mut ledger = ledger(3, 2);
        let outsider = Address::repeat_byte(0x99);
        assert!(matches!(
            ledger.attest(B256::repeat_byte(0x01), outsider),
            Err(VoteError::NotAValidator(_))
        ));
    }

    #[test]
    fn test_refute_does_not_block_other_validators() {
        let mut ledger = ledger(3, 2);
        let hash = B256::repeat_byte(0x02);
        ledger.refute(hash, Address::repeat_byte(1)).unwrap();
        ledger.attest(hash, Address::repeat_byte(2)).unwrap();
        assert_eq!(
            ledger.attest(hash, Address::repeat_byte(3)).unwrap(),
            AttestationState::Claimed
        );
    }

    #[test]
    fn test_refuted_when_threshold_unreachable() {
        // Threshold 3 of 3: a single refutation makes the quorum impossible
        let mut ledger = ledger(3, 3);
        let hash = B256::repeat_byte(0x03);
        ledger.refute(hash, Address::repeat_byte(1)).unwrap();
        assert_eq!(ledger.state(hash), AttestationState::Refuted);
    }

    #[test]
    fn test_observe_claimed_syncs_mirror() {
        let mut ledger = ledger(3, 2);
        let hash = B256::repeat_byte(0x04);
        // Chain says claimed even though we saw no votes locally
        ledger.observe_claimed(hash);
        assert_eq!(ledger.state(hash), AttestationState::Claimed);
        assert!(matches!(
            ledger.attest(hash, Address::repeat_byte(1)),
            Err(VoteError::AlreadyClaimed(_))
        ));
    }

    #[test]
    fn test_has_voted() {
        let mut ledger = ledger(3, 2);
        let hash = B256::repeat_byte(0x06);
        let a = Address::repeat_byte(1);
        assert!(!ledger.has_voted(hash, a));
        ledger.attest(hash, a).unwrap();
        assert!(ledger.has_voted(hash, a));
        assert!(!ledger.has_voted(hash, Address::repeat_byte(2)));
    }
}
