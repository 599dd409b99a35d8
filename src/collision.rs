//! Admission control for writes into a contested cell.
//!
//! The decision and the metadata update happen in one compare-exchange, so two
//! producers racing for the same slot always agree on a single owner. A cell
//! whose owner wrote during the current step has age zero and can never be
//! evicted, which keeps the accumulation entry empty at the moment of an
//! eviction (`evict_threshold >= 1`).

use crate::cascade::Checksum;
use crate::entry::{CellState, MetadataSlot};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CollisionDecision {
    /// Empty slot: take it.
    Claim,
    /// Same cell: bump the last write time.
    Refresh,
    /// Another cell owns the slot but has gone quiet: drop its history and take it.
    Evict,
    /// Another cell owns the slot and is still in use.
    Reject,
}

/// Result of one write, reported back to the producer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum WriteOutcome {
    Claimed,
    Accepted,
    Evicted,
    Rejected,
}

impl WriteOutcome {
    pub fn is_accepted(self) -> bool {
        !matches!(self, Self::Rejected)
    }

    /// True when the write started a fresh history for the cell.
    pub fn starts_history(self) -> bool {
        matches!(self, Self::Claimed | Self::Evicted)
    }
}

#[derive(Copy, Clone, Debug)]
pub struct CollisionPolicy {
    evict_threshold: u32,
}

impl CollisionPolicy {
    pub fn new(evict_threshold: u32) -> Self {
        Self {
            evict_threshold: evict_threshold.max(1),
        }
    }

    pub fn decide(&self, state: CellState, incoming: Checksum, now: u32) -> CollisionDecision {
        match state {
            CellState::Empty => CollisionDecision::Claim,
            CellState::Owned { checksum, .. } if checksum == incoming => {
                CollisionDecision::Refresh
            }
            CellState::Owned { last_write, .. } => {
                if now.wrapping_sub(last_write) >= self.evict_threshold {
                    CollisionDecision::Evict
                } else {
                    CollisionDecision::Reject
                }
            }
        }
    }

    /// Run the policy against `slot` and apply the resulting transition.
    pub fn admit(&self, slot: &MetadataSlot, incoming: Checksum, now: u32) -> WriteOutcome {
        let mut word = slot.load_word();
        loop {
            let state = MetadataSlot::decode(word);
            let outcome = match self.decide(state, incoming, now) {
                CollisionDecision::Reject => return WriteOutcome::Rejected,
                // Already stamped this step; skip the store.
                CollisionDecision::Refresh if state.age(now) == Some(0) => {
                    return WriteOutcome::Accepted
                }
                CollisionDecision::Refresh => WriteOutcome::Accepted,
                CollisionDecision::Claim => WriteOutcome::Claimed,
                CollisionDecision::Evict => WriteOutcome::Evicted,
            };
            match slot.try_transition(word, incoming, now) {
                Ok(()) => return outcome,
                Err(actual) => word = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    fn checksum(raw: u32) -> Checksum {
        Checksum::from_hash(raw)
    }

    #[test]
    fn transition_table() {
        let policy = CollisionPolicy::new(4);
        let a = checksum(0xaaaa);
        let b = checksum(0xbbbb);
        let owned_at = |last_write| CellState::Owned {
            checksum: a,
            last_write,
        };

        assert_eq!(policy.decide(CellState::Empty, b, 10), CollisionDecision::Claim);
        assert_eq!(policy.decide(owned_at(3), a, 10), CollisionDecision::Refresh);
        assert_eq!(policy.decide(owned_at(7), b, 10), CollisionDecision::Reject);
        assert_eq!(policy.decide(owned_at(6), b, 10), CollisionDecision::Evict);
        assert_eq!(policy.decide(owned_at(10), b, 10), CollisionDecision::Reject);
    }

    #[test]
    fn age_survives_counter_wraparound() {
        let policy = CollisionPolicy::new(4);
        let owner = CellState::Owned {
            checksum: checksum(1),
            last_write: u32::MAX - 1,
        };
        assert_eq!(policy.decide(owner, checksum(2), 1), CollisionDecision::Reject);
        assert_eq!(policy.decide(owner, checksum(2), 2), CollisionDecision::Evict);
    }

    #[test]
    fn admit_applies_transitions() {
        let policy = CollisionPolicy::new(2);
        let slot = MetadataSlot::default();
        let a = checksum(11);
        let b = checksum(22);

        assert_eq!(policy.admit(&slot, a, 5), WriteOutcome::Claimed);
        assert_eq!(policy.admit(&slot, a, 5), WriteOutcome::Accepted);
        assert_eq!(policy.admit(&slot, b, 6), WriteOutcome::Rejected);
        assert_eq!(
            slot.load(),
            CellState::Owned {
                checksum: a,
                last_write: 5,
            }
        );
        assert_eq!(policy.admit(&slot, b, 7), WriteOutcome::Evicted);
        assert_eq!(
            slot.load(),
            CellState::Owned {
                checksum: b,
                last_write: 7,
            }
        );
    }

    #[test]
    fn racing_claims_elect_exactly_one_owner() {
        let policy = CollisionPolicy::new(4);
        let slot = MetadataSlot::default();
        let outcomes: Vec<WriteOutcome> = (0..256u32)
            .into_par_iter()
            .map(|i| policy.admit(&slot, checksum(1 + i % 2), 1))
            .collect();

        let claimed = outcomes
            .iter()
            .filter(|outcome| **outcome == WriteOutcome::Claimed)
            .count();
        assert_eq!(claimed, 1);
        assert!(outcomes.iter().all(|o| *o != WriteOutcome::Evicted));

        let CellState::Owned { checksum: owner, .. } = slot.load() else {
            panic!("slot left empty");
        };
        for (i, outcome) in outcomes.iter().enumerate() {
            let writer = checksum(1 + i as u32 % 2);
            assert_eq!(outcome.is_accepted(), writer == owner);
        }
    }
}
