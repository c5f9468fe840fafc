//! Per-peer record of applied diff sequence numbers.
//!
//! Diffs from a peer may arrive out of order and may be redelivered. The ledger
//! answers two questions for every incoming diff: has it been applied before,
//! and is it the most recent diff seen from that peer so far. Entries are
//! created on first contact and never pruned.

use std::collections::{BTreeSet, HashMap};

use crate::AgentId;

/// Result of [`SequenceLedger::admit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Admission {
    /// The sequence number had not been recorded for this peer before
    pub is_new: bool,
    /// The sequence number is at least the highest one recorded for this peer,
    /// itself included
    pub is_latest: bool,
}

#[derive(Clone, Debug, Default)]
pub struct SequenceLedger {
    peers: HashMap<AgentId, BTreeSet<u32>>,
}

impl SequenceLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `sequence` for `peer` and reports whether it is new and whether it
    /// is the latest seen from that peer.
    pub fn admit(&mut self, peer: &AgentId, sequence: u32) -> Admission {
        let applied = self.peers.entry(peer.clone()).or_default();

        let is_new = applied.insert(sequence);
        let is_latest = applied.last().map_or(true, |max| sequence >= *max);

        Admission { is_new, is_latest }
    }

    #[must_use]
    pub fn contains(&self, peer: &AgentId, sequence: u32) -> bool {
        self.peers
            .get(peer)
            .is_some_and(|applied| applied.contains(&sequence))
    }

    /// Highest sequence number recorded for `peer`.
    #[must_use]
    pub fn latest(&self, peer: &AgentId) -> Option<u32> {
        self.peers.get(peer)?.last().copied()
    }

    #[must_use]
    pub fn applied_count(&self, peer: &AgentId) -> usize {
        self.peers.get(peer).map_or(0, BTreeSet::len)
    }

    pub fn peers(&self) -> impl Iterator<Item = &AgentId> {
        self.peers.keys()
    }
}
