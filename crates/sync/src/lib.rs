//! Incremental occupancy-map synchronization between agents
//!
//! Every agent builds its own map and periodically shares only what changed.
//! This crate holds the merge logic and is independent of any transport, so it
//! can be driven by a polling loop in production and directly in tests.
//!
//! ## Core Concepts
//!
//! - **compute_diff**: new and changed cells between two snapshots of one agent's map
//! - **apply_diff**: writes a diff into the shared merged tree under a [`MergePolicy`]
//! - **SequenceLedger**: per-peer record of applied diff sequence numbers
//! - **SyncCoordinator**: one merge pass per cycle, publishing through a [`SyncSink`]

use core::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use octomerge_octree::OcTree;
use serde::{Deserialize, Serialize};

mod coordinator;
mod diff;
mod ledger;
mod merge;

pub mod messages;

pub use coordinator::{
    CycleReport, SelfStep, SinkError, SnapshotError, SyncCoordinator, SyncError, SyncSettings,
    SyncSink, DEFAULT_FRAME_ID, DEFAULT_MAP_THRESHOLD,
};
pub use diff::{compute_diff, DiffSet, TreeDiff};
pub use ledger::{Admission, SequenceLedger};
pub use merge::{apply_diff, MergePolicy, MergeStats};

/// Identifier of an agent (robot or base station).
#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for AgentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for AgentId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What kind of process an agent runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Robot,
    /// Base stations also render the merged map as a point cloud.
    Base,
}

/// Marks who last wrote a cell of the merged tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Provenance {
    /// Written by this agent's own authoritative update
    Own,
    /// Merged in from a peer; nobody has claimed the cell yet
    #[default]
    Other,
}

/// The shared destination tree, with provenance on every cell.
pub type MergedTree = OcTree<Provenance>;
