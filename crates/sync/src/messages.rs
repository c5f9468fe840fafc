//! Messages exchanged at the process boundary.

use borsh::{BorshDeserialize, BorshSerialize};
use octomerge_octree::codec::MapBlob;
use octomerge_octree::Point3;

use crate::AgentId;

#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct Header {
    /// For diffs, the originating agent's sequence number
    pub seq: u32,
    /// Milliseconds since the Unix epoch
    pub stamp_ms: i64,
    pub frame_id: String,
}

/// A map snapshot or a single diff.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct MapMessage {
    pub header: Header,
    pub blob: MapBlob,
}

/// All diffs an agent has published, in sequence order.
#[derive(Clone, Debug, Default, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct DiffArray {
    pub owner: AgentId,
    pub diffs: Vec<MapMessage>,
}

impl DiffArray {
    #[must_use]
    pub fn new(owner: AgentId) -> Self {
        Self {
            owner,
            diffs: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.diffs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }
}

/// The latest diff arrays received from peers.
#[derive(Clone, Debug, Default, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct NeighborMaps {
    pub neighbors: Vec<DiffArray>,
}

/// Occupied cell centres of the merged map.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct PointCloud {
    pub header: Header,
    pub points: Vec<Point3>,
}
