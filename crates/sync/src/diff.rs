use octomerge_octree::OcTree;

use crate::{AgentId, Provenance};

/// Cells of an updated snapshot that are new or changed relative to a baseline.
#[derive(Clone, Debug)]
pub struct TreeDiff {
    pub cells: OcTree,
    /// Cells absent from the baseline. Value changes are not counted.
    pub new_cells: u32,
    pub changed_cells: u32,
}

impl TreeDiff {
    /// Stamps the diff as this agent's own update number `sequence`.
    #[must_use]
    pub fn into_local(self, origin: AgentId, sequence: u32) -> DiffSet {
        DiffSet::new(origin, sequence, Provenance::Own, self.cells)
    }
}

/// A sparse set of cell writes from one source, with its sequence number.
///
/// Cells are always held at full resolution, so every key appears at most once.
#[derive(Clone, Debug)]
pub struct DiffSet {
    origin: AgentId,
    sequence: u32,
    provenance: Provenance,
    cells: OcTree,
}

impl DiffSet {
    /// A diff authored by this agent.
    #[must_use]
    pub fn local(origin: AgentId, sequence: u32, cells: OcTree) -> Self {
        Self::new(origin, sequence, Provenance::Own, cells)
    }

    /// A diff received from a peer.
    #[must_use]
    pub fn peer(origin: AgentId, sequence: u32, cells: OcTree) -> Self {
        Self::new(origin, sequence, Provenance::Other, cells)
    }

    fn new(origin: AgentId, sequence: u32, provenance: Provenance, mut cells: OcTree) -> Self {
        cells.expand();

        Self {
            origin,
            sequence,
            provenance,
            cells,
        }
    }

    #[must_use]
    pub const fn origin(&self) -> &AgentId {
        &self.origin
    }

    #[must_use]
    pub const fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Provenance stamped on every cell this diff writes.
    #[must_use]
    pub const fn provenance(&self) -> Provenance {
        self.provenance
    }

    #[must_use]
    pub const fn cells(&self) -> &OcTree {
        &self.cells
    }

    #[must_use]
    pub fn into_cells(self) -> OcTree {
        self.cells
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Computes the cells of `updated` that are absent from `baseline` or hold a
/// different value there.
///
/// `updated` is expanded to full resolution first so that every cell is compared
/// individually. Neither tree is otherwise modified.
pub fn compute_diff(baseline: &OcTree, updated: &mut OcTree) -> TreeDiff {
    updated.expand();

    let mut cells = OcTree::with_params(*updated.params());
    let mut new_cells = 0_u32;
    let mut changed_cells = 0_u32;

    for leaf in updated.leaves() {
        let value = leaf.cell.log_odds;

        match baseline.search(leaf.key) {
            None => {
                let _cell = cells.set_node_value(leaf.key, value);
                new_cells = new_cells.saturating_add(1);
            }
            Some(previous) if previous.log_odds != value => {
                let _cell = cells.set_node_value(leaf.key, value);
                changed_cells = changed_cells.saturating_add(1);
            }
            Some(_) => {}
        }
    }

    TreeDiff {
        cells,
        new_cells,
        changed_cells,
    }
}
