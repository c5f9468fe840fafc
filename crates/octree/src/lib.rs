//! Sparse occupancy octree
//!
//! A compact octree holding log-odds occupancy per voxel. Only leaf nodes are
//! stored; inner nodes are implicit. A leaf above full resolution stands for every
//! voxel beneath it, which is what [`OcTree::prune`] produces and
//! [`OcTree::expand`] undoes.
//!
//! ## Core Concepts
//!
//! - **OcTreeKey**: discrete voxel address at the tree resolution
//! - **Cell**: stored log-odds plus per-node metadata (`()` for plain maps)
//! - **codec**: the sparse-tree blob exchanged between agents

use std::collections::BTreeMap;

mod key;

pub mod codec;

pub use key::{node_size, OcTreeKey, Point3, TREE_DEPTH, TREE_MAX_VAL};

/// Occupancy value in log-odds form. Higher means more confidently occupied.
pub type LogOdds = f32;

/// Converts a probability into log-odds.
#[must_use]
pub fn log_odds(probability: f32) -> LogOdds {
    (probability / (1.0 - probability)).ln()
}

/// Converts log-odds into a probability.
#[must_use]
pub fn probability(log_odds: LogOdds) -> f32 {
    1.0 - (1.0 / (1.0 + log_odds.exp()))
}

/// Tree-wide thresholds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TreeParams {
    pub resolution: f64,
    /// Cells strictly above this value are occupied.
    pub occupancy_threshold: LogOdds,
    pub clamping_min: LogOdds,
    pub clamping_max: LogOdds,
}

impl TreeParams {
    #[must_use]
    pub fn new(resolution: f64) -> Self {
        Self {
            resolution,
            occupancy_threshold: 0.0,
            clamping_min: log_odds(0.1192),
            clamping_max: log_odds(0.971),
        }
    }

    #[must_use]
    pub fn clamp(&self, value: LogOdds) -> LogOdds {
        value.clamp(self.clamping_min, self.clamping_max)
    }
}

/// Value stored at a node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cell<M = ()> {
    pub log_odds: LogOdds,
    pub meta: M,
}

impl<M> Cell<M> {
    pub const fn new(log_odds: LogOdds, meta: M) -> Self {
        Self { log_odds, meta }
    }
}

/// A stored leaf as seen by [`OcTree::leaves`].
#[derive(Clone, Copy, Debug)]
pub struct Leaf<'a, M> {
    pub key: OcTreeKey,
    pub depth: u8,
    pub cell: &'a Cell<M>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct NodeId {
    depth: u8,
    key: OcTreeKey,
}

impl NodeId {
    const fn leaf(key: OcTreeKey) -> Self {
        Self {
            depth: TREE_DEPTH,
            key,
        }
    }
}

/// Sparse occupancy octree, generic over per-node metadata.
#[derive(Clone, Debug)]
pub struct OcTree<M = ()> {
    params: TreeParams,
    /// Stored leaves. No two leaves overlap.
    nodes: BTreeMap<NodeId, Cell<M>>,
}

impl<M> OcTree<M>
where
    M: Clone + Default + PartialEq,
{
    #[must_use]
    pub fn new(resolution: f64) -> Self {
        Self::with_params(TreeParams::new(resolution))
    }

    #[must_use]
    pub const fn with_params(params: TreeParams) -> Self {
        Self {
            params,
            nodes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn params(&self) -> &TreeParams {
        &self.params
    }

    #[must_use]
    pub const fn resolution(&self) -> f64 {
        self.params.resolution
    }

    /// Number of stored leaves.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    #[must_use]
    pub fn coord_to_key(&self, coord: Point3) -> Option<OcTreeKey> {
        OcTreeKey::from_coord(coord, self.params.resolution)
    }

    #[must_use]
    pub fn key_to_coord(&self, key: OcTreeKey, depth: u8) -> Point3 {
        key.to_coord(depth, self.params.resolution)
    }

    #[must_use]
    pub fn is_occupied(&self, cell: &Cell<M>) -> bool {
        cell.log_odds > self.params.occupancy_threshold
    }

    /// Looks up the leaf covering the full-resolution `key`, at whatever depth it
    /// is stored.
    #[must_use]
    pub fn search(&self, key: OcTreeKey) -> Option<&Cell<M>> {
        (0..=TREE_DEPTH).rev().find_map(|depth| {
            self.nodes.get(&NodeId {
                depth,
                key: key.at_depth(depth),
            })
        })
    }

    /// Writes `log_odds` (clamped) at the full-resolution `key` and returns the
    /// stored cell. A coarser leaf covering the key is split first; the new
    /// children inherit its cell.
    pub fn set_node_value(&mut self, key: OcTreeKey, log_odds: LogOdds) -> &mut Cell<M> {
        let value = self.params.clamp(log_odds);

        self.split_covering(key);

        let cell = self
            .nodes
            .entry(NodeId::leaf(key))
            .or_insert_with(|| Cell::new(value, M::default()));
        cell.log_odds = value;
        cell
    }

    /// Iterates stored leaves in ascending depth, then key order.
    pub fn leaves(&self) -> impl Iterator<Item = Leaf<'_, M>> + '_ {
        self.nodes.iter().map(|(id, cell)| Leaf {
            key: id.key,
            depth: id.depth,
            cell,
        })
    }

    /// Centres of all occupied leaves.
    #[must_use]
    pub fn occupied_points(&self) -> Vec<Point3> {
        self.leaves()
            .filter(|leaf| self.is_occupied(leaf.cell))
            .map(|leaf| self.key_to_coord(leaf.key, leaf.depth))
            .collect()
    }

    /// Replaces every coarse leaf by its full-resolution descendants.
    pub fn expand(&mut self) {
        let coarse: Vec<NodeId> = self
            .nodes
            .keys()
            .take_while(|id| id.depth < TREE_DEPTH)
            .copied()
            .collect();

        for id in coarse {
            if let Some(cell) = self.nodes.remove(&id) {
                self.fill_descendants(id, &cell);
            }
        }
    }

    /// Collapses every group of eight identical siblings into their parent,
    /// bottom-up, until no group is left.
    pub fn prune(&mut self) {
        for depth in (1..=TREE_DEPTH).rev() {
            let mut groups: BTreeMap<OcTreeKey, (usize, bool, Cell<M>)> = BTreeMap::new();

            let lower = NodeId {
                depth,
                key: OcTreeKey::new(0, 0, 0),
            };
            let upper = NodeId {
                depth,
                key: OcTreeKey::new(u16::MAX, u16::MAX, u16::MAX),
            };

            for (id, cell) in self.nodes.range(lower..=upper) {
                let _group = groups
                    .entry(id.key.at_depth(depth - 1))
                    .and_modify(|(count, uniform, first)| {
                        *count += 1;
                        *uniform &= *first == *cell;
                    })
                    .or_insert_with(|| (1, true, cell.clone()));
            }

            for (parent, (count, uniform, cell)) in groups {
                if count != 8 || !uniform {
                    continue;
                }

                for child in parent.children(depth - 1) {
                    let _removed = self.nodes.remove(&NodeId { depth, key: child });
                }

                let _previous = self.nodes.insert(
                    NodeId {
                        depth: depth - 1,
                        key: parent,
                    },
                    cell,
                );
            }
        }
    }

    /// Inserts a leaf at an arbitrary depth. Callers guarantee the key is aligned
    /// to `depth` and that no stored leaf overlaps it.
    pub(crate) fn insert_leaf(&mut self, depth: u8, key: OcTreeKey, cell: Cell<M>) {
        let _previous = self.nodes.insert(NodeId { depth, key }, cell);
    }

    /// Whether any stored leaf at `depth` or above covers `key`.
    pub(crate) fn is_covered(&self, key: OcTreeKey, depth: u8) -> bool {
        (0..=depth).any(|d| {
            self.nodes.contains_key(&NodeId {
                depth: d,
                key: key.at_depth(d),
            })
        })
    }

    fn split_covering(&mut self, key: OcTreeKey) {
        let covering = (0..TREE_DEPTH)
            .map(|depth| NodeId {
                depth,
                key: key.at_depth(depth),
            })
            .find(|id| self.nodes.contains_key(id));

        let Some(id) = covering else {
            return;
        };

        let Some(cell) = self.nodes.remove(&id) else {
            return;
        };

        for depth in id.depth..TREE_DEPTH {
            let on_path = key.at_depth(depth + 1);
            for child in key.at_depth(depth).children(depth) {
                if child != on_path {
                    self.insert_leaf(depth + 1, child, cell.clone());
                }
            }
        }

        self.insert_leaf(TREE_DEPTH, key, cell);
    }

    fn fill_descendants(&mut self, id: NodeId, cell: &Cell<M>) {
        if id.depth == TREE_DEPTH {
            self.insert_leaf(id.depth, id.key, cell.clone());
            return;
        }

        for child in id.key.children(id.depth) {
            self.fill_descendants(
                NodeId {
                    depth: id.depth + 1,
                    key: child,
                },
                cell,
            );
        }
    }
}
