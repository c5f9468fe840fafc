//! Sparse-tree blob codec.
//!
//! A [`MapBlob`] carries the stored leaves of a tree in one of two encodings:
//! [`MapEncoding::Binary`] keeps only whether each leaf is occupied, and
//! [`MapEncoding::Full`] keeps its exact log-odds. Node metadata never leaves
//! the process.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Cell, LogOdds, OcTree, OcTreeKey, TreeParams, TREE_DEPTH};

/// Tree type identifier carried by every blob.
pub const TREE_ID: &str = "OcTree";

/// How leaf values are represented in a blob.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MapEncoding {
    /// One occupied/free flag per leaf
    #[default]
    Binary,
    /// Exact log-odds per leaf
    Full,
}

/// Encoded sparse tree.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct MapBlob {
    pub id: String,
    pub encoding: MapEncoding,
    pub resolution: f64,
    pub data: Vec<u8>,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("unknown tree type {0:?}")]
    UnknownTreeType(String),

    #[error("invalid resolution {0}")]
    InvalidResolution(f64),

    #[error("malformed tree payload: {0}")]
    Malformed(#[from] std::io::Error),

    #[error("leaf at depth {depth} has an invalid key {key:?}")]
    InvalidKey { depth: u8, key: OcTreeKey },

    #[error("leaf {key:?} has a non-finite value")]
    InvalidLogOdds { key: OcTreeKey },

    /// Leaves must appear in ascending (depth, key) order without overlapping.
    #[error("leaf {key:?} at depth {depth} is out of order or overlaps another leaf")]
    Overlapping { depth: u8, key: OcTreeKey },
}

#[derive(BorshSerialize, BorshDeserialize)]
struct BinaryLeaf {
    depth: u8,
    key: OcTreeKey,
    occupied: bool,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct FullLeaf {
    depth: u8,
    key: OcTreeKey,
    log_odds: LogOdds,
}

/// Encodes the stored leaves of `tree`.
#[must_use]
pub fn encode<M>(tree: &OcTree<M>, encoding: MapEncoding) -> MapBlob
where
    M: Clone + Default + PartialEq,
{
    let data = match encoding {
        MapEncoding::Binary => {
            let leaves: Vec<_> = tree
                .leaves()
                .map(|leaf| BinaryLeaf {
                    depth: leaf.depth,
                    key: leaf.key,
                    occupied: tree.is_occupied(leaf.cell),
                })
                .collect();
            borsh::to_vec(&leaves)
        }
        MapEncoding::Full => {
            let leaves: Vec<_> = tree
                .leaves()
                .map(|leaf| FullLeaf {
                    depth: leaf.depth,
                    key: leaf.key,
                    log_odds: leaf.cell.log_odds,
                })
                .collect();
            borsh::to_vec(&leaves)
        }
    };

    MapBlob {
        id: TREE_ID.to_owned(),
        encoding,
        resolution: tree.resolution(),
        // Serializing plain vectors into memory cannot fail.
        data: data.unwrap_or_default(),
    }
}

/// Reconstructs a plain tree from `blob`.
///
/// Binary leaves decode to the clamping bounds: occupied leaves take the upper
/// bound, free leaves the lower one.
pub fn decode(blob: &MapBlob) -> Result<OcTree, DecodeError> {
    if blob.id != TREE_ID {
        return Err(DecodeError::UnknownTreeType(blob.id.clone()));
    }

    if !blob.resolution.is_finite() || blob.resolution <= 0.0 {
        return Err(DecodeError::InvalidResolution(blob.resolution));
    }

    let params = TreeParams::new(blob.resolution);
    let mut tree = OcTree::with_params(params);

    let leaves: Vec<(u8, OcTreeKey, LogOdds)> = match blob.encoding {
        MapEncoding::Binary => borsh::from_slice::<Vec<BinaryLeaf>>(&blob.data)?
            .into_iter()
            .map(|leaf| {
                let value = if leaf.occupied {
                    params.clamping_max
                } else {
                    params.clamping_min
                };
                (leaf.depth, leaf.key, value)
            })
            .collect(),
        MapEncoding::Full => borsh::from_slice::<Vec<FullLeaf>>(&blob.data)?
            .into_iter()
            .map(|leaf| (leaf.depth, leaf.key, leaf.log_odds))
            .collect(),
    };

    let mut previous: Option<(u8, OcTreeKey)> = None;

    for (depth, key, value) in leaves {
        if depth > TREE_DEPTH || !key.is_aligned(depth) {
            return Err(DecodeError::InvalidKey { depth, key });
        }

        if !value.is_finite() {
            return Err(DecodeError::InvalidLogOdds { key });
        }

        let in_order = previous.map_or(true, |prev| prev < (depth, key));
        if !in_order || tree.is_covered(key, depth) {
            return Err(DecodeError::Overlapping { depth, key });
        }
        previous = Some((depth, key));

        tree.insert_leaf(depth, key, Cell::new(params.clamp(value), ()));
    }

    Ok(tree)
}
