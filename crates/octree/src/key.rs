//! Spatial keys and world-frame points.

use borsh::{BorshDeserialize, BorshSerialize};

/// Number of levels below the root; leaves at this depth are full resolution.
pub const TREE_DEPTH: u8 = 16;

/// Key value of the coordinate origin on every axis.
pub const TREE_MAX_VAL: i64 = 32_768;

/// A point in the world frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Discrete address of a voxel at a fixed resolution.
///
/// Two points share a key iff they fall into the same voxel. A key paired with a
/// depth below [`TREE_DEPTH`] addresses a coarser node; such keys always have their
/// low `TREE_DEPTH - depth` bits cleared.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize,
)]
pub struct OcTreeKey(pub [u16; 3]);

impl OcTreeKey {
    #[must_use]
    pub const fn new(x: u16, y: u16, z: u16) -> Self {
        Self([x, y, z])
    }

    /// Derives the key of the voxel containing `coord`, or `None` when the
    /// coordinate is not finite or lies outside the addressable volume.
    #[must_use]
    pub fn from_coord(coord: Point3, resolution: f64) -> Option<Self> {
        Some(Self([
            axis_key(coord.x, resolution)?,
            axis_key(coord.y, resolution)?,
            axis_key(coord.z, resolution)?,
        ]))
    }

    /// Key of the ancestor node at `depth`.
    #[must_use]
    pub fn at_depth(self, depth: u8) -> Self {
        let mask = depth_mask(depth);
        Self(self.0.map(|k| k & mask))
    }

    /// Whether this key is a valid address for a node at `depth`.
    #[must_use]
    pub fn is_aligned(self, depth: u8) -> bool {
        depth <= TREE_DEPTH && self.at_depth(depth) == self
    }

    /// Keys of the eight children of the node at `depth`.
    ///
    /// `depth` must be below [`TREE_DEPTH`].
    #[must_use]
    pub fn children(self, depth: u8) -> [Self; 8] {
        let offset = 1_u16 << (TREE_DEPTH - depth - 1);
        core::array::from_fn(|i| {
            let bit = |axis: usize| if (i >> axis) & 1 == 1 { offset } else { 0 };
            Self([self.0[0] | bit(0), self.0[1] | bit(1), self.0[2] | bit(2)])
        })
    }

    /// Centre of the node at `depth` addressed by this key.
    #[must_use]
    pub fn to_coord(self, depth: u8, resolution: f64) -> Point3 {
        let half = node_size(depth, resolution) / 2.0;
        let axis = |k: u16| (i64::from(k) - TREE_MAX_VAL) as f64 * resolution + half;
        let key = self.at_depth(depth);
        Point3::new(axis(key.0[0]), axis(key.0[1]), axis(key.0[2]))
    }
}

/// Edge length of a node at `depth`.
#[must_use]
pub fn node_size(depth: u8, resolution: f64) -> f64 {
    resolution * f64::from(1_u32 << (TREE_DEPTH - depth.min(TREE_DEPTH)))
}

fn depth_mask(depth: u8) -> u16 {
    let shift = TREE_DEPTH - depth.min(TREE_DEPTH);
    (u32::from(u16::MAX) << shift) as u16
}

fn axis_key(value: f64, resolution: f64) -> Option<u16> {
    if !value.is_finite() {
        return None;
    }

    let scaled = (value / resolution).floor();
    if scaled < -(TREE_MAX_VAL as f64) || scaled >= TREE_MAX_VAL as f64 {
        return None;
    }

    u16::try_from(scaled as i64 + TREE_MAX_VAL).ok()
}
