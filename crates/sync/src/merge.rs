use tracing::trace;

use crate::{DiffSet, MergedTree, Provenance};

/// Controls whether a diff may overwrite cells already present in the
/// destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergePolicy {
    /// Always overwrite existing cells
    pub replace: bool,
    /// Overwrite existing cells that no owner has claimed yet
    pub overwrite_if_untouched: bool,
}

impl MergePolicy {
    /// The diff is authoritative for its cells. Used for an agent's own diffs.
    pub const AUTHORITATIVE: Self = Self {
        replace: true,
        overwrite_if_untouched: false,
    };

    /// Only fills gaps.
    pub const CONSERVATIVE: Self = Self {
        replace: false,
        overwrite_if_untouched: false,
    };

    /// Policy for a peer diff. Only the most recent diff seen from that peer may
    /// overwrite untouched cells.
    #[must_use]
    pub const fn peer(is_latest: bool) -> Self {
        Self {
            replace: false,
            overwrite_if_untouched: is_latest,
        }
    }

    const fn allows_overwrite(self, existing: Provenance) -> bool {
        self.replace || (self.overwrite_if_untouched && matches!(existing, Provenance::Other))
    }
}

/// Outcome counts of a single [`apply_diff`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: usize,
    pub overwritten: usize,
    pub kept: usize,
}

/// Writes every cell of `diff` into `destination` as allowed by `policy`.
///
/// Absent cells are always written. Every written cell takes the diff's
/// provenance.
pub fn apply_diff(destination: &mut MergedTree, diff: &DiffSet, policy: MergePolicy) -> MergeStats {
    let mut stats = MergeStats::default();
    let provenance = diff.provenance();

    for leaf in diff.cells().leaves() {
        let write = match destination.search(leaf.key) {
            None => {
                stats.inserted = stats.inserted.saturating_add(1);
                true
            }
            Some(existing) if policy.allows_overwrite(existing.meta) => {
                stats.overwritten = stats.overwritten.saturating_add(1);
                true
            }
            Some(_) => {
                stats.kept = stats.kept.saturating_add(1);
                false
            }
        };

        if write {
            let cell = destination.set_node_value(leaf.key, leaf.cell.log_odds);
            cell.meta = provenance;
        }
    }

    trace!(
        origin = %diff.origin(),
        sequence = diff.sequence(),
        ?policy,
        ?stats,
        "Applied diff"
    );

    stats
}
