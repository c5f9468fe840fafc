//! Per-cycle merge pass.
//!
//! One call to [`SyncCoordinator::run_cycle`] handles everything that arrived
//! since the previous cycle: the latest self snapshot is diffed against the
//! last published one, the diff is published once enough new cells have
//! accumulated, unseen peer diffs are merged, and the merged map goes out.
//! Several updates arriving between cycles collapse into one pass; the next
//! cycle always sees the latest snapshot.

use chrono::Utc;
use octomerge_octree::codec::{self, DecodeError, MapBlob, MapEncoding};
use octomerge_octree::OcTree;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::messages::{DiffArray, Header, MapMessage, NeighborMaps, PointCloud};
use crate::{
    apply_diff, compute_diff, AgentId, DiffSet, MergePolicy, MergedTree, Role, SequenceLedger,
};

/// Default number of new cells a self diff must exceed to be published.
pub const DEFAULT_MAP_THRESHOLD: u32 = 50;

/// Default frame of every outgoing message.
pub const DEFAULT_FRAME_ID: &str = "world";

/// Maximum resolution difference tolerated between a blob and this agent.
const RESOLUTION_EPSILON: f64 = 1e-9;

#[derive(Clone, Debug, PartialEq)]
pub struct SyncSettings {
    pub agent_id: AgentId,
    pub role: Role,
    /// Encoding of everything this agent publishes
    pub encoding: MapEncoding,
    pub resolution: f64,
    pub map_threshold: u32,
    pub frame_id: String,
}

impl SyncSettings {
    #[must_use]
    pub fn new(agent_id: AgentId, role: Role, resolution: f64) -> Self {
        Self {
            agent_id,
            role,
            encoding: MapEncoding::default(),
            resolution,
            map_threshold: DEFAULT_MAP_THRESHOLD,
            frame_id: DEFAULT_FRAME_ID.to_owned(),
        }
    }
}

/// Outbound side of the coordinator.
///
/// The coordinator doesn't know how messages travel; it hands them to this trait.
pub trait SyncSink {
    /// Every self diff published so far, in sequence order.
    fn publish_diffs(&mut self, diffs: &DiffArray) -> Result<(), SinkError>;

    fn publish_diff_count(&mut self, count: u32) -> Result<(), SinkError>;

    fn publish_merged(&mut self, map: &MapMessage) -> Result<(), SinkError>;

    /// Only called for base stations.
    fn publish_point_cloud(&mut self, cloud: &PointCloud) -> Result<(), SinkError>;
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SinkError {
    #[error("failed to publish {topic}: {reason}")]
    Publish { topic: String, reason: String },
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// The cycle stopped at the failing publication.
    ///
    /// A self diff whose array could not be published is discarded and leaves
    /// the coordinator unchanged, so the next cycle computes it again. Once the
    /// array is out, the diff counts as published even if a later publication
    /// of the same cycle fails.
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Why an inbound blob could not be turned into a tree.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SnapshotError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("map resolution {found} does not match the configured {expected}")]
    ResolutionMismatch { found: f64, expected: f64 },
}

/// What happened to the self snapshot during a cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelfStep {
    /// A diff was published under `sequence`
    Published {
        sequence: u32,
        new_cells: u32,
        changed_cells: u32,
    },
    /// Not enough new cells; nothing advanced
    BelowThreshold { new_cells: u32 },
    /// No self snapshot has arrived yet
    NoSnapshot,
    /// The self snapshot could not be decoded
    DecodeFailed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CycleReport {
    pub self_step: SelfStep,
    /// The cycle stopped before touching any state
    pub aborted: bool,
    pub peer_diffs_merged: usize,
    /// Peer diffs already applied in an earlier cycle
    pub peer_diffs_skipped: usize,
    pub peer_diffs_failed: usize,
    /// Stored leaves of the merged tree after the cycle
    pub merged_leaves: usize,
}

impl CycleReport {
    const fn new(self_step: SelfStep) -> Self {
        Self {
            self_step,
            aborted: false,
            peer_diffs_merged: 0,
            peer_diffs_skipped: 0,
            peer_diffs_failed: 0,
            merged_leaves: 0,
        }
    }
}

/// Owns the merged tree, the last published self snapshot and the sequence
/// ledger. Nothing else mutates them.
#[derive(Debug)]
pub struct SyncCoordinator {
    settings: SyncSettings,
    ledger: SequenceLedger,
    merged: MergedTree,
    last_saved: OcTree,
    published: DiffArray,
    cycles: u32,
}

impl SyncCoordinator {
    #[must_use]
    pub fn new(settings: SyncSettings) -> Self {
        Self::with_ledger(settings, SequenceLedger::new())
    }

    #[must_use]
    pub fn with_ledger(settings: SyncSettings, ledger: SequenceLedger) -> Self {
        let merged = MergedTree::new(settings.resolution);
        let last_saved = OcTree::new(settings.resolution);
        let published = DiffArray::new(settings.agent_id.clone());

        Self {
            settings,
            ledger,
            merged,
            last_saved,
            published,
            cycles: 0,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    #[must_use]
    pub const fn merged(&self) -> &MergedTree {
        &self.merged
    }

    /// The self snapshot the next diff is computed against.
    #[must_use]
    pub const fn last_saved(&self) -> &OcTree {
        &self.last_saved
    }

    #[must_use]
    pub const fn ledger(&self) -> &SequenceLedger {
        &self.ledger
    }

    /// Number of self diffs published so far.
    #[must_use]
    pub fn published_count(&self) -> u32 {
        u32::try_from(self.published.len()).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub const fn published(&self) -> &DiffArray {
        &self.published
    }

    /// Runs one merge pass with the latest inbound messages.
    ///
    /// A robot without a usable self snapshot stops right away and leaves every
    /// piece of state untouched. A base station only skips its own diff.
    pub fn run_cycle(
        &mut self,
        self_map: Option<&MapMessage>,
        neighbors: Option<&NeighborMaps>,
        sink: &mut impl SyncSink,
    ) -> Result<CycleReport, SyncError> {
        let snapshot = match self_map {
            None => Err(SelfStep::NoSnapshot),
            Some(message) => self.decode(&message.blob).map_err(|err| {
                warn!(agent = %self.settings.agent_id, %err, "Failed to decode own map");
                SelfStep::DecodeFailed
            }),
        };

        let self_step = match snapshot {
            Ok(current) => self.merge_own(current, sink)?,
            Err(step) if self.settings.role == Role::Robot => {
                debug!(agent = %self.settings.agent_id, ?step, "Skipping cycle");
                let mut report = CycleReport::new(step);
                report.aborted = true;
                report.merged_leaves = self.merged.len();
                return Ok(report);
            }
            Err(step) => step,
        };

        let mut report = CycleReport::new(self_step);

        if let Some(neighbors) = neighbors {
            self.merge_neighbors(neighbors, &mut report);
        }

        if self.settings.role == Role::Base {
            let cloud = PointCloud {
                header: self.header(self.cycles),
                points: self.merged.occupied_points(),
            };
            sink.publish_point_cloud(&cloud)?;
        }

        self.merged.prune();
        report.merged_leaves = self.merged.len();

        let merged = MapMessage {
            header: self.header(self.cycles),
            blob: codec::encode(&self.merged, self.settings.encoding),
        };
        sink.publish_merged(&merged)?;

        self.cycles = self.cycles.wrapping_add(1);

        debug!(agent = %self.settings.agent_id, ?report, "Cycle finished");

        Ok(report)
    }

    fn merge_own(
        &mut self,
        mut current: OcTree,
        sink: &mut impl SyncSink,
    ) -> Result<SelfStep, SyncError> {
        let diff = compute_diff(&self.last_saved, &mut current);

        if diff.new_cells <= self.settings.map_threshold {
            debug!(
                agent = %self.settings.agent_id,
                new_cells = diff.new_cells,
                threshold = self.settings.map_threshold,
                "Not enough new cells to publish"
            );
            return Ok(SelfStep::BelowThreshold {
                new_cells: diff.new_cells,
            });
        }

        let sequence = self.published_count();
        let (new_cells, changed_cells) = (diff.new_cells, diff.changed_cells);
        let diff = diff.into_local(self.settings.agent_id.clone(), sequence);

        let mut cells = diff.cells().clone();
        cells.prune();

        let message = MapMessage {
            header: self.header(sequence),
            blob: codec::encode(&cells, self.settings.encoding),
        };
        self.published.diffs.push(message);

        if let Err(err) = sink.publish_diffs(&self.published) {
            let _unpublished = self.published.diffs.pop();
            return Err(err.into());
        }

        self.last_saved = current;
        let stats = apply_diff(&mut self.merged, &diff, MergePolicy::AUTHORITATIVE);

        sink.publish_diff_count(self.published_count())?;

        info!(
            agent = %self.settings.agent_id,
            sequence,
            new_cells,
            changed_cells,
            inserted = stats.inserted,
            overwritten = stats.overwritten,
            "Published map diff"
        );

        Ok(SelfStep::Published {
            sequence,
            new_cells,
            changed_cells,
        })
    }

    fn merge_neighbors(&mut self, neighbors: &NeighborMaps, report: &mut CycleReport) {
        for array in &neighbors.neighbors {
            if array.owner == self.settings.agent_id {
                continue;
            }

            for message in &array.diffs {
                let sequence = message.header.seq;
                let admission = self.ledger.admit(&array.owner, sequence);

                if !admission.is_new {
                    report.peer_diffs_skipped = report.peer_diffs_skipped.saturating_add(1);
                    continue;
                }

                let cells = match self.decode(&message.blob) {
                    Ok(cells) => cells,
                    Err(err) => {
                        warn!(peer = %array.owner, sequence, %err, "Failed to decode peer diff");
                        report.peer_diffs_failed = report.peer_diffs_failed.saturating_add(1);
                        continue;
                    }
                };

                let diff = DiffSet::peer(array.owner.clone(), sequence, cells);
                let stats = apply_diff(
                    &mut self.merged,
                    &diff,
                    MergePolicy::peer(admission.is_latest),
                );

                debug!(
                    peer = %array.owner,
                    sequence,
                    is_latest = admission.is_latest,
                    inserted = stats.inserted,
                    overwritten = stats.overwritten,
                    kept = stats.kept,
                    "Merged peer diff"
                );

                report.peer_diffs_merged = report.peer_diffs_merged.saturating_add(1);
            }
        }
    }

    fn decode(&self, blob: &MapBlob) -> Result<OcTree, SnapshotError> {
        let tree = codec::decode(blob)?;

        if (tree.resolution() - self.settings.resolution).abs() > RESOLUTION_EPSILON {
            return Err(SnapshotError::ResolutionMismatch {
                found: tree.resolution(),
                expected: self.settings.resolution,
            });
        }

        Ok(tree)
    }

    fn header(&self, seq: u32) -> Header {
        Header {
            seq,
            stamp_ms: Utc::now().timestamp_millis(),
            frame_id: self.settings.frame_id.clone(),
        }
    }
}
