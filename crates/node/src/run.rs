//! Fixed-rate merge loop.

use core::future::Future;
use core::time::Duration;
use std::pin::pin;

use octomerge_sync::{CycleReport, SyncCoordinator, SyncSettings, SyncSink};
use tokio::signal;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::mailbox::Inputs;

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub settings: SyncSettings,
    /// Time between two merge cycles
    pub period: Duration,
}

impl NodeConfig {
    #[must_use]
    pub const fn new(settings: SyncSettings, period: Duration) -> Self {
        Self { settings, period }
    }
}

/// Runs merge cycles until Ctrl-C.
pub async fn run(config: NodeConfig, inputs: Inputs, sink: impl SyncSink) -> eyre::Result<()> {
    run_until(config, inputs, sink, async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(%err, "Failed to listen for Ctrl-C, stopping");
        }
    })
    .await
}

/// Runs merge cycles until `shutdown` completes.
///
/// Each tick runs one cycle if either mailbox received something since the
/// previous tick, using the most recent contents of both.
pub async fn run_until(
    config: NodeConfig,
    mut inputs: Inputs,
    mut sink: impl SyncSink,
    shutdown: impl Future<Output = ()>,
) -> eyre::Result<()> {
    let agent = config.settings.agent_id.clone();
    let mut coordinator = SyncCoordinator::new(config.settings);

    let mut next_cycle = time::interval(config.period);
    next_cycle.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut shutdown = pin!(shutdown);

    info!(%agent, role = ?coordinator.settings().role, period = ?config.period, "Merge loop started");

    loop {
        tokio::select! {
            _ = next_cycle.tick() => {}
            () = &mut shutdown => break,
        }

        let _report = tick(&mut coordinator, &mut inputs, &mut sink);
    }

    info!(
        %agent,
        published = coordinator.published_count(),
        "Merge loop stopped"
    );

    Ok(())
}

pub(crate) fn tick(
    coordinator: &mut SyncCoordinator,
    inputs: &mut Inputs,
    sink: &mut impl SyncSink,
) -> Option<CycleReport> {
    if !inputs.take_new() {
        debug!("Nothing new since the last cycle");
        return None;
    }

    let self_map = inputs.self_map.latest();
    let neighbors = inputs.neighbors.latest();

    match coordinator.run_cycle(self_map.as_deref(), neighbors.as_deref(), sink) {
        Ok(report) => Some(report),
        Err(err) => {
            warn!(%err, "Merge cycle failed");
            None
        }
    }
}
