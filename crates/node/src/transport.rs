//! File-based transport.
//!
//! Every topic maps to `<topic>.bin` holding one borsh-encoded message. Writers
//! replace the file atomically; the inbox side watches its directory and posts
//! whatever shows up into the matching mailbox.

use std::fs;
use std::path::Path;

use borsh::{BorshDeserialize, BorshSerialize};
use camino::{Utf8Path, Utf8PathBuf};
use notify::event::EventKind;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use octomerge_config::TopicsConfig;
use octomerge_sync::messages::{DiffArray, MapMessage, NeighborMaps, PointCloud};
use octomerge_sync::{SinkError, SyncSink};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::mailbox::Inputs;

const EXTENSION: &str = "bin";

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("failed to access {path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {path}")]
    Decode {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("non UTF-8 path: {0:?}")]
    InvalidPath(std::path::PathBuf),

    #[error(transparent)]
    Watch(#[from] notify::Error),
}

fn topic_file(dir: &Utf8Path, topic: &str) -> Utf8PathBuf {
    dir.join(format!("{topic}.{EXTENSION}"))
}

/// Routes inbox files to mailboxes.
#[derive(Clone, Debug)]
pub(crate) struct Inbound {
    map_file: String,
    neighbors_file: String,
    inputs: Inputs,
}

impl Inbound {
    pub(crate) fn new(topics: &TopicsConfig, inputs: Inputs) -> Self {
        Self {
            map_file: format!("{}.{EXTENSION}", topics.map),
            neighbors_file: format!("{}.{EXTENSION}", topics.neighbors),
            inputs,
        }
    }

    /// Reads `path` and posts it if it names an inbound topic. Returns whether
    /// anything was posted.
    pub(crate) async fn ingest(&self, path: &Path) -> Result<bool, TransportError> {
        let path = Utf8Path::from_path(path)
            .ok_or_else(|| TransportError::InvalidPath(path.to_path_buf()))?;

        let Some(name) = path.file_name() else {
            return Ok(false);
        };

        if name == self.map_file {
            let message: MapMessage = read_message(path).await?;
            self.inputs.self_map.post(message);
        } else if name == self.neighbors_file {
            let neighbors: NeighborMaps = read_message(path).await?;
            self.inputs.neighbors.post(neighbors);
        } else {
            return Ok(false);
        }

        debug!(%path, "Posted inbound message");

        Ok(true)
    }
}

async fn read_message<T: BorshDeserialize>(path: &Utf8Path) -> Result<T, TransportError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| TransportError::Io {
            path: path.to_owned(),
            source,
        })?;

    borsh::from_slice(&bytes).map_err(|source| TransportError::Decode {
        path: path.to_owned(),
        source,
    })
}

/// Watches the inbox directory for the lifetime of the value.
#[derive(Debug)]
pub struct DirectoryTransport {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl DirectoryTransport {
    /// Starts watching `inbox`. Files already present are picked up first.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(
        inbox: &Utf8Path,
        topics: &TopicsConfig,
        inputs: Inputs,
    ) -> Result<Self, TransportError> {
        let inbound = Inbound::new(topics, inputs);

        for file in [&inbound.map_file, &inbound.neighbors_file] {
            let path = inbox.join(file);
            if path.is_file() {
                if let Err(err) = inbound.ingest(path.as_std_path()).await {
                    warn!(%err, "Ignoring unreadable inbox file");
                }
            }
        }

        let (tx, mut rx) = mpsc::channel(16);

        let handle = Handle::current();
        let mut watcher = notify::recommended_watcher(move |evt| {
            handle.block_on(async {
                drop(tx.send(evt).await);
            });
        })?;

        watcher.watch(inbox.as_std_path(), RecursiveMode::NonRecursive)?;

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let event: notify::Event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        warn!(%err, "Inbox watcher error");
                        continue;
                    }
                };

                match event.kind {
                    EventKind::Create(_) | EventKind::Modify(_) => {}
                    EventKind::Any
                    | EventKind::Access(_)
                    | EventKind::Remove(_)
                    | EventKind::Other => continue,
                }

                for path in &event.paths {
                    if let Err(err) = inbound.ingest(path).await {
                        warn!(%err, "Ignoring unreadable inbox file");
                    }
                }
            }
        });

        debug!(%inbox, "Watching inbox");

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for DirectoryTransport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Writes every published topic to `<outbox>/<topic>.bin`.
#[derive(Clone, Debug)]
pub struct DirectorySink {
    outbox: Utf8PathBuf,
    topics: TopicsConfig,
}

impl DirectorySink {
    #[must_use]
    pub const fn new(outbox: Utf8PathBuf, topics: TopicsConfig) -> Self {
        Self { outbox, topics }
    }

    #[must_use]
    pub fn outbox(&self) -> &Utf8Path {
        &self.outbox
    }

    /// Path of the file holding `topic`.
    #[must_use]
    pub fn path_of(&self, topic: &str) -> Utf8PathBuf {
        topic_file(&self.outbox, topic)
    }

    fn write<T: BorshSerialize>(&self, topic: &str, value: &T) -> Result<(), SinkError> {
        let failed = |reason: String| SinkError::Publish {
            topic: topic.to_owned(),
            reason,
        };

        let bytes = borsh::to_vec(value).map_err(|err| failed(err.to_string()))?;

        let path = self.path_of(topic);
        let staging = path.with_extension(format!("{EXTENSION}.tmp"));

        fs::write(&staging, bytes).map_err(|err| failed(format!("{staging}: {err}")))?;
        fs::rename(&staging, &path).map_err(|err| failed(format!("{path}: {err}")))?;

        Ok(())
    }
}

impl SyncSink for DirectorySink {
    fn publish_diffs(&mut self, diffs: &DiffArray) -> Result<(), SinkError> {
        self.write(&self.topics.map_diffs, diffs)
    }

    fn publish_diff_count(&mut self, count: u32) -> Result<(), SinkError> {
        self.write(&self.topics.num_diffs, &count)
    }

    fn publish_merged(&mut self, map: &MapMessage) -> Result<(), SinkError> {
        self.write(&self.topics.merged, map)
    }

    fn publish_point_cloud(&mut self, cloud: &PointCloud) -> Result<(), SinkError> {
        self.write(&self.topics.point_cloud, cloud)
    }
}
