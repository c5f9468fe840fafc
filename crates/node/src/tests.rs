use core::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use octomerge_config::TopicsConfig;
use octomerge_octree::codec::{encode, MapEncoding};
use octomerge_octree::{OcTree, OcTreeKey};
use octomerge_sync::messages::{DiffArray, Header, MapMessage, NeighborMaps, PointCloud};
use octomerge_sync::{AgentId, Role, SyncCoordinator, SyncSettings, SyncSink};
use tempfile::{tempdir, TempDir};

use crate::run::tick;
use crate::transport::Inbound;
use crate::*;

fn utf8(dir: &TempDir) -> Utf8PathBuf {
    Utf8Path::from_path(dir.path()).unwrap().to_owned()
}

fn settings(role: Role) -> SyncSettings {
    let mut settings = SyncSettings::new(AgentId::from("H01"), role, 0.2);
    settings.map_threshold = 0;
    settings
}

fn map_message(seq: u32, cells: &[OcTreeKey]) -> MapMessage {
    let mut tree: OcTree = OcTree::new(0.2);
    for key in cells {
        let _cell = tree.set_node_value(*key, 1.0);
    }

    MapMessage {
        header: Header {
            seq,
            stamp_ms: 0,
            frame_id: "world".to_owned(),
        },
        blob: encode(&tree, MapEncoding::Binary),
    }
}

fn read<T: borsh::BorshDeserialize>(path: &Utf8Path) -> T {
    borsh::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

// ============================================================
// Mailbox
// ============================================================

#[test]
fn test_mailbox_starts_empty() {
    let mut mailbox = Mailbox::<u32>::new();

    assert!(mailbox.take_if_new().is_none());
    assert!(mailbox.latest().is_none());
}

#[test]
fn test_mailbox_coalesces_posts() {
    let mut mailbox = Mailbox::new();

    mailbox.post(1);
    mailbox.post(2);
    mailbox.post(3);

    assert_eq!(mailbox.take_if_new().as_deref(), Some(&3));
    assert!(mailbox.take_if_new().is_none(), "a value is only new once");
    assert_eq!(mailbox.latest().as_deref(), Some(&3));
}

#[test]
fn test_mailbox_clones_share_the_slot() {
    let mut reader = Mailbox::new();
    let writer = reader.clone();

    writer.post("hello");

    assert_eq!(reader.take_if_new().as_deref(), Some(&"hello"));
}

#[test]
fn test_inputs_take_new() {
    let mut inputs = Inputs::new();
    assert!(!inputs.take_new());

    inputs.neighbors.post(NeighborMaps::default());
    assert!(inputs.take_new());
    assert!(!inputs.take_new());
    assert!(inputs.neighbors.latest().is_some());
}

// ============================================================
// DirectoryTransport
// ============================================================

#[tokio::test]
async fn test_ingest_routes_by_topic() {
    let dir = tempdir().unwrap();
    let dir = utf8(&dir);
    let topics = TopicsConfig::default();
    let mut inputs = Inputs::new();
    let inbound = Inbound::new(&topics, inputs.clone());

    let message = map_message(4, &[OcTreeKey::new(1, 1, 1)]);
    let path = dir.join("octomap_binary.bin");
    std::fs::write(&path, borsh::to_vec(&message).unwrap()).unwrap();

    assert!(inbound.ingest(path.as_std_path()).await.unwrap());
    assert_eq!(inputs.self_map.take_if_new().as_deref(), Some(&message));
    assert!(inputs.neighbors.take_if_new().is_none());

    let neighbors = NeighborMaps {
        neighbors: vec![DiffArray::new(AgentId::from("R2"))],
    };
    let path = dir.join("neighbor_maps.bin");
    std::fs::write(&path, borsh::to_vec(&neighbors).unwrap()).unwrap();

    assert!(inbound.ingest(path.as_std_path()).await.unwrap());
    assert_eq!(inputs.neighbors.take_if_new().as_deref(), Some(&neighbors));
}

#[tokio::test]
async fn test_ingest_ignores_other_files() {
    let dir = tempdir().unwrap();
    let dir = utf8(&dir);
    let mut inputs = Inputs::new();
    let inbound = Inbound::new(&TopicsConfig::default(), inputs.clone());

    let path = dir.join("octomap_binary.bin.tmp");
    std::fs::write(&path, b"partial").unwrap();

    assert!(!inbound.ingest(path.as_std_path()).await.unwrap());
    assert!(!inputs.take_new());
}

#[tokio::test]
async fn test_ingest_rejects_garbage() {
    let dir = tempdir().unwrap();
    let dir = utf8(&dir);
    let mut inputs = Inputs::new();
    let inbound = Inbound::new(&TopicsConfig::default(), inputs.clone());

    let path = dir.join("neighbor_maps.bin");
    std::fs::write(&path, [0xff, 0xff, 0xff, 0xff, 0x01]).unwrap();

    let result = inbound.ingest(path.as_std_path()).await;

    assert!(matches!(result, Err(TransportError::Decode { .. })));
    assert!(!inputs.take_new());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_transport_picks_up_existing_files() {
    let dir = tempdir().unwrap();
    let dir = utf8(&dir);
    let mut inputs = Inputs::new();

    let message = map_message(0, &[OcTreeKey::new(2, 2, 2)]);
    std::fs::write(
        dir.join("octomap_binary.bin"),
        borsh::to_vec(&message).unwrap(),
    )
    .unwrap();

    let _transport = DirectoryTransport::start(&dir, &TopicsConfig::default(), inputs.clone())
        .await
        .unwrap();

    assert_eq!(inputs.self_map.take_if_new().as_deref(), Some(&message));
}

// ============================================================
// DirectorySink
// ============================================================

#[test]
fn test_sink_writes_topic_files() {
    let dir = tempdir().unwrap();
    let dir = utf8(&dir);
    let mut sink = DirectorySink::new(dir.clone(), TopicsConfig::default());

    let message = map_message(9, &[OcTreeKey::new(3, 3, 3)]);
    sink.publish_merged(&message).unwrap();
    sink.publish_diff_count(4).unwrap();

    let mut diffs = DiffArray::new(AgentId::from("H01"));
    diffs.diffs.push(message.clone());
    sink.publish_diffs(&diffs).unwrap();

    sink.publish_point_cloud(&PointCloud {
        header: message.header.clone(),
        points: Vec::new(),
    })
    .unwrap();

    assert_eq!(read::<MapMessage>(&dir.join("merged_map.bin")), message);
    assert_eq!(read::<u32>(&dir.join("numDiffs.bin")), 4);
    assert_eq!(read::<DiffArray>(&dir.join("map_diffs.bin")), diffs);
    assert!(dir.join("pc2_out.bin").is_file());
    assert!(!dir.join("merged_map.bin.tmp").exists());
}

#[test]
fn test_sink_overwrites_previous_value() {
    let dir = tempdir().unwrap();
    let dir = utf8(&dir);
    let mut sink = DirectorySink::new(dir.clone(), TopicsConfig::default());

    sink.publish_diff_count(1).unwrap();
    sink.publish_diff_count(2).unwrap();

    assert_eq!(read::<u32>(&sink.path_of("numDiffs")), 2);
}

#[test]
fn test_sink_reports_missing_outbox() {
    let dir = tempdir().unwrap();
    let missing = utf8(&dir).join("does-not-exist");
    let mut sink = DirectorySink::new(missing, TopicsConfig::default());

    assert!(sink.publish_diff_count(1).is_err());
}

// ============================================================
// Merge loop
// ============================================================

#[test]
fn test_tick_runs_only_on_new_input() {
    let dir = tempdir().unwrap();
    let dir = utf8(&dir);
    let mut sink = DirectorySink::new(dir.clone(), TopicsConfig::default());
    let mut coordinator = SyncCoordinator::new(settings(Role::Robot));
    let mut inputs = Inputs::new();

    assert!(tick(&mut coordinator, &mut inputs, &mut sink).is_none());

    inputs
        .self_map
        .post(map_message(0, &[OcTreeKey::new(5, 5, 5)]));
    let report = tick(&mut coordinator, &mut inputs, &mut sink).unwrap();

    assert!(!report.aborted);
    assert_eq!(coordinator.published_count(), 1);
    assert!(dir.join("merged_map.bin").is_file());

    assert!(tick(&mut coordinator, &mut inputs, &mut sink).is_none());
}

#[test]
fn test_tick_uses_latest_self_map_for_neighbor_updates() {
    let dir = tempdir().unwrap();
    let dir = utf8(&dir);
    let mut sink = DirectorySink::new(dir, TopicsConfig::default());
    let mut coordinator = SyncCoordinator::new(settings(Role::Robot));
    let mut inputs = Inputs::new();

    inputs
        .self_map
        .post(map_message(0, &[OcTreeKey::new(5, 5, 5)]));
    let _report = tick(&mut coordinator, &mut inputs, &mut sink).unwrap();

    let mut peer = DiffArray::new(AgentId::from("R2"));
    peer.diffs.push(map_message(0, &[OcTreeKey::new(6, 6, 6)]));
    inputs.neighbors.post(NeighborMaps {
        neighbors: vec![peer],
    });

    let report = tick(&mut coordinator, &mut inputs, &mut sink).unwrap();

    assert!(!report.aborted, "the stored self map keeps the robot going");
    assert_eq!(report.peer_diffs_merged, 1);
    assert_eq!(coordinator.merged().len(), 2);
}

#[test]
fn test_tick_survives_sink_failure() {
    let dir = tempdir().unwrap();
    let missing = utf8(&dir).join("gone");
    let mut sink = DirectorySink::new(missing, TopicsConfig::default());
    let mut coordinator = SyncCoordinator::new(settings(Role::Base));
    let mut inputs = Inputs::new();

    inputs.neighbors.post(NeighborMaps::default());

    assert!(tick(&mut coordinator, &mut inputs, &mut sink).is_none());
}

#[tokio::test]
async fn test_run_until_publishes_and_stops() {
    let dir = tempdir().unwrap();
    let dir = utf8(&dir);
    let sink = DirectorySink::new(dir.clone(), TopicsConfig::default());
    let inputs = Inputs::new();

    inputs
        .self_map
        .post(map_message(0, &[OcTreeKey::new(7, 7, 7)]));

    let config = NodeConfig::new(settings(Role::Base), Duration::from_millis(5));
    run_until(config, inputs, sink, tokio::time::sleep(Duration::from_millis(50)))
        .await
        .unwrap();

    assert!(dir.join("merged_map.bin").is_file());
    assert!(dir.join("map_diffs.bin").is_file());
    assert!(dir.join("pc2_out.bin").is_file());
}
