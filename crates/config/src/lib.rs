use core::time::Duration;
use std::fs::{read_to_string, write};

use camino::{Utf8Path, Utf8PathBuf};
use clap::ValueEnum;
use eyre::{bail, Result as EyreResult, WrapErr};
use octomerge_octree::codec::MapEncoding;
use octomerge_sync::{AgentId, Role, SyncSettings, DEFAULT_MAP_THRESHOLD};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Copy, ValueEnum)]
#[clap(rename_all = "lower")]
pub enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[non_exhaustive]
pub struct ConfigFile {
    pub agent: AgentConfig,

    #[serde(default)]
    pub map: MapConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub topics: TopicsConfig,

    #[serde(default)]
    pub transport: TransportConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct AgentConfig {
    pub id: AgentId,
    #[serde(default)]
    pub role: Role,
}

impl AgentConfig {
    #[must_use]
    pub const fn new(id: AgentId, role: Role) -> Self {
        Self { id, role }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new(AgentId::from("H01"), Role::default())
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default)]
#[non_exhaustive]
pub struct MapConfig {
    /// Edge length of a voxel in metres
    pub resolution: f64,
    pub encoding: MapEncoding,
    /// A self diff is published once it has more new cells than this
    pub threshold: u32,
}

impl MapConfig {
    #[must_use]
    pub const fn new(resolution: f64, encoding: MapEncoding, threshold: u32) -> Self {
        Self {
            resolution,
            encoding,
            threshold,
        }
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self::new(0.2, MapEncoding::Binary, DEFAULT_MAP_THRESHOLD)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default)]
#[non_exhaustive]
pub struct SyncConfig {
    /// Merge cycles per second
    pub rate_hz: f64,
}

impl SyncConfig {
    #[must_use]
    pub const fn new(rate_hz: f64) -> Self {
        Self { rate_hz }
    }

    /// Time between two merge cycles.
    ///
    /// `None` unless the rate is positive and its period fits in a [`Duration`].
    #[must_use]
    pub fn try_period(&self) -> Option<Duration> {
        if !(self.rate_hz.is_finite() && self.rate_hz > 0.0) {
            return None;
        }

        Duration::try_from_secs_f64(1.0 / self.rate_hz).ok()
    }

    /// Saturates at [`Duration::MAX`] for rates [`ConfigFile::validate`] rejects.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.try_period().unwrap_or(Duration::MAX)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(0.1)
    }
}

/// Topic names, used as file stems by the directory transport.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
#[non_exhaustive]
pub struct TopicsConfig {
    pub map: String,
    pub neighbors: String,
    pub merged: String,
    pub map_diffs: String,
    pub num_diffs: String,
    pub point_cloud: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            map: "octomap_binary".to_owned(),
            neighbors: "neighbor_maps".to_owned(),
            merged: "merged_map".to_owned(),
            map_diffs: "map_diffs".to_owned(),
            num_diffs: "numDiffs".to_owned(),
            point_cloud: "pc2_out".to_owned(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
#[non_exhaustive]
pub struct TransportConfig {
    pub inbox: Utf8PathBuf,
    pub outbox: Utf8PathBuf,
}

impl TransportConfig {
    #[must_use]
    pub const fn new(inbox: Utf8PathBuf, outbox: Utf8PathBuf) -> Self {
        Self { inbox, outbox }
    }

    /// Inbox directory, resolved against the node directory when relative.
    #[must_use]
    pub fn inbox_in(&self, dir: &Utf8Path) -> Utf8PathBuf {
        dir.join(&self.inbox)
    }

    #[must_use]
    pub fn outbox_in(&self, dir: &Utf8Path) -> Utf8PathBuf {
        dir.join(&self.outbox)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new("inbox".into(), "outbox".into())
    }
}

impl ConfigFile {
    #[must_use]
    pub const fn new(
        agent: AgentConfig,
        map: MapConfig,
        sync: SyncConfig,
        topics: TopicsConfig,
        transport: TransportConfig,
    ) -> Self {
        Self {
            agent,
            map,
            sync,
            topics,
            transport,
        }
    }

    #[must_use]
    pub fn exists(dir: &Utf8Path) -> bool {
        dir.join(CONFIG_FILE).is_file()
    }

    pub fn load(dir: &Utf8Path) -> EyreResult<Self> {
        let path = dir.join(CONFIG_FILE);
        let content = read_to_string(&path)
            .wrap_err_with(|| format!("failed to read configuration from {path:?}"))?;

        let config: Self = toml::from_str(&content)
            .wrap_err_with(|| format!("failed to parse configuration at {path:?}"))?;

        config.validate()?;

        Ok(config)
    }

    pub fn save(&self, dir: &Utf8Path) -> EyreResult<()> {
        self.validate()?;

        let path = dir.join(CONFIG_FILE);
        let content = toml::to_string_pretty(self)?;

        write(&path, content)
            .wrap_err_with(|| format!("failed to write configuration to {path:?}"))?;

        Ok(())
    }

    pub fn validate(&self) -> EyreResult<()> {
        if self.agent.id.as_str().is_empty() {
            bail!("agent id must not be empty");
        }

        if !(self.map.resolution.is_finite() && self.map.resolution > 0.0) {
            bail!(
                "map resolution must be positive, got {}",
                self.map.resolution
            );
        }

        if self.sync.try_period().is_none() {
            bail!(
                "sync rate must be positive with a representable period, got {}",
                self.sync.rate_hz
            );
        }

        Ok(())
    }

    /// Settings handed to the merge coordinator.
    #[must_use]
    pub fn sync_settings(&self) -> SyncSettings {
        let mut settings =
            SyncSettings::new(self.agent.id.clone(), self.agent.role, self.map.resolution);
        settings.encoding = self.map.encoding;
        settings.map_threshold = self.map.threshold;
        settings
    }

    /// Print config to stdout
    pub fn print(&self, format: OutputFormat) -> EyreResult<()> {
        match format {
            OutputFormat::Pretty => {
                println!("{self:#?}");
            }
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(self)?;
                println!("{json}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn utf8_dir(dir: &tempfile::TempDir) -> &Utf8Path {
        Utf8Path::from_path(dir.path()).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = ConfigFile::default();

        assert_eq!(config.agent.id.as_str(), "H01");
        assert_eq!(config.agent.role, Role::Robot);
        assert_eq!(config.map.encoding, MapEncoding::Binary);
        assert_eq!(config.map.threshold, 50);
        assert_eq!(config.sync.period(), Duration::from_secs(10));
        assert_eq!(config.topics.num_diffs, "numDiffs");
        assert_eq!(config.topics.point_cloud, "pc2_out");
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let dir = utf8_dir(&dir);

        assert!(!ConfigFile::exists(dir));

        let mut config = ConfigFile::default();
        config.agent = AgentConfig::new(AgentId::from("base"), Role::Base);
        config.map.encoding = MapEncoding::Full;
        config.map.threshold = 7;
        config.save(dir).unwrap();

        assert!(ConfigFile::exists(dir));

        let loaded = ConfigFile::load(dir).unwrap();
        assert_eq!(loaded.agent.id.as_str(), "base");
        assert_eq!(loaded.agent.role, Role::Base);
        assert_eq!(loaded.map.encoding, MapEncoding::Full);
        assert_eq!(loaded.map.threshold, 7);
        assert_eq!(loaded.transport.inbox, Utf8PathBuf::from("inbox"));
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let dir = tempdir().unwrap();
        let dir = utf8_dir(&dir);

        std::fs::write(
            dir.join(CONFIG_FILE),
            "[agent]\nid = \"R2\"\nrole = \"base\"\n\n[map]\nresolution = 0.1\n",
        )
        .unwrap();

        let config = ConfigFile::load(dir).unwrap();
        assert_eq!(config.agent.id.as_str(), "R2");
        assert!((config.map.resolution - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.map.threshold, 50);
        assert_eq!(config.topics.merged, "merged_map");
    }

    #[test]
    fn test_rejects_non_positive_values() {
        let mut config = ConfigFile::default();
        config.map.resolution = 0.0;
        assert!(config.validate().is_err());

        let mut config = ConfigFile::default();
        config.sync.rate_hz = -1.0;
        assert!(config.validate().is_err());

        let mut config = ConfigFile::default();
        config.agent.id = AgentId::from("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_rate_with_unrepresentable_period() {
        let mut config = ConfigFile::default();
        config.sync.rate_hz = 1e-300;

        assert!(config.validate().is_err());
        assert!(config.sync.try_period().is_none());
        assert_eq!(config.sync.period(), Duration::MAX);

        config.sync.rate_hz = 0.5;
        assert!(config.validate().is_ok());
        assert_eq!(config.sync.period(), Duration::from_secs(2));
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = tempdir().unwrap();
        let dir = utf8_dir(&dir);

        std::fs::write(dir.join(CONFIG_FILE), "[agent]\nid = \"R2\"\n\n[sync]\nrate_hz = 0\n")
            .unwrap();

        assert!(ConfigFile::load(dir).is_err());
    }

    #[test]
    fn test_sync_settings() {
        let mut config = ConfigFile::default();
        config.map.threshold = 3;
        config.map.encoding = MapEncoding::Full;

        let settings = config.sync_settings();
        assert_eq!(settings.agent_id.as_str(), "H01");
        assert_eq!(settings.map_threshold, 3);
        assert_eq!(settings.encoding, MapEncoding::Full);
    }

    #[test]
    fn test_transport_paths() {
        let transport = TransportConfig::default();
        let node = Utf8Path::new("/tmp/node");

        assert_eq!(transport.inbox_in(node), Utf8PathBuf::from("/tmp/node/inbox"));

        let absolute = TransportConfig::new("/var/in".into(), "out".into());
        assert_eq!(absolute.inbox_in(node), Utf8PathBuf::from("/var/in"));
        assert_eq!(absolute.outbox_in(node), Utf8PathBuf::from("/tmp/node/out"));
    }
}
