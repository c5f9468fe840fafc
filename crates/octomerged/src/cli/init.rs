use std::fs::create_dir_all;

use clap::{Parser, ValueEnum};
use eyre::{bail, Result as EyreResult, WrapErr};
use octomerge_config::{
    AgentConfig, ConfigFile, MapConfig, SyncConfig, TopicsConfig, TransportConfig,
};
use octomerge_octree::codec::MapEncoding;
use octomerge_sync::{AgentId, Role, DEFAULT_MAP_THRESHOLD};
use tracing::{info, warn};

use crate::cli::RootArgs;

#[derive(Clone, Copy, Debug, ValueEnum)]
#[clap(rename_all = "lower")]
pub enum RoleArg {
    Robot,
    Base,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Robot => Self::Robot,
            RoleArg::Base => Self::Base,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
#[clap(rename_all = "lower")]
pub enum EncodingArg {
    /// Occupied/free flag per leaf
    Binary,
    /// Exact log-odds per leaf
    Full,
}

impl From<EncodingArg> for MapEncoding {
    fn from(encoding: EncodingArg) -> Self {
        match encoding {
            EncodingArg::Binary => Self::Binary,
            EncodingArg::Full => Self::Full,
        }
    }
}

/// Initialize node configuration
#[derive(Debug, Parser)]
pub struct InitCommand {
    /// Agent identifier, unique among all agents
    #[arg(long, value_name = "ID", default_value = "H01")]
    pub id: String,

    #[arg(long, value_enum, default_value_t = RoleArg::Robot)]
    pub role: RoleArg,

    /// Voxel edge length in metres
    #[arg(long, value_name = "METRES", default_value_t = 0.2)]
    pub resolution: f64,

    /// New cells a self diff must exceed before it is published
    #[arg(long, value_name = "CELLS", default_value_t = DEFAULT_MAP_THRESHOLD)]
    pub threshold: u32,

    #[arg(long, value_enum, default_value_t = EncodingArg::Binary)]
    pub encoding: EncodingArg,

    /// Merge cycles per second
    #[arg(long, value_name = "HZ", default_value_t = 0.1)]
    pub rate: f64,

    /// Force overwrite of an existing config
    #[arg(long, short)]
    pub force: bool,
}

impl InitCommand {
    pub fn run(self, root_args: &RootArgs) -> EyreResult<()> {
        let path = root_args.node_dir();

        if ConfigFile::exists(&path) {
            if !self.force {
                bail!("Node is already initialized in {:?}", path);
            }
            warn!("Overwriting the existing configuration in {:?}", path);
        }

        create_dir_all(&path)
            .wrap_err_with(|| format!("failed to create directory {path:?}"))?;

        let config = ConfigFile::new(
            AgentConfig::new(AgentId::from(self.id), self.role.into()),
            MapConfig::new(self.resolution, self.encoding.into(), self.threshold),
            SyncConfig::new(self.rate),
            TopicsConfig::default(),
            TransportConfig::default(),
        );

        config.save(&path)?;

        info!(
            agent = %config.agent.id,
            role = ?config.agent.role,
            "Initialized a node in {:?}",
            path
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8Path;
    use clap::Parser;
    use tempfile::tempdir;

    use super::*;

    fn init(home: &Utf8Path, extra: &[&str]) -> EyreResult<()> {
        let mut argv = vec!["init"];
        argv.extend_from_slice(extra);

        let root = RootArgs {
            home: home.to_owned(),
            node_name: "R2".into(),
        };

        InitCommand::try_parse_from(argv)?.run(&root)
    }

    #[test]
    fn test_init_writes_config() {
        let dir = tempdir().unwrap();
        let home = Utf8Path::from_path(dir.path()).unwrap();

        init(home, &["--id", "R2", "--role", "base", "--encoding", "full"]).unwrap();

        let config = ConfigFile::load(&home.join("R2")).unwrap();
        assert_eq!(config.agent.id.as_str(), "R2");
        assert_eq!(config.agent.role, Role::Base);
        assert_eq!(config.map.encoding, MapEncoding::Full);
        assert_eq!(config.map.threshold, DEFAULT_MAP_THRESHOLD);
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let home = Utf8Path::from_path(dir.path()).unwrap();

        init(home, &[]).unwrap();
        assert!(init(home, &["--threshold", "3"]).is_err());

        init(home, &["--threshold", "3", "--force"]).unwrap();
        let config = ConfigFile::load(&home.join("R2")).unwrap();
        assert_eq!(config.map.threshold, 3);
    }

    #[test]
    fn test_init_rejects_bad_resolution() {
        let dir = tempdir().unwrap();
        let home = Utf8Path::from_path(dir.path()).unwrap();

        assert!(init(home, &["--resolution", "0"]).is_err());
        assert!(!ConfigFile::exists(&home.join("R2")));
    }
}
