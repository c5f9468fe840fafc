use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use const_format::concatcp;
use eyre::Result as EyreResult;

use crate::defaults;

mod config;
mod init;
mod run;

use config::ConfigCommand;
use init::InitCommand;
use run::RunCommand;

pub const EXAMPLES: &str = r"
  # Initialize a robot
  $ octomerged --home data/ --node-name H01 init --id H01

  # Initialize a base station publishing full log-odds maps
  $ octomerged --home data/ --node-name base init --id base --role base --encoding full

  # Show the configuration as JSON
  $ octomerged --home data/ --node-name H01 config --print json

  # Start merging
  $ octomerged --home data/ --node-name H01 run
";

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
#[command(after_help = concatcp!(
    "Environment variables:\n",
    "  OCTOMERGE_HOME    Directory for config and data\n\n",
    "Examples:",
    EXAMPLES
))]
pub struct RootCommand {
    #[command(flatten)]
    pub args: RootArgs,

    #[command(subcommand)]
    pub action: SubCommands,
}

#[derive(Debug, Subcommand)]
pub enum SubCommands {
    Config(ConfigCommand),
    Init(InitCommand),
    #[command(alias = "up")]
    Run(RunCommand),
}

#[derive(Debug, Parser)]
pub struct RootArgs {
    /// Directory for config and data
    #[arg(long, value_name = "PATH", default_value_t = defaults::default_node_dir())]
    #[arg(env = "OCTOMERGE_HOME", hide_env_values = true)]
    pub home: Utf8PathBuf,

    /// Name of node
    #[arg(short, long, value_name = "NAME")]
    pub node_name: Utf8PathBuf,
}

impl RootArgs {
    pub fn node_dir(&self) -> Utf8PathBuf {
        self.home.join(&self.node_name)
    }
}

impl RootCommand {
    pub async fn run(self) -> EyreResult<()> {
        match self.action {
            SubCommands::Config(config) => config.run(&self.args),
            SubCommands::Init(init) => init.run(&self.args),
            SubCommands::Run(run) => run.run(&self.args).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_command_is_well_formed() {
        RootCommand::command().debug_assert();
    }

    #[test]
    fn test_parse_init() {
        let command = RootCommand::try_parse_from([
            "octomerged",
            "--home",
            "/tmp/octo",
            "--node-name",
            "R2",
            "init",
            "--id",
            "R2",
            "--role",
            "base",
            "--threshold",
            "10",
        ])
        .unwrap();

        assert_eq!(command.args.node_dir(), Utf8PathBuf::from("/tmp/octo/R2"));
        assert!(matches!(command.action, SubCommands::Init(_)));
    }
}
