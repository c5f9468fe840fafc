use clap::Parser;
use eyre::{bail, Result as EyreResult};
use octomerge_config::{ConfigFile, OutputFormat};

use crate::cli::RootArgs;

/// Print the node configuration
#[derive(Debug, Parser)]
pub struct ConfigCommand {
    /// Output format
    #[arg(long = "print", value_enum, default_value_t = OutputFormat::Pretty)]
    pub print: OutputFormat,
}

impl ConfigCommand {
    pub fn run(self, root_args: &RootArgs) -> EyreResult<()> {
        let path = root_args.node_dir();

        if !ConfigFile::exists(&path) {
            bail!("Node is not initialized in {:?}", path);
        }

        ConfigFile::load(&path)?.print(self.print)
    }
}
