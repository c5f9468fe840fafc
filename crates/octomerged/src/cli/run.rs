use std::fs::create_dir_all;

use clap::Parser;
use eyre::{bail, Result as EyreResult, WrapErr};
use octomerge_config::ConfigFile;
use octomerge_node::{run, DirectorySink, DirectoryTransport, Inputs, NodeConfig};
use tracing::info;

use crate::cli::RootArgs;

/// Run the merge loop
#[derive(Debug, Parser)]
pub struct RunCommand;

impl RunCommand {
    pub async fn run(self, root_args: &RootArgs) -> EyreResult<()> {
        let path = root_args.node_dir();

        if !ConfigFile::exists(&path) {
            bail!("Node is not initialized in {:?}", path);
        }

        let config = ConfigFile::load(&path)?;

        let inbox = config.transport.inbox_in(&path);
        let outbox = config.transport.outbox_in(&path);

        for dir in [&inbox, &outbox] {
            create_dir_all(dir).wrap_err_with(|| format!("failed to create directory {dir:?}"))?;
        }

        let inputs = Inputs::new();

        let _transport = DirectoryTransport::start(&inbox, &config.topics, inputs.clone())
            .await
            .wrap_err("failed to watch the inbox")?;

        let sink = DirectorySink::new(outbox.clone(), config.topics.clone());

        info!(%inbox, %outbox, "Transport ready");

        run(
            NodeConfig::new(config.sync_settings(), config.sync.period()),
            inputs,
            sink,
        )
        .await
    }
}
