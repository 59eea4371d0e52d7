//! Node binary: joins the cluster on `--id`/`--port` and runs the
//! Ricart–Agrawala actor loop. `gen-config` is a subcommand rather than a
//! flag, mirroring the original `IniciadorNos.py` membership generator's
//! separate purpose from running a node.

use anyhow::Context;
use clap::{Parser, Subcommand};
use distmutex::{config::ClusterConfig, logging, node::Node};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tracing::metadata::LevelFilter;

#[derive(Parser)]
struct Opts {
    #[clap(subcommand)]
    command: Option<Command>,

    /// This node's id, unique within the cluster.
    #[clap(long)]
    id: Option<u8>,

    /// Port to listen for peer and reply on. Required unless `--config` is
    /// given and the config lists an entry for `--id`.
    #[clap(long)]
    port: Option<u16>,

    /// Path to a JSON cluster config; falls back to the fixed
    /// `node<i>:5000+i` convention with `--cluster-size` peers.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Peer count to assume when `--config` is not given.
    #[clap(long, default_value_t = 3)]
    cluster_size: u8,

    /// Address of the Orchestrator.
    #[clap(long, default_value = "127.0.0.1:5000")]
    orchestrator: SocketAddr,
}

#[derive(Subcommand)]
enum Command {
    /// Writes a fixed-convention cluster config with `n` nodes to a file.
    GenConfig {
        n: u8,
        #[clap(long, default_value = "config.json")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();

    if let Some(Command::GenConfig { n, out }) = opts.command {
        let config = ClusterConfig::fixed_convention(n);
        config.save(&out)?;
        println!("wrote {}-node config to {}", n, out.display());
        return Ok(());
    }

    let id = opts.id.context("--id is required to run a node")?;

    logging::init_tracing(&format!("node_{id}"), LevelFilter::INFO)?;

    let config = match &opts.config {
        Some(path) => ClusterConfig::load(path)?,
        None => ClusterConfig::fixed_convention(opts.cluster_size),
    };

    let port = match opts.port {
        Some(port) => port,
        None => config
            .node(id)
            .map(|node| node.port)
            .with_context(|| format!("--port not given and node {id} is not in the config"))?,
    };

    let node = Arc::new(Node::new(id, port, &config, opts.orchestrator));
    node.run().await
}
