use {
  crate::{
    config::NodeConfig,
    ledger::Genesis,
    node,
    primitives::Keypair,
  },
  clap::Parser,
  std::path::PathBuf,
};

#[derive(Debug, Parser)]
#[clap(version, about)]
pub struct CliOpts {
  #[clap(short, long, help = "data directory for the ledger store")]
  pub data_dir: Option<PathBuf>,

  #[clap(short, long, help = "JSON configuration file")]
  pub config: Option<PathBuf>,

  #[clap(long, help = "override the configured peering port")]
  pub port: Option<u16>,

  #[clap(
    long,
    help = "secret key of a local wallet account (repeatable)",
    multiple_occurrences = true
  )]
  pub wallet_seed: Vec<Keypair>,

  #[clap(short, long, help = "peers to contact at startup")]
  pub peer: Vec<String>,

  #[clap(
    short,
    long,
    parse(from_occurrences),
    help = "Use verbose output (-vv very verbose output)"
  )]
  pub verbose: u64,
}

impl CliOpts {
  pub fn data_dir(&self) -> anyhow::Result<PathBuf> {
    match &self.data_dir {
      Some(dir) => Ok(dir.clone()),
      None => {
        let home = std::env::var("HOME")?;
        Ok(PathBuf::from(home).join(".trellis"))
      }
    }
  }

  pub fn node_config(&self) -> anyhow::Result<NodeConfig> {
    let mut config = match &self.config {
      Some(path) => NodeConfig::load(path)?,
      None => NodeConfig::default(),
    };
    if let Some(port) = self.port {
      config.peering_port = port;
    }
    for peer in &self.peer {
      config.preconfigured_peers.push(peer.clone());
    }
    Ok(config)
  }

  pub fn genesis(&self) -> Genesis {
    node::dev_genesis()
  }
}
