mod alarm;
mod bootstrap;
mod cli;
mod config;
mod consensus;
mod ledger;
mod network;
mod node;
mod observers;
mod primitives;
mod stats;
mod wallet;
mod work;

#[cfg(test)]
mod test;

use {
  clap::Parser,
  cli::CliOpts,
  ledger::Store,
  node::Node,
  tracing::{info, Level},
  tracing_subscriber::{
    filter::filter_fn,
    prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
    Layer,
  },
};

fn print_essentials(opts: &CliOpts) -> anyhow::Result<()> {
  info!("Starting trellis node");
  info!("Version: {}", env!("CARGO_PKG_VERSION"));
  info!("Data directory: {}", opts.data_dir()?.display());
  let genesis = opts.genesis();
  info!("Genesis account: {}", genesis.account);
  info!("Genesis hash: {}", genesis.hash());
  Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
  let opts = CliOpts::parse();

  let loglevel = match opts.verbose {
    1 => Level::DEBUG,
    2 => Level::TRACE,
    _ => Level::INFO,
  };
  tracing_subscriber::registry()
    .with(tracing_subscriber::fmt::layer().with_filter(filter_fn(
      move |metadata| metadata.level() <= &loglevel,
    )))
    .init();

  print_essentials(&opts)?;

  let config = opts.node_config()?;
  let genesis = opts.genesis();
  let store = Store::open(&opts.data_dir()?)?;

  let node = Node::new(config, genesis, store).await?;
  for keypair in &opts.wallet_seed {
    node.wallets.insert(keypair.clone());
  }
  node.start();

  tokio::signal::ctrl_c().await?;
  node.stop();
  Ok(())
}
