use {
  crate::{
    config::NodeConfig,
    ledger::{Genesis, Store},
    node::Node,
    primitives::Keypair,
  },
  std::{
    sync::Arc,
    time::{Duration, Instant},
  },
};

/// Polls a predicate until it holds or the deadline passes.
pub async fn wait_until(
  timeout: Duration,
  predicate: impl Fn() -> bool,
) -> bool {
  let deadline = Instant::now() + timeout;
  while Instant::now() < deadline {
    if predicate() {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(25)).await;
  }
  predicate()
}

/// A test-network cluster on loopback: every node shares one genesis
/// and discovers the others through keepalive gossip and the node-ID
/// handshake, exactly like a real deployment.
pub struct System {
  pub genesis: Keypair,
  pub nodes: Vec<Arc<Node>>,
}

impl System {
  pub async fn new(count: usize, supply: u128) -> Self {
    Self::with_config(count, supply, NodeConfig::test_default()).await
  }

  pub async fn with_config(
    count: usize,
    supply: u128,
    config: NodeConfig,
  ) -> Self {
    let genesis = Keypair::random();
    let mut nodes = Vec::with_capacity(count);
    for _ in 0..count {
      let node = Node::new(
        config.clone(),
        Genesis::new(&genesis, supply),
        Store::open_temporary().expect("temporary store"),
      )
      .await
      .expect("node boots");
      node.start();
      nodes.push(node);
    }

    // introduce every pair; the syn-cookie handshake promotes each
    // into the peer tables
    for node in &nodes {
      for other in &nodes {
        if node.local_endpoint() != other.local_endpoint() {
          node.network.send_keepalive(other.local_endpoint());
        }
      }
    }
    let connected = wait_until(Duration::from_secs(10), || {
      nodes.iter().all(|node| node.peers.size() >= count - 1)
    })
    .await;
    assert!(connected, "nodes failed to discover each other");

    Self { genesis, nodes }
  }

  pub fn stop(&self) {
    for node in &self.nodes {
      node.stop();
    }
  }
}
