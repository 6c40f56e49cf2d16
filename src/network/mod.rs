pub mod message;
pub mod peers;
pub mod wire;

pub use {
  message::{
    Endpoint,
    Message,
    MessageHeader,
    MessageType,
    NODE_ID_VERSION,
    PROTOCOL_VERSION,
    PROTOCOL_VERSION_MIN,
  },
  peers::{map_to_v6, reserved_address, PeerInfo, Peers},
};

use {
  crate::{
    consensus::Vote,
    ledger::Block,
    primitives::Keypair,
    stats::{StatDetail, StatDir, StatType, Stats},
    work::WorkPool,
  },
  self::wire::WireError,
  std::{net::SocketAddr, sync::Arc},
  tokio::{
    net::UdpSocket,
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
  },
  tracing::{debug, trace, warn},
};

/// A parsed datagram handed to the node's dispatch loop.
#[derive(Debug)]
pub enum NetworkEvent {
  Message {
    header: MessageHeader,
    message: Message,
    sender: Endpoint,
  },
}

enum Command {
  Send(Endpoint, Vec<u8>),
  Stop,
}

/// Datagram transport. One tokio task owns the socket and drains an
/// outbound command channel; parsed inbound traffic is surfaced via
/// [`NetworkEvent`]s. The send methods are synchronous and safe to
/// call from any worker thread.
pub struct Network {
  magic: [u8; 2],
  node_id: Keypair,
  peers: Arc<Peers>,
  stats: Arc<Stats>,
  online_weight_minimum: u128,
  local: Endpoint,
  netout: UnboundedSender<Command>,
}

impl Network {
  pub fn new(
    socket: UdpSocket,
    magic: [u8; 2],
    node_id: Keypair,
    work: WorkPool,
    peers: Arc<Peers>,
    stats: Arc<Stats>,
    online_weight_minimum: u128,
  ) -> (Self, UnboundedReceiver<NetworkEvent>) {
    let local = map_to_v6(socket.local_addr().expect("socket is bound"));
    let (netin_tx, netin_rx) = unbounded_channel();
    let (netout_tx, netout_rx) = unbounded_channel();

    let io_peers = Arc::clone(&peers);
    let io_stats = Arc::clone(&stats);
    tokio::spawn(socket_loop(
      socket, magic, work, io_peers, io_stats, local, netin_tx, netout_rx,
    ));

    (
      Self {
        magic,
        node_id,
        peers,
        stats,
        online_weight_minimum,
        local,
        netout: netout_tx,
      },
      netin_rx,
    )
  }

  pub fn local_endpoint(&self) -> Endpoint {
    self.local
  }

  pub fn stop(&self) {
    let _ = self.netout.send(Command::Stop);
  }

  pub fn send(&self, endpoint: Endpoint, message: &Message) {
    let detail = match message {
      Message::Keepalive(_) => StatDetail::Keepalive,
      Message::Publish(_) => StatDetail::Publish,
      Message::ConfirmReq(_) => StatDetail::ConfirmReq,
      Message::ConfirmAck(_) => StatDetail::ConfirmAck,
      Message::NodeIdHandshake { .. } => StatDetail::NodeIdHandshake,
      Message::OutOfScope(_) => StatDetail::OutOfScope,
    };
    self.stats.inc(StatType::Message, detail, StatDir::Out);
    let bytes = message.serialize(self.magic);
    let _ = self.netout.send(Command::Send(endpoint, bytes));
  }

  pub fn send_keepalive(&self, endpoint: Endpoint) {
    let mut slots = [message::null_endpoint(); 8];
    self.peers.random_fill(&mut slots);
    self.send(endpoint, &Message::Keepalive(slots));
  }

  pub fn send_confirm_req(&self, endpoint: Endpoint, block: &Block) {
    self.send(endpoint, &Message::ConfirmReq(block.clone()));
  }

  pub fn send_confirm_ack(&self, endpoint: Endpoint, vote: &Vote) {
    self.send(endpoint, &Message::ConfirmAck(vote.clone()));
  }

  /// Signs the peer's challenge with the node identity and/or issues
  /// our own.
  pub fn send_node_id_handshake(
    &self,
    endpoint: Endpoint,
    query: Option<[u8; 32]>,
    respond_to: Option<[u8; 32]>,
  ) {
    let response = respond_to.map(|cookie| {
      (self.node_id.public(), self.node_id.sign(&cookie))
    });
    self.send(endpoint, &Message::NodeIdHandshake { query, response });
  }

  /// Publishes a block to the square-root fanout subset of peers.
  pub fn republish_block(&self, block: &Block) {
    let message = Message::Publish(block.clone());
    let list = self.peers.list_fanout();
    trace!("republishing {} to {} peers", block, list.len());
    for endpoint in list {
      self.send(endpoint, &message);
    }
  }

  /// Floods a vote to the fanout subset. Rate limiting (replay, rep
  /// weight, cooldown) is the caller's responsibility.
  pub fn republish_vote(&self, vote: &Vote) {
    let message = Message::ConfirmAck(vote.clone());
    for endpoint in self.peers.list_fanout() {
      self.send(endpoint, &message);
    }
  }

  /// Requests votes on a block from known representatives, falling
  /// back to every peer while the observed representative weight is
  /// below the configured online minimum.
  pub fn broadcast_confirm_req(&self, block: &Block) {
    const MAX_REPS: usize = 10;
    let reps = self.peers.representatives(MAX_REPS);
    if reps.is_empty() || self.peers.total_weight() < self.online_weight_minimum
    {
      for info in self.peers.list_vector() {
        self.send_confirm_req(info.endpoint, block);
      }
    } else {
      debug!(
        "broadcasting confirm_req for {} to {} representatives",
        block,
        reps.len()
      );
      for info in reps {
        self.send_confirm_req(info.endpoint, block);
      }
    }
  }
}

#[allow(clippy::too_many_arguments)]
async fn socket_loop(
  socket: UdpSocket,
  magic: [u8; 2],
  work: WorkPool,
  peers: Arc<Peers>,
  stats: Arc<Stats>,
  local: Endpoint,
  netin: UnboundedSender<NetworkEvent>,
  mut netout: UnboundedReceiver<Command>,
) {
  let mut buf = vec![0u8; 1024];
  loop {
    tokio::select! {
      command = netout.recv() => {
        match command {
          Some(Command::Send(endpoint, bytes)) => {
            stats.add(
              StatType::Traffic,
              StatDetail::All,
              StatDir::Out,
              bytes.len() as u64,
            );
            if let Err(e) =
              socket.send_to(&bytes, SocketAddr::V6(endpoint)).await
            {
              debug!("error sending datagram to {endpoint}: {e}");
            }
          }
          Some(Command::Stop) | None => break,
        }
      }
      incoming = socket.recv_from(&mut buf) => {
        match incoming {
          Ok((size, sender)) => {
            let sender = map_to_v6(sender);
            if peers.not_a_peer(&sender, false) {
              trace!("dropping datagram from reserved sender {sender}");
              stats.inc(StatType::Error, StatDetail::BadSender, StatDir::In);
              continue;
            }
            if sender == local {
              continue;
            }
            match Message::deserialize(&buf[..size], magic, &work) {
              Ok((header, message)) => {
                stats.add(
                  StatType::Traffic,
                  StatDetail::All,
                  StatDir::In,
                  size as u64,
                );
                if netin
                  .send(NetworkEvent::Message { header, message, sender })
                  .is_err()
                {
                  break;
                }
              }
              Err(error) => {
                let detail = match error {
                  WireError::BadMagic => StatDetail::BadMagic,
                  WireError::InsufficientWork => StatDetail::InsufficientWork,
                  WireError::UnknownMessageType(_) => {
                    StatDetail::UnknownMessageType
                  }
                  WireError::UnsupportedVersion(_) => StatDetail::InvalidHeader,
                  _ => StatDetail::InvalidMessage,
                };
                debug!("dropping datagram from {sender}: {error}");
                stats.inc(StatType::Error, detail, StatDir::In);
              }
            }
          }
          Err(e) => {
            warn!("udp receive error: {e}");
          }
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use {
    super::{map_to_v6, Message, Network, NetworkEvent, Peers},
    crate::{
      primitives::Keypair,
      stats::{StatDetail, StatDir, StatType, Stats},
      work::WorkPool,
    },
    std::{sync::Arc, time::Duration},
    tokio::net::UdpSocket,
  };

  const MAGIC: [u8; 2] = [b'T', b'A'];

  async fn test_network() -> (
    Network,
    tokio::sync::mpsc::UnboundedReceiver<NetworkEvent>,
    Arc<Stats>,
  ) {
    let socket = UdpSocket::bind("[::1]:0").await.unwrap();
    let local = map_to_v6(socket.local_addr().unwrap());
    let peers = Arc::new(Peers::new(local, true));
    let stats = Arc::new(Stats::new());
    let (network, events) = Network::new(
      socket,
      MAGIC,
      Keypair::random(),
      WorkPool::new(0),
      peers,
      Arc::clone(&stats),
      0,
    );
    (network, events, stats)
  }

  #[tokio::test]
  async fn keepalive_reaches_other_node() {
    let (alpha, _alpha_rx, _) = test_network().await;
    let (beta, mut beta_rx, beta_stats) = test_network().await;

    alpha.send_keepalive(beta.local_endpoint());

    let event =
      tokio::time::timeout(Duration::from_secs(5), beta_rx.recv())
        .await
        .expect("datagram within deadline")
        .expect("channel open");
    let NetworkEvent::Message { message, sender, .. } = event;
    assert!(matches!(message, Message::Keepalive(_)));
    assert_eq!(sender, alpha.local_endpoint());
    assert!(
      beta_stats.count(StatType::Traffic, StatDetail::All, StatDir::In) > 0
    );
  }

  #[tokio::test]
  async fn garbage_is_counted_and_dropped() {
    let (alpha, _alpha_rx, _) = test_network().await;
    let (beta, mut beta_rx, beta_stats) = test_network().await;

    // wrong magic
    let socket = UdpSocket::bind("[::1]:0").await.unwrap();
    let bytes = Message::NodeIdHandshake { query: None, response: None }
      .serialize([b'X', b'X']);
    socket
      .send_to(&bytes, std::net::SocketAddr::V6(beta.local_endpoint()))
      .await
      .unwrap();

    // followed by a valid message so we have something to wait on
    alpha.send_keepalive(beta.local_endpoint());
    tokio::time::timeout(Duration::from_secs(5), beta_rx.recv())
      .await
      .expect("datagram within deadline")
      .expect("channel open");

    assert_eq!(
      beta_stats.count(StatType::Error, StatDetail::BadMagic, StatDir::In),
      1
    );
  }
}
