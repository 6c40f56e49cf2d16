use {
  crate::{
    alarm::Alarm,
    bootstrap::BootstrapTrigger,
    config::{NetworkKind, NodeConfig},
    consensus::{
      ActiveElections,
      BlockArrival,
      BlockProcessor,
      ConfirmedElection,
      ElectionContext,
      GapCache,
      OnlineReps,
      RepCrawler,
      Vote,
      VotePayload,
      VoteProcessor,
    },
    ledger::{Block, Genesis, Ledger, ProcessResult, Store},
    network::{
      map_to_v6,
      Endpoint,
      Message,
      MessageHeader,
      Network,
      NetworkEvent,
      Peers,
    },
    observers::Observers,
    primitives::{Account, BlockHash, Keypair},
    stats::{StatDetail, StatDir, StatType, Stats},
    wallet::Wallets,
    work::WorkPool,
  },
  once_cell::sync::OnceCell,
  std::{
    net::{Ipv6Addr, SocketAddr, ToSocketAddrs},
    sync::{
      atomic::{AtomicBool, Ordering},
      mpsc::{channel, Receiver, RecvTimeoutError},
      Arc,
      Mutex,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
  },
  tokio::sync::mpsc::UnboundedReceiver,
  tracing::{debug, info, warn},
};

/// Crawl targets are re-queried on this cadence.
const REP_CRAWL_INTERVAL: Duration = Duration::from_secs(4);
/// How long a crawl bait hash stays active.
const REP_CRAWL_TTL: Duration = Duration::from_secs(5);
const STAKE_RECALC_INTERVAL: Duration = Duration::from_secs(300);

/// One peer node: the consensus core wired to its collaborators and a
/// datagram socket. Everything shared hangs off `Arc`s; scheduled
/// tasks capture what they need and check the stop flag first.
pub struct Node {
  pub config: NodeConfig,
  pub node_id: Keypair,
  pub ledger: Arc<Ledger>,
  pub stats: Arc<Stats>,
  pub observers: Arc<Observers>,
  pub alarm: Arc<Alarm>,
  pub work: WorkPool,
  pub peers: Arc<Peers>,
  pub network: Arc<Network>,
  pub online_reps: Arc<OnlineReps>,
  pub bootstrap: Arc<BootstrapTrigger>,
  pub gap_cache: Arc<GapCache>,
  pub arrival: Arc<BlockArrival>,
  pub wallets: Arc<Wallets>,
  pub active: Arc<ActiveElections>,
  pub block_processor: Arc<BlockProcessor>,
  pub vote_processor: Arc<VoteProcessor>,
  pub rep_crawler: Arc<RepCrawler>,
  stopped: AtomicBool,
  confirmed_rx: Mutex<Option<Receiver<ConfirmedElection>>>,
  events: Mutex<Option<UnboundedReceiver<NetworkEvent>>>,
  cement_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
  pub async fn new(
    config: NodeConfig,
    genesis: Genesis,
    store: Store,
  ) -> anyhow::Result<Arc<Self>> {
    let stats = Arc::new(Stats::new());
    let observers = Arc::new(Observers::new());
    let alarm = Arc::new(Alarm::new());
    let work = WorkPool::new(config.network.work_threshold());
    let node_id = Keypair::random();
    let ledger = Arc::new(Ledger::new(store, genesis));

    let bind_addr: SocketAddr = match config.network {
      NetworkKind::Test => (Ipv6Addr::LOCALHOST, config.peering_port).into(),
      _ => (Ipv6Addr::UNSPECIFIED, config.peering_port).into(),
    };
    let socket = tokio::net::UdpSocket::bind(bind_addr).await?;
    let local = map_to_v6(socket.local_addr()?);
    let peers =
      Arc::new(Peers::new(local, config.network.allow_local_peers()));
    let (network, events) = Network::new(
      socket,
      config.network.magic(),
      node_id.clone(),
      work,
      Arc::clone(&peers),
      Arc::clone(&stats),
      config.online_weight_minimum,
    );
    let network = Arc::new(network);

    let online_reps = Arc::new(OnlineReps::new(
      Arc::clone(&ledger),
      config.online_weight_minimum,
      config.peer_cutoff(),
    ));
    let bootstrap = Arc::new(BootstrapTrigger::new(Arc::clone(&stats)));
    let gap_cache = Arc::new(GapCache::new(
      Arc::clone(&ledger),
      Arc::clone(&online_reps),
      Arc::clone(&alarm),
      Arc::clone(&bootstrap),
      config.bootstrap_fraction_numerator as u128,
      config.network.gap_check_delay(),
    ));
    let arrival = Arc::new(BlockArrival::new());
    let wallets = Arc::new(Wallets::new(
      Arc::clone(&ledger),
      work,
      config.receive_minimum,
    ));
    let rep_crawler = Arc::new(RepCrawler::new());

    let (confirmed_tx, confirmed_rx) = channel();
    let ctx = Arc::new(ElectionContext {
      ledger: Arc::clone(&ledger),
      online: Arc::clone(&online_reps),
      stats: Arc::clone(&stats),
      processor: OnceCell::new(),
      confirmed_tx: Mutex::new(confirmed_tx),
      quorum_percent: config.online_weight_quorum as u128,
      online_weight_minimum: config.online_weight_minimum,
      test_network: config.network == NetworkKind::Test,
    });
    let active = ActiveElections::new(
      Arc::clone(&ctx),
      Arc::clone(&network),
      Arc::clone(&peers),
      Arc::clone(&wallets),
      config.enable_voting,
      config.bootstrap_fraction_numerator as u128,
    );
    let block_processor = BlockProcessor::new(
      Arc::clone(&ledger),
      work,
      Arc::clone(&arrival),
      Arc::clone(&gap_cache),
      Arc::clone(&network),
      Arc::clone(&stats),
    );
    block_processor.connect(Arc::clone(&active));
    let _ = ctx.processor.set(Arc::clone(&block_processor));
    let vote_processor = VoteProcessor::new(
      Arc::clone(&ledger),
      Arc::clone(&active),
      Arc::clone(&gap_cache),
      Arc::clone(&observers),
      Arc::clone(&network),
      Arc::clone(&stats),
    );
    active.connect(Arc::clone(&vote_processor));
    wallets.connect(Arc::clone(&block_processor), Arc::clone(&arrival));

    let node = Arc::new(Self {
      config,
      node_id,
      ledger,
      stats,
      observers,
      alarm,
      work,
      peers,
      network,
      online_reps,
      bootstrap,
      gap_cache,
      arrival,
      wallets,
      active,
      block_processor,
      vote_processor,
      rep_crawler,
      stopped: AtomicBool::new(false),
      confirmed_rx: Mutex::new(Some(confirmed_rx)),
      events: Mutex::new(Some(events)),
      cement_thread: Mutex::new(None),
    });

    // representative discovery rides on every valid vote: a vote for
    // an active crawl hash identifies its sender as a probable rep
    {
      let online_reps = Arc::clone(&node.online_reps);
      let rep_crawler = Arc::clone(&node.rep_crawler);
      let peers = Arc::clone(&node.peers);
      let ledger = Arc::clone(&node.ledger);
      node.observers.add_vote(move |txn, vote, endpoint| {
        online_reps.vote(txn, vote);
        for hash in vote.hashes() {
          if rep_crawler.exists(&hash) {
            let weight = ledger.weight(txn, &vote.account);
            if peers.rep_response(endpoint, vote.account, weight) {
              debug!(
                "found representative {} at {endpoint} with weight {weight}",
                vote.account
              );
            }
          }
        }
      });
    }
    // a freshly proven peer is greeted and immediately rep-queried
    {
      let network = Arc::clone(&node.network);
      let ledger = Arc::clone(&node.ledger);
      let rep_crawler = Arc::clone(&node.rep_crawler);
      let peers = Arc::clone(&node.peers);
      let alarm = Arc::clone(&node.alarm);
      node.observers.add_endpoint(move |endpoint| {
        network.send_keepalive(*endpoint);
        rep_query(
          &ledger,
          &rep_crawler,
          &peers,
          &network,
          &alarm,
          std::slice::from_ref(endpoint),
        );
      });
    }

    Ok(node)
  }

  pub fn start(self: &Arc<Self>) {
    self.block_processor.start();
    self.vote_processor.start();
    self.active.start_announcing();

    // cementing walker: one worker advancing confirmation heights and
    // delivering confirmed blocks downstream
    let confirmed_rx = self
      .confirmed_rx
      .lock()
      .unwrap()
      .take()
      .expect("start called once");
    let worker = Arc::clone(self);
    let thread = std::thread::Builder::new()
      .name("confirmation height".into())
      .spawn(move || loop {
        if worker.is_stopped() {
          break;
        }
        match confirmed_rx.recv_timeout(Duration::from_millis(200)) {
          Ok(confirmed) => worker.process_confirmed(confirmed),
          Err(RecvTimeoutError::Timeout) => continue,
          Err(RecvTimeoutError::Disconnected) => break,
        }
      })
      .expect("spawning the confirmation height thread");
    *self.cement_thread.lock().unwrap() = Some(thread);

    // datagram dispatch
    let mut events = self
      .events
      .lock()
      .unwrap()
      .take()
      .expect("start called once");
    let dispatcher = Arc::clone(self);
    tokio::spawn(async move {
      while let Some(event) = events.recv().await {
        if dispatcher.is_stopped() {
          break;
        }
        let NetworkEvent::Message {
          header,
          message,
          sender,
        } = event;
        dispatcher.dispatch(&header, message, sender);
      }
    });

    self.ongoing_keepalive();
    self.ongoing_syn_cookie_cleanup();
    self.ongoing_rep_crawl();
    self.ongoing_stake_recalc();
    self.observers.notify_started();
    info!(
      "node started on {} with identity {}",
      self.network.local_endpoint(),
      self.node_id.public()
    );
  }

  pub fn stop(&self) {
    if self.stopped.swap(true, Ordering::SeqCst) {
      return;
    }
    info!("stopping node");
    self.active.stop();
    self.block_processor.stop();
    self.vote_processor.stop();
    self.alarm.stop();
    self.network.stop();
    if let Some(thread) = self.cement_thread.lock().unwrap().take() {
      let _ = thread.join();
    }
  }

  pub fn is_stopped(&self) -> bool {
    self.stopped.load(Ordering::SeqCst)
  }

  pub fn local_endpoint(&self) -> Endpoint {
    self.network.local_endpoint()
  }

  // -- block entry points ---------------------------------------------

  /// Entry point for blocks that arrived live (network or wallet).
  pub fn process_active(&self, block: Block) {
    if !self.arrival.add(block.hash()) {
      self.block_processor.add(block, Some(Instant::now()));
    }
  }

  /// Synchronous ledger insertion outside the processor queue.
  pub fn process(&self, block: &Block) -> ProcessResult {
    let txn = self.ledger.store.tx_begin_write();
    self.ledger.process(&txn, block)
  }

  /// Starts an election for a block and solicits votes for it.
  pub fn block_confirm(&self, block: Block) {
    {
      let txn = self.ledger.store.tx_begin_read();
      self.active.start(&txn, block.clone(), None);
    }
    self.network.broadcast_confirm_req(&block);
  }

  // -- introspection --------------------------------------------------

  pub fn balance(&self, account: &Account) -> u128 {
    let txn = self.ledger.store.tx_begin_read();
    self.ledger.account_balance(&txn, account)
  }

  pub fn weight(&self, account: &Account) -> u128 {
    let txn = self.ledger.store.tx_begin_read();
    self.ledger.weight(&txn, account)
  }

  pub fn latest(&self, account: &Account) -> Option<BlockHash> {
    let txn = self.ledger.store.tx_begin_read();
    self.ledger.latest(&txn, account)
  }

  pub fn block_count(&self) -> u64 {
    let txn = self.ledger.store.tx_begin_read();
    self.ledger.store.block_count(&txn)
  }

  pub fn confirmation_height(&self, account: &Account) -> u64 {
    let txn = self.ledger.store.tx_begin_read();
    self.ledger.store.confirmation_get(&txn, account).height
  }

  // -- datagram dispatch ----------------------------------------------

  fn dispatch(&self, header: &MessageHeader, message: Message, sender: Endpoint) {
    match message {
      Message::Keepalive(peer_list) => {
        self
          .stats
          .inc(StatType::Message, StatDetail::Keepalive, StatDir::In);
        if self.peers.contacted(&sender, header.version_using) {
          if let Some(cookie) = self.peers.assign_syn_cookie(&sender) {
            self
              .network
              .send_node_id_handshake(sender, Some(cookie), None);
          }
        }
        // reach out to gossiped peers we have not talked to yet
        for endpoint in peer_list {
          if !self.peers.reachout(&endpoint) {
            self.network.send_keepalive(endpoint);
          }
        }
      }
      Message::Publish(block) => {
        self
          .stats
          .inc(StatType::Message, StatDetail::Publish, StatDir::In);
        self.peers.contacted(&sender, header.version_using);
        self.process_active(block.clone());
        let txn = self.ledger.store.tx_begin_read();
        self.active.publish(&txn, &block);
      }
      Message::ConfirmReq(block) => {
        self
          .stats
          .inc(StatType::Message, StatDetail::ConfirmReq, StatDir::In);
        self.peers.contacted(&sender, header.version_using);
        self.process_active(block.clone());
        let txn = self.ledger.store.tx_begin_read();
        self.active.publish(&txn, &block);
        // answer with a signed vote on the ledger's version of this
        // root, if we are voting
        if self.config.enable_voting {
          if let Some(successor) = self.ledger.successor(&txn, &block.root())
          {
            self.wallets.foreach_representative(|keypair| {
              let sequence = self.wallets.next_sequence(&keypair.public());
              let vote = Vote::new(
                keypair,
                sequence,
                VotePayload::Block(successor.clone()),
              );
              self.network.send_confirm_ack(sender, &vote);
            });
          }
        }
      }
      Message::ConfirmAck(vote) => {
        self
          .stats
          .inc(StatType::Message, StatDetail::ConfirmAck, StatDir::In);
        self.peers.contacted(&sender, header.version_using);
        if let Some(block) = vote.block() {
          self.process_active(block.clone());
          let txn = self.ledger.store.tx_begin_read();
          self.active.publish(&txn, block);
        }
        self.vote_processor.vote(vote, sender);
      }
      Message::NodeIdHandshake { query, response } => {
        self.stats.inc(
          StatType::Message,
          StatDetail::NodeIdHandshake,
          StatDir::In,
        );
        self.handshake(header, query, response, sender);
      }
      Message::OutOfScope(message_type) => {
        debug!("ignoring out-of-scope message {message_type:?} from {sender}");
        self
          .stats
          .inc(StatType::Message, StatDetail::OutOfScope, StatDir::In);
      }
    }
  }

  fn handshake(
    &self,
    header: &MessageHeader,
    query: Option<[u8; 32]>,
    response: Option<(Account, ed25519_dalek::Signature)>,
    sender: Endpoint,
  ) {
    let mut validated = false;
    if let Some((account, signature)) = response {
      if self.peers.validate_syn_cookie(&sender, account, &signature) {
        validated = true;
        if account != self.node_id.public() {
          let inserted = self.peers.insert(&sender, header.version_using);
          self.peers.set_node_id(&sender, account);
          if inserted {
            self.observers.notify_endpoint(&sender);
          }
        }
      } else {
        // spoofed or replayed response: the cookie is spent, the
        // endpoint stays out of the peer table, nothing goes back
        debug!("failed to validate syn cookie signature from {sender}");
        return;
      }
    }
    let out_query = if !validated && !self.peers.known_peer(&sender) {
      self.peers.assign_syn_cookie(&sender)
    } else {
      None
    };
    if out_query.is_some() || query.is_some() {
      self.network.send_node_id_handshake(sender, out_query, query);
    }
  }

  // -- confirmation pipeline ------------------------------------------

  /// Ensures a confirmed winner is in the ledger, advances the
  /// confirmation height up to it, and delivers every newly cemented
  /// block to observers and the wallet receive path.
  fn process_confirmed(&self, confirmed: ConfirmedElection) {
    let winner = confirmed.winner;
    let hash = winner.hash();
    let mut exists = {
      let txn = self.ledger.store.tx_begin_read();
      self.ledger.store.block_exists(&txn, &hash)
    };
    if !exists {
      // force semantics: a losing fork occupying the root gives way
      let txn = self.ledger.store.tx_begin_write();
      if let Some(rival) = self.ledger.successor(&txn, &winner.root()) {
        if rival.hash() != hash {
          warn!("rolling back {} and replacing with {hash}", rival.hash());
          self.ledger.rollback(&txn, &rival.hash());
        }
      }
      self.block_processor.process_one(&txn, &winner, None);
      exists = self.ledger.store.block_exists(&txn, &hash);
    }
    if !exists {
      warn!("confirmed block {hash} could not be brought into the ledger");
      return;
    }
    self.cement(&hash);
    if let Some(action) = confirmed.action {
      action(winner);
    }
  }

  fn cement(&self, hash: &BlockHash) {
    struct Cemented {
      block: Block,
      account: Account,
      amount: u128,
      is_state_send: bool,
      pending_account: Option<Account>,
      receivable: bool,
    }

    let mut cemented: Vec<Cemented> = Vec::new();
    {
      let txn = self.ledger.store.tx_begin_write();
      let entry = match self.ledger.store.block_get(&txn, hash) {
        Some(entry) => entry,
        None => return,
      };
      let account = entry.account;
      let info = self.ledger.store.confirmation_get(&txn, &account);
      if entry.height <= info.height {
        return;
      }

      // walk back to the first uncemented block, then deliver upward
      let mut chain = Vec::new();
      let mut cursor = *hash;
      loop {
        let entry = self
          .ledger
          .store
          .block_get(&txn, &cursor)
          .expect("chain below a stored frontier is stored");
        let height = entry.height;
        let previous = entry.block.previous();
        chain.push(entry);
        if height == info.height + 1 {
          break;
        }
        cursor = previous;
      }
      chain.reverse();

      self.ledger.store.confirmation_put(
        &txn,
        &account,
        &crate::ledger::ConfirmationInfo {
          height: entry.height,
          frontier: *hash,
        },
      );

      for entry in chain {
        let block_hash = entry.block.hash();
        let amount = self.ledger.amount(&txn, &block_hash).unwrap_or(0);
        let is_state_send = match &entry.block {
          Block::State(state) => self.ledger.is_send(&txn, state),
          _ => false,
        };
        let pending_account = match &entry.block {
          Block::Send(send) => Some(send.destination),
          Block::State(state) if is_state_send => {
            Some(state.link.as_account())
          }
          _ => None,
        };
        let receivable = pending_account.is_some()
          && self.ledger.store.pending_exists(&txn, &block_hash);
        cemented.push(Cemented {
          block: entry.block,
          account: entry.account,
          amount,
          is_state_send,
          pending_account,
          receivable,
        });
      }
    }

    // the cementing transaction has committed; now let downstream
    // consumers see the blocks
    for item in cemented {
      debug!("cemented block {}", item.block.hash());
      if item.receivable {
        if let Some(destination) = item.pending_account {
          // credit into a locally-held account; the wallet picks its
          // own representative for fresh chains
          self
            .wallets
            .receive_async(&item.block, &destination, item.amount, |_| {});
        }
      }
      self.observers.notify_blocks(
        &item.block,
        &item.account,
        item.amount,
        item.is_state_send,
      );
      if item.amount > 0 {
        self.observers.notify_account_balance(&item.account, false);
        if let Some(pending) = item.pending_account {
          if !pending.is_zero() {
            self.observers.notify_account_balance(&pending, true);
          }
        }
      }
    }
  }

  // -- ongoing maintenance --------------------------------------------

  /// Sends a confirm_req for a random stored block so any voting
  /// response exposes the responder's representative weight.
  fn rep_query(&self, targets: &[Endpoint]) {
    rep_query(
      &self.ledger,
      &self.rep_crawler,
      &self.peers,
      &self.network,
      &self.alarm,
      targets,
    );
  }

  /// Resolves and greets a configured peer by hostname.
  pub fn keepalive(&self, address: &str, port: u16) {
    match (address, port).to_socket_addrs() {
      Ok(addresses) => {
        for address in addresses {
          self.network.send_keepalive(map_to_v6(address));
        }
      }
      Err(e) => warn!("error resolving address {address}:{port}: {e}"),
    }
  }

  fn ongoing_keepalive(self: &Arc<Self>) {
    if self.is_stopped() {
      return;
    }
    for peer in &self.config.preconfigured_peers {
      self.keepalive(peer, self.config.peering_port);
    }
    let period = self.config.keepalive_period();
    let survivors = self.peers.purge_list(self.config.peer_cutoff());
    if survivors.is_empty() {
      self.observers.notify_disconnect();
    }
    for info in survivors {
      if info.last_attempt.elapsed() > period {
        self.network.send_keepalive(info.endpoint);
      }
    }
    let node = Arc::clone(self);
    self.alarm.add(Instant::now() + period, move || {
      node.ongoing_keepalive();
    });
  }

  fn ongoing_syn_cookie_cleanup(self: &Arc<Self>) {
    if self.is_stopped() {
      return;
    }
    let cutoff = self.config.syn_cookie_cutoff();
    self.peers.purge_syn_cookies(cutoff);
    let node = Arc::clone(self);
    self.alarm.add(Instant::now() + cutoff * 2, move || {
      node.ongoing_syn_cookie_cleanup();
    });
  }

  fn ongoing_rep_crawl(self: &Arc<Self>) {
    if self.is_stopped() {
      return;
    }
    let sufficient =
      self.peers.total_weight() > self.config.online_weight_minimum;
    let targets = self.peers.rep_crawl(sufficient);
    self.rep_query(&targets);
    let node = Arc::clone(self);
    self.alarm.add(Instant::now() + REP_CRAWL_INTERVAL, move || {
      node.ongoing_rep_crawl();
    });
  }

  fn ongoing_stake_recalc(self: &Arc<Self>) {
    if self.is_stopped() {
      return;
    }
    self.online_reps.recalculate_stake();
    let node = Arc::clone(self);
    self.alarm.add(Instant::now() + STAKE_RECALC_INTERVAL, move || {
      node.ongoing_stake_recalc();
    });
  }
}

/// Probes endpoints with a confirm_req for a random stored block; a
/// vote back while the bait hash is active marks the sender as a
/// probable representative.
fn rep_query(
  ledger: &Arc<Ledger>,
  rep_crawler: &Arc<RepCrawler>,
  peers: &Arc<Peers>,
  network: &Arc<Network>,
  alarm: &Arc<Alarm>,
  targets: &[Endpoint],
) {
  if targets.is_empty() {
    return;
  }
  let entry = {
    let txn = ledger.store.tx_begin_read();
    ledger.store.block_random(&txn)
  };
  let entry = match entry {
    Some(entry) => entry,
    None => return,
  };
  let hash = entry.block.hash();
  rep_crawler.add(hash);
  for endpoint in targets {
    peers.rep_request(endpoint);
    network.send_confirm_req(*endpoint, &entry.block);
  }
  let rep_crawler = Arc::clone(rep_crawler);
  alarm.add(Instant::now() + REP_CRAWL_TTL, move || {
    rep_crawler.remove(&hash);
  });
}

/// Development genesis used off the live network: a well-known key
/// holding the whole supply.
pub fn dev_genesis() -> Genesis {
  let keypair: Keypair = "9Rt2PJombdzAEjdgiybg4woayTwKVD89uYYc1vFy7Hoa"
    .parse()
    .expect("well-formed development key");
  Genesis::new(&keypair, u128::MAX)
}
