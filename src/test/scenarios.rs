use {
  super::{wait_until, System},
  crate::{
    config::NodeConfig,
    consensus::{Vote, VotePayload, VoteCode, FINAL_SEQUENCE},
    ledger::{ProcessResult, SendBlock},
    network::{map_to_v6, Message},
    primitives::Keypair,
  },
  std::{
    net::SocketAddr,
    sync::{
      atomic::{AtomicUsize, Ordering},
      Arc,
    },
    time::Duration,
  },
};

const DEADLINE: Duration = Duration::from_secs(15);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn send_receive_converges_across_nodes() {
  let system = System::new(2, 1000).await;
  let genesis_account = system.genesis.public();
  let key_a = Keypair::random();

  // node 0 votes with the genesis weight and holds the receiving key
  system.nodes[0].wallets.insert(system.genesis.clone());
  system.nodes[0].wallets.insert(key_a.clone());

  let send = SendBlock::new(
    system.nodes[0].ledger.genesis.hash(),
    key_a.public(),
    900,
    &system.genesis,
    0,
  );
  let send_hash = send.hash();
  system.nodes[0].process_active(send);

  // the send settles on the remote node with its receivable intact
  // until the open consumes it
  let seen = wait_until(DEADLINE, || {
    let node = &system.nodes[1];
    let txn = node.ledger.store.tx_begin_read();
    node.ledger.store.block_exists(&txn, &send_hash)
  })
  .await;
  assert!(seen, "send never replicated");

  let converged = wait_until(DEADLINE, || {
    system.nodes.iter().all(|node| {
      node.block_count() == 3
        && node.weight(&key_a.public()) == 100
        && node.balance(&key_a.public()) == 100
    })
  })
  .await;
  assert!(converged, "nodes did not converge on the open");

  for node in &system.nodes {
    let txn = node.ledger.store.tx_begin_read();
    assert!(!node.ledger.store.pending_exists(&txn, &send_hash));
    assert_eq!(node.ledger.account_balance(&txn, &genesis_account), 900);
  }
  system.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fork_resolves_toward_the_heavier_representative() {
  let mut config = NodeConfig::test_default();
  // keep the quorum margin pinned to the full split so neither side
  // can confirm before seeing the other's vote or switching winners
  config.online_weight_minimum = 100;
  let system = System::with_config(2, 1100, config).await;
  let genesis_account = system.genesis.public();

  let rep1 = Keypair::random();
  let rep2 = Keypair::random();
  system.nodes[0].wallets.insert(rep1.clone());
  system.nodes[1].wallets.insert(rep2.clone());

  // representative weight split 60/40 in favor of rep1
  let genesis_hash = system.nodes[0].ledger.genesis.hash();
  let fund1 = SendBlock::new(genesis_hash, rep1.public(), 1040, &system.genesis, 0);
  let open1 = crate::ledger::OpenBlock::new(fund1.hash(), rep1.public(), &rep1, 0);
  let fund2 = SendBlock::new(fund1.hash(), rep2.public(), 1000, &system.genesis, 0);
  let open2 = crate::ledger::OpenBlock::new(fund2.hash(), rep2.public(), &rep2, 0);
  for node in &system.nodes {
    for block in [&fund1, &open1, &fund2, &open2] {
      assert_eq!(node.process(block), ProcessResult::Progress);
    }
    assert_eq!(node.weight(&rep1.public()), 60);
    assert_eq!(node.weight(&rep2.public()), 40);
  }

  // two sends competing for the same root
  let loser_destination = Keypair::random();
  let winner = SendBlock::new(
    fund2.hash(),
    Keypair::random().public(),
    999,
    &system.genesis,
    0,
  );
  let loser = SendBlock::new(
    fund2.hash(),
    loser_destination.public(),
    998,
    &system.genesis,
    0,
  );
  let winner_hash = winner.hash();
  let loser_hash = loser.hash();

  let cement_counts: Vec<Arc<AtomicUsize>> = system
    .nodes
    .iter()
    .map(|node| {
      let count = Arc::new(AtomicUsize::new(0));
      let observed = Arc::clone(&count);
      node.observers.add_blocks(move |block, _, _, _| {
        if block.hash() == winner_hash {
          observed.fetch_add(1, Ordering::SeqCst);
        }
      });
      count
    })
    .collect();

  system.nodes[0].process_active(winner);
  system.nodes[1].process_active(loser);

  let resolved = wait_until(DEADLINE, || {
    system.nodes.iter().all(|node| {
      node.latest(&genesis_account) == Some(winner_hash)
    })
  })
  .await;
  assert!(resolved, "fork did not resolve to the heavier side");

  // the losing fork is rolled back everywhere
  for node in &system.nodes {
    let txn = node.ledger.store.tx_begin_read();
    assert!(!node.ledger.store.block_exists(&txn, &loser_hash));
  }

  // winner is cemented with exactly one confirmation callback per node
  let cemented = wait_until(DEADLINE, || {
    cement_counts
      .iter()
      .all(|count| count.load(Ordering::SeqCst) == 1)
  })
  .await;
  assert!(cemented, "winner was not cemented exactly once per node");

  // give stray duplicate confirmations a chance to surface
  tokio::time::sleep(Duration::from_millis(300)).await;
  for count in &cement_counts {
    assert_eq!(count.load(Ordering::SeqCst), 1);
  }
  system.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gap_votes_trigger_bootstrap_once() {
  let system = System::new(1, 1000).await;
  let node = &system.nodes[0];
  let genesis_hash = node.ledger.genesis.hash();

  // a chain the node never receives in full
  let n1 = SendBlock::new(
    genesis_hash,
    Keypair::random().public(),
    999,
    &system.genesis,
    0,
  );
  let n2 =
    SendBlock::new(n1.hash(), Keypair::random().public(), 998, &system.genesis, 0);
  let n3 =
    SendBlock::new(n2.hash(), Keypair::random().public(), 997, &system.genesis, 0);

  // only the tip arrives; its dependencies are missing
  node.process_active(n3.clone());
  node.block_processor.flush();
  {
    let txn = node.ledger.store.tx_begin_read();
    assert!(!node.ledger.store.block_exists(&txn, &n3.hash()));
    assert_eq!(node.ledger.store.unchecked_count(&txn), 1);
  }
  assert_eq!(node.gap_cache.size(), 1);

  // quorum-weight votes for the tip schedule the bootstrap check
  let vote = Vote::new(
    &system.genesis,
    1,
    VotePayload::Hashes(vec![n3.hash()]),
  );
  let origin = node.local_endpoint();
  node.vote_processor.vote(vote.clone(), origin);
  node.vote_processor.flush();

  // with no election for the tip, the vote lands in the inactive
  // cache so it is not lost when the block eventually arrives
  assert_eq!(node.active.inactive_size(), 1);

  let triggered =
    wait_until(Duration::from_secs(5), || node.bootstrap.attempts() == 1)
      .await;
  assert!(triggered, "bootstrap did not trigger");
  assert!(node.bootstrap.in_progress());

  // replays and re-checks never stack a second attempt
  node.vote_processor.vote(vote, origin);
  node.vote_processor.flush();
  tokio::time::sleep(Duration::from_millis(200)).await;
  assert_eq!(node.bootstrap.attempts(), 1);
  system.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn vote_replay_and_final_semantics() {
  let system = System::new(1, 1000).await;
  let node = &system.nodes[0];
  let genesis_account = system.genesis.public();

  let block = SendBlock::new(
    node.ledger.genesis.hash(),
    Keypair::random().public(),
    900,
    &system.genesis,
    0,
  );
  node.process_active(block.clone());
  node.block_processor.flush();
  assert!(node.active.active(&block.root()));

  let origin = node.local_endpoint();
  let vote =
    Vote::new(&system.genesis, 5, VotePayload::Hashes(vec![block.hash()]));
  {
    let txn = node.ledger.store.tx_begin_read();
    assert_eq!(
      node.vote_processor.vote_blocking(&txn, &vote, &origin),
      VoteCode::Vote
    );
    assert_eq!(
      node.vote_processor.vote_blocking(&txn, &vote, &origin),
      VoteCode::Replay
    );

    let final_vote = Vote::new(
      &system.genesis,
      FINAL_SEQUENCE,
      VotePayload::Hashes(vec![block.hash()]),
    );
    assert_eq!(
      node.vote_processor.vote_blocking(&txn, &final_vote, &origin),
      VoteCode::Vote
    );
  }

  let cemented = wait_until(DEADLINE, || {
    node.confirmation_height(&genesis_account) == 2
  })
  .await;
  assert!(cemented, "confirmed block was not cemented");
  system.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn election_overflow_holds_ten_variants() {
  let system = System::new(1, 1000).await;
  let node = &system.nodes[0];
  let genesis_hash = node.ledger.genesis.hash();

  let forks: Vec<_> = (0..11)
    .map(|i| {
      SendBlock::new(
        genesis_hash,
        Keypair::random().public(),
        900 - i as u128,
        &system.genesis,
        0,
      )
    })
    .collect();

  node.process_active(forks[0].clone());
  node.block_processor.flush();
  let election = node
    .active
    .election(&forks[0].root())
    .expect("election started");

  {
    let txn = node.ledger.store.tx_begin_read();
    // starting the same root again reports the existing election
    assert!(node.active.start(&txn, forks[0].clone(), None));
    for fork in &forks[1..] {
      node.active.publish(&txn, fork);
    }
  }
  assert_eq!(election.block_count(), 10);
  assert!(!election.blocks().contains(&forks[10].hash()));
  system.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handshake_rejects_forged_cookie_signature() {
  let system = System::new(1, 1000).await;
  let node = &system.nodes[0];
  let magic = node.config.network.magic();

  let attacker = tokio::net::UdpSocket::bind("[::1]:0").await.unwrap();
  let attacker_endpoint = map_to_v6(attacker.local_addr().unwrap());
  let target = SocketAddr::V6(node.local_endpoint());

  // introduce ourselves; the node answers with a syn-cookie query
  let keepalive =
    Message::Keepalive([crate::network::message::null_endpoint(); 8])
      .serialize(magic);
  attacker.send_to(&keepalive, target).await.unwrap();

  let mut buf = vec![0u8; 1024];
  let cookie = loop {
    let (size, _) =
      tokio::time::timeout(Duration::from_secs(5), attacker.recv_from(&mut buf))
        .await
        .expect("expected a handshake query")
        .unwrap();
    let (_, message) = Message::deserialize(
      &buf[..size],
      magic,
      &crate::work::WorkPool::new(0),
    )
    .unwrap();
    if let Message::NodeIdHandshake {
      query: Some(cookie),
      ..
    } = message
    {
      break cookie;
    }
  };

  // respond with an account that did not sign the cookie
  let claimed = Keypair::random();
  let actual_signer = Keypair::random();
  let forged = Message::NodeIdHandshake {
    query: None,
    response: Some((claimed.public(), actual_signer.sign(&cookie))),
  }
  .serialize(magic);
  attacker.send_to(&forged, target).await.unwrap();

  // no reciprocal handshake comes back and the endpoint stays out of
  // the peer table
  let reply = tokio::time::timeout(
    Duration::from_millis(500),
    attacker.recv_from(&mut buf),
  )
  .await;
  assert!(reply.is_err(), "node replied to a forged handshake");
  assert!(!node.peers.known_peer(&attacker_endpoint));
  assert_eq!(node.peers.size(), 0);
  system.stop();
}
