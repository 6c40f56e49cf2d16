use {
  super::{
    election::{ConfirmAction, Election, ElectionContext},
    votes::VoteProcessor,
    Vote,
    VotePayload,
  },
  crate::{
    ledger::{Block, Transaction},
    network::{Network, Peers},
    primitives::{Account, BlockHash, Root},
    stats::{StatDetail, StatDir, StatType, Stats},
    wallet::Wallets,
  },
  once_cell::sync::OnceCell,
  std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Condvar, Mutex},
    thread::JoinHandle,
    time::{Duration, Instant},
  },
  tracing::{debug, info},
};

/// Cadence of the announce loop.
pub const ANNOUNCE_INTERVAL: Duration = Duration::from_millis(16);
/// Decided elections linger this many announcements before teardown,
/// so late duplicate traffic still finds them.
const ANNOUNCEMENT_MIN: u32 = 2;
/// Announcement count marking an election as lingering; broadcast
/// cadence drops to once per this many ticks beyond it.
const ANNOUNCEMENT_LONG: u32 = 20;
/// Hard announcement budget; elections that cannot confirm within it
/// expire and are dropped.
const ANNOUNCEMENT_MAX: u32 = 5000;
/// Recently-confirmed window consulted for replay classification.
const ELECTION_HISTORY: usize = 2048;
/// Bound on votes cached for blocks with no election yet.
const INACTIVE_CACHE_MAX: usize = 2048;

struct ConflictInfo {
  election: Arc<Election>,
  announcements: u32,
  /// Our side of the conflict, sent in direct confirm_req traffic.
  confirm_req_block: Block,
}

/// Votes that arrived before any election existed for their hash.
pub struct InactiveEntry {
  arrival: Instant,
  pub voters: Vec<Account>,
  pub bootstrap_started: bool,
  pub confirmed: bool,
}

struct ActiveState {
  roots: HashMap<Root, ConflictInfo>,
  successors: HashMap<BlockHash, Root>,
  recently_confirmed: VecDeque<(Root, BlockHash)>,
  inactive: HashMap<BlockHash, InactiveEntry>,
  stopped: bool,
}

/// Per-root election table plus the announce loop that rebroadcasts
/// winners, solicits representatives, and tears down decided
/// elections.
pub struct ActiveElections {
  pub ctx: Arc<ElectionContext>,
  network: Arc<Network>,
  peers: Arc<Peers>,
  wallets: Arc<Wallets>,
  vote_processor: OnceCell<Arc<VoteProcessor>>,
  enable_voting: bool,
  bootstrap_fraction_numerator: u128,
  state: Mutex<ActiveState>,
  condition: Condvar,
  thread: Mutex<Option<JoinHandle<()>>>,
}

impl ActiveElections {
  pub fn new(
    ctx: Arc<ElectionContext>,
    network: Arc<Network>,
    peers: Arc<Peers>,
    wallets: Arc<Wallets>,
    enable_voting: bool,
    bootstrap_fraction_numerator: u128,
  ) -> Arc<Self> {
    Arc::new(Self {
      ctx,
      network,
      peers,
      wallets,
      vote_processor: OnceCell::new(),
      enable_voting,
      bootstrap_fraction_numerator,
      state: Mutex::new(ActiveState {
        roots: HashMap::new(),
        successors: HashMap::new(),
        recently_confirmed: VecDeque::new(),
        inactive: HashMap::new(),
        stopped: false,
      }),
      condition: Condvar::new(),
      thread: Mutex::new(None),
    })
  }

  pub fn connect(&self, vote_processor: Arc<VoteProcessor>) {
    let _ = self.vote_processor.set(vote_processor);
  }

  pub fn start_announcing(self: &Arc<Self>) {
    let worker = Arc::clone(self);
    let thread = std::thread::Builder::new()
      .name("announce loop".into())
      .spawn(move || worker.announce_loop())
      .expect("spawning the announce loop");
    *self.thread.lock().unwrap() = Some(thread);
  }

  pub fn stop(&self) {
    {
      let mut state = self.state.lock().unwrap();
      state.stopped = true;
      state.roots.clear();
      state.successors.clear();
      self.condition.notify_all();
    }
    if let Some(thread) = self.thread.lock().unwrap().take() {
      let _ = thread.join();
    }
  }

  pub fn size(&self) -> usize {
    self.state.lock().unwrap().roots.len()
  }

  pub fn active(&self, root: &Root) -> bool {
    self.state.lock().unwrap().roots.contains_key(root)
  }

  pub fn election(&self, root: &Root) -> Option<Arc<Election>> {
    self
      .state
      .lock()
      .unwrap()
      .roots
      .get(root)
      .map(|info| Arc::clone(&info.election))
  }

  /// Current winners of the first `count` live elections.
  pub fn list_blocks(&self, count: usize) -> Vec<Block> {
    self
      .state
      .lock()
      .unwrap()
      .roots
      .values()
      .take(count)
      .map(|info| info.election.winner())
      .collect()
  }

  pub fn recently_confirmed_contains(&self, hash: &BlockHash) -> bool {
    self
      .state
      .lock()
      .unwrap()
      .recently_confirmed
      .iter()
      .any(|(_, winner)| winner == hash)
  }

  pub fn inactive_size(&self) -> usize {
    self.state.lock().unwrap().inactive.len()
  }

  pub fn inactive_entry<T>(
    &self,
    hash: &BlockHash,
    f: impl FnOnce(&InactiveEntry) -> T,
  ) -> Option<T> {
    self.state.lock().unwrap().inactive.get(hash).map(f)
  }

  /// Starts (idempotently) an election for the block's root. Returns
  /// true when one already existed or the engine is stopped.
  pub fn start(
    &self,
    txn: &dyn Transaction,
    block: Block,
    action: Option<ConfirmAction>,
  ) -> bool {
    self.start_internal(txn, block, None, action)
  }

  /// Opens a fork-resolution election seeded with the ledger's block
  /// and the incoming rival.
  pub fn start_fork(
    &self,
    txn: &dyn Transaction,
    ledger_block: Block,
    incoming: Block,
  ) -> bool {
    self.start_internal(txn, ledger_block, Some(incoming), None)
  }

  fn start_internal(
    &self,
    txn: &dyn Transaction,
    primary: Block,
    secondary: Option<Block>,
    action: Option<ConfirmAction>,
  ) -> bool {
    let mut state = self.state.lock().unwrap();
    if state.stopped {
      return true;
    }
    let root = primary.root();
    if state.roots.contains_key(&root) {
      return true;
    }
    let hash = primary.hash();
    let election = Arc::new(Election::new(primary.clone(), action));
    state.roots.insert(root, ConflictInfo {
      election: Arc::clone(&election),
      announcements: 0,
      confirm_req_block: primary,
    });
    state.successors.insert(hash, root);
    self.ctx.stats.inc(
      StatType::Election,
      StatDetail::ElectionStart,
      StatDir::In,
    );

    if let Some(secondary) = secondary {
      let secondary_hash = secondary.hash();
      if !election.publish(&self.ctx, txn, &secondary) {
        state.successors.insert(secondary_hash, root);
      }
    }

    // votes that arrived before the block are not lost
    if let Some(entry) = state.inactive.remove(&hash) {
      debug!(
        "importing {} cached votes into election for {hash}",
        entry.voters.len()
      );
      election.seed_cached_votes(
        &self.ctx,
        txn,
        hash,
        &entry.voters,
        entry.confirmed,
      );
    }
    false
  }

  /// Offers a fork variant to the election at its root.
  pub fn publish(&self, txn: &dyn Transaction, block: &Block) -> bool {
    let mut state = self.state.lock().unwrap();
    let root = block.root();
    match state.roots.get(&root) {
      Some(info) => {
        let election = Arc::clone(&info.election);
        let rejected = election.publish(&self.ctx, txn, block);
        if !rejected {
          state.successors.insert(block.hash(), root);
        }
        rejected
      }
      None => true,
    }
  }

  /// Applies a vote to every election it references. Returns
  /// `(replay, processed)` merged over the payload.
  pub fn vote(&self, txn: &dyn Transaction, vote: &Vote) -> (bool, bool) {
    let mut replay = false;
    let mut processed = false;
    let mut state = self.state.lock().unwrap();
    match &vote.payload {
      VotePayload::Hashes(hashes) => {
        for hash in hashes {
          match state
            .successors
            .get(hash)
            .and_then(|root| state.roots.get(root))
          {
            Some(info) => {
              let result = info.election.vote(
                &self.ctx,
                txn,
                vote.account,
                vote.sequence,
                *hash,
              );
              replay |= result.replay;
              processed |= result.processed;
            }
            None => {
              if state
                .recently_confirmed
                .iter()
                .any(|(_, winner)| winner == hash)
              {
                replay = true;
              } else {
                self.add_inactive(txn, &mut state, *hash, vote.account);
              }
            }
          }
        }
      }
      VotePayload::Block(block) => {
        let hash = block.hash();
        match state.roots.get(&block.root()) {
          Some(info) => {
            let result = info.election.vote(
              &self.ctx,
              txn,
              vote.account,
              vote.sequence,
              hash,
            );
            replay |= result.replay;
            processed |= result.processed;
          }
          None => {
            let root = block.root();
            if state
              .recently_confirmed
              .iter()
              .any(|(r, winner)| *winner == hash || *r == root)
            {
              replay = true;
            } else {
              self.add_inactive(txn, &mut state, hash, vote.account);
            }
          }
        }
      }
    }
    (replay, processed)
  }

  /// Removes the election owning a block.
  pub fn erase(&self, block: &Block) {
    let mut state = self.state.lock().unwrap();
    let root = block.root();
    if let Some(info) = state.roots.remove(&root) {
      for hash in info.election.blocks() {
        state.successors.remove(&hash);
      }
      info!(
        "election erased for block {} root {root}",
        block.hash()
      );
    }
  }

  /// Caches a vote for a hash with no live election. Weight crossing
  /// the quorum delta marks the entry confirmed; crossing the
  /// bootstrap fraction marks the catch-up hint.
  fn add_inactive(
    &self,
    txn: &dyn Transaction,
    state: &mut ActiveState,
    hash: BlockHash,
    voter: Account,
  ) {
    let ledger = Arc::clone(&self.ctx.ledger);
    let delta = self.ctx.delta();
    let bootstrap_threshold = (self.ctx.online.online_stake() / 256)
      * self.bootstrap_fraction_numerator;

    let entry = state.inactive.entry(hash).or_insert(InactiveEntry {
      arrival: Instant::now(),
      voters: Vec::new(),
      bootstrap_started: false,
      confirmed: false,
    });
    if !entry.voters.contains(&voter) {
      entry.voters.push(voter);
      let tally = entry
        .voters
        .iter()
        .map(|account| ledger.weight(txn, account))
        .fold(0u128, |total, weight| total.saturating_add(weight));
      if tally > delta {
        entry.confirmed = true;
      }
      if tally > bootstrap_threshold {
        entry.bootstrap_started = true;
      }
    }

    if state.inactive.len() > INACTIVE_CACHE_MAX {
      if let Some(oldest) = state
        .inactive
        .iter()
        .min_by_key(|(_, entry)| entry.arrival)
        .map(|(hash, _)| *hash)
      {
        state.inactive.remove(&oldest);
      }
    }
  }

  fn announce_loop(self: Arc<Self>) {
    let mut state = self.state.lock().unwrap();
    loop {
      if state.stopped {
        break;
      }
      drop(state);
      self.announce_votes();
      state = self.state.lock().unwrap();
      if state.stopped {
        break;
      }
      state = self
        .condition
        .wait_timeout(state, ANNOUNCE_INTERVAL)
        .unwrap()
        .0;
    }
  }

  /// One announce tick over every live election: rebroadcast or vote
  /// on winners, solicit non-voting representatives, abort winners
  /// that no longer fit, tear down decided elections.
  fn announce_votes(&self) {
    let txn = self.ctx.ledger.store.tx_begin_read();
    let mut inactive: Vec<Root> = Vec::new();
    let mut unconfirmed = 0u32;

    let mut state = self.state.lock().unwrap();
    let roots: Vec<Root> = state.roots.keys().copied().collect();
    for root in roots {
      let (election, announcements, confirm_req_block) =
        match state.roots.get(&root) {
          Some(info) => (
            Arc::clone(&info.election),
            info.announcements,
            info.confirm_req_block.clone(),
          ),
          None => continue,
        };

      if (election.confirmed() || election.aborted())
        && announcements >= ANNOUNCEMENT_MIN - 1
      {
        if election.confirmed() {
          state
            .recently_confirmed
            .push_back((root, election.winner_hash()));
          while state.recently_confirmed.len() > ELECTION_HISTORY {
            state.recently_confirmed.pop_front();
          }
        }
        inactive.push(root);
      } else {
        if announcements > ANNOUNCEMENT_LONG {
          unconfirmed += 1;
        }
        if announcements >= ANNOUNCEMENT_MAX {
          election.abort();
          self.ctx.stats.inc(
            StatType::Election,
            StatDetail::ElectionExpired,
            StatDir::In,
          );
        }
        if announcements < ANNOUNCEMENT_LONG
          || announcements % ANNOUNCEMENT_LONG == 1
        {
          let winner = election.winner();
          if self.ctx.ledger.could_fit(&txn, &winner) {
            if self.enable_voting {
              self.generate_rep_votes(&winner);
            }
            self.network.republish_block(&winner);
          } else if announcements > 3 {
            election.abort();
            self.ctx.stats.inc(
              StatType::Election,
              StatDetail::ElectionAbort,
              StatDir::In,
            );
          }
        }
        if announcements % 4 == 1 {
          self.solicit_representatives(&election, &confirm_req_block);
        }
        if let Some(info) = state.roots.get_mut(&root) {
          info.announcements += 1;
        }
      }
    }

    for root in inactive {
      if let Some(info) = state.roots.remove(&root) {
        for hash in info.election.blocks() {
          state.successors.remove(&hash);
        }
      }
    }
    if unconfirmed > 0 {
      debug!("{unconfirmed} elections unconfirmed past the long threshold");
    }
  }

  /// Signs a vote for the winner with every representative key held
  /// locally and feeds it through the vote processor, which applies
  /// it and republishes.
  fn generate_rep_votes(&self, winner: &Block) {
    let vote_processor = match self.vote_processor.get() {
      Some(vote_processor) => vote_processor,
      None => return,
    };
    let local = self.network.local_endpoint();
    self.wallets.foreach_representative(|keypair| {
      let sequence = self.wallets.next_sequence(&keypair.public());
      let vote =
        Vote::new(keypair, sequence, VotePayload::Block(winner.clone()));
      vote_processor.vote(vote, local);
    });
  }

  /// Sends confirm_req for our conflict block to representatives that
  /// have not voted yet; broadcast to everyone while the observed rep
  /// weight is insufficient to ever reach quorum.
  fn solicit_representatives(
    &self,
    election: &Election,
    confirm_req_block: &Block,
  ) {
    const MAX_REPS: usize = 10;
    let reps: Vec<_> = self
      .peers
      .representatives(usize::MAX)
      .into_iter()
      .filter(|info| !election.has_voted(&info.probable_rep_account))
      .collect();
    let total_weight = self.peers.total_weight();
    if !reps.is_empty() && total_weight > self.ctx.online_weight_minimum {
      for info in reps.iter().take(MAX_REPS) {
        self
          .network
          .send_confirm_req(info.endpoint, confirm_req_block);
      }
    } else {
      for info in self.peers.list_vector() {
        self
          .network
          .send_confirm_req(info.endpoint, confirm_req_block);
      }
    }
  }
}
