use {
  super::{active::ActiveElections, arrival::BlockArrival, gap::GapCache},
  crate::{
    ledger::{Block, Ledger, ProcessResult, WriteTransaction},
    network::Network,
    primitives::BlockHash,
    stats::{StatDetail, StatDir, StatType, Stats},
    work::WorkPool,
  },
  once_cell::sync::OnceCell,
  std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Condvar, Mutex},
    thread::JoinHandle,
    time::{Duration, Instant},
  },
  tracing::{debug, info, warn},
};

/// Admission bound; callers treat a full queue as backpressure.
const QUEUE_LIMIT: usize = 16384;
/// Forks younger than this are ignored to avoid flapping on
/// concurrent announcements; the window is measured against the
/// block's arrival time.
const FORK_DELAY: Duration = Duration::from_secs(15);

struct State {
  /// Arrival instant rides along; `None` marks requeued dependents
  /// whose origination is long past.
  blocks: VecDeque<(Block, Option<Instant>)>,
  forced: VecDeque<Block>,
  hashes: HashSet<BlockHash>,
  active: bool,
  stopped: bool,
}

/// Single-writer queue validating and inserting blocks into the
/// ledger. One worker thread owns the writable ledger scope; every
/// other component only enqueues.
pub struct BlockProcessor {
  ledger: Arc<Ledger>,
  work: WorkPool,
  arrival: Arc<BlockArrival>,
  gap: Arc<GapCache>,
  network: Arc<Network>,
  stats: Arc<Stats>,
  active_elections: OnceCell<Arc<ActiveElections>>,
  state: Mutex<State>,
  condition: Condvar,
  thread: Mutex<Option<JoinHandle<()>>>,
  next_log: Mutex<Instant>,
}

impl BlockProcessor {
  pub fn new(
    ledger: Arc<Ledger>,
    work: WorkPool,
    arrival: Arc<BlockArrival>,
    gap: Arc<GapCache>,
    network: Arc<Network>,
    stats: Arc<Stats>,
  ) -> Arc<Self> {
    Arc::new(Self {
      ledger,
      work,
      arrival,
      gap,
      network,
      stats,
      active_elections: OnceCell::new(),
      state: Mutex::new(State {
        blocks: VecDeque::new(),
        forced: VecDeque::new(),
        hashes: HashSet::new(),
        active: false,
        stopped: false,
      }),
      condition: Condvar::new(),
      thread: Mutex::new(None),
      next_log: Mutex::new(Instant::now()),
    })
  }

  /// Back-edge to the elections engine, filled during node wiring.
  pub fn connect(&self, active: Arc<ActiveElections>) {
    let _ = self.active_elections.set(active);
  }

  pub fn start(self: &Arc<Self>) {
    let worker = Arc::clone(self);
    let thread = std::thread::Builder::new()
      .name("block processor".into())
      .spawn(move || worker.process_blocks())
      .expect("spawning the block processor thread");
    *self.thread.lock().unwrap() = Some(thread);
  }

  pub fn stop(&self) {
    {
      let mut state = self.state.lock().unwrap();
      state.stopped = true;
      self.condition.notify_all();
    }
    if let Some(thread) = self.thread.lock().unwrap().take() {
      let _ = thread.join();
    }
  }

  /// Blocks the caller until the queue is drained and the worker is
  /// idle.
  pub fn flush(&self) {
    let mut state = self.state.lock().unwrap();
    while !state.stopped
      && (!state.blocks.is_empty() || !state.forced.is_empty() || state.active)
    {
      state = self.condition.wait(state).unwrap();
    }
  }

  pub fn full(&self) -> bool {
    self.state.lock().unwrap().blocks.len() > QUEUE_LIMIT
  }

  /// Non-blocking enqueue. Blocks failing the proof-of-work check are
  /// counted and discarded.
  pub fn add(&self, block: Block, origination: Option<Instant>) {
    if !self.work.validate(&block.root(), block.work()) {
      debug!(
        "dropping block {} with insufficient work {:#x}",
        block.hash(),
        block.work()
      );
      self.stats.inc(
        StatType::Error,
        StatDetail::InsufficientWork,
        StatDir::In,
      );
      return;
    }
    let mut state = self.state.lock().unwrap();
    if state.stopped {
      return;
    }
    if state.hashes.insert(block.hash()) {
      state.blocks.push_back((block, origination));
      self.condition.notify_all();
    }
  }

  /// Bypasses the work check and rolls back any competing frontier at
  /// the same root before processing; how an election winner replaces
  /// a losing fork.
  pub fn force(&self, block: Block) {
    let mut state = self.state.lock().unwrap();
    if state.stopped {
      return;
    }
    state.forced.push_back(block);
    self.condition.notify_all();
  }

  fn have_blocks(state: &State) -> bool {
    !state.blocks.is_empty() || !state.forced.is_empty()
  }

  fn should_log(&self) -> bool {
    let mut next_log = self.next_log.lock().unwrap();
    let now = Instant::now();
    if *next_log < now {
      *next_log = now + Duration::from_secs(15);
      true
    } else {
      false
    }
  }

  fn process_blocks(self: Arc<Self>) {
    let mut state = self.state.lock().unwrap();
    while !state.stopped {
      if Self::have_blocks(&state) {
        state.active = true;
        drop(state);
        self.process_many();
        state = self.state.lock().unwrap();
        state.active = false;
      } else {
        self.condition.notify_all();
        state = self.condition.wait(state).unwrap();
      }
    }
  }

  /// Drains one batch under a single writable ledger scope.
  fn process_many(&self) {
    let txn = self.ledger.store.tx_begin_write();
    let mut count = 0;
    loop {
      let (block, origination, forced) = {
        let mut state = self.state.lock().unwrap();
        if state.stopped || !Self::have_blocks(&state) || count >= QUEUE_LIMIT
        {
          break;
        }
        if state.blocks.len() > 64 && self.should_log() {
          info!("{} blocks in processing queue", state.blocks.len());
        }
        match state.forced.pop_front() {
          Some(block) => (block, Some(Instant::now()), true),
          None => {
            let (block, origination) =
              state.blocks.pop_front().expect("have_blocks checked");
            state.hashes.remove(&block.hash());
            (block, origination, false)
          }
        }
      };
      if forced {
        let hash = block.hash();
        if let Some(successor) = self.ledger.successor(&txn, &block.root()) {
          if successor.hash() != hash {
            // replace our block with the winner and roll back any
            // dependent blocks
            warn!(
              "rolling back {} and replacing with {}",
              successor.hash(),
              hash
            );
            self.stats.inc(StatType::Ledger, StatDetail::Rollback, StatDir::In);
            self.ledger.rollback(&txn, &successor.hash());
          }
        }
      }
      self.process_one(&txn, &block, origination);
      count += 1;
    }
  }

  /// Classifies one block and acts on the class. Runs under the
  /// batch's writable scope.
  pub fn process_one(
    &self,
    txn: &WriteTransaction,
    block: &Block,
    origination: Option<Instant>,
  ) -> ProcessResult {
    let hash = block.hash();
    let result = self.ledger.process(txn, block);
    match result {
      ProcessResult::Progress => {
        debug!("processed block {hash}");
        if self.arrival.recent(&hash) {
          if let Some(active) = self.active_elections.get() {
            active.start(txn, block.clone(), None);
          }
        }
        self.queue_unchecked(txn, &hash);
      }
      ProcessResult::GapPrevious | ProcessResult::GapSource => {
        let dependency = self.ledger.gap_dependency(txn, block, result);
        debug!("gap {result:?} for block {hash}, missing {dependency}");
        self.stats.inc(
          StatType::Ledger,
          if result == ProcessResult::GapPrevious {
            StatDetail::GapPrevious
          } else {
            StatDetail::GapSource
          },
          StatDir::In,
        );
        self.ledger.store.unchecked_put(txn, &dependency, block);
        self.gap.add(dependency, hash);
      }
      ProcessResult::Old => {
        self.stats.inc(StatType::Ledger, StatDetail::Old, StatDir::In);
        // keep the more rebroadcastable variant of the stored copy
        self.ledger.refresh_work(txn, block);
        self.queue_unchecked(txn, &hash);
      }
      ProcessResult::Fork => {
        self.stats.inc(StatType::Ledger, StatDetail::Fork, StatDir::In);
        let old_enough = match origination {
          Some(arrived) => arrived.elapsed() >= FORK_DELAY,
          None => true,
        };
        if old_enough {
          self.process_fork(txn, block);
        }
        debug!("fork for block {hash} root {}", block.root());
      }
      ProcessResult::BadSignature => {
        debug!("bad signature for block {hash}");
      }
      ProcessResult::NegativeSpend => {
        debug!("negative spend for block {hash}");
      }
      ProcessResult::Unreceivable => {
        debug!("unreceivable source for block {hash}");
      }
      ProcessResult::OpenedBurnAccount => {
        warn!("rejecting open block for the burn account: {hash}");
      }
      ProcessResult::BalanceMismatch => {
        debug!("balance mismatch for block {hash}");
      }
      ProcessResult::RepresentativeMismatch => {
        debug!("representative mismatch for block {hash}");
      }
      ProcessResult::BlockPosition => {
        debug!(
          "block {hash} cannot follow predecessor {}",
          block.previous()
        );
      }
    }
    result
  }

  /// Opens an election between the ledger's block and the incoming
  /// rival, then asks representatives to vote on our copy.
  fn process_fork(&self, txn: &WriteTransaction, block: &Block) {
    let root = block.root();
    if self.ledger.store.block_exists(txn, &block.hash())
      || !self.ledger.store.root_exists(txn, &root)
    {
      return;
    }
    let ledger_block = match self.ledger.forked_block(txn, block) {
      Some(ledger_block) => ledger_block,
      None => return,
    };
    if let Some(active) = self.active_elections.get() {
      if !active.start_fork(txn, ledger_block.clone(), block.clone()) {
        warn!(
          "resolving fork between our block {} and block {} with root {root}",
          ledger_block.hash(),
          block.hash()
        );
        self.network.broadcast_confirm_req(&ledger_block);
      }
    }
  }

  /// Re-enqueues blocks that were waiting on this hash and clears the
  /// gap bookkeeping.
  fn queue_unchecked(&self, txn: &WriteTransaction, hash: &BlockHash) {
    let dependents = self.ledger.store.unchecked_get(txn, hash);
    if !dependents.is_empty() {
      self.ledger.store.unchecked_del(txn, hash);
      for block in dependents {
        self.add(block, None);
      }
    }
    self.gap.erase(hash);
  }
}
