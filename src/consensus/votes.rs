use {
  super::{active::ActiveElections, gap::GapCache, Vote},
  crate::{
    ledger::{Ledger, Transaction},
    network::{Endpoint, Network},
    observers::Observers,
    stats::{StatDetail, StatDir, StatType, Stats},
  },
  std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex},
    thread::JoinHandle,
  },
  tracing::{debug, trace},
};

/// Outcome of ingesting one signed vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteCode {
  /// New information, applied.
  Vote,
  /// Superseded by a stored higher-sequence vote.
  Replay,
  /// No election matched and no replay evidence remained.
  Indeterminate,
  /// Signature or structure invalid.
  Invalid,
}

struct Queue {
  votes: VecDeque<(Vote, Endpoint)>,
  active: bool,
  stopped: bool,
}

/// Validates incoming votes and applies them to live elections, the
/// gap cache and the inactive-vote cache. One worker drains the queue
/// under a shared read scope per batch.
pub struct VoteProcessor {
  ledger: Arc<Ledger>,
  active_elections: Arc<ActiveElections>,
  gap: Arc<GapCache>,
  observers: Arc<Observers>,
  network: Arc<Network>,
  stats: Arc<Stats>,
  state: Mutex<Queue>,
  condition: Condvar,
  thread: Mutex<Option<JoinHandle<()>>>,
}

impl VoteProcessor {
  pub fn new(
    ledger: Arc<Ledger>,
    active_elections: Arc<ActiveElections>,
    gap: Arc<GapCache>,
    observers: Arc<Observers>,
    network: Arc<Network>,
    stats: Arc<Stats>,
  ) -> Arc<Self> {
    Arc::new(Self {
      ledger,
      active_elections,
      gap,
      observers,
      network,
      stats,
      state: Mutex::new(Queue {
        votes: VecDeque::new(),
        active: false,
        stopped: false,
      }),
      condition: Condvar::new(),
      thread: Mutex::new(None),
    })
  }

  pub fn start(self: &Arc<Self>) {
    let worker = Arc::clone(self);
    let thread = std::thread::Builder::new()
      .name("vote processor".into())
      .spawn(move || worker.process_loop())
      .expect("spawning the vote processor thread");
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

  /// Returns once the queue is empty and the worker is idle, not
  /// mid-drain.
  pub fn flush(&self) {
    let mut state = self.state.lock().unwrap();
    while !state.stopped && (state.active || !state.votes.is_empty()) {
      state = self.condition.wait(state).unwrap();
    }
  }

  /// Non-blocking enqueue for the worker thread.
  pub fn vote(&self, vote: Vote, origin: Endpoint) {
    let mut state = self.state.lock().unwrap();
    if !state.stopped {
      state.votes.push_back((vote, origin));
      self.condition.notify_all();
    }
  }

  fn process_loop(self: Arc<Self>) {
    let mut state = self.state.lock().unwrap();
    loop {
      if state.stopped {
        break;
      }
      if !state.votes.is_empty() {
        let mut batch = VecDeque::new();
        std::mem::swap(&mut batch, &mut state.votes);
        state.active = true;
        drop(state);
        {
          let txn = self.ledger.store.tx_begin_read();
          for (vote, origin) in batch {
            self.vote_blocking(&txn, &vote, &origin);
          }
        }
        state = self.state.lock().unwrap();
        state.active = false;
        self.condition.notify_all();
      } else {
        self.condition.notify_all();
        state = self.condition.wait(state).unwrap();
      }
    }
  }

  /// Synchronous ingestion inside the caller's transaction.
  pub fn vote_blocking(
    &self,
    txn: &dyn Transaction,
    vote: &Vote,
    origin: &Endpoint,
  ) -> VoteCode {
    if !vote.validate() {
      self
        .stats
        .inc(StatType::Vote, StatDetail::VoteInvalid, StatDir::In);
      debug!("invalid vote from {}", vote.account);
      return VoteCode::Invalid;
    }

    let (replay, processed) = self.active_elections.vote(txn, vote);
    // votes on gapped blocks accumulate toward the bootstrap trigger
    // whether or not an election matched
    self.gap.vote(txn, vote);
    let max_vote = self.ledger.store.vote_max(txn, vote);

    let code = if processed {
      VoteCode::Vote
    } else if replay || max_vote.sequence > vote.sequence {
      VoteCode::Replay
    } else {
      VoteCode::Indeterminate
    };

    match code {
      VoteCode::Vote => {
        self
          .stats
          .inc(StatType::Vote, StatDetail::VoteValid, StatDir::In);
        self.network.republish_vote(vote);
      }
      VoteCode::Replay => {
        self
          .stats
          .inc(StatType::Vote, StatDetail::VoteReplay, StatDir::In);
        // assist a representative that lost its sequence state by
        // replaying our highest known vote back, one message out per
        // one message in
        if max_vote.sequence > vote.sequence.saturating_add(10_000) {
          self.network.send_confirm_ack(*origin, &max_vote);
        }
      }
      VoteCode::Indeterminate => {
        self.stats.inc(
          StatType::Vote,
          StatDetail::VoteIndeterminate,
          StatDir::In,
        );
      }
      VoteCode::Invalid => unreachable!("returned above"),
    }
    // downstream consumers (online reps, rep crawler) see every vote
    // that carried a valid signature
    self.observers.notify_vote(txn, vote, origin);

    trace!(
      "vote from {} sequence {} block(s) {} status {code:?}",
      vote.account,
      vote.sequence,
      vote.hashes_string()
    );
    code
  }
}
