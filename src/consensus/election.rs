use {
  super::{online::OnlineReps, processor::BlockProcessor},
  crate::{
    ledger::{Block, Ledger, Transaction},
    primitives::{Account, BlockHash, Root},
    stats::{StatDetail, StatDir, StatType, Stats},
  },
  once_cell::sync::OnceCell,
  std::{
    collections::HashMap,
    sync::{
      atomic::{AtomicBool, Ordering},
      mpsc::Sender,
      Arc,
      Mutex,
    },
    time::{Duration, Instant},
  },
  tracing::debug,
};

/// Fork variants one election will hold at most. Admission beyond the
/// cap requires out-tallying the weakest held variant.
pub const MAX_BLOCKS: usize = 10;

pub type ConfirmAction = Box<dyn FnOnce(Block) + Send>;

/// A confirmed winner on its way to the cementing walker.
pub struct ConfirmedElection {
  pub winner: Block,
  pub action: Option<ConfirmAction>,
}

/// Dependencies an election needs while tallying and confirming.
/// Handed to every election by the active-elections engine; the block
/// processor back-edge is filled in after both exist.
pub struct ElectionContext {
  pub ledger: Arc<Ledger>,
  pub online: Arc<OnlineReps>,
  pub stats: Arc<Stats>,
  pub processor: OnceCell<Arc<BlockProcessor>>,
  pub confirmed_tx: Mutex<Sender<ConfirmedElection>>,
  pub quorum_percent: u128,
  pub online_weight_minimum: u128,
  pub test_network: bool,
}

impl ElectionContext {
  /// Margin the leading tally must hold over the runner-up.
  pub fn delta(&self) -> u128 {
    (self.online.online_stake() / 100) * self.quorum_percent
  }
}

#[derive(Debug, Clone)]
pub struct VoteInfo {
  pub time: Instant,
  pub sequence: u64,
  pub hash: BlockHash,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ElectionVoteResult {
  pub replay: bool,
  pub processed: bool,
}

struct ElectionState {
  blocks: HashMap<BlockHash, Block>,
  last_votes: HashMap<Account, VoteInfo>,
  last_tally: HashMap<BlockHash, u128>,
  winner: Block,
  tally: u128,
}

/// Per-root election: collects votes and fork variants, tallies
/// representative weight, and confirms once quorum holds. Confirmed
/// at most once; once confirmed the winner is immutable.
pub struct Election {
  pub root: Root,
  state: Mutex<ElectionState>,
  confirmed: AtomicBool,
  aborted: AtomicBool,
  action: Mutex<Option<ConfirmAction>>,
}

impl Election {
  pub fn new(block: Block, action: Option<ConfirmAction>) -> Self {
    let hash = block.hash();
    let mut last_votes = HashMap::new();
    // sentinel under the zero account keeps the seed block in every
    // tally even before the first real vote
    last_votes.insert(Account::zero(), VoteInfo {
      time: Instant::now(),
      sequence: 0,
      hash,
    });
    let mut blocks = HashMap::new();
    blocks.insert(hash, block.clone());
    Self {
      root: block.root(),
      state: Mutex::new(ElectionState {
        blocks,
        last_votes,
        last_tally: HashMap::new(),
        winner: block,
        tally: 0,
      }),
      confirmed: AtomicBool::new(false),
      aborted: AtomicBool::new(false),
      action: Mutex::new(action),
    }
  }

  pub fn winner(&self) -> Block {
    self.state.lock().unwrap().winner.clone()
  }

  pub fn winner_hash(&self) -> BlockHash {
    self.state.lock().unwrap().winner.hash()
  }

  pub fn confirmed(&self) -> bool {
    self.confirmed.load(Ordering::SeqCst)
  }

  pub fn aborted(&self) -> bool {
    self.aborted.load(Ordering::SeqCst)
  }

  /// Drops the election without confirming; the winner failed a later
  /// dependency re-check.
  pub fn abort(&self) {
    self.aborted.store(true, Ordering::SeqCst);
  }

  pub fn block_count(&self) -> usize {
    self.state.lock().unwrap().blocks.len()
  }

  pub fn blocks(&self) -> Vec<BlockHash> {
    self.state.lock().unwrap().blocks.keys().copied().collect()
  }

  pub fn has_voted(&self, account: &Account) -> bool {
    self.state.lock().unwrap().last_votes.contains_key(account)
  }

  /// Applies one `(representative, sequence, hash)` observation.
  ///
  /// Sub-threshold representatives are ignored; per-representative
  /// cooldown scales inversely with weight; a final-sequence vote
  /// bypasses the cooldown entirely. Lower or equal sequences replay.
  pub fn vote(
    &self,
    ctx: &ElectionContext,
    txn: &dyn Transaction,
    representative: Account,
    sequence: u64,
    hash: BlockHash,
  ) -> ElectionVoteResult {
    let supply = ctx.online.online_stake();
    let weight = ctx.ledger.weight(txn, &representative);
    if !ctx.test_network && weight <= supply / 1000 {
      return ElectionVoteResult::default();
    }
    let cooldown = if ctx.test_network {
      Duration::ZERO
    } else if weight < supply / 100 {
      Duration::from_secs(15)
    } else if weight < supply / 20 {
      Duration::from_secs(5)
    } else {
      Duration::from_secs(1)
    };

    let mut replay = false;
    let mut should_process = false;
    let is_final = sequence == super::vote::FINAL_SEQUENCE;
    let mut state = self.state.lock().unwrap();
    match state.last_votes.get(&representative) {
      None => should_process = true,
      Some(last) => {
        if last.sequence < sequence
          || (last.sequence == sequence && last.hash < hash)
        {
          if is_final || last.time + cooldown <= Instant::now() {
            should_process = true;
          }
        } else {
          replay = true;
        }
      }
    }
    if should_process {
      state.last_votes.insert(representative, VoteInfo {
        time: Instant::now(),
        sequence,
        hash,
      });
      if !self.confirmed() {
        self.confirm_if_quorum(ctx, txn, &mut state);
      }
    }
    ElectionVoteResult {
      replay,
      processed: should_process,
    }
  }

  /// Offers another fork variant. Returns true when the variant was
  /// rejected (at capacity without out-tallying the weakest, or
  /// failing the dependency check).
  pub fn publish(
    &self,
    ctx: &ElectionContext,
    txn: &dyn Transaction,
    block: &Block,
  ) -> bool {
    let hash = block.hash();
    if !validate_by_previous(&ctx.ledger, txn, block) {
      return true;
    }
    let mut state = self.state.lock().unwrap();
    if state.blocks.contains_key(&hash) {
      return false;
    }
    if state.blocks.len() >= MAX_BLOCKS {
      let incoming = state.last_tally.get(&hash).copied().unwrap_or(0);
      let winner_hash = state.winner.hash();
      let weakest = state
        .blocks
        .keys()
        .filter(|held| **held != winner_hash)
        .map(|held| {
          (state.last_tally.get(held).copied().unwrap_or(0), *held)
        })
        .min();
      match weakest {
        Some((weakest_tally, weakest_hash)) if incoming > weakest_tally => {
          state.blocks.remove(&weakest_hash);
          ctx.stats.inc(
            StatType::Election,
            StatDetail::ElectionDropOverflow,
            StatDir::In,
          );
        }
        _ => return true,
      }
    }
    state.blocks.insert(hash, block.clone());
    if !self.confirmed() {
      self.confirm_if_quorum(ctx, txn, &mut state);
    }
    false
  }

  /// Imports voters that accumulated in the inactive-vote cache
  /// before this election existed.
  pub fn seed_cached_votes(
    &self,
    ctx: &ElectionContext,
    txn: &dyn Transaction,
    hash: BlockHash,
    voters: &[Account],
    confirmed_hint: bool,
  ) {
    for voter in voters {
      self.vote(ctx, txn, *voter, 0, hash);
    }
    if confirmed_hint && !self.confirmed() {
      let mut state = self.state.lock().unwrap();
      self.confirm_if_quorum(ctx, txn, &mut state);
    }
  }

  /// Weight buckets per variant hash, heaviest first.
  pub fn tally(
    &self,
    ctx: &ElectionContext,
    txn: &dyn Transaction,
  ) -> Vec<(u128, Block)> {
    let mut state = self.state.lock().unwrap();
    self.tally_locked(ctx, txn, &mut state)
  }

  fn tally_locked(
    &self,
    ctx: &ElectionContext,
    txn: &dyn Transaction,
    state: &mut ElectionState,
  ) -> Vec<(u128, Block)> {
    let mut weights: HashMap<BlockHash, u128> = HashMap::new();
    for (voter, info) in &state.last_votes {
      let weight = ctx.ledger.weight(txn, voter);
      *weights.entry(info.hash).or_insert(0) += weight;
    }
    state.last_tally = weights.clone();
    let mut result: Vec<(u128, Block)> = weights
      .into_iter()
      .filter_map(|(hash, weight)| {
        state.blocks.get(&hash).map(|block| (weight, block.clone()))
      })
      .collect();
    result.sort_by(|(wa, ba), (wb, bb)| {
      wb.cmp(wa).then(bb.hash().cmp(&ba.hash()))
    });
    result
  }

  fn have_quorum(&self, ctx: &ElectionContext, tally: &[(u128, Block)]) -> bool {
    let top = match tally.first() {
      Some((weight, _)) => *weight,
      None => return false,
    };
    let second = tally.get(1).map(|(weight, _)| *weight).unwrap_or(0);
    top > second + ctx.delta()
  }

  fn confirm_if_quorum(
    &self,
    ctx: &ElectionContext,
    txn: &dyn Transaction,
    state: &mut ElectionState,
  ) {
    // aborted and confirmed are alternative terminal states; votes
    // landing between the abort and the teardown tick must not
    // resurrect the election
    if self.aborted() {
      return;
    }
    let tally = self.tally_locked(ctx, txn, state);
    let (top_weight, top_block) = match tally.first() {
      Some((weight, block)) => (*weight, block.clone()),
      None => return,
    };
    state.tally = top_weight;
    let sum: u128 = tally.iter().map(|(weight, _)| *weight).sum();
    if sum >= ctx.online_weight_minimum
      && top_block.hash() != state.winner.hash()
    {
      // the network moved to another variant, replace our copy
      if let Some(processor) = ctx.processor.get() {
        processor.force(top_block.clone());
      }
      debug!(
        "election for root {} switches winner to {}",
        self.root,
        top_block.hash()
      );
      state.winner = top_block;
    }
    if self.have_quorum(ctx, &tally) {
      self.confirm_once(ctx, state.winner.clone());
    }
  }

  /// At most one entry into the confirmed state; the callback and the
  /// cementing walk run downstream of the channel exactly once.
  fn confirm_once(&self, ctx: &ElectionContext, winner: Block) {
    if !self.confirmed.swap(true, Ordering::SeqCst) {
      ctx.stats.inc(
        StatType::Election,
        StatDetail::ElectionConfirm,
        StatDir::In,
      );
      let action = self.action.lock().unwrap().take();
      let _ = ctx
        .confirmed_tx
        .lock()
        .unwrap()
        .send(ConfirmedElection { winner, action });
    }
  }
}

/// Cheap structural validity for fork variants offered to an existing
/// election: the signing account must be derivable and the signature
/// must hold.
fn validate_by_previous(
  ledger: &Ledger,
  txn: &dyn Transaction,
  block: &Block,
) -> bool {
  let previous = block.previous();
  let account = if previous.is_zero() {
    block.account_field()
  } else {
    ledger.account(txn, &previous)
  };
  match account {
    Some(account) => block.verify_signature(&account),
    None => false,
  }
}

#[cfg(test)]
mod tests {
  use {
    super::{ConfirmedElection, Election, ElectionContext, MAX_BLOCKS},
    crate::{
      consensus::online::OnlineReps,
      ledger::{Genesis, Ledger, SendBlock, Store},
      primitives::Keypair,
      stats::Stats,
    },
    once_cell::sync::OnceCell,
    std::{
      sync::{
        mpsc::{channel, Receiver},
        Arc,
        Mutex,
      },
      time::Duration,
    },
  };

  fn context() -> (
    ElectionContext,
    Receiver<ConfirmedElection>,
    Arc<Ledger>,
    Keypair,
  ) {
    let genesis = Keypair::random();
    let ledger = Arc::new(Ledger::new(
      Store::open_temporary().unwrap(),
      Genesis::new(&genesis, 1000),
    ));
    let online =
      Arc::new(OnlineReps::new(Arc::clone(&ledger), 0, Duration::from_secs(300)));
    let (confirmed_tx, confirmed_rx) = channel();
    let ctx = ElectionContext {
      ledger: Arc::clone(&ledger),
      online,
      stats: Arc::new(Stats::new()),
      processor: OnceCell::new(),
      confirmed_tx: Mutex::new(confirmed_tx),
      quorum_percent: 50,
      online_weight_minimum: 0,
      test_network: true,
    };
    (ctx, confirmed_rx, ledger, genesis)
  }

  #[test]
  fn quorum_vote_confirms_exactly_once() {
    let (ctx, confirmed_rx, ledger, genesis) = context();
    let block = SendBlock::new(
      ledger.genesis.hash(),
      Keypair::random().public(),
      900,
      &genesis,
      0,
    );
    let election = Election::new(block.clone(), None);

    let txn = ledger.store.tx_begin_read();
    let result =
      election.vote(&ctx, &txn, genesis.public(), 1, block.hash());
    assert!(result.processed);
    assert!(!result.replay);
    assert!(election.confirmed());

    // replays do not confirm again
    let result =
      election.vote(&ctx, &txn, genesis.public(), 1, block.hash());
    assert!(result.replay);

    let confirmed = confirmed_rx.try_recv().unwrap();
    assert_eq!(confirmed.winner, block);
    assert!(confirmed_rx.try_recv().is_err());
  }

  #[test]
  fn aborted_election_never_confirms() {
    let (ctx, confirmed_rx, ledger, genesis) = context();
    let block = SendBlock::new(
      ledger.genesis.hash(),
      Keypair::random().public(),
      900,
      &genesis,
      0,
    );
    let election = Election::new(block.clone(), None);
    election.abort();

    // a quorum-weight vote arriving after the abort but before
    // teardown must not flip the election to confirmed
    let txn = ledger.store.tx_begin_read();
    let result =
      election.vote(&ctx, &txn, genesis.public(), 1, block.hash());
    assert!(result.processed);
    assert!(election.aborted());
    assert!(!election.confirmed());
    assert!(confirmed_rx.try_recv().is_err());
  }

  #[test]
  fn lower_sequences_replay() {
    let (ctx, _confirmed_rx, ledger, genesis) = context();
    let block = SendBlock::new(
      ledger.genesis.hash(),
      Keypair::random().public(),
      900,
      &genesis,
      0,
    );
    let election = Election::new(block.clone(), None);
    let txn = ledger.store.tx_begin_read();
    assert!(
      election
        .vote(&ctx, &txn, genesis.public(), 5, block.hash())
        .processed
    );
    assert!(
      election
        .vote(&ctx, &txn, genesis.public(), 4, block.hash())
        .replay
    );
  }

  #[test]
  fn overflow_keeps_the_cap_and_readmits_by_tally() {
    let (ctx, _confirmed_rx, ledger, genesis) = context();
    let destinations: Vec<Keypair> =
      (0..12).map(|_| Keypair::random()).collect();
    let forks: Vec<_> = destinations
      .iter()
      .enumerate()
      .map(|(i, dest)| {
        SendBlock::new(
          ledger.genesis.hash(),
          dest.public(),
          900 - i as u128,
          &genesis,
          0,
        )
      })
      .collect();

    let election = Election::new(forks[0].clone(), None);
    let txn = ledger.store.tx_begin_read();
    for fork in &forks[1..11] {
      election.publish(&ctx, &txn, fork);
    }
    assert_eq!(election.block_count(), MAX_BLOCKS);

    // an 11th variant with no tally is rejected
    assert!(election.publish(&ctx, &txn, &forks[11]));
    assert_eq!(election.block_count(), MAX_BLOCKS);

    // a vote for it raises its tally above the zero-weight weakest,
    // so a re-publish is admitted and evicts one variant
    election.vote(&ctx, &txn, genesis.public(), 1, forks[11].hash());
    assert!(!election.publish(&ctx, &txn, &forks[11]));
    assert_eq!(election.block_count(), MAX_BLOCKS);
    assert!(election.blocks().contains(&forks[11].hash()));
  }
}
