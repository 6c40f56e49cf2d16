use {
  super::{online::OnlineReps, Vote},
  crate::{
    alarm::Alarm,
    bootstrap::BootstrapTrigger,
    ledger::{Ledger, Transaction},
    primitives::{Account, BlockHash},
  },
  std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
  },
  tracing::info,
};

const MAX_ENTRIES: usize = 256;

struct GapEntry {
  arrival: Instant,
  /// Hash of the block that could not be attached.
  target: BlockHash,
  voters: HashSet<Account>,
}

/// Records blocks whose dependencies are missing, keyed by the
/// dependency hash. When representatives worth a configured fraction
/// of the online stake are seen voting for a gapped block, a deferred
/// check fires bootstrap if the block still has not arrived.
pub struct GapCache {
  ledger: Arc<Ledger>,
  online: Arc<OnlineReps>,
  alarm: Arc<Alarm>,
  bootstrap: Arc<BootstrapTrigger>,
  bootstrap_fraction_numerator: u128,
  check_delay: Duration,
  entries: Mutex<HashMap<BlockHash, GapEntry>>,
}

impl GapCache {
  pub fn new(
    ledger: Arc<Ledger>,
    online: Arc<OnlineReps>,
    alarm: Arc<Alarm>,
    bootstrap: Arc<BootstrapTrigger>,
    bootstrap_fraction_numerator: u128,
    check_delay: Duration,
  ) -> Self {
    Self {
      ledger,
      online,
      alarm,
      bootstrap,
      bootstrap_fraction_numerator,
      check_delay,
      entries: Mutex::new(HashMap::new()),
    }
  }

  /// Registers a gapped block under its missing dependency.
  pub fn add(&self, dependency: BlockHash, target: BlockHash) {
    let mut entries = self.entries.lock().unwrap();
    match entries.get_mut(&dependency) {
      Some(entry) => {
        entry.arrival = Instant::now();
        entry.target = target;
      }
      None => {
        if entries.len() >= MAX_ENTRIES {
          if let Some(oldest) = entries
            .iter()
            .min_by_key(|(_, entry)| entry.arrival)
            .map(|(dependency, _)| *dependency)
          {
            entries.remove(&oldest);
          }
        }
        entries.insert(dependency, GapEntry {
          arrival: Instant::now(),
          target,
          voters: HashSet::new(),
        });
      }
    }
  }

  /// Accumulates voter weight on gapped blocks referenced by a vote.
  /// Crossing the bootstrap threshold schedules a single deferred
  /// check; the in-progress flag on the trigger gates re-entry.
  pub fn vote(&self, txn: &dyn Transaction, vote: &Vote) {
    let hashes = vote.hashes();
    let mut entries = self.entries.lock().unwrap();
    for hash in hashes {
      let entry = match entries
        .values_mut()
        .find(|entry| entry.target == hash)
      {
        Some(entry) => entry,
        None => continue,
      };
      if !entry.voters.insert(vote.account) {
        continue;
      }
      let tally: u128 = entry
        .voters
        .iter()
        .map(|voter| self.ledger.weight(txn, voter))
        .fold(0u128, |total, weight| total.saturating_add(weight));
      if tally > self.bootstrap_threshold() {
        let ledger = Arc::clone(&self.ledger);
        let bootstrap = Arc::clone(&self.bootstrap);
        self.alarm.add(Instant::now() + self.check_delay, move || {
          let txn = ledger.store.tx_begin_read();
          if !ledger.store.block_exists(&txn, &hash) {
            drop(txn);
            if !bootstrap.in_progress() {
              info!("missing confirmed block {hash}");
            }
            bootstrap.start();
          }
        });
      }
    }
  }

  /// Quorum-weight fraction that indicates the network has settled a
  /// block this node cannot see.
  pub fn bootstrap_threshold(&self) -> u128 {
    (self.online.online_stake() / 256) * self.bootstrap_fraction_numerator
  }

  /// Drops bookkeeping for a hash that made it into the ledger, both
  /// as a satisfied dependency and as a settled target.
  pub fn erase(&self, hash: &BlockHash) {
    let mut entries = self.entries.lock().unwrap();
    entries.remove(hash);
    entries.retain(|_, entry| entry.target != *hash);
  }

  pub fn size(&self) -> usize {
    self.entries.lock().unwrap().len()
  }
}

#[cfg(test)]
mod tests {
  use {
    super::GapCache,
    crate::{
      alarm::Alarm,
      bootstrap::BootstrapTrigger,
      consensus::{online::OnlineReps, Vote, VotePayload},
      ledger::{Genesis, Ledger, Store},
      primitives::{BlockHash, Keypair},
      stats::Stats,
    },
    std::{
      sync::Arc,
      time::{Duration, Instant},
    },
  };

  fn cache() -> (GapCache, Arc<Ledger>, Keypair, Arc<BootstrapTrigger>) {
    let genesis = Keypair::random();
    let ledger = Arc::new(Ledger::new(
      Store::open_temporary().unwrap(),
      Genesis::new(&genesis, 1000),
    ));
    let online =
      Arc::new(OnlineReps::new(Arc::clone(&ledger), 256, Duration::from_secs(300)));
    let bootstrap = Arc::new(BootstrapTrigger::new(Arc::new(Stats::new())));
    let gap = GapCache::new(
      Arc::clone(&ledger),
      online,
      Arc::new(Alarm::new()),
      Arc::clone(&bootstrap),
      // threshold: online_stake / 256 * 1 = 1, any genesis vote clears it
      1,
      Duration::from_millis(5),
    );
    (gap, ledger, genesis, bootstrap)
  }

  #[test]
  fn quorum_weight_on_gap_triggers_bootstrap_once() {
    let (gap, ledger, genesis, bootstrap) = cache();
    let dependency = BlockHash::digest(&[b"missing dependency"]);
    let target = BlockHash::digest(&[b"gapped block"]);
    gap.add(dependency, target);
    assert_eq!(gap.size(), 1);

    let vote =
      Vote::new(&genesis, 1, VotePayload::Hashes(vec![target]));
    {
      let txn = ledger.store.tx_begin_read();
      gap.vote(&txn, &vote);
      // the same voter again accumulates nothing and schedules nothing
      gap.vote(&txn, &vote);
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while bootstrap.attempts() == 0 && Instant::now() < deadline {
      std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(bootstrap.attempts(), 1);
    assert!(bootstrap.in_progress());
  }

  #[test]
  fn erase_clears_dependency_and_target() {
    let (gap, _, _, _) = cache();
    let dependency = BlockHash::digest(&[b"dep"]);
    let target = BlockHash::digest(&[b"target"]);
    gap.add(dependency, target);
    gap.erase(&target);
    assert_eq!(gap.size(), 0);

    gap.add(dependency, target);
    gap.erase(&dependency);
    assert_eq!(gap.size(), 0);
  }
}
