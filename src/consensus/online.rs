use {
  super::Vote,
  crate::{
    ledger::{Ledger, Transaction},
    primitives::Account,
  },
  std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
  },
};

/// Representatives heard from recently and their aggregate stake.
/// `online_stake` feeds the quorum delta, the vote-weight noise filter
/// and the gap cache's bootstrap threshold; it never reports less than
/// the configured minimum so a partitioned node cannot talk itself
/// into a trivial quorum.
pub struct OnlineReps {
  ledger: Arc<Ledger>,
  online_weight_minimum: u128,
  cutoff: Duration,
  inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
  reps: HashMap<Account, Instant>,
  online_stake_total: u128,
}

impl OnlineReps {
  pub fn new(
    ledger: Arc<Ledger>,
    online_weight_minimum: u128,
    cutoff: Duration,
  ) -> Self {
    Self {
      ledger,
      online_weight_minimum,
      cutoff,
      inner: Mutex::new(Inner::default()),
    }
  }

  /// Marks a voting representative as online and prunes the expired.
  /// Runs inside the caller's transaction so the vote processor's
  /// drain never nests store scopes.
  pub fn vote(&self, txn: &dyn Transaction, vote: &Vote) {
    let mut inner = self.inner.lock().unwrap();
    let now = Instant::now();

    let cutoff = self.cutoff;
    let expired: Vec<Account> = inner
      .reps
      .iter()
      .filter(|(_, heard)| now.duration_since(**heard) >= cutoff)
      .map(|(account, _)| *account)
      .collect();
    for account in expired {
      inner.reps.remove(&account);
      let weight = self.ledger.weight(txn, &account);
      inner.online_stake_total =
        inner.online_stake_total.saturating_sub(weight);
    }

    if inner.reps.insert(vote.account, now).is_none() {
      let weight = self.ledger.weight(txn, &vote.account);
      inner.online_stake_total =
        inner.online_stake_total.saturating_add(weight);
    }
  }

  /// Re-derives the aggregate from the ledger, shedding drift from
  /// weights that changed while a representative was online.
  /// The store scope opens before the set lock, matching the order
  /// every reader uses.
  pub fn recalculate_stake(&self) {
    let txn = self.ledger.store.tx_begin_read();
    let mut inner = self.inner.lock().unwrap();
    inner.online_stake_total = inner
      .reps
      .keys()
      .map(|account| self.ledger.weight(&txn, account))
      .fold(0u128, |total, weight| total.saturating_add(weight));
  }

  pub fn online_stake(&self) -> u128 {
    let inner = self.inner.lock().unwrap();
    inner.online_stake_total.max(self.online_weight_minimum)
  }

  pub fn list(&self) -> Vec<Account> {
    self.inner.lock().unwrap().reps.keys().copied().collect()
  }
}

#[cfg(test)]
mod tests {
  use {
    super::OnlineReps,
    crate::{
      consensus::{Vote, VotePayload},
      ledger::{Genesis, Ledger, Store},
      primitives::{BlockHash, Keypair},
    },
    std::{sync::Arc, time::Duration},
  };

  #[test]
  fn stake_follows_heard_representatives() {
    let genesis = Keypair::random();
    let ledger = Arc::new(Ledger::new(
      Store::open_temporary().unwrap(),
      Genesis::new(&genesis, 5000),
    ));
    let online =
      OnlineReps::new(Arc::clone(&ledger), 100, Duration::from_secs(300));

    assert_eq!(online.online_stake(), 100); // configured floor

    let txn = ledger.store.tx_begin_read();
    let vote = Vote::new(
      &genesis,
      1,
      VotePayload::Hashes(vec![BlockHash::digest(&[b"x"])]),
    );
    online.vote(&txn, &vote);
    assert_eq!(online.online_stake(), 5000);
    assert_eq!(online.list(), vec![genesis.public()]);

    // an account with no weight adds nothing
    let nobody = Keypair::random();
    online.vote(&txn, &Vote::new(
      &nobody,
      1,
      VotePayload::Hashes(vec![BlockHash::digest(&[b"y"])]),
    ));
    assert_eq!(online.online_stake(), 5000);
    drop(txn);

    online.recalculate_stake();
    assert_eq!(online.online_stake(), 5000);
  }
}
