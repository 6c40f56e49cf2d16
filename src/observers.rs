use {
  crate::{
    consensus::Vote,
    ledger::{Block, Transaction},
    network::Endpoint,
    primitives::Account,
  },
  std::sync::Mutex,
};

type BlockObserver = Box<dyn Fn(&Block, &Account, u128, bool) + Send + Sync>;
type VoteObserver =
  Box<dyn Fn(&dyn Transaction, &Vote, &Endpoint) + Send + Sync>;
type EndpointObserver = Box<dyn Fn(&Endpoint) + Send + Sync>;
type DisconnectObserver = Box<dyn Fn() + Send + Sync>;
type BalanceObserver = Box<dyn Fn(&Account, bool) + Send + Sync>;
type StartedObserver = Box<dyn Fn() + Send + Sync>;

/// In-process pub/sub for downstream consumers. Registration happens
/// during node wiring; notification is fan-out to every registered
/// callback, on the thread that produced the event, after the
/// transaction that produced it has committed.
#[derive(Default)]
pub struct Observers {
  blocks: Mutex<Vec<BlockObserver>>,
  vote: Mutex<Vec<VoteObserver>>,
  endpoint: Mutex<Vec<EndpointObserver>>,
  disconnect: Mutex<Vec<DisconnectObserver>>,
  account_balance: Mutex<Vec<BalanceObserver>>,
  started: Mutex<Vec<StartedObserver>>,
}

impl Observers {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_blocks(
    &self,
    observer: impl Fn(&Block, &Account, u128, bool) + Send + Sync + 'static,
  ) {
    self.blocks.lock().unwrap().push(Box::new(observer));
  }

  /// `(block, credited_account, amount, is_state_send)` for every
  /// cemented block.
  pub fn notify_blocks(
    &self,
    block: &Block,
    account: &Account,
    amount: u128,
    is_state_send: bool,
  ) {
    for observer in self.blocks.lock().unwrap().iter() {
      observer(block, account, amount, is_state_send);
    }
  }

  pub fn add_vote(
    &self,
    observer: impl Fn(&dyn Transaction, &Vote, &Endpoint)
      + Send
      + Sync
      + 'static,
  ) {
    self.vote.lock().unwrap().push(Box::new(observer));
  }

  pub fn notify_vote(
    &self,
    txn: &dyn Transaction,
    vote: &Vote,
    endpoint: &Endpoint,
  ) {
    for observer in self.vote.lock().unwrap().iter() {
      observer(txn, vote, endpoint);
    }
  }

  pub fn add_endpoint(
    &self,
    observer: impl Fn(&Endpoint) + Send + Sync + 'static,
  ) {
    self.endpoint.lock().unwrap().push(Box::new(observer));
  }

  pub fn notify_endpoint(&self, endpoint: &Endpoint) {
    for observer in self.endpoint.lock().unwrap().iter() {
      observer(endpoint);
    }
  }

  pub fn add_disconnect(&self, observer: impl Fn() + Send + Sync + 'static) {
    self.disconnect.lock().unwrap().push(Box::new(observer));
  }

  pub fn notify_disconnect(&self) {
    for observer in self.disconnect.lock().unwrap().iter() {
      observer();
    }
  }

  pub fn add_account_balance(
    &self,
    observer: impl Fn(&Account, bool) + Send + Sync + 'static,
  ) {
    self.account_balance.lock().unwrap().push(Box::new(observer));
  }

  /// `(account, is_pending)`: a balance moved, either settled on the
  /// account or waiting as a receivable.
  pub fn notify_account_balance(&self, account: &Account, is_pending: bool) {
    for observer in self.account_balance.lock().unwrap().iter() {
      observer(account, is_pending);
    }
  }

  pub fn add_started(&self, observer: impl Fn() + Send + Sync + 'static) {
    self.started.lock().unwrap().push(Box::new(observer));
  }

  pub fn notify_started(&self) {
    for observer in self.started.lock().unwrap().iter() {
      observer();
    }
  }
}
