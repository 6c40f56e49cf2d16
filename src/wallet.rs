use {
  crate::{
    consensus::{arrival::BlockArrival, processor::BlockProcessor},
    ledger::{Block, Ledger, OpenBlock, ReceiveBlock},
    primitives::{Account, BlockHash, Keypair},
    work::WorkPool,
  },
  once_cell::sync::OnceCell,
  std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Instant,
  },
  tracing::debug,
};

/// Signing keys this node controls: voting representatives and
/// receivable accounts. Key management beyond holding keypairs in
/// memory (encryption, fanout, backups) lives outside the consensus
/// core.
pub struct Wallets {
  ledger: Arc<Ledger>,
  work: WorkPool,
  receive_minimum: u128,
  keys: Mutex<HashMap<Account, Keypair>>,
  /// Vote sequence counters per representative key.
  sequences: Mutex<HashMap<Account, u64>>,
  processor: OnceCell<Arc<BlockProcessor>>,
  arrival: OnceCell<Arc<BlockArrival>>,
}

impl Wallets {
  pub fn new(
    ledger: Arc<Ledger>,
    work: WorkPool,
    receive_minimum: u128,
  ) -> Self {
    Self {
      ledger,
      work,
      receive_minimum,
      keys: Mutex::new(HashMap::new()),
      sequences: Mutex::new(HashMap::new()),
      processor: OnceCell::new(),
      arrival: OnceCell::new(),
    }
  }

  /// Back-edges filled during node wiring.
  pub fn connect(
    &self,
    processor: Arc<BlockProcessor>,
    arrival: Arc<BlockArrival>,
  ) {
    let _ = self.processor.set(processor);
    let _ = self.arrival.set(arrival);
  }

  pub fn insert(&self, keypair: Keypair) {
    self.keys.lock().unwrap().insert(keypair.public(), keypair);
  }

  pub fn exists(&self, account: &Account) -> bool {
    self.keys.lock().unwrap().contains_key(account)
  }

  /// Iterates every held signing key. Callers gate on `enable_voting`
  /// themselves.
  pub fn foreach_representative(&self, mut f: impl FnMut(&Keypair)) {
    let keys: Vec<Keypair> =
      self.keys.lock().unwrap().values().cloned().collect();
    for keypair in &keys {
      f(keypair);
    }
  }

  /// Next vote sequence for a representative key. Monotonic per
  /// account for the lifetime of the node.
  pub fn next_sequence(&self, account: &Account) -> u64 {
    let mut sequences = self.sequences.lock().unwrap();
    let next = sequences.entry(*account).or_insert(0);
    *next += 1;
    *next
  }

  /// Credits a cemented send into a locally-held destination account
  /// by producing the matching receive or open block and feeding it
  /// through the regular live-block path.
  pub fn receive_async(
    &self,
    source: &Block,
    representative: &Account,
    amount: u128,
    callback: impl FnOnce(&Block),
  ) {
    if amount < self.receive_minimum {
      debug!(
        "not receiving block {}, amount {} is below the minimum",
        source.hash(),
        amount
      );
      return;
    }
    let destination = match source.destination().or_else(|| {
      source.link().map(|link| link.as_account())
    }) {
      Some(destination) => destination,
      None => return,
    };
    let keypair = match self.keys.lock().unwrap().get(&destination) {
      Some(keypair) => keypair.clone(),
      None => return,
    };

    let source_hash = source.hash();
    let head: Option<BlockHash> = {
      let txn = self.ledger.store.tx_begin_read();
      self.ledger.latest(&txn, &destination)
    };
    let block = match head {
      Some(head) => {
        let work = self.work.generate(&head.into());
        ReceiveBlock::new(head, source_hash, &keypair, work)
      }
      None => {
        let work = self.work.generate(&destination.into());
        OpenBlock::new(source_hash, *representative, &keypair, work)
      }
    };

    // wallet blocks take the live path so an election starts and the
    // announce loop propagates them
    if let Some(arrival) = self.arrival.get() {
      arrival.add(block.hash());
    }
    if let Some(processor) = self.processor.get() {
      processor.add(block.clone(), Some(Instant::now()));
    }
    callback(&block);
  }
}
