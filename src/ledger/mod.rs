//! The account-lattice ledger: every account owns an independent
//! hash-linked chain, transfers are paired send/receive blocks, and
//! representative weight follows delegated balances. Classification of
//! an incoming block is a pure function over the tagged variant and
//! the current store state; application and rollback keep the supply
//! and weight invariants.

mod block;
mod store;

pub use {
  block::{
    Block,
    BlockType,
    ChangeBlock,
    OpenBlock,
    ReceiveBlock,
    SendBlock,
    StateBlock,
  },
  store::{
    AccountInfo,
    BlockEntry,
    ConfirmationInfo,
    PendingEntry,
    ReadTransaction,
    Store,
    StoreError,
    Transaction,
    WriteTransaction,
  },
};

use {
  crate::{
    primitives::{Account, BlockHash, Keypair, Link, Root},
    work,
  },
  std::time::{SystemTime, UNIX_EPOCH},
  tracing::warn,
};

pub type Amount = u128;

/// Outcome of classifying one block against the current ledger state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResult {
  /// Valid and persisted.
  Progress,
  /// The `previous` block is not in the ledger yet.
  GapPrevious,
  /// The source send is not in the ledger yet.
  GapSource,
  /// Already present.
  Old,
  /// Account-level signature does not verify.
  BadSignature,
  /// A send increasing the balance.
  NegativeSpend,
  /// No matching receivable for the claimed source.
  Unreceivable,
  /// Another block already occupies this root.
  Fork,
  /// Attempt to open a chain for the burn account.
  OpenedBurnAccount,
  /// State-receive amount disagrees with the pending entry.
  BalanceMismatch,
  /// Epoch block attempting to move the representative.
  RepresentativeMismatch,
  /// Legacy block appended onto a state chain.
  BlockPosition,
}

/// Chain configuration: the first block of the distinguished genesis
/// account and the total supply it opens with.
#[derive(Debug, Clone)]
pub struct Genesis {
  pub account: Account,
  pub block: Block,
  pub supply: Amount,
  /// Link value marking state blocks as epoch upgrades, when enabled.
  pub epoch_link: Option<Link>,
  pub epoch_signer: Account,
}

impl Genesis {
  /// Genesis owned by a caller-supplied keypair, used by the test
  /// harness and local development networks.
  pub fn new(keypair: &Keypair, supply: Amount) -> Self {
    let account = keypair.public();
    // the opening block of the genesis chain sources from the account
    // key itself, there is no send that precedes it
    let block =
      OpenBlock::new(BlockHash(*account.as_bytes()), account, keypair, 0);
    Self {
      account,
      block,
      supply,
      epoch_link: None,
      epoch_signer: account,
    }
  }

  pub fn hash(&self) -> BlockHash {
    self.block.hash()
  }
}

/// Account that provably cannot sign: sends to it destroy funds, and
/// opening a chain for it is rejected.
pub fn burn_account() -> Account {
  Account::zero()
}

pub struct Ledger {
  pub store: Store,
  pub genesis: Genesis,
}

impl Ledger {
  /// Opens the ledger over a store, inserting the genesis block on
  /// first use.
  pub fn new(store: Store, genesis: Genesis) -> Self {
    let ledger = Self { store, genesis };
    let txn = ledger.store.tx_begin_write();
    let hash = ledger.genesis.hash();
    if !ledger.store.block_exists(&txn, &hash) {
      ledger.store.block_put(&txn, &BlockEntry {
        block: ledger.genesis.block.clone(),
        account: ledger.genesis.account,
        height: 1,
        balance: ledger.genesis.supply,
        successor: None,
      });
      ledger.store.account_put(&txn, &ledger.genesis.account, &AccountInfo {
        head: hash,
        rep_block: hash,
        balance: ledger.genesis.supply,
        modified: unix_seconds(),
        block_count: 1,
      });
      ledger.store.representation_put(
        &txn,
        &ledger.genesis.account,
        ledger.genesis.supply,
      );
    }
    drop(txn);
    ledger
  }

  pub fn supply(&self) -> Amount {
    self.genesis.supply
  }

  // -- queries --------------------------------------------------------

  pub fn latest(
    &self,
    txn: &dyn Transaction,
    account: &Account,
  ) -> Option<BlockHash> {
    self.store.account_get(txn, account).map(|info| info.head)
  }

  pub fn account_balance(
    &self,
    txn: &dyn Transaction,
    account: &Account,
  ) -> Amount {
    self
      .store
      .account_get(txn, account)
      .map(|info| info.balance)
      .unwrap_or(0)
  }

  pub fn weight(&self, txn: &dyn Transaction, account: &Account) -> Amount {
    self.store.representation_get(txn, account)
  }

  /// The account owning a stored block.
  pub fn account(
    &self,
    txn: &dyn Transaction,
    hash: &BlockHash,
  ) -> Option<Account> {
    self.store.block_get(txn, hash).map(|entry| entry.account)
  }

  /// Balance of the chain after a stored block.
  pub fn balance(
    &self,
    txn: &dyn Transaction,
    hash: &BlockHash,
  ) -> Option<Amount> {
    self.store.block_get(txn, hash).map(|entry| entry.balance)
  }

  /// Absolute amount a stored block moved.
  pub fn amount(
    &self,
    txn: &dyn Transaction,
    hash: &BlockHash,
  ) -> Option<Amount> {
    let entry = self.store.block_get(txn, hash)?;
    let previous = entry.block.previous();
    let before = if previous.is_zero() {
      0
    } else {
      self.balance(txn, &previous)?
    };
    Some(entry.balance.abs_diff(before))
  }

  /// The representative an account currently delegates to.
  pub fn representative(
    &self,
    txn: &dyn Transaction,
    account: &Account,
  ) -> Option<Account> {
    let info = self.store.account_get(txn, account)?;
    let entry = self.store.block_get(txn, &info.rep_block)?;
    entry.block.representative()
  }

  /// The ledger's canonical block occupying a root, if any.
  pub fn successor(
    &self,
    txn: &dyn Transaction,
    root: &Root,
  ) -> Option<Block> {
    let hash = self.store.successor_get(txn, root)?;
    self.store.block_get(txn, &hash).map(|entry| entry.block)
  }

  /// The stored rival of a forked block: the block already occupying
  /// the same root.
  pub fn forked_block(
    &self,
    txn: &dyn Transaction,
    block: &Block,
  ) -> Option<Block> {
    self.successor(txn, &block.root())
  }

  /// True when every dependency of the block is either stored or
  /// queued ahead of it; used before rebroadcasting election winners.
  pub fn could_fit(&self, txn: &dyn Transaction, block: &Block) -> bool {
    let previous = block.previous();
    if !previous.is_zero() && !self.store.block_exists(txn, &previous) {
      return false;
    }
    if let Some(source) = self.dependent_source(txn, block) {
      if !self.store.block_exists(txn, &source) {
        return false;
      }
    }
    true
  }

  /// True for a state block that lowers its chain balance.
  pub fn is_send(&self, txn: &dyn Transaction, block: &StateBlock) -> bool {
    if block.previous.is_zero() {
      return false;
    }
    match self.balance(txn, &block.previous) {
      Some(before) => block.balance < before,
      None => false,
    }
  }

  /// The source hash a block consumes, when its variant consumes one.
  fn dependent_source(
    &self,
    txn: &dyn Transaction,
    block: &Block,
  ) -> Option<BlockHash> {
    match block {
      Block::Receive(b) => Some(b.source),
      Block::Open(b) => Some(b.source),
      Block::State(b) => {
        if b.link.is_zero() || Some(b.link) == self.genesis.epoch_link {
          return None;
        }
        let receiving = if b.previous.is_zero() {
          true
        } else {
          match self.balance(txn, &b.previous) {
            Some(before) => b.balance > before,
            // previous unknown, assume receive so the gap is reported
            // against the link as well once previous arrives
            None => false,
          }
        };
        receiving.then(|| b.link.as_hash())
      }
      _ => None,
    }
  }

  /// The dependency hash a gap classification is waiting on.
  pub fn gap_dependency(
    &self,
    txn: &dyn Transaction,
    block: &Block,
    result: ProcessResult,
  ) -> BlockHash {
    match result {
      ProcessResult::GapSource => self
        .dependent_source(txn, block)
        .unwrap_or_else(|| block.previous()),
      _ => block.previous(),
    }
  }

  // -- classification and application ---------------------------------

  /// Classifies a block against the current state and applies it when
  /// the classification is `Progress`. Must run under the single
  /// writable scope.
  pub fn process(
    &self,
    txn: &WriteTransaction,
    block: &Block,
  ) -> ProcessResult {
    let result = self.classify(txn, block);
    if result == ProcessResult::Progress {
      self.apply(txn, block);
    }
    result
  }

  fn classify(&self, txn: &WriteTransaction, block: &Block) -> ProcessResult {
    if self.store.block_exists(txn, &block.hash()) {
      return ProcessResult::Old;
    }
    match block {
      Block::Send(_) | Block::Receive(_) | Block::Change(_) => {
        self.classify_legacy(txn, block)
      }
      Block::Open(b) => self.classify_open(txn, block, b),
      Block::State(b) => self.classify_state(txn, b),
    }
  }

  fn classify_legacy(
    &self,
    txn: &WriteTransaction,
    block: &Block,
  ) -> ProcessResult {
    let previous = block.previous();
    let prev_entry = match self.store.block_get(txn, &previous) {
      Some(entry) => entry,
      None => return ProcessResult::GapPrevious,
    };
    // once a chain upgrades to state blocks it never goes back
    if matches!(prev_entry.block, Block::State(_)) {
      return ProcessResult::BlockPosition;
    }
    let account = prev_entry.account;
    if !block.verify_signature(&account) {
      return ProcessResult::BadSignature;
    }
    let info = match self.store.account_get(txn, &account) {
      Some(info) => info,
      None => return ProcessResult::GapPrevious,
    };
    if info.head != previous {
      return ProcessResult::Fork;
    }
    match block {
      Block::Send(b) => {
        if b.balance > info.balance {
          return ProcessResult::NegativeSpend;
        }
        ProcessResult::Progress
      }
      Block::Receive(b) => {
        self.classify_receivable(txn, &b.source, &account, None)
      }
      Block::Change(_) => ProcessResult::Progress,
      _ => unreachable!("legacy classifier only sees send/receive/change"),
    }
  }

  fn classify_open(
    &self,
    txn: &WriteTransaction,
    block: &Block,
    b: &OpenBlock,
  ) -> ProcessResult {
    if b.account == burn_account() {
      return ProcessResult::OpenedBurnAccount;
    }
    if !block.verify_signature(&b.account) {
      return ProcessResult::BadSignature;
    }
    if self.store.account_get(txn, &b.account).is_some() {
      return ProcessResult::Fork;
    }
    self.classify_receivable(txn, &b.source, &b.account, None)
  }

  fn classify_state(
    &self,
    txn: &WriteTransaction,
    b: &StateBlock,
  ) -> ProcessResult {
    let block = Block::State(b.clone());
    let is_epoch = Some(b.link) == self.genesis.epoch_link;
    let signed_by_account = block.verify_signature(&b.account);
    if !signed_by_account
      && !(is_epoch && block.verify_signature(&self.genesis.epoch_signer))
    {
      return ProcessResult::BadSignature;
    }
    if b.previous.is_zero() {
      // opening block of the account chain
      if b.account == burn_account() {
        return ProcessResult::OpenedBurnAccount;
      }
      if self.store.account_get(txn, &b.account).is_some() {
        return ProcessResult::Fork;
      }
      if is_epoch {
        return ProcessResult::Progress;
      }
      let source = b.link.as_hash();
      return self.classify_receivable(
        txn,
        &source,
        &b.account,
        Some(b.balance),
      );
    }
    let info = match self.store.account_get(txn, &b.account) {
      Some(info) => info,
      None => return ProcessResult::GapPrevious,
    };
    if !self.store.block_exists(txn, &b.previous) {
      return ProcessResult::GapPrevious;
    }
    if info.head != b.previous {
      return ProcessResult::Fork;
    }
    if b.balance > info.balance {
      // receive
      let source = b.link.as_hash();
      self.classify_receivable(
        txn,
        &source,
        &b.account,
        Some(b.balance - info.balance),
      )
    } else if b.balance < info.balance {
      // send, destination account rides in the link
      ProcessResult::Progress
    } else if b.link.is_zero() {
      // representative change only
      ProcessResult::Progress
    } else if is_epoch {
      if !signed_by_account
        && self.representative(txn, &b.account) != Some(b.representative)
      {
        return ProcessResult::RepresentativeMismatch;
      }
      ProcessResult::Progress
    } else {
      ProcessResult::BalanceMismatch
    }
  }

  /// Shared receivable check: the pending entry must exist, target the
  /// receiving account, and (for state receives) match the amount.
  fn classify_receivable(
    &self,
    txn: &WriteTransaction,
    source: &BlockHash,
    account: &Account,
    expected_amount: Option<Amount>,
  ) -> ProcessResult {
    match self.store.pending_get(txn, source) {
      None => {
        if self.store.block_exists(txn, source) {
          ProcessResult::Unreceivable
        } else {
          ProcessResult::GapSource
        }
      }
      Some(pending) => {
        if pending.destination != *account {
          return ProcessResult::Unreceivable;
        }
        if let Some(amount) = expected_amount {
          if pending.amount != amount {
            return ProcessResult::BalanceMismatch;
          }
        }
        ProcessResult::Progress
      }
    }
  }

  fn apply(&self, txn: &WriteTransaction, block: &Block) {
    let hash = block.hash();
    match block {
      Block::Send(b) => {
        let (account, info) = self.head_info(txn, &b.previous);
        let amount = info.balance - b.balance;
        let rep = self.representative(txn, &account);
        self.adjust_weight(txn, rep, amount, false);
        self.store.pending_put(txn, &hash, &PendingEntry {
          source: account,
          amount,
          destination: b.destination,
        });
        self.append(txn, block, account, b.balance, info, None);
      }
      Block::Receive(b) => {
        let (account, info) = self.head_info(txn, &b.previous);
        let pending = self
          .store
          .pending_get(txn, &b.source)
          .expect("classified receivable");
        self.store.pending_del(txn, &b.source);
        let rep = self.representative(txn, &account);
        self.adjust_weight(txn, rep, pending.amount, true);
        self.append(
          txn,
          block,
          account,
          info.balance + pending.amount,
          info,
          None,
        );
      }
      Block::Open(b) => {
        let pending = self
          .store
          .pending_get(txn, &b.source)
          .expect("classified receivable");
        self.store.pending_del(txn, &b.source);
        self.adjust_weight(txn, Some(b.representative), pending.amount, true);
        self.open(txn, block, b.account, pending.amount);
      }
      Block::Change(b) => {
        let (account, info) = self.head_info(txn, &b.previous);
        let old_rep = self.representative(txn, &account);
        self.adjust_weight(txn, old_rep, info.balance, false);
        self.adjust_weight(txn, Some(b.representative), info.balance, true);
        let balance = info.balance;
        self.append(txn, block, account, balance, info, Some(hash));
      }
      Block::State(b) => {
        if b.previous.is_zero() {
          let receiving = Some(b.link) != self.genesis.epoch_link;
          if receiving {
            self.store.pending_del(txn, &b.link.as_hash());
          }
          self.adjust_weight(txn, Some(b.representative), b.balance, true);
          self.open(txn, block, b.account, b.balance);
        } else {
          let info = self
            .store
            .account_get(txn, &b.account)
            .expect("classified against head");
          let old_rep = self.representative(txn, &b.account);
          if b.balance > info.balance {
            self.store.pending_del(txn, &b.link.as_hash());
          } else if b.balance < info.balance {
            self.store.pending_put(txn, &hash, &PendingEntry {
              source: b.account,
              amount: info.balance - b.balance,
              destination: b.link.as_account(),
            });
          }
          self.adjust_weight(txn, old_rep, info.balance, false);
          self.adjust_weight(txn, Some(b.representative), b.balance, true);
          self.append(txn, block, b.account, b.balance, info, Some(hash));
        }
      }
    }
  }

  /// Appends a non-opening block onto its chain, updating the
  /// predecessor's successor pointer and the account frontier.
  fn append(
    &self,
    txn: &WriteTransaction,
    block: &Block,
    account: Account,
    balance: Amount,
    info: AccountInfo,
    rep_block: Option<BlockHash>,
  ) {
    let hash = block.hash();
    let height = info.block_count + 1;
    self.store.block_put(txn, &BlockEntry {
      block: block.clone(),
      account,
      height,
      balance,
      successor: None,
    });
    if let Some(mut prev) = self.store.block_get(txn, &block.previous()) {
      prev.successor = Some(hash);
      self.store.block_replace(txn, &prev);
    }
    self.store.account_put(txn, &account, &AccountInfo {
      head: hash,
      rep_block: rep_block.unwrap_or(info.rep_block),
      balance,
      modified: unix_seconds(),
      block_count: height,
    });
  }

  fn open(
    &self,
    txn: &WriteTransaction,
    block: &Block,
    account: Account,
    balance: Amount,
  ) {
    let hash = block.hash();
    self.store.block_put(txn, &BlockEntry {
      block: block.clone(),
      account,
      height: 1,
      balance,
      successor: None,
    });
    self.store.account_put(txn, &account, &AccountInfo {
      head: hash,
      rep_block: hash,
      balance,
      modified: unix_seconds(),
      block_count: 1,
    });
  }

  fn head_info(
    &self,
    txn: &dyn Transaction,
    previous: &BlockHash,
  ) -> (Account, AccountInfo) {
    let entry = self
      .store
      .block_get(txn, previous)
      .expect("classified against stored previous");
    let info = self
      .store
      .account_get(txn, &entry.account)
      .expect("chain has account info");
    (entry.account, info)
  }

  fn adjust_weight(
    &self,
    txn: &WriteTransaction,
    representative: Option<Account>,
    amount: Amount,
    add: bool,
  ) {
    let rep = match representative {
      Some(rep) => rep,
      None => return,
    };
    let current = self.store.representation_get(txn, &rep);
    let next = if add {
      current.saturating_add(amount)
    } else {
      current.saturating_sub(amount)
    };
    self.store.representation_put(txn, &rep, next);
  }

  // -- rollback -------------------------------------------------------

  /// Removes `hash` and everything above it on its account chain,
  /// recursively rolling back receives on other chains that consumed
  /// sends being undone. Used when an election winner replaces a
  /// losing fork.
  pub fn rollback(&self, txn: &WriteTransaction, hash: &BlockHash) {
    while self.store.block_exists(txn, hash) {
      let entry = self
        .store
        .block_get(txn, hash)
        .expect("existence checked above");
      let info = self
        .store
        .account_get(txn, &entry.account)
        .expect("stored chains have account info");
      self.undo_head(txn, &entry.account, &info);
    }
  }

  /// Undoes the head block of one account chain.
  fn undo_head(
    &self,
    txn: &WriteTransaction,
    account: &Account,
    info: &AccountInfo,
  ) {
    let head = self
      .store
      .block_get(txn, &info.head)
      .expect("head is stored");
    let hash = head.block.hash();
    match &head.block {
      Block::Send(b) => {
        // if the receivable was already consumed, the consuming block
        // on the destination chain must go first
        if self.store.pending_get(txn, &hash).is_none() {
          if let Some(receiver) = self.find_receiver(txn, &b.destination, &hash)
          {
            warn!(
              "rolling back dependent receive {} of send {}",
              receiver, hash
            );
            self.rollback(txn, &receiver);
          }
        }
        self.store.pending_del(txn, &hash);
        let amount = self
          .balance(txn, &b.previous)
          .expect("previous is stored")
          - b.balance;
        let rep = self.representative(txn, account);
        self.adjust_weight(txn, rep, amount, true);
      }
      Block::Receive(b) => {
        let amount = head.balance
          - self.balance(txn, &b.previous).expect("previous is stored");
        let rep = self.representative(txn, account);
        self.adjust_weight(txn, rep, amount, false);
        self.restore_pending(txn, &b.source, account, amount);
      }
      Block::Open(b) => {
        self.adjust_weight(txn, Some(b.representative), head.balance, false);
        self.restore_pending(txn, &b.source, account, head.balance);
      }
      Block::Change(b) => {
        let old_rep = self
          .previous_representative(txn, &b.previous)
          .expect("chain below a change has a representative");
        self.adjust_weight(txn, Some(b.representative), head.balance, false);
        self.adjust_weight(txn, Some(old_rep), head.balance, true);
      }
      Block::State(b) => {
        if !b.previous.is_zero() {
          let prev_balance = self
            .balance(txn, &b.previous)
            .expect("previous is stored");
          if b.balance < prev_balance {
            // undoing a state send, same receivable discipline
            if self.store.pending_get(txn, &hash).is_none() {
              if let Some(receiver) =
                self.find_receiver(txn, &b.link.as_account(), &hash)
              {
                self.rollback(txn, &receiver);
              }
            }
            self.store.pending_del(txn, &hash);
          } else if b.balance > prev_balance {
            self.restore_pending(
              txn,
              &b.link.as_hash(),
              account,
              b.balance - prev_balance,
            );
          }
          self.adjust_weight(txn, Some(b.representative), b.balance, false);
          let old_rep = self
            .previous_representative(txn, &b.previous)
            .expect("chain below a state block has a representative");
          self.adjust_weight(txn, Some(old_rep), prev_balance, true);
        } else {
          self.adjust_weight(txn, Some(b.representative), b.balance, false);
          if Some(b.link) != self.genesis.epoch_link {
            self.restore_pending(txn, &b.link.as_hash(), account, b.balance);
          }
        }
      }
    }

    // detach from the store and restore the frontier
    self.store.block_del(txn, &hash);
    let previous = head.block.previous();
    if previous.is_zero() {
      self.store.account_del(txn, account);
    } else {
      let mut prev = self
        .store
        .block_get(txn, &previous)
        .expect("previous is stored");
      prev.successor = None;
      self.store.block_replace(txn, &prev);
      let rep_block = self.rep_block_at(txn, &previous);
      self.store.account_put(txn, account, &AccountInfo {
        head: previous,
        rep_block,
        balance: prev.balance,
        modified: unix_seconds(),
        block_count: head.height - 1,
      });
    }
  }

  /// Walks the destination chain looking for the block that consumed a
  /// given send.
  fn find_receiver(
    &self,
    txn: &dyn Transaction,
    destination: &Account,
    source: &BlockHash,
  ) -> Option<BlockHash> {
    let mut cursor = self.latest(txn, destination)?;
    loop {
      let entry = self.store.block_get(txn, &cursor)?;
      let consumed = match &entry.block {
        Block::Receive(b) => b.source == *source,
        Block::Open(b) => b.source == *source,
        Block::State(b) => b.link.as_hash() == *source,
        _ => false,
      };
      if consumed {
        return Some(cursor);
      }
      let previous = entry.block.previous();
      if previous.is_zero() {
        return None;
      }
      cursor = previous;
    }
  }

  fn restore_pending(
    &self,
    txn: &WriteTransaction,
    source: &BlockHash,
    destination: &Account,
    amount: Amount,
  ) {
    let source_account = self
      .account(txn, source)
      .expect("source block is stored below the receive");
    self.store.pending_put(txn, source, &PendingEntry {
      source: source_account,
      amount,
      destination: *destination,
    });
  }

  /// Representative in effect at a given chain position.
  fn previous_representative(
    &self,
    txn: &dyn Transaction,
    hash: &BlockHash,
  ) -> Option<Account> {
    let rep_block = self.rep_block_at(txn, hash);
    self
      .store
      .block_get(txn, &rep_block)
      .and_then(|entry| entry.block.representative())
  }

  /// Hash of the block that set the representative as of `hash`.
  fn rep_block_at(&self, txn: &dyn Transaction, hash: &BlockHash) -> BlockHash {
    let mut cursor = *hash;
    loop {
      let entry = match self.store.block_get(txn, &cursor) {
        Some(entry) => entry,
        None => return cursor,
      };
      if entry.block.representative().is_some() {
        return cursor;
      }
      cursor = entry.block.previous();
    }
  }

  /// Keeps the stored copy of an already-present block carrying the
  /// higher work value, so the better variant keeps circulating.
  pub fn refresh_work(&self, txn: &WriteTransaction, block: &Block) {
    let hash = block.hash();
    if let Some(mut entry) = self.store.block_get(txn, &hash) {
      let root = block.root();
      if work::value(&root, block.work())
        > work::value(&root, entry.block.work())
      {
        entry.block = block.clone();
        self.store.block_replace(txn, &entry);
      }
    }
  }
}

fn unix_seconds() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0)
}

#[cfg(test)]
mod tests {
  use {
    super::{
      burn_account,
      Genesis,
      Ledger,
      OpenBlock,
      ProcessResult,
      ReceiveBlock,
      SendBlock,
      StateBlock,
      Store,
    },
    crate::primitives::{BlockHash, Keypair},
  };

  fn ledger(supply: u128) -> (Ledger, Keypair) {
    let keypair = Keypair::random();
    let genesis = Genesis::new(&keypair, supply);
    let ledger = Ledger::new(Store::open_temporary().unwrap(), genesis);
    (ledger, keypair)
  }

  #[test]
  fn genesis_owns_the_supply() {
    let (ledger, keypair) = ledger(1000);
    let txn = ledger.store.tx_begin_read();
    assert_eq!(ledger.account_balance(&txn, &keypair.public()), 1000);
    assert_eq!(ledger.weight(&txn, &keypair.public()), 1000);
    assert_eq!(ledger.latest(&txn, &keypair.public()), Some(ledger.genesis.hash()));
  }

  #[test]
  fn send_receive_moves_funds_and_weight() {
    let (ledger, genesis) = ledger(1000);
    let other = Keypair::random();

    let send = SendBlock::new(
      ledger.genesis.hash(),
      other.public(),
      900,
      &genesis,
      0,
    );
    let txn = ledger.store.tx_begin_write();
    assert_eq!(ledger.process(&txn, &send), ProcessResult::Progress);
    // exactly one pending entry per unconsumed send
    assert!(ledger.store.pending_exists(&txn, &send.hash()));
    assert_eq!(ledger.weight(&txn, &genesis.public()), 900);

    let open = OpenBlock::new(send.hash(), other.public(), &other, 0);
    assert_eq!(ledger.process(&txn, &open), ProcessResult::Progress);
    assert!(!ledger.store.pending_exists(&txn, &send.hash()));
    assert_eq!(ledger.account_balance(&txn, &other.public()), 100);
    assert_eq!(ledger.weight(&txn, &other.public()), 100);
    assert_eq!(ledger.amount(&txn, &open.hash()), Some(100));
  }

  #[test]
  fn duplicate_is_old_and_changes_nothing() {
    let (ledger, genesis) = ledger(1000);
    let send = SendBlock::new(
      ledger.genesis.hash(),
      Keypair::random().public(),
      990,
      &genesis,
      0,
    );
    let txn = ledger.store.tx_begin_write();
    assert_eq!(ledger.process(&txn, &send), ProcessResult::Progress);
    let balance = ledger.account_balance(&txn, &genesis.public());
    assert_eq!(ledger.process(&txn, &send), ProcessResult::Old);
    assert_eq!(ledger.account_balance(&txn, &genesis.public()), balance);
  }

  #[test]
  fn fork_on_occupied_root() {
    let (ledger, genesis) = ledger(1000);
    let s1 = SendBlock::new(
      ledger.genesis.hash(),
      Keypair::random().public(),
      999,
      &genesis,
      0,
    );
    let s2 = SendBlock::new(
      ledger.genesis.hash(),
      Keypair::random().public(),
      998,
      &genesis,
      0,
    );
    let txn = ledger.store.tx_begin_write();
    assert_eq!(ledger.process(&txn, &s1), ProcessResult::Progress);
    assert_eq!(ledger.process(&txn, &s2), ProcessResult::Fork);
    assert_eq!(ledger.forked_block(&txn, &s2), Some(s1));
  }

  #[test]
  fn rejects_invalid_transitions() {
    let (ledger, genesis) = ledger(1000);
    let other = Keypair::random();
    let txn = ledger.store.tx_begin_write();

    // balance above previous
    let overspend = SendBlock::new(
      ledger.genesis.hash(),
      other.public(),
      2000,
      &genesis,
      0,
    );
    assert_eq!(
      ledger.process(&txn, &overspend),
      ProcessResult::NegativeSpend
    );

    // unknown previous
    let orphan = SendBlock::new(
      BlockHash::digest(&[b"nowhere"]),
      other.public(),
      1,
      &genesis,
      0,
    );
    assert_eq!(ledger.process(&txn, &orphan), ProcessResult::GapPrevious);

    // receive of a send that is not in the ledger
    let open = OpenBlock::new(
      BlockHash::digest(&[b"missing send"]),
      other.public(),
      &other,
      0,
    );
    assert_eq!(ledger.process(&txn, &open), ProcessResult::GapSource);

    // bad signature: send signed by the wrong key
    let forged = SendBlock::new(
      ledger.genesis.hash(),
      other.public(),
      900,
      &other,
      0,
    );
    assert_eq!(ledger.process(&txn, &forged), ProcessResult::BadSignature);

    // burn account cannot be opened
    let send = SendBlock::new(
      ledger.genesis.hash(),
      burn_account(),
      900,
      &genesis,
      0,
    );
    assert_eq!(ledger.process(&txn, &send), ProcessResult::Progress);
  }

  #[test]
  fn receive_twice_is_unreceivable() {
    let (ledger, genesis) = ledger(1000);
    let other = Keypair::random();
    let txn = ledger.store.tx_begin_write();

    let send =
      SendBlock::new(ledger.genesis.hash(), other.public(), 900, &genesis, 0);
    assert_eq!(ledger.process(&txn, &send), ProcessResult::Progress);
    let open = OpenBlock::new(send.hash(), other.public(), &other, 0);
    assert_eq!(ledger.process(&txn, &open), ProcessResult::Progress);

    let again = ReceiveBlock::new(open.hash(), send.hash(), &other, 0);
    assert_eq!(ledger.process(&txn, &again), ProcessResult::Unreceivable);
  }

  #[test]
  fn state_chain_send_receive() {
    let (ledger, genesis) = ledger(1000);
    let other = Keypair::random();
    let txn = ledger.store.tx_begin_write();

    let send = StateBlock::new(
      ledger.genesis.hash(),
      genesis.public(),
      600,
      other.public().into(),
      &genesis,
      0,
    );
    assert_eq!(ledger.process(&txn, &send), ProcessResult::Progress);
    assert!(ledger.store.pending_exists(&txn, &send.hash()));

    // wrong amount in the opening receive
    let bad_open = StateBlock::new(
      BlockHash::zero(),
      other.public(),
      399,
      send.hash().into(),
      &other,
      0,
    );
    assert_eq!(
      ledger.process(&txn, &bad_open),
      ProcessResult::BalanceMismatch
    );

    let open = StateBlock::new(
      BlockHash::zero(),
      other.public(),
      400,
      send.hash().into(),
      &other,
      0,
    );
    assert_eq!(ledger.process(&txn, &open), ProcessResult::Progress);
    assert_eq!(ledger.weight(&txn, &other.public()), 400);

    // legacy block can no longer extend the state chain
    let legacy = SendBlock::new(open.hash(), genesis.public(), 0, &other, 0);
    assert_eq!(ledger.process(&txn, &legacy), ProcessResult::BlockPosition);
  }

  #[test]
  fn rollback_restores_weight_and_pending() {
    let (ledger, genesis) = ledger(1000);
    let other = Keypair::random();
    let txn = ledger.store.tx_begin_write();

    let send =
      SendBlock::new(ledger.genesis.hash(), other.public(), 900, &genesis, 0);
    ledger.process(&txn, &send);
    let open = OpenBlock::new(send.hash(), other.public(), &other, 0);
    ledger.process(&txn, &open);

    // rolling back the send also unwinds the dependent open
    ledger.rollback(&txn, &send.hash());
    assert!(!ledger.store.block_exists(&txn, &send.hash()));
    assert!(!ledger.store.block_exists(&txn, &open.hash()));
    assert!(ledger.store.account_get(&txn, &other.public()).is_none());
    assert_eq!(ledger.weight(&txn, &genesis.public()), 1000);
    assert_eq!(ledger.account_balance(&txn, &genesis.public()), 1000);
    assert!(!ledger.store.pending_exists(&txn, &send.hash()));
    assert_eq!(
      ledger.latest(&txn, &genesis.public()),
      Some(ledger.genesis.hash())
    );
  }

  #[test]
  fn weight_tracks_representative_changes() {
    let (ledger, genesis) = ledger(1000);
    let rep = Keypair::random();
    let txn = ledger.store.tx_begin_write();

    let change = super::ChangeBlock::new(
      ledger.genesis.hash(),
      rep.public(),
      &genesis,
      0,
    );
    assert_eq!(ledger.process(&txn, &change), ProcessResult::Progress);
    assert_eq!(ledger.weight(&txn, &genesis.public()), 0);
    assert_eq!(ledger.weight(&txn, &rep.public()), 1000);
    assert_eq!(
      ledger.representative(&txn, &genesis.public()),
      Some(rep.public())
    );

    ledger.rollback(&txn, &change.hash());
    assert_eq!(ledger.weight(&txn, &genesis.public()), 1000);
    assert_eq!(ledger.weight(&txn, &rep.public()), 0);
  }
}
