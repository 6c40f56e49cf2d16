use {
  super::block::Block,
  crate::{
    consensus::Vote,
    primitives::{Account, BlockHash, Root},
  },
  serde::{Deserialize, Serialize},
  std::{
    path::Path,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
  },
  thiserror::Error,
};

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("Serialization Error: {0}")]
  Serialization(#[from] bincode::Error),

  #[error("Storage Engine Error: {0}")]
  StorageEngine(#[from] sled::Error),

  #[error("System IO Error: {0}")]
  SystemIO(#[from] std::io::Error),
}

/// Per-account chain metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
  pub head: BlockHash,
  /// Hash of the block that last designated this account's
  /// representative.
  pub rep_block: BlockHash,
  pub balance: u128,
  /// Seconds since the unix epoch at the last head change.
  pub modified: u64,
  pub block_count: u64,
}

/// A receivable created by a send and not yet consumed by a matching
/// receive. Keyed in the store by the hash of the send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEntry {
  pub source: Account,
  pub amount: u128,
  pub destination: Account,
}

/// How far along an account chain has been cemented.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationInfo {
  pub height: u64,
  pub frontier: BlockHash,
}

/// A stored block plus the chain context needed to walk and roll back
/// without re-deriving it from the lattice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockEntry {
  pub block: Block,
  pub account: Account,
  pub height: u64,
  /// Balance of the account chain after this block.
  pub balance: u128,
  pub successor: Option<BlockHash>,
}

/// Opaque scope witnessing shared read access to the store.
pub struct ReadTransaction<'a> {
  _guard: RwLockReadGuard<'a, ()>,
}

/// Opaque scope witnessing exclusive write access. Only one exists at
/// any time; the block processor's drain loop holds it for a batch.
pub struct WriteTransaction<'a> {
  _guard: RwLockWriteGuard<'a, ()>,
}

/// Anything that witnesses at least read access.
pub trait Transaction {}
impl Transaction for ReadTransaction<'_> {}
impl Transaction for WriteTransaction<'_> {}

/// Transactional key-value persistence for blocks, account metadata,
/// pending receivables, votes, representative weights, the unchecked
/// buffer and confirmation heights.
///
/// Storage engine failures beyond this point are unrecoverable and
/// abort the process, matching the failure policy of the surrounding
/// node: a half-written lattice is worse than no node.
pub struct Store {
  _db: sled::Db,
  blocks: sled::Tree,
  accounts: sled::Tree,
  pending: sled::Tree,
  representation: sled::Tree,
  unchecked: sled::Tree,
  confirmation: sled::Tree,
  votes: sled::Tree,
  successors: sled::Tree,
  lock: RwLock<()>,
}

const FATAL: &str = "storage engine failure";

impl Store {
  pub fn open(directory: &Path) -> Result<Self, StoreError> {
    std::fs::create_dir_all(directory)?;
    let db = sled::Config::new().path(directory.join("ledger")).open()?;
    Self::from_db(db)
  }

  /// An in-memory database for tests and tooling.
  pub fn open_temporary() -> Result<Self, StoreError> {
    let db = sled::Config::new().temporary(true).open()?;
    Self::from_db(db)
  }

  fn from_db(db: sled::Db) -> Result<Self, StoreError> {
    Ok(Self {
      blocks: db.open_tree("blocks")?,
      accounts: db.open_tree("accounts")?,
      pending: db.open_tree("pending")?,
      representation: db.open_tree("representation")?,
      unchecked: db.open_tree("unchecked")?,
      confirmation: db.open_tree("confirmation")?,
      votes: db.open_tree("votes")?,
      successors: db.open_tree("successors")?,
      lock: RwLock::new(()),
      _db: db,
    })
  }

  pub fn tx_begin_read(&self) -> ReadTransaction<'_> {
    ReadTransaction {
      _guard: self.lock.read().expect("store lock poisoned"),
    }
  }

  pub fn tx_begin_write(&self) -> WriteTransaction<'_> {
    WriteTransaction {
      _guard: self.lock.write().expect("store lock poisoned"),
    }
  }

  // -- blocks ---------------------------------------------------------

  pub fn block_put(&self, _txn: &WriteTransaction, entry: &BlockEntry) {
    let hash = entry.block.hash();
    self
      .blocks
      .insert(hash.as_bytes(), bincode::serialize(entry).expect(FATAL))
      .expect(FATAL);
    self
      .successors
      .insert(entry.block.root().as_bytes(), hash.as_bytes())
      .expect(FATAL);
  }

  pub fn block_get(
    &self,
    _txn: &dyn Transaction,
    hash: &BlockHash,
  ) -> Option<BlockEntry> {
    self
      .blocks
      .get(hash.as_bytes())
      .expect(FATAL)
      .map(|bytes| bincode::deserialize(&bytes).expect(FATAL))
  }

  pub fn block_exists(&self, _txn: &dyn Transaction, hash: &BlockHash) -> bool {
    self.blocks.contains_key(hash.as_bytes()).expect(FATAL)
  }

  pub fn block_del(&self, _txn: &WriteTransaction, hash: &BlockHash) {
    if let Some(entry) = self.block_get(_txn, hash) {
      let root = entry.block.root();
      if let Some(current) = self.successors.get(root.as_bytes()).expect(FATAL)
      {
        if current.as_ref() == hash.as_bytes() {
          self.successors.remove(root.as_bytes()).expect(FATAL);
        }
      }
    }
    self.blocks.remove(hash.as_bytes()).expect(FATAL);
  }

  /// Rewrites a stored block in place. Used when a rebroadcast carries
  /// the same block with a higher work value, and when appending a
  /// child updates the predecessor's successor pointer.
  pub fn block_replace(&self, _txn: &WriteTransaction, entry: &BlockEntry) {
    self
      .blocks
      .insert(
        entry.block.hash().as_bytes(),
        bincode::serialize(entry).expect(FATAL),
      )
      .expect(FATAL);
  }

  /// A uniformly random stored block, used by the representative
  /// crawler as confirm_req bait.
  pub fn block_random(&self, _txn: &dyn Transaction) -> Option<BlockEntry> {
    let seed: [u8; 32] = rand::random();
    let mut iter = self.blocks.range(seed.as_slice()..);
    let pick = match iter.next() {
      Some(kv) => kv,
      None => self.blocks.iter().next()?,
    };
    let (_, bytes) = pick.expect(FATAL);
    Some(bincode::deserialize(&bytes).expect(FATAL))
  }

  pub fn block_count(&self, _txn: &dyn Transaction) -> u64 {
    self.blocks.len() as u64
  }

  // -- successor index ------------------------------------------------

  /// The canonical block occupying a root, if any.
  pub fn successor_get(
    &self,
    _txn: &dyn Transaction,
    root: &Root,
  ) -> Option<BlockHash> {
    self
      .successors
      .get(root.as_bytes())
      .expect(FATAL)
      .map(|bytes| BlockHash(bytes.as_ref().try_into().expect(FATAL)))
  }

  pub fn root_exists(&self, txn: &dyn Transaction, root: &Root) -> bool {
    self.successor_get(txn, root).is_some()
  }

  // -- accounts -------------------------------------------------------

  pub fn account_put(
    &self,
    _txn: &WriteTransaction,
    account: &Account,
    info: &AccountInfo,
  ) {
    self
      .accounts
      .insert(account.as_bytes(), bincode::serialize(info).expect(FATAL))
      .expect(FATAL);
  }

  pub fn account_get(
    &self,
    _txn: &dyn Transaction,
    account: &Account,
  ) -> Option<AccountInfo> {
    self
      .accounts
      .get(account.as_bytes())
      .expect(FATAL)
      .map(|bytes| bincode::deserialize(&bytes).expect(FATAL))
  }

  pub fn account_del(&self, _txn: &WriteTransaction, account: &Account) {
    self.accounts.remove(account.as_bytes()).expect(FATAL);
  }

  pub fn account_count(&self, _txn: &dyn Transaction) -> u64 {
    self.accounts.len() as u64
  }

  // -- pending --------------------------------------------------------

  pub fn pending_put(
    &self,
    _txn: &WriteTransaction,
    send_hash: &BlockHash,
    entry: &PendingEntry,
  ) {
    self
      .pending
      .insert(send_hash.as_bytes(), bincode::serialize(entry).expect(FATAL))
      .expect(FATAL);
  }

  pub fn pending_get(
    &self,
    _txn: &dyn Transaction,
    send_hash: &BlockHash,
  ) -> Option<PendingEntry> {
    self
      .pending
      .get(send_hash.as_bytes())
      .expect(FATAL)
      .map(|bytes| bincode::deserialize(&bytes).expect(FATAL))
  }

  pub fn pending_del(&self, _txn: &WriteTransaction, send_hash: &BlockHash) {
    self.pending.remove(send_hash.as_bytes()).expect(FATAL);
  }

  pub fn pending_exists(
    &self,
    txn: &dyn Transaction,
    send_hash: &BlockHash,
  ) -> bool {
    self.pending_get(txn, send_hash).is_some()
  }

  // -- representation -------------------------------------------------

  pub fn representation_get(
    &self,
    _txn: &dyn Transaction,
    account: &Account,
  ) -> u128 {
    self
      .representation
      .get(account.as_bytes())
      .expect(FATAL)
      .map(|bytes| u128::from_be_bytes(bytes.as_ref().try_into().expect(FATAL)))
      .unwrap_or(0)
  }

  pub fn representation_put(
    &self,
    _txn: &WriteTransaction,
    account: &Account,
    weight: u128,
  ) {
    if weight == 0 {
      self.representation.remove(account.as_bytes()).expect(FATAL);
    } else {
      self
        .representation
        .insert(account.as_bytes(), &weight.to_be_bytes())
        .expect(FATAL);
    }
  }

  // -- unchecked ------------------------------------------------------

  /// Stages a block under the dependency hash it is waiting for.
  pub fn unchecked_put(
    &self,
    txn: &WriteTransaction,
    dependency: &BlockHash,
    block: &Block,
  ) {
    let mut blocks = self.unchecked_get(txn, dependency);
    if !blocks.contains(block) {
      blocks.push(block.clone());
      self
        .unchecked
        .insert(
          dependency.as_bytes(),
          bincode::serialize(&blocks).expect(FATAL),
        )
        .expect(FATAL);
    }
  }

  pub fn unchecked_get(
    &self,
    _txn: &dyn Transaction,
    dependency: &BlockHash,
  ) -> Vec<Block> {
    self
      .unchecked
      .get(dependency.as_bytes())
      .expect(FATAL)
      .map(|bytes| bincode::deserialize(&bytes).expect(FATAL))
      .unwrap_or_default()
  }

  pub fn unchecked_del(&self, _txn: &WriteTransaction, dependency: &BlockHash) {
    self.unchecked.remove(dependency.as_bytes()).expect(FATAL);
  }

  pub fn unchecked_count(&self, _txn: &dyn Transaction) -> u64 {
    self.unchecked.len() as u64
  }

  // -- confirmation heights -------------------------------------------

  pub fn confirmation_put(
    &self,
    _txn: &WriteTransaction,
    account: &Account,
    info: &ConfirmationInfo,
  ) {
    self
      .confirmation
      .insert(account.as_bytes(), bincode::serialize(info).expect(FATAL))
      .expect(FATAL);
  }

  pub fn confirmation_get(
    &self,
    _txn: &dyn Transaction,
    account: &Account,
  ) -> ConfirmationInfo {
    self
      .confirmation
      .get(account.as_bytes())
      .expect(FATAL)
      .map(|bytes| bincode::deserialize(&bytes).expect(FATAL))
      .unwrap_or_default()
  }

  // -- votes ----------------------------------------------------------

  /// Stores the vote if it supersedes the one on record and returns
  /// the highest-sequence vote known for the account.
  pub fn vote_max(&self, _txn: &dyn Transaction, vote: &Vote) -> Vote {
    let key = vote.account.as_bytes();
    let stored: Option<Vote> = self
      .votes
      .get(key)
      .expect(FATAL)
      .map(|bytes| bincode::deserialize(&bytes).expect(FATAL));
    match stored {
      Some(stored) if stored.sequence >= vote.sequence => stored,
      _ => {
        self
          .votes
          .insert(key, bincode::serialize(vote).expect(FATAL))
          .expect(FATAL);
        vote.clone()
      }
    }
  }

  pub fn vote_get(
    &self,
    _txn: &dyn Transaction,
    account: &Account,
  ) -> Option<Vote> {
    self
      .votes
      .get(account.as_bytes())
      .expect(FATAL)
      .map(|bytes| bincode::deserialize(&bytes).expect(FATAL))
  }
}

#[cfg(test)]
mod tests {
  use {
    super::{AccountInfo, BlockEntry, PendingEntry, Store},
    crate::{
      ledger::block::SendBlock,
      primitives::{BlockHash, Keypair},
    },
  };

  #[test]
  fn block_put_get_roundtrip() {
    let store = Store::open_temporary().unwrap();
    let keypair = Keypair::random();
    let prev = BlockHash::digest(&[b"prev"]);
    let block =
      SendBlock::new(prev, Keypair::random().public(), 5, &keypair, 1);
    let entry = BlockEntry {
      block: block.clone(),
      account: keypair.public(),
      height: 2,
      balance: 5,
      successor: None,
    };

    let txn = store.tx_begin_write();
    store.block_put(&txn, &entry);
    drop(txn);

    let txn = store.tx_begin_read();
    let loaded = store.block_get(&txn, &block.hash()).unwrap();
    assert_eq!(loaded.block, block);
    assert_eq!(loaded.height, 2);
    assert_eq!(store.successor_get(&txn, &block.root()), Some(block.hash()));
  }

  #[test]
  fn representation_defaults_to_zero() {
    let store = Store::open_temporary().unwrap();
    let account = Keypair::random().public();
    let txn = store.tx_begin_write();
    assert_eq!(store.representation_get(&txn, &account), 0);
    store.representation_put(&txn, &account, 1000);
    assert_eq!(store.representation_get(&txn, &account), 1000);
    store.representation_put(&txn, &account, 0);
    assert_eq!(store.representation_get(&txn, &account), 0);
  }

  #[test]
  fn pending_lifecycle() {
    let store = Store::open_temporary().unwrap();
    let hash = BlockHash::digest(&[b"send"]);
    let entry = PendingEntry {
      source: Keypair::random().public(),
      amount: 100,
      destination: Keypair::random().public(),
    };
    let txn = store.tx_begin_write();
    store.pending_put(&txn, &hash, &entry);
    assert_eq!(store.pending_get(&txn, &hash), Some(entry));
    store.pending_del(&txn, &hash);
    assert!(!store.pending_exists(&txn, &hash));
  }

  #[test]
  fn account_info_roundtrip() {
    let store = Store::open_temporary().unwrap();
    let account = Keypair::random().public();
    let info = AccountInfo {
      head: BlockHash::digest(&[b"head"]),
      rep_block: BlockHash::digest(&[b"rep"]),
      balance: 42,
      modified: 7,
      block_count: 3,
    };
    let txn = store.tx_begin_write();
    store.account_put(&txn, &account, &info);
    assert_eq!(store.account_get(&txn, &account), Some(info));
  }
}
