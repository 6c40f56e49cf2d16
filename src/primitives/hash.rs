use {
  super::{Account, ToBase58String},
  sha3::{Digest, Sha3_256},
  serde::{Deserialize, Serialize},
  std::fmt::{Debug, Display, Formatter},
};

/// SHA3-256 digest identifying a block.
///
/// The digest covers the variant-specific hashable fields of a block
/// and excludes the signature and the work nonce, so rebroadcasts that
/// carry a higher work value still refer to the same block.
#[derive(
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Default,
  Serialize,
  Deserialize,
)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
  pub const fn zero() -> Self {
    Self([0u8; 32])
  }

  pub fn is_zero(&self) -> bool {
    self.0 == [0u8; 32]
  }

  pub fn as_bytes(&self) -> &[u8; 32] {
    &self.0
  }

  /// Digest of a sequence of byte slices.
  pub fn digest(parts: &[&[u8]]) -> Self {
    let mut sha3 = Sha3_256::default();
    for part in parts {
      sha3.update(part);
    }
    Self(sha3.finalize().try_into().expect("sha3-256 is 32 bytes"))
  }
}

impl Display for BlockHash {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0.as_slice().to_b58())
  }
}

impl Debug for BlockHash {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "BlockHash({})", self.0.as_slice().to_b58())
  }
}

impl From<[u8; 32]> for BlockHash {
  fn from(bytes: [u8; 32]) -> Self {
    Self(bytes)
  }
}

/// Identity of an election: the `previous` hash of a block, or the
/// account public key for a chain's opening block. Exactly one block
/// per root may become canonical.
#[derive(
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Default,
  Serialize,
  Deserialize,
)]
pub struct Root(pub [u8; 32]);

impl Root {
  pub fn as_bytes(&self) -> &[u8; 32] {
    &self.0
  }
}

impl Display for Root {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0.as_slice().to_b58())
  }
}

impl Debug for Root {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "Root({})", self.0.as_slice().to_b58())
  }
}

impl From<BlockHash> for Root {
  fn from(hash: BlockHash) -> Self {
    Self(hash.0)
  }
}

impl From<Account> for Root {
  fn from(account: Account) -> Self {
    Self(*account.as_bytes())
  }
}

/// The link field of a state block. Depending on the balance delta it
/// is read as a send destination account, a receive source hash, or
/// zero for a pure representative change.
#[derive(
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Default,
  Serialize,
  Deserialize,
)]
pub struct Link(pub [u8; 32]);

impl Link {
  pub fn is_zero(&self) -> bool {
    self.0 == [0u8; 32]
  }

  pub fn as_hash(&self) -> BlockHash {
    BlockHash(self.0)
  }

  pub fn as_account(&self) -> Account {
    Account::from_bytes(self.0)
  }
}

impl Debug for Link {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "Link({})", self.0.as_slice().to_b58())
  }
}

impl From<BlockHash> for Link {
  fn from(hash: BlockHash) -> Self {
    Self(hash.0)
  }
}

impl From<Account> for Link {
  fn from(account: Account) -> Self {
    Self(*account.as_bytes())
  }
}

#[cfg(test)]
mod tests {
  use super::BlockHash;

  #[test]
  fn digest_is_stable() {
    let one = BlockHash::digest(&[b"alpha", b"beta"]);
    let two = BlockHash::digest(&[b"alpha", b"beta"]);
    let three = BlockHash::digest(&[b"alphab", b"eta"]);
    assert_eq!(one, two);
    // concatenation boundary does not matter, only the byte stream
    assert_eq!(one, three);
    assert!(!one.is_zero());
    assert!(BlockHash::zero().is_zero());
  }
}
