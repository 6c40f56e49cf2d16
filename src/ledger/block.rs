use {
  super::Amount,
  crate::{
    network::wire::{Reader, WireError},
    primitives::{Account, BlockHash, Keypair, Link, Root},
  },
  ed25519_dalek::Signature,
  serde::{Deserialize, Serialize},
  std::fmt::{Display, Formatter},
};

/// Wire codes for block variants. Code 1 (`NotABlock`) is used by
/// votes that carry hashes instead of a full block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
  NotABlock,
  Send,
  Receive,
  Open,
  Change,
  State,
}

impl BlockType {
  pub fn code(&self) -> u8 {
    match self {
      BlockType::NotABlock => 1,
      BlockType::Send => 2,
      BlockType::Receive => 3,
      BlockType::Open => 4,
      BlockType::Change => 5,
      BlockType::State => 6,
    }
  }

  pub fn from_code(code: u8) -> Option<Self> {
    match code {
      1 => Some(BlockType::NotABlock),
      2 => Some(BlockType::Send),
      3 => Some(BlockType::Receive),
      4 => Some(BlockType::Open),
      5 => Some(BlockType::Change),
      6 => Some(BlockType::State),
      _ => None,
    }
  }

  /// Serialized byte size of the block body for this type. Part of the
  /// header contract: receivers size-check datagrams against this.
  pub fn size(&self) -> usize {
    match self {
      BlockType::NotABlock => 0,
      BlockType::Send => 32 + 32 + 16 + 64 + 8,
      BlockType::Receive => 32 + 32 + 64 + 8,
      BlockType::Open => 32 + 32 + 32 + 64 + 8,
      BlockType::Change => 32 + 32 + 64 + 8,
      BlockType::State => 32 + 32 + 32 + 16 + 32 + 64 + 8,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendBlock {
  pub previous: BlockHash,
  pub destination: Account,
  pub balance: Amount,
  pub signature: Signature,
  pub work: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiveBlock {
  pub previous: BlockHash,
  pub source: BlockHash,
  pub signature: Signature,
  pub work: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenBlock {
  pub source: BlockHash,
  pub representative: Account,
  pub account: Account,
  pub signature: Signature,
  pub work: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeBlock {
  pub previous: BlockHash,
  pub representative: Account,
  pub signature: Signature,
  pub work: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateBlock {
  pub account: Account,
  pub previous: BlockHash,
  pub representative: Account,
  pub balance: Amount,
  pub link: Link,
  pub signature: Signature,
  pub work: u64,
}

/// A block in the lattice. Immutable once hashed: the digest covers the
/// variant-specific fields, signature and work ride alongside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Block {
  Send(SendBlock),
  Receive(ReceiveBlock),
  Open(OpenBlock),
  Change(ChangeBlock),
  State(StateBlock),
}

impl Block {
  pub fn block_type(&self) -> BlockType {
    match self {
      Block::Send(_) => BlockType::Send,
      Block::Receive(_) => BlockType::Receive,
      Block::Open(_) => BlockType::Open,
      Block::Change(_) => BlockType::Change,
      Block::State(_) => BlockType::State,
    }
  }

  /// The digest preimage starts with the type code so hashes of
  /// different variants can never collide on shared field layouts.
  pub fn hash(&self) -> BlockHash {
    let code = [self.block_type().code()];
    match self {
      Block::Send(b) => BlockHash::digest(&[
        &code,
        b.previous.as_bytes(),
        b.destination.as_bytes(),
        &b.balance.to_be_bytes(),
      ]),
      Block::Receive(b) => BlockHash::digest(&[
        &code,
        b.previous.as_bytes(),
        b.source.as_bytes(),
      ]),
      Block::Open(b) => BlockHash::digest(&[
        &code,
        b.source.as_bytes(),
        b.representative.as_bytes(),
        b.account.as_bytes(),
      ]),
      Block::Change(b) => BlockHash::digest(&[
        &code,
        b.previous.as_bytes(),
        b.representative.as_bytes(),
      ]),
      Block::State(b) => BlockHash::digest(&[
        &code,
        b.account.as_bytes(),
        b.previous.as_bytes(),
        b.representative.as_bytes(),
        &b.balance.to_be_bytes(),
        &b.link.0,
      ]),
    }
  }

  /// Zero for a chain's opening block.
  pub fn previous(&self) -> BlockHash {
    match self {
      Block::Send(b) => b.previous,
      Block::Receive(b) => b.previous,
      Block::Open(_) => BlockHash::zero(),
      Block::Change(b) => b.previous,
      Block::State(b) => b.previous,
    }
  }

  /// `previous` if non-zero, otherwise the account public key. Unique
  /// identifier of the election slot this block competes for.
  pub fn root(&self) -> Root {
    let previous = self.previous();
    if previous.is_zero() {
      match self {
        Block::Open(b) => b.account.into(),
        Block::State(b) => b.account.into(),
        // send/receive/change with a zero previous never pass
        // validation, their root is never consulted
        _ => Root::default(),
      }
    } else {
      previous.into()
    }
  }

  /// The account explicitly named by the block, when the variant
  /// carries one. For send/receive/change the owning account is only
  /// known to the ledger via the `previous` chain.
  pub fn account_field(&self) -> Option<Account> {
    match self {
      Block::Open(b) => Some(b.account),
      Block::State(b) => Some(b.account),
      _ => None,
    }
  }

  /// Source hash consumed by legacy receive variants.
  pub fn source(&self) -> Option<BlockHash> {
    match self {
      Block::Receive(b) => Some(b.source),
      Block::Open(b) => Some(b.source),
      _ => None,
    }
  }

  pub fn representative(&self) -> Option<Account> {
    match self {
      Block::Open(b) => Some(b.representative),
      Block::Change(b) => Some(b.representative),
      Block::State(b) => Some(b.representative),
      _ => None,
    }
  }

  pub fn balance_field(&self) -> Option<Amount> {
    match self {
      Block::Send(b) => Some(b.balance),
      Block::State(b) => Some(b.balance),
      _ => None,
    }
  }

  pub fn destination(&self) -> Option<Account> {
    match self {
      Block::Send(b) => Some(b.destination),
      _ => None,
    }
  }

  pub fn link(&self) -> Option<Link> {
    match self {
      Block::State(b) => Some(b.link),
      _ => None,
    }
  }

  pub fn work(&self) -> u64 {
    match self {
      Block::Send(b) => b.work,
      Block::Receive(b) => b.work,
      Block::Open(b) => b.work,
      Block::Change(b) => b.work,
      Block::State(b) => b.work,
    }
  }

  pub fn signature(&self) -> &Signature {
    match self {
      Block::Send(b) => &b.signature,
      Block::Receive(b) => &b.signature,
      Block::Open(b) => &b.signature,
      Block::Change(b) => &b.signature,
      Block::State(b) => &b.signature,
    }
  }

  /// Checks the account-level signature over the block hash.
  pub fn verify_signature(&self, account: &Account) -> bool {
    account.verify(self.hash().as_bytes(), self.signature())
  }

  pub fn serialize(&self, buf: &mut Vec<u8>) {
    match self {
      Block::Send(b) => {
        buf.extend_from_slice(b.previous.as_bytes());
        buf.extend_from_slice(b.destination.as_bytes());
        buf.extend_from_slice(&b.balance.to_be_bytes());
        buf.extend_from_slice(&b.signature.to_bytes());
        buf.extend_from_slice(&b.work.to_be_bytes());
      }
      Block::Receive(b) => {
        buf.extend_from_slice(b.previous.as_bytes());
        buf.extend_from_slice(b.source.as_bytes());
        buf.extend_from_slice(&b.signature.to_bytes());
        buf.extend_from_slice(&b.work.to_be_bytes());
      }
      Block::Open(b) => {
        buf.extend_from_slice(b.source.as_bytes());
        buf.extend_from_slice(b.representative.as_bytes());
        buf.extend_from_slice(b.account.as_bytes());
        buf.extend_from_slice(&b.signature.to_bytes());
        buf.extend_from_slice(&b.work.to_be_bytes());
      }
      Block::Change(b) => {
        buf.extend_from_slice(b.previous.as_bytes());
        buf.extend_from_slice(b.representative.as_bytes());
        buf.extend_from_slice(&b.signature.to_bytes());
        buf.extend_from_slice(&b.work.to_be_bytes());
      }
      Block::State(b) => {
        buf.extend_from_slice(b.account.as_bytes());
        buf.extend_from_slice(b.previous.as_bytes());
        buf.extend_from_slice(b.representative.as_bytes());
        buf.extend_from_slice(&b.balance.to_be_bytes());
        buf.extend_from_slice(&b.link.0);
        buf.extend_from_slice(&b.signature.to_bytes());
        buf.extend_from_slice(&b.work.to_be_bytes());
      }
    }
  }

  pub fn deserialize(
    block_type: BlockType,
    reader: &mut Reader,
  ) -> Result<Self, WireError> {
    Ok(match block_type {
      BlockType::NotABlock => return Err(WireError::UnknownBlockType(1)),
      BlockType::Send => Block::Send(SendBlock {
        previous: BlockHash(reader.bytes32()?),
        destination: Account::from_bytes(reader.bytes32()?),
        balance: reader.u128_be()?,
        signature: reader.signature()?,
        work: reader.u64_be()?,
      }),
      BlockType::Receive => Block::Receive(ReceiveBlock {
        previous: BlockHash(reader.bytes32()?),
        source: BlockHash(reader.bytes32()?),
        signature: reader.signature()?,
        work: reader.u64_be()?,
      }),
      BlockType::Open => Block::Open(OpenBlock {
        source: BlockHash(reader.bytes32()?),
        representative: Account::from_bytes(reader.bytes32()?),
        account: Account::from_bytes(reader.bytes32()?),
        signature: reader.signature()?,
        work: reader.u64_be()?,
      }),
      BlockType::Change => Block::Change(ChangeBlock {
        previous: BlockHash(reader.bytes32()?),
        representative: Account::from_bytes(reader.bytes32()?),
        signature: reader.signature()?,
        work: reader.u64_be()?,
      }),
      BlockType::State => Block::State(StateBlock {
        account: Account::from_bytes(reader.bytes32()?),
        previous: BlockHash(reader.bytes32()?),
        representative: Account::from_bytes(reader.bytes32()?),
        balance: reader.u128_be()?,
        link: Link(reader.bytes32()?),
        signature: reader.signature()?,
        work: reader.u64_be()?,
      }),
    })
  }
}

impl Display for Block {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Block::Send(_) => "send",
      Block::Receive(_) => "receive",
      Block::Open(_) => "open",
      Block::Change(_) => "change",
      Block::State(_) => "state",
    };
    write!(f, "{name}:{}", self.hash())
  }
}

impl SendBlock {
  pub fn new(
    previous: BlockHash,
    destination: Account,
    balance: Amount,
    keypair: &Keypair,
    work: u64,
  ) -> Block {
    let mut block = Block::Send(SendBlock {
      previous,
      destination,
      balance,
      signature: keypair.sign(&[]),
      work,
    });
    sign_in_place(&mut block, keypair);
    block
  }
}

impl ReceiveBlock {
  pub fn new(
    previous: BlockHash,
    source: BlockHash,
    keypair: &Keypair,
    work: u64,
  ) -> Block {
    let mut block = Block::Receive(ReceiveBlock {
      previous,
      source,
      signature: keypair.sign(&[]),
      work,
    });
    sign_in_place(&mut block, keypair);
    block
  }
}

impl OpenBlock {
  pub fn new(
    source: BlockHash,
    representative: Account,
    keypair: &Keypair,
    work: u64,
  ) -> Block {
    let mut block = Block::Open(OpenBlock {
      source,
      representative,
      account: keypair.public(),
      signature: keypair.sign(&[]),
      work,
    });
    sign_in_place(&mut block, keypair);
    block
  }
}

impl ChangeBlock {
  pub fn new(
    previous: BlockHash,
    representative: Account,
    keypair: &Keypair,
    work: u64,
  ) -> Block {
    let mut block = Block::Change(ChangeBlock {
      previous,
      representative,
      signature: keypair.sign(&[]),
      work,
    });
    sign_in_place(&mut block, keypair);
    block
  }
}

impl StateBlock {
  pub fn new(
    previous: BlockHash,
    representative: Account,
    balance: Amount,
    link: Link,
    keypair: &Keypair,
    work: u64,
  ) -> Block {
    let mut block = Block::State(StateBlock {
      account: keypair.public(),
      previous,
      representative,
      balance,
      link,
      signature: keypair.sign(&[]),
      work,
    });
    sign_in_place(&mut block, keypair);
    block
  }
}

fn sign_in_place(block: &mut Block, keypair: &Keypair) {
  let signature = keypair.sign(block.hash().as_bytes());
  match block {
    Block::Send(b) => b.signature = signature,
    Block::Receive(b) => b.signature = signature,
    Block::Open(b) => b.signature = signature,
    Block::Change(b) => b.signature = signature,
    Block::State(b) => b.signature = signature,
  }
}

#[cfg(test)]
mod tests {
  use {
    super::{
      Block,
      BlockType,
      ChangeBlock,
      OpenBlock,
      ReceiveBlock,
      SendBlock,
      StateBlock,
    },
    crate::{
      network::wire::Reader,
      primitives::{BlockHash, Keypair},
    },
  };

  fn roundtrip(block: Block) {
    let mut buf = Vec::new();
    block.serialize(&mut buf);
    assert_eq!(buf.len(), block.block_type().size());
    let mut reader = Reader::new(&buf);
    let decoded = Block::deserialize(block.block_type(), &mut reader).unwrap();
    assert_eq!(block, decoded);
    assert_eq!(block.hash(), decoded.hash());
  }

  #[test]
  fn serialize_roundtrip_all_variants() {
    let keypair = Keypair::random();
    let other = Keypair::random();
    let prev = BlockHash::digest(&[b"prev"]);
    let source = BlockHash::digest(&[b"source"]);

    roundtrip(SendBlock::new(prev, other.public(), 42, &keypair, 7));
    roundtrip(ReceiveBlock::new(prev, source, &keypair, 7));
    roundtrip(OpenBlock::new(source, other.public(), &keypair, 7));
    roundtrip(ChangeBlock::new(prev, other.public(), &keypair, 7));
    roundtrip(StateBlock::new(
      prev,
      other.public(),
      42,
      source.into(),
      &keypair,
      7,
    ));
  }

  #[test]
  fn signature_covers_hash() {
    let keypair = Keypair::random();
    let prev = BlockHash::digest(&[b"prev"]);
    let block =
      SendBlock::new(prev, Keypair::random().public(), 42, &keypair, 7);
    assert!(block.verify_signature(&keypair.public()));
    assert!(!block.verify_signature(&Keypair::random().public()));
  }

  #[test]
  fn root_follows_previous_or_account() {
    let keypair = Keypair::random();
    let source = BlockHash::digest(&[b"source"]);
    let open = OpenBlock::new(source, keypair.public(), &keypair, 0);
    assert_eq!(open.root(), keypair.public().into());

    let prev = BlockHash::digest(&[b"prev"]);
    let send =
      SendBlock::new(prev, Keypair::random().public(), 1, &keypair, 0);
    assert_eq!(send.root(), prev.into());
  }

  #[test]
  fn block_type_codes_are_stable() {
    for (code, expected) in [
      (1u8, BlockType::NotABlock),
      (2, BlockType::Send),
      (3, BlockType::Receive),
      (4, BlockType::Open),
      (5, BlockType::Change),
      (6, BlockType::State),
    ] {
      assert_eq!(BlockType::from_code(code), Some(expected));
      assert_eq!(expected.code(), code);
    }
    assert_eq!(BlockType::from_code(0), None);
    assert_eq!(BlockType::from_code(7), None);
  }
}
