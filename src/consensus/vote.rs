use {
  crate::{
    ledger::{Block, BlockType},
    network::wire::{Reader, WireError},
    primitives::{Account, BlockHash, Keypair},
  },
  ed25519_dalek::Signature,
  itertools::Itertools,
  serde::{Deserialize, Serialize},
  std::fmt::{Debug, Formatter},
};

/// Sequence value carrying final-vote semantics: bypasses the per-rep
/// cooldown and forces immediate quorum consideration.
pub const FINAL_SEQUENCE: u64 = u64::MAX;

/// What a vote endorses: either a full block (which the receiver may
/// not have yet) or the hashes of blocks it is assumed to know.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub enum VotePayload {
  Block(Block),
  Hashes(Vec<BlockHash>),
}

/// A signed statement by a representative endorsing one block per
/// root. Higher sequences supersede lower ones from the same account.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
  pub account: Account,
  pub signature: Signature,
  pub sequence: u64,
  pub payload: VotePayload,
}

impl Vote {
  pub fn new(keypair: &Keypair, sequence: u64, payload: VotePayload) -> Self {
    let message = Self::signing_message(sequence, &payload);
    Self {
      account: keypair.public(),
      signature: keypair.sign(&message),
      sequence,
      payload,
    }
  }

  /// Canonical serialization of `(sequence, payload)` that the
  /// signature covers: referenced hashes then the sequence.
  fn signing_message(sequence: u64, payload: &VotePayload) -> Vec<u8> {
    let mut message = Vec::new();
    match payload {
      VotePayload::Block(block) => {
        message.extend_from_slice(block.hash().as_bytes());
      }
      VotePayload::Hashes(hashes) => {
        for hash in hashes {
          message.extend_from_slice(hash.as_bytes());
        }
      }
    }
    message.extend_from_slice(&sequence.to_le_bytes());
    message
  }

  pub fn validate(&self) -> bool {
    let message = Self::signing_message(self.sequence, &self.payload);
    self.account.verify(&message, &self.signature)
  }

  pub fn is_final(&self) -> bool {
    self.sequence == FINAL_SEQUENCE
  }

  /// All block hashes this vote endorses.
  pub fn hashes(&self) -> Vec<BlockHash> {
    match &self.payload {
      VotePayload::Block(block) => vec![block.hash()],
      VotePayload::Hashes(hashes) => hashes.clone(),
    }
  }

  pub fn block(&self) -> Option<&Block> {
    match &self.payload {
      VotePayload::Block(block) => Some(block),
      VotePayload::Hashes(_) => None,
    }
  }

  pub fn hashes_string(&self) -> String {
    self.hashes().iter().map(|hash| hash.to_string()).join(", ")
  }

  /// The block type code announced in the enclosing message header.
  pub fn block_type(&self) -> BlockType {
    match &self.payload {
      VotePayload::Block(block) => block.block_type(),
      VotePayload::Hashes(_) => BlockType::NotABlock,
    }
  }

  pub fn serialize(&self, buf: &mut Vec<u8>) {
    buf.extend_from_slice(self.account.as_bytes());
    buf.extend_from_slice(&self.signature.to_bytes());
    buf.extend_from_slice(&self.sequence.to_le_bytes());
    match &self.payload {
      VotePayload::Block(block) => block.serialize(buf),
      VotePayload::Hashes(hashes) => {
        for hash in hashes {
          buf.extend_from_slice(hash.as_bytes());
        }
      }
    }
  }

  pub fn deserialize(
    block_type: BlockType,
    reader: &mut Reader,
  ) -> Result<Self, WireError> {
    let account = Account::from_bytes(reader.bytes32()?);
    let signature = reader.signature()?;
    let sequence = reader.u64_le()?;
    let payload = match block_type {
      BlockType::NotABlock => {
        let mut hashes = Vec::new();
        while !reader.is_empty() {
          hashes.push(BlockHash(reader.bytes32()?));
        }
        if hashes.is_empty() {
          return Err(WireError::Truncated);
        }
        VotePayload::Hashes(hashes)
      }
      other => VotePayload::Block(Block::deserialize(other, reader)?),
    };
    Ok(Self {
      account,
      signature,
      sequence,
      payload,
    })
  }
}

impl Debug for Vote {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Vote")
      .field("account", &self.account)
      .field("sequence", &self.sequence)
      .field("hashes", &self.hashes_string())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use {
    super::{Vote, VotePayload, FINAL_SEQUENCE},
    crate::{
      ledger::SendBlock,
      network::wire::Reader,
      primitives::{BlockHash, Keypair},
    },
  };

  #[test]
  fn vote_signature_verifies_under_signer_only() {
    let keypair = Keypair::random();
    let vote = Vote::new(
      &keypair,
      5,
      VotePayload::Hashes(vec![BlockHash::digest(&[b"block"])]),
    );
    assert!(vote.validate());

    let mut forged = vote.clone();
    forged.account = Keypair::random().public();
    assert!(!forged.validate());

    let mut bumped = vote;
    bumped.sequence = 6;
    assert!(!bumped.validate());
  }

  #[test]
  fn final_sequence_is_max() {
    let keypair = Keypair::random();
    let vote = Vote::new(
      &keypair,
      FINAL_SEQUENCE,
      VotePayload::Hashes(vec![BlockHash::digest(&[b"block"])]),
    );
    assert!(vote.is_final());
    assert!(vote.validate());
  }

  #[test]
  fn wire_roundtrip_block_and_hash_payloads() {
    let keypair = Keypair::random();
    let block = SendBlock::new(
      BlockHash::digest(&[b"prev"]),
      Keypair::random().public(),
      10,
      &keypair,
      3,
    );

    for vote in [
      Vote::new(&keypair, 1, VotePayload::Block(block)),
      Vote::new(
        &keypair,
        2,
        VotePayload::Hashes(vec![
          BlockHash::digest(&[b"one"]),
          BlockHash::digest(&[b"two"]),
        ]),
      ),
    ] {
      let mut buf = Vec::new();
      vote.serialize(&mut buf);
      let mut reader = Reader::new(&buf);
      let decoded = Vote::deserialize(vote.block_type(), &mut reader).unwrap();
      assert_eq!(vote, decoded);
      assert!(decoded.validate());
    }
  }
}
