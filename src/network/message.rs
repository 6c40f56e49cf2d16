use {
  super::wire::{Reader, WireError},
  crate::{
    consensus::Vote,
    ledger::{Block, BlockType},
    primitives::Account,
    work::WorkPool,
  },
  ed25519_dalek::Signature,
  std::net::{Ipv6Addr, SocketAddrV6},
};

/// Highest protocol version this node speaks.
pub const PROTOCOL_VERSION: u8 = 13;
/// Oldest peer version still understood.
pub const PROTOCOL_VERSION_MIN: u8 = 11;
/// Version from which peers prove their node identity with a
/// syn-cookie handshake before entering the peer table.
pub const NODE_ID_VERSION: u8 = 12;

/// Peer endpoints are ipv6 on the wire; v4 senders are mapped.
pub type Endpoint = SocketAddrV6;

pub fn null_endpoint() -> Endpoint {
  SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
  Keepalive,
  Publish,
  ConfirmReq,
  ConfirmAck,
  BulkPull,
  BulkPush,
  FrontierReq,
  NodeIdHandshake,
  BulkPullAccount,
}

impl MessageType {
  pub fn code(&self) -> u8 {
    match self {
      MessageType::Keepalive => 2,
      MessageType::Publish => 3,
      MessageType::ConfirmReq => 4,
      MessageType::ConfirmAck => 5,
      MessageType::BulkPull => 6,
      MessageType::BulkPush => 7,
      MessageType::FrontierReq => 8,
      MessageType::NodeIdHandshake => 10,
      MessageType::BulkPullAccount => 11,
    }
  }

  pub fn from_code(code: u8) -> Option<Self> {
    match code {
      2 => Some(MessageType::Keepalive),
      3 => Some(MessageType::Publish),
      4 => Some(MessageType::ConfirmReq),
      5 => Some(MessageType::ConfirmAck),
      6 => Some(MessageType::BulkPull),
      7 => Some(MessageType::BulkPush),
      8 => Some(MessageType::FrontierReq),
      10 => Some(MessageType::NodeIdHandshake),
      11 => Some(MessageType::BulkPullAccount),
      _ => None,
    }
  }
}

/// Fixed 8-byte prefix of every datagram: 2-byte magic, then
/// `{version_max, version_using, version_min, type, extensions}`.
/// Extension bits 8-15 carry the block type for block-bearing
/// messages; bits 0 and 1 flag the handshake query/response halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
  pub magic: [u8; 2],
  pub version_max: u8,
  pub version_using: u8,
  pub version_min: u8,
  pub message_type: MessageType,
  pub extensions: u16,
}

const HANDSHAKE_QUERY_FLAG: u16 = 1;
const HANDSHAKE_RESPONSE_FLAG: u16 = 1 << 1;

impl MessageHeader {
  pub fn new(magic: [u8; 2], message_type: MessageType) -> Self {
    Self {
      magic,
      version_max: PROTOCOL_VERSION,
      version_using: PROTOCOL_VERSION,
      version_min: PROTOCOL_VERSION_MIN,
      message_type,
      extensions: 0,
    }
  }

  pub fn block_type(&self) -> Option<BlockType> {
    BlockType::from_code(((self.extensions >> 8) & 0xff) as u8)
  }

  pub fn set_block_type(&mut self, block_type: BlockType) {
    self.extensions =
      (self.extensions & 0x00ff) | ((block_type.code() as u16) << 8);
  }

  pub fn serialize(&self, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&self.magic);
    buf.push(self.version_max);
    buf.push(self.version_using);
    buf.push(self.version_min);
    buf.push(self.message_type.code());
    buf.extend_from_slice(&self.extensions.to_le_bytes());
  }

  pub fn deserialize(
    magic: [u8; 2],
    reader: &mut Reader,
  ) -> Result<Self, WireError> {
    let actual: [u8; 2] = reader.take(2)?.try_into().unwrap();
    if actual != magic {
      return Err(WireError::BadMagic);
    }
    let version_max = reader.u8()?;
    let version_using = reader.u8()?;
    let version_min = reader.u8()?;
    if version_min > PROTOCOL_VERSION {
      return Err(WireError::UnsupportedVersion(version_min));
    }
    let type_code = reader.u8()?;
    let message_type = MessageType::from_code(type_code)
      .ok_or(WireError::UnknownMessageType(type_code))?;
    let extensions = reader.u16_le()?;
    Ok(Self {
      magic,
      version_max,
      version_using,
      version_min,
      message_type,
      extensions,
    })
  }
}

/// A parsed datagram body.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
  /// 8 peer endpoints for the gossip exchange.
  Keepalive([Endpoint; 8]),
  Publish(Block),
  ConfirmReq(Block),
  ConfirmAck(Vote),
  NodeIdHandshake {
    query: Option<[u8; 32]>,
    response: Option<(Account, Signature)>,
  },
  /// Recognized bulk/frontier traffic outside the consensus core; the
  /// bootstrap subsystem owns these streams.
  OutOfScope(MessageType),
}

impl Message {
  pub fn message_type(&self) -> MessageType {
    match self {
      Message::Keepalive(_) => MessageType::Keepalive,
      Message::Publish(_) => MessageType::Publish,
      Message::ConfirmReq(_) => MessageType::ConfirmReq,
      Message::ConfirmAck(_) => MessageType::ConfirmAck,
      Message::NodeIdHandshake { .. } => MessageType::NodeIdHandshake,
      Message::OutOfScope(t) => *t,
    }
  }

  /// Full datagram bytes: header then body.
  pub fn serialize(&self, magic: [u8; 2]) -> Vec<u8> {
    let mut header = MessageHeader::new(magic, self.message_type());
    match self {
      Message::Publish(block) | Message::ConfirmReq(block) => {
        header.set_block_type(block.block_type());
      }
      Message::ConfirmAck(vote) => {
        header.set_block_type(vote.block_type());
      }
      Message::NodeIdHandshake { query, response } => {
        if query.is_some() {
          header.extensions |= HANDSHAKE_QUERY_FLAG;
        }
        if response.is_some() {
          header.extensions |= HANDSHAKE_RESPONSE_FLAG;
        }
      }
      _ => {}
    }

    let mut buf = Vec::new();
    header.serialize(&mut buf);
    match self {
      Message::Keepalive(peers) => {
        for peer in peers {
          buf.extend_from_slice(&peer.ip().octets());
          buf.extend_from_slice(&peer.port().to_le_bytes());
        }
      }
      Message::Publish(block) | Message::ConfirmReq(block) => {
        block.serialize(&mut buf);
      }
      Message::ConfirmAck(vote) => {
        vote.serialize(&mut buf);
      }
      Message::NodeIdHandshake { query, response } => {
        if let Some(cookie) = query {
          buf.extend_from_slice(cookie);
        }
        if let Some((account, signature)) = response {
          buf.extend_from_slice(account.as_bytes());
          buf.extend_from_slice(&signature.to_bytes());
        }
      }
      Message::OutOfScope(_) => {}
    }
    buf
  }

  /// Parses a datagram, charging proof-of-work on every carried block
  /// before the body is accepted.
  pub fn deserialize(
    buf: &[u8],
    magic: [u8; 2],
    work: &WorkPool,
  ) -> Result<(MessageHeader, Message), WireError> {
    let mut reader = Reader::new(buf);
    let header = MessageHeader::deserialize(magic, &mut reader)?;
    let message = match header.message_type {
      MessageType::Keepalive => {
        let mut peers = [null_endpoint(); 8];
        for peer in peers.iter_mut() {
          let octets: [u8; 16] = reader.take(16)?.try_into().unwrap();
          let port = reader.u16_le()?;
          *peer = SocketAddrV6::new(Ipv6Addr::from(octets), port, 0, 0);
        }
        Message::Keepalive(peers)
      }
      MessageType::Publish | MessageType::ConfirmReq => {
        let code = ((header.extensions >> 8) & 0xff) as u8;
        let block_type =
          header.block_type().ok_or(WireError::UnknownBlockType(code))?;
        let block = Block::deserialize(block_type, &mut reader)?;
        if !work.validate(&block.root(), block.work()) {
          return Err(WireError::InsufficientWork);
        }
        if header.message_type == MessageType::Publish {
          Message::Publish(block)
        } else {
          Message::ConfirmReq(block)
        }
      }
      MessageType::ConfirmAck => {
        let code = ((header.extensions >> 8) & 0xff) as u8;
        let block_type =
          header.block_type().ok_or(WireError::UnknownBlockType(code))?;
        let vote = Vote::deserialize(block_type, &mut reader)?;
        if let Some(block) = vote.block() {
          if !work.validate(&block.root(), block.work()) {
            return Err(WireError::InsufficientWork);
          }
        }
        Message::ConfirmAck(vote)
      }
      MessageType::NodeIdHandshake => {
        let query = if header.extensions & HANDSHAKE_QUERY_FLAG != 0 {
          Some(reader.bytes32()?)
        } else {
          None
        };
        let response = if header.extensions & HANDSHAKE_RESPONSE_FLAG != 0 {
          let account = Account::from_bytes(reader.bytes32()?);
          let signature = reader.signature()?;
          Some((account, signature))
        } else {
          None
        };
        Message::NodeIdHandshake { query, response }
      }
      other => Message::OutOfScope(other),
    };
    if !reader.is_empty() && !matches!(message, Message::OutOfScope(_)) {
      return Err(WireError::Oversized);
    }
    Ok((header, message))
  }
}

#[cfg(test)]
mod tests {
  use {
    super::{Message, MessageHeader, MessageType, PROTOCOL_VERSION},
    crate::{
      consensus::{Vote, VotePayload},
      ledger::SendBlock,
      network::wire::WireError,
      primitives::{BlockHash, Keypair},
      work::WorkPool,
    },
    std::net::{Ipv6Addr, SocketAddrV6},
  };

  const MAGIC: [u8; 2] = [b'T', b'A'];

  fn work() -> WorkPool {
    WorkPool::new(0)
  }

  fn roundtrip(message: Message) {
    let bytes = message.serialize(MAGIC);
    let (header, decoded) =
      Message::deserialize(&bytes, MAGIC, &work()).unwrap();
    assert_eq!(header.version_using, PROTOCOL_VERSION);
    assert_eq!(message, decoded);
  }

  fn sample_block() -> crate::ledger::Block {
    SendBlock::new(
      BlockHash::digest(&[b"prev"]),
      Keypair::random().public(),
      12,
      &Keypair::random(),
      99,
    )
  }

  #[test]
  fn roundtrip_all_message_types() {
    let mut peers =
      [SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0); 8];
    peers[0] = SocketAddrV6::new(Ipv6Addr::LOCALHOST, 7075, 0, 0);
    roundtrip(Message::Keepalive(peers));
    roundtrip(Message::Publish(sample_block()));
    roundtrip(Message::ConfirmReq(sample_block()));

    let keypair = Keypair::random();
    roundtrip(Message::ConfirmAck(Vote::new(
      &keypair,
      3,
      VotePayload::Block(sample_block()),
    )));
    roundtrip(Message::ConfirmAck(Vote::new(
      &keypair,
      4,
      VotePayload::Hashes(vec![BlockHash::digest(&[b"h"])]),
    )));

    let cookie = [9u8; 32];
    let signature = keypair.sign(&cookie);
    roundtrip(Message::NodeIdHandshake {
      query: Some(cookie),
      response: None,
    });
    roundtrip(Message::NodeIdHandshake {
      query: Some(cookie),
      response: Some((keypair.public(), signature)),
    });
    roundtrip(Message::NodeIdHandshake {
      query: None,
      response: Some((keypair.public(), signature)),
    });
  }

  #[test]
  fn rejects_wrong_magic_and_type() {
    let bytes = Message::Publish(sample_block()).serialize(MAGIC);
    assert_eq!(
      Message::deserialize(&bytes, [b'T', b'C'], &work()),
      Err(WireError::BadMagic)
    );

    let mut mangled = bytes;
    mangled[5] = 99; // unknown message type
    assert_eq!(
      Message::deserialize(&mangled, MAGIC, &work()),
      Err(WireError::UnknownMessageType(99))
    );
  }

  #[test]
  fn rejects_insufficient_work() {
    let bytes = Message::Publish(sample_block()).serialize(MAGIC);
    let strict = WorkPool::new(u64::MAX);
    assert_eq!(
      Message::deserialize(&bytes, MAGIC, &strict),
      Err(WireError::InsufficientWork)
    );
  }

  #[test]
  fn rejects_truncated_and_oversized() {
    let bytes = Message::Publish(sample_block()).serialize(MAGIC);
    assert_eq!(
      Message::deserialize(&bytes[..bytes.len() - 1], MAGIC, &work()),
      Err(WireError::Truncated)
    );
    let mut padded = bytes;
    padded.push(0);
    assert_eq!(
      Message::deserialize(&padded, MAGIC, &work()),
      Err(WireError::Oversized)
    );
  }

  #[test]
  fn header_extension_bits_cover_block_types() {
    let block = sample_block();
    let bytes = Message::Publish(block.clone()).serialize(MAGIC);
    let mut reader = crate::network::wire::Reader::new(&bytes);
    let header = MessageHeader::deserialize(MAGIC, &mut reader).unwrap();
    assert_eq!(header.message_type, MessageType::Publish);
    assert_eq!(header.block_type(), Some(block.block_type()));
  }
}
