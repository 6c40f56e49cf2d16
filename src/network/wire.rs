use {ed25519_dalek::Signature, thiserror::Error};

/// Decode failures for datagram payloads. The receive loop maps each
/// variant onto a statistics counter and drops the datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
  #[error("unexpected end of buffer")]
  Truncated,

  #[error("trailing bytes after message body")]
  Oversized,

  #[error("bad magic number")]
  BadMagic,

  #[error("unsupported protocol version {0}")]
  UnsupportedVersion(u8),

  #[error("unknown message type {0}")]
  UnknownMessageType(u8),

  #[error("unknown block type code {0}")]
  UnknownBlockType(u8),

  #[error("malformed signature bytes")]
  MalformedSignature,

  #[error("insufficient work")]
  InsufficientWork,
}

/// Cursor over a received datagram. All multi-byte integers on the
/// wire are big-endian except where a field is explicitly specified
/// as little-endian (header extensions, vote sequence, ports).
pub struct Reader<'a> {
  buf: &'a [u8],
}

impl<'a> Reader<'a> {
  pub fn new(buf: &'a [u8]) -> Self {
    Self { buf }
  }

  pub fn remaining(&self) -> usize {
    self.buf.len()
  }

  pub fn is_empty(&self) -> bool {
    self.buf.is_empty()
  }

  pub fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
    if self.buf.len() < n {
      return Err(WireError::Truncated);
    }
    let (head, tail) = self.buf.split_at(n);
    self.buf = tail;
    Ok(head)
  }

  pub fn u8(&mut self) -> Result<u8, WireError> {
    Ok(self.take(1)?[0])
  }

  pub fn u16_le(&mut self) -> Result<u16, WireError> {
    Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
  }

  pub fn u64_be(&mut self) -> Result<u64, WireError> {
    Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
  }

  pub fn u64_le(&mut self) -> Result<u64, WireError> {
    Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
  }

  pub fn u128_be(&mut self) -> Result<u128, WireError> {
    Ok(u128::from_be_bytes(self.take(16)?.try_into().unwrap()))
  }

  pub fn bytes32(&mut self) -> Result<[u8; 32], WireError> {
    Ok(self.take(32)?.try_into().unwrap())
  }

  pub fn signature(&mut self) -> Result<Signature, WireError> {
    Signature::from_bytes(self.take(64)?)
      .map_err(|_| WireError::MalformedSignature)
  }
}

#[cfg(test)]
mod tests {
  use super::{Reader, WireError};

  #[test]
  fn reader_consumes_in_order() {
    let mut buf = Vec::new();
    buf.push(7u8);
    buf.extend_from_slice(&513u16.to_le_bytes());
    buf.extend_from_slice(&99u64.to_be_bytes());
    let mut reader = Reader::new(&buf);
    assert_eq!(reader.u8().unwrap(), 7);
    assert_eq!(reader.u16_le().unwrap(), 513);
    assert_eq!(reader.u64_be().unwrap(), 99);
    assert!(reader.is_empty());
    assert_eq!(reader.u8(), Err(WireError::Truncated));
  }
}
