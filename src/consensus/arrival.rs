use {
  crate::primitives::BlockHash,
  std::{
    collections::{HashSet, VecDeque},
    sync::Mutex,
    time::{Duration, Instant},
  },
};

/// Blocks seen here arrived over the network recently, so a `progress`
/// in the block processor starts an election for them. Blocks replayed
/// out of bootstrap never enter the cache and settle silently.
pub struct BlockArrival {
  inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
  order: VecDeque<(Instant, BlockHash)>,
  hashes: HashSet<BlockHash>,
}

const ARRIVAL_SIZE_MIN: usize = 128;
const ARRIVAL_TIME_MIN: Duration = Duration::from_millis(300);

impl BlockArrival {
  pub fn new() -> Self {
    Self {
      inner: Mutex::new(Inner::default()),
    }
  }

  /// Records a network arrival. Returns true when the hash was already
  /// recorded, letting callers skip duplicate processing.
  pub fn add(&self, hash: BlockHash) -> bool {
    let mut inner = self.inner.lock().unwrap();
    if !inner.hashes.insert(hash) {
      return true;
    }
    inner.order.push_back((Instant::now(), hash));
    false
  }

  pub fn recent(&self, hash: &BlockHash) -> bool {
    let mut inner = self.inner.lock().unwrap();
    let now = Instant::now();
    while inner.order.len() > ARRIVAL_SIZE_MIN {
      match inner.order.front() {
        Some((arrived, _)) if *arrived + ARRIVAL_TIME_MIN < now => {
          let (_, old) = inner.order.pop_front().expect("peeked");
          inner.hashes.remove(&old);
        }
        _ => break,
      }
    }
    inner.hashes.contains(hash)
  }
}

impl Default for BlockArrival {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use {super::BlockArrival, crate::primitives::BlockHash};

  #[test]
  fn add_reports_duplicates() {
    let arrival = BlockArrival::new();
    let hash = BlockHash::digest(&[b"block"]);
    assert!(!arrival.add(hash));
    assert!(arrival.add(hash));
    assert!(arrival.recent(&hash));
    assert!(!arrival.recent(&BlockHash::digest(&[b"other"])));
  }

  #[test]
  fn keeps_at_least_the_minimum_window() {
    let arrival = BlockArrival::new();
    for i in 0..200u32 {
      arrival.add(BlockHash::digest(&[&i.to_le_bytes()]));
    }
    // all entries are fresh, nothing is trimmed yet
    for i in 0..200u32 {
      assert!(arrival.recent(&BlockHash::digest(&[&i.to_le_bytes()])));
    }
  }
}
