use {
  crate::primitives::BlockHash,
  std::{collections::HashSet, sync::Mutex},
};

/// Hashes currently used as representative-discovery bait. A vote
/// observed for an active hash identifies its sender as a probable
/// representative, and the peer table records the weight.
pub struct RepCrawler {
  active: Mutex<HashSet<BlockHash>>,
}

impl RepCrawler {
  pub fn new() -> Self {
    Self {
      active: Mutex::new(HashSet::new()),
    }
  }

  pub fn add(&self, hash: BlockHash) {
    self.active.lock().unwrap().insert(hash);
  }

  pub fn remove(&self, hash: &BlockHash) {
    self.active.lock().unwrap().remove(hash);
  }

  pub fn exists(&self, hash: &BlockHash) -> bool {
    self.active.lock().unwrap().contains(hash)
  }
}

impl Default for RepCrawler {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use {super::RepCrawler, crate::primitives::BlockHash};

  #[test]
  fn tracks_active_hashes() {
    let crawler = RepCrawler::new();
    let hash = BlockHash::digest(&[b"bait"]);
    assert!(!crawler.exists(&hash));
    crawler.add(hash);
    assert!(crawler.exists(&hash));
    crawler.remove(&hash);
    assert!(!crawler.exists(&hash));
  }
}
