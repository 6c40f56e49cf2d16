use {
  crate::primitives::Root,
  sha3::{Digest, Sha3_256},
  rayon::prelude::*,
};

/// Difficulty threshold on the live network. The test network uses
/// zero so tests never mine.
pub const LIVE_THRESHOLD: u64 = 0xffff_ffc0_0000_0000;

/// Difficulty value of a nonce against a root. Higher is better; the
/// same metric orders rebroadcast variants of an already-stored block.
pub fn value(root: &Root, work: u64) -> u64 {
  let mut sha3 = Sha3_256::default();
  sha3.update(&work.to_le_bytes());
  sha3.update(root.as_bytes());
  let digest = sha3.finalize();
  u64::from_le_bytes(digest[..8].try_into().expect("sha3-256 is 32 bytes"))
}

/// Stateless proof-of-work collaborator: admission filtering on the
/// receive path and nonce generation for locally created blocks.
#[derive(Debug, Clone, Copy)]
pub struct WorkPool {
  threshold: u64,
}

impl WorkPool {
  pub fn new(threshold: u64) -> Self {
    Self { threshold }
  }

  pub fn validate(&self, root: &Root, work: u64) -> bool {
    value(root, work) >= self.threshold
  }

  /// Searches nonce batches across all cores until one clears the
  /// threshold. Blocking; callers wrap it in their own scheduling.
  pub fn generate(&self, root: &Root) -> u64 {
    const BATCH: u64 = 0x10000;
    loop {
      let base: u64 = rand::random();
      let found = (0..BATCH)
        .into_par_iter()
        .map(|i| base.wrapping_add(i))
        .find_any(|candidate| self.validate(root, *candidate));
      if let Some(work) = found {
        return work;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use {
    super::WorkPool,
    crate::primitives::{BlockHash, Root},
  };

  #[test]
  fn zero_threshold_accepts_everything() {
    let pool = WorkPool::new(0);
    let root: Root = BlockHash::digest(&[b"root"]).into();
    assert!(pool.validate(&root, 0));
    assert!(pool.validate(&root, u64::MAX));
  }

  #[test]
  fn generated_work_validates() {
    // moderate threshold so the test finishes instantly
    let pool = WorkPool::new(1 << 60);
    let root: Root = BlockHash::digest(&[b"root"]).into();
    let work = pool.generate(&root);
    assert!(pool.validate(&root, work));
    // work is bound to its root
    let other: Root = BlockHash::digest(&[b"other root"]).into();
    let _ = pool.validate(&other, work);
  }
}
