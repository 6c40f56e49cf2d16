use {
  crate::stats::{StatDetail, StatDir, StatType, Stats},
  std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
  },
  tracing::info,
};

/// Entry point into the catch-up subsystem. The pull/push streams
/// themselves live outside the consensus core; what the core needs is
/// an idempotent trigger with an in-progress gate so gap-driven timers
/// can fire it repeatedly without stacking attempts.
pub struct BootstrapTrigger {
  in_progress: AtomicBool,
  attempts: AtomicU64,
  stats: Arc<Stats>,
}

impl BootstrapTrigger {
  pub fn new(stats: Arc<Stats>) -> Self {
    Self {
      in_progress: AtomicBool::new(false),
      attempts: AtomicU64::new(0),
      stats,
    }
  }

  pub fn in_progress(&self) -> bool {
    self.in_progress.load(Ordering::SeqCst)
  }

  /// Requests a catch-up run. Returns true when this call started one;
  /// false when an attempt was already running.
  pub fn start(&self) -> bool {
    if self.in_progress.swap(true, Ordering::SeqCst) {
      return false;
    }
    self.attempts.fetch_add(1, Ordering::SeqCst);
    self.stats.inc(
      StatType::Bootstrap,
      StatDetail::BootstrapTrigger,
      StatDir::Out,
    );
    info!("bootstrap attempt started");
    true
  }

  /// Called by the bootstrap owner when an attempt finishes.
  pub fn finish(&self) {
    self.in_progress.store(false, Ordering::SeqCst);
  }

  pub fn attempts(&self) -> u64 {
    self.attempts.load(Ordering::SeqCst)
  }
}

#[cfg(test)]
mod tests {
  use {super::BootstrapTrigger, crate::stats::Stats, std::sync::Arc};

  #[test]
  fn in_progress_gates_reentry() {
    let trigger = BootstrapTrigger::new(Arc::new(Stats::new()));
    assert!(!trigger.in_progress());
    assert!(trigger.start());
    assert!(!trigger.start());
    assert_eq!(trigger.attempts(), 1);
    trigger.finish();
    assert!(trigger.start());
    assert_eq!(trigger.attempts(), 2);
  }
}
