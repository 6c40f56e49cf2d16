use dashmap::DashMap;

/// Broad category of a counted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatType {
  Message,
  Vote,
  Ledger,
  Error,
  Traffic,
  Election,
  Bootstrap,
}

/// Specific event within a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatDetail {
  All,
  Keepalive,
  Publish,
  ConfirmReq,
  ConfirmAck,
  NodeIdHandshake,
  OutOfScope,
  BadSender,
  BadMagic,
  InvalidHeader,
  InvalidMessage,
  UnknownMessageType,
  InsufficientWork,
  VoteValid,
  VoteReplay,
  VoteInvalid,
  VoteIndeterminate,
  Fork,
  Old,
  GapPrevious,
  GapSource,
  Rollback,
  ElectionStart,
  ElectionConfirm,
  ElectionAbort,
  ElectionExpired,
  ElectionDropOverflow,
  BootstrapTrigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatDir {
  In,
  Out,
}

/// Lock-free counter table for transport, vote and election events.
/// Recoverable failures are counted and dropped rather than
/// propagated, so the counters are the only trace they leave.
#[derive(Default)]
pub struct Stats {
  counters: DashMap<(StatType, StatDetail, StatDir), u64>,
}

impl Stats {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn inc(&self, stat_type: StatType, detail: StatDetail, dir: StatDir) {
    self.add(stat_type, detail, dir, 1);
  }

  pub fn add(
    &self,
    stat_type: StatType,
    detail: StatDetail,
    dir: StatDir,
    value: u64,
  ) {
    *self.counters.entry((stat_type, detail, dir)).or_insert(0) += value;
  }

  pub fn count(
    &self,
    stat_type: StatType,
    detail: StatDetail,
    dir: StatDir,
  ) -> u64 {
    self
      .counters
      .get(&(stat_type, detail, dir))
      .map(|entry| *entry)
      .unwrap_or(0)
  }
}

#[cfg(test)]
mod tests {
  use super::{StatDetail, StatDir, StatType, Stats};

  #[test]
  fn counters_accumulate_independently() {
    let stats = Stats::new();
    stats.inc(StatType::Message, StatDetail::Publish, StatDir::In);
    stats.inc(StatType::Message, StatDetail::Publish, StatDir::In);
    stats.inc(StatType::Message, StatDetail::Publish, StatDir::Out);
    stats.add(StatType::Traffic, StatDetail::All, StatDir::In, 512);

    assert_eq!(
      stats.count(StatType::Message, StatDetail::Publish, StatDir::In),
      2
    );
    assert_eq!(
      stats.count(StatType::Message, StatDetail::Publish, StatDir::Out),
      1
    );
    assert_eq!(stats.count(StatType::Traffic, StatDetail::All, StatDir::In), 512);
    assert_eq!(stats.count(StatType::Vote, StatDetail::All, StatDir::In), 0);
  }
}
