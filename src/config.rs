use {
  crate::work,
  serde::{Deserialize, Serialize},
  std::{path::Path, time::Duration},
};

/// Which network the node joins. Selects the wire magic, the work
/// difficulty, timing constants, and whether private address ranges
/// are peers or noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
  Test,
  Beta,
  Live,
}

impl NetworkKind {
  pub fn magic(&self) -> [u8; 2] {
    match self {
      NetworkKind::Test => [b'T', b'A'],
      NetworkKind::Beta => [b'T', b'B'],
      NetworkKind::Live => [b'T', b'C'],
    }
  }

  pub fn work_threshold(&self) -> u64 {
    match self {
      NetworkKind::Test => 0,
      NetworkKind::Beta | NetworkKind::Live => work::LIVE_THRESHOLD,
    }
  }

  /// Loopback and private ranges are legitimate peers off the live
  /// network.
  pub fn allow_local_peers(&self) -> bool {
    !matches!(self, NetworkKind::Live)
  }

  /// Delay between a gap crossing the vote-weight threshold and the
  /// bootstrap check.
  pub fn gap_check_delay(&self) -> Duration {
    match self {
      NetworkKind::Test => Duration::from_millis(5),
      _ => Duration::from_secs(5),
    }
  }
}

/// Node configuration, loadable from a JSON file. Amount fields ride
/// as decimal strings so raw u128 units survive any JSON parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
  pub network: NetworkKind,
  pub peering_port: u16,
  #[serde(with = "amount_string")]
  pub receive_minimum: u128,
  #[serde(with = "amount_string")]
  pub online_weight_minimum: u128,
  /// Percent of online weight the leading tally must clear beyond
  /// the runner-up.
  pub online_weight_quorum: u8,
  pub enable_voting: bool,
  /// Numerator over 256 of online stake that gap votes must gather
  /// before bootstrap is considered.
  pub bootstrap_fraction_numerator: u8,
  pub preconfigured_peers: Vec<String>,
}

impl Default for NodeConfig {
  fn default() -> Self {
    Self {
      network: NetworkKind::Live,
      peering_port: 7075,
      receive_minimum: 1,
      online_weight_minimum: 60_000_000_000_000_000_000_000_000_000_000,
      online_weight_quorum: 50,
      enable_voting: true,
      bootstrap_fraction_numerator: 1,
      preconfigured_peers: Vec::new(),
    }
  }
}

impl NodeConfig {
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
  }

  pub fn save(&self, path: &Path) -> anyhow::Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(self)?)?;
    Ok(())
  }

  /// Settings for an in-process test network node: zero work, local
  /// peers, tiny quorum floor.
  pub fn test_default() -> Self {
    Self {
      network: NetworkKind::Test,
      peering_port: 0,
      receive_minimum: 1,
      online_weight_minimum: 0,
      online_weight_quorum: 50,
      enable_voting: true,
      bootstrap_fraction_numerator: 1,
      preconfigured_peers: Vec::new(),
    }
  }

  /// How often keepalives go out.
  pub fn keepalive_period(&self) -> Duration {
    Duration::from_secs(60)
  }

  /// Peers silent past this are purged; also the online-rep horizon.
  pub fn peer_cutoff(&self) -> Duration {
    Duration::from_secs(300)
  }

  pub fn syn_cookie_cutoff(&self) -> Duration {
    Duration::from_secs(120)
  }
}

mod amount_string {
  use serde::{de, Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(
    value: &u128,
    serializer: S,
  ) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(
    deserializer: D,
  ) -> Result<u128, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(de::Error::custom)
  }
}

#[cfg(test)]
mod tests {
  use super::{NetworkKind, NodeConfig};

  #[test]
  fn json_roundtrip_preserves_amounts() {
    let mut config = NodeConfig::default();
    config.online_weight_minimum = u128::MAX;
    config.preconfigured_peers = vec!["peering.example.net".into()];
    let encoded = serde_json::to_string_pretty(&config).unwrap();
    let decoded: NodeConfig = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded.online_weight_minimum, u128::MAX);
    assert_eq!(decoded.preconfigured_peers, config.preconfigured_peers);
    assert_eq!(decoded.network, NetworkKind::Live);
  }

  #[test]
  fn missing_fields_take_defaults() {
    let decoded: NodeConfig =
      serde_json::from_str(r#"{ "peering_port": 9000 }"#).unwrap();
    assert_eq!(decoded.peering_port, 9000);
    assert_eq!(decoded.online_weight_quorum, 50);
    assert!(decoded.enable_voting);
  }
}
