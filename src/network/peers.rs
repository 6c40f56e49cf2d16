use {
  super::message::{Endpoint, NODE_ID_VERSION, PROTOCOL_VERSION_MIN},
  crate::primitives::Account,
  ed25519_dalek::Signature,
  rand::seq::SliceRandom,
  std::{
    collections::{HashMap, HashSet},
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6},
    sync::Mutex,
    time::{Duration, Instant},
  },
  tracing::debug,
};

/// Everything the node tracks about one datagram peer.
#[derive(Debug, Clone)]
pub struct PeerInfo {
  pub endpoint: Endpoint,
  pub last_contact: Instant,
  pub last_attempt: Instant,
  pub last_bootstrap_attempt: Option<Instant>,
  pub last_rep_request: Option<Instant>,
  pub last_rep_response: Option<Instant>,
  pub rep_weight: u128,
  pub probable_rep_account: Account,
  pub network_version: u8,
  pub node_id: Option<Account>,
}

impl PeerInfo {
  fn new(endpoint: Endpoint, network_version: u8) -> Self {
    let now = Instant::now();
    Self {
      endpoint,
      last_contact: now,
      last_attempt: now,
      last_bootstrap_attempt: None,
      last_rep_request: None,
      last_rep_response: None,
      rep_weight: 0,
      probable_rep_account: Account::zero(),
      network_version,
      node_id: None,
    }
  }
}

struct SynCookie {
  cookie: [u8; 32],
  created: Instant,
}

#[derive(Default)]
struct PeersState {
  peers: HashMap<Endpoint, PeerInfo>,
  /// Endpoints we already reached out to, so keepalive gossip does not
  /// spam unknown addresses.
  attempts: HashMap<Endpoint, Instant>,
}

#[derive(Default)]
struct CookieState {
  cookies: HashMap<Endpoint, SynCookie>,
  per_ip: HashMap<Ipv6Addr, usize>,
}

/// Table of known endpoints with per-IP caps, representative weight
/// hints and the syn-cookie challenges of in-flight handshakes.
pub struct Peers {
  state: Mutex<PeersState>,
  cookies: Mutex<CookieState>,
  self_endpoint: Endpoint,
  max_peers_per_ip: usize,
  /// Loopback and private ranges count as reserved on the live
  /// network only.
  allow_local: bool,
}

pub const MAX_PEERS_PER_IP: usize = 10;

impl Peers {
  pub fn new(
    self_endpoint: Endpoint,
    allow_local: bool,
  ) -> Self {
    Self {
      state: Mutex::new(PeersState::default()),
      cookies: Mutex::new(CookieState::default()),
      self_endpoint,
      max_peers_per_ip: MAX_PEERS_PER_IP,
      allow_local,
    }
  }

  pub fn size(&self) -> usize {
    self.state.lock().unwrap().peers.len()
  }

  pub fn size_sqrt(&self) -> usize {
    (self.size() as f64).sqrt().ceil() as usize
  }

  pub fn empty(&self) -> bool {
    self.size() == 0
  }

  pub fn known_peer(&self, endpoint: &Endpoint) -> bool {
    self.state.lock().unwrap().peers.contains_key(endpoint)
  }

  /// Addresses that never belong in the table: reserved ranges,
  /// ourselves, and the unspecified address.
  pub fn not_a_peer(&self, endpoint: &Endpoint, blacklist_loopback: bool) -> bool {
    endpoint.ip().is_unspecified()
      || reserved_address(endpoint, blacklist_loopback, self.allow_local)
      || *endpoint == self.self_endpoint
  }

  /// Registers datagram contact from a peer. Returns true when the
  /// sender speaks a handshake-capable protocol version but is not in
  /// the table yet, i.e. a syn cookie should be issued.
  pub fn contacted(&self, endpoint: &Endpoint, version: u8) -> bool {
    if version < NODE_ID_VERSION {
      // legacy peers predating the handshake are inserted directly
      self.insert(endpoint, version);
      return false;
    }
    if self.known_peer(endpoint) {
      self.insert(endpoint, version);
      return false;
    }
    let state = self.state.lock().unwrap();
    let ip_count = state
      .peers
      .keys()
      .filter(|peer| peer.ip() == endpoint.ip())
      .count();
    ip_count < self.max_peers_per_ip
  }

  /// Inserts or refreshes a peer. Returns true when the endpoint is
  /// newly inserted.
  pub fn insert(&self, endpoint: &Endpoint, version: u8) -> bool {
    if self.not_a_peer(endpoint, false) || version < PROTOCOL_VERSION_MIN {
      return false;
    }
    let mut state = self.state.lock().unwrap();
    if let Some(info) = state.peers.get_mut(endpoint) {
      info.last_contact = Instant::now();
      return false;
    }
    let ip_count = state
      .peers
      .keys()
      .filter(|peer| peer.ip() == endpoint.ip())
      .count();
    if ip_count >= self.max_peers_per_ip {
      debug!("peer table rejects {endpoint}, per-ip cap reached");
      return false;
    }
    state.peers.insert(*endpoint, PeerInfo::new(*endpoint, version));
    true
  }

  /// Records the node identity proven by a validated handshake.
  pub fn set_node_id(&self, endpoint: &Endpoint, node_id: Account) {
    let mut state = self.state.lock().unwrap();
    if let Some(info) = state.peers.get_mut(endpoint) {
      info.node_id = Some(node_id);
    }
  }

  /// Whether an unknown endpoint should be contacted. True means
  /// skip: invalid, already known, or already attempted.
  pub fn reachout(&self, endpoint: &Endpoint) -> bool {
    if self.not_a_peer(endpoint, false) {
      return true;
    }
    if self.known_peer(endpoint) {
      return true;
    }
    let mut state = self.state.lock().unwrap();
    let attempted = state.attempts.contains_key(endpoint);
    state.attempts.insert(*endpoint, Instant::now());
    attempted
  }

  /// Drops peers silent past the cutoff and returns the survivors
  /// (with their pre-purge attempt timestamps) for keepalive rounds.
  pub fn purge_list(&self, cutoff: Duration) -> Vec<PeerInfo> {
    let mut state = self.state.lock().unwrap();
    let now = Instant::now();
    state
      .peers
      .retain(|_, info| now.duration_since(info.last_contact) < cutoff);
    state
      .attempts
      .retain(|_, at| now.duration_since(*at) < cutoff);
    let survivors: Vec<PeerInfo> = state.peers.values().cloned().collect();
    for info in state.peers.values_mut() {
      info.last_attempt = now;
    }
    survivors
  }

  pub fn list(&self) -> Vec<Endpoint> {
    let mut result: Vec<Endpoint> =
      self.state.lock().unwrap().peers.keys().copied().collect();
    result.shuffle(&mut rand::thread_rng());
    result
  }

  pub fn list_vector(&self) -> Vec<PeerInfo> {
    let mut result: Vec<PeerInfo> =
      self.state.lock().unwrap().peers.values().cloned().collect();
    result.shuffle(&mut rand::thread_rng());
    result
  }

  /// Square-root-sized random subset: the republication fanout.
  /// Simulation shows sqrt(peers) random targets reach the whole
  /// network with high probability.
  pub fn list_fanout(&self) -> Vec<Endpoint> {
    let count = self.size_sqrt();
    let mut list = self.list();
    list.truncate(count);
    list
  }

  pub fn random_fill(&self, target: &mut [Endpoint; 8]) {
    let list = self.list();
    for (slot, endpoint) in target.iter_mut().zip(
      list
        .into_iter()
        .chain(std::iter::repeat(super::message::null_endpoint())),
    ) {
      *slot = endpoint;
    }
  }

  /// Known probable representatives ordered by weight, heaviest
  /// first.
  pub fn representatives(&self, count: usize) -> Vec<PeerInfo> {
    let mut result: Vec<PeerInfo> = self
      .state
      .lock()
      .unwrap()
      .peers
      .values()
      .filter(|info| info.rep_weight > 0)
      .cloned()
      .collect();
    result.sort_by(|a, b| b.rep_weight.cmp(&a.rep_weight));
    result.truncate(count);
    result
  }

  /// Sum of distinct probable-rep weights across the table. A rep
  /// recorded for several IP addresses is counted once.
  pub fn total_weight(&self) -> u128 {
    let state = self.state.lock().unwrap();
    let mut seen = HashSet::new();
    let mut result: u128 = 0;
    for info in state.peers.values() {
      if seen.insert(info.probable_rep_account) {
        result = result.saturating_add(info.rep_weight);
      }
    }
    result
  }

  /// Updates a peer's representative hint from an observed vote.
  /// Returns true when the recorded weight increased.
  pub fn rep_response(
    &self,
    endpoint: &Endpoint,
    rep_account: Account,
    weight: u128,
  ) -> bool {
    let mut state = self.state.lock().unwrap();
    match state.peers.get_mut(endpoint) {
      Some(info) => {
        info.last_rep_response = Some(Instant::now());
        if info.rep_weight < weight {
          info.rep_weight = weight;
          info.probable_rep_account = rep_account;
          true
        } else {
          false
        }
      }
      None => false,
    }
  }

  pub fn rep_request(&self, endpoint: &Endpoint) {
    let mut state = self.state.lock().unwrap();
    if let Some(info) = state.peers.get_mut(endpoint) {
      info.last_rep_request = Some(Instant::now());
    }
  }

  /// Crawl targets: the peers least recently asked for their
  /// representative status. When observed weight is short of the
  /// online minimum the crawl widens from 10 to 40 peers.
  pub fn rep_crawl(&self, weight_sufficient: bool) -> Vec<Endpoint> {
    let max_count = if weight_sufficient { 10 } else { 40 };
    let mut peers: Vec<(Option<Instant>, Endpoint)> = self
      .state
      .lock()
      .unwrap()
      .peers
      .values()
      .map(|info| (info.last_rep_request, info.endpoint))
      .collect();
    peers.sort_by_key(|(requested, _)| *requested);
    peers
      .into_iter()
      .take(max_count)
      .map(|(_, endpoint)| endpoint)
      .collect()
  }

  // -- syn cookies ----------------------------------------------------

  /// Issues a random challenge for an endpoint, bounded per IP.
  /// Returns None when a cookie is already outstanding or the IP is
  /// at its cap.
  pub fn assign_syn_cookie(&self, endpoint: &Endpoint) -> Option<[u8; 32]> {
    let mut cookies = self.cookies.lock().unwrap();
    if cookies.cookies.contains_key(endpoint) {
      return None;
    }
    let ip_cookies = cookies.per_ip.entry(*endpoint.ip()).or_insert(0);
    if *ip_cookies >= self.max_peers_per_ip {
      return None;
    }
    let cookie: [u8; 32] = rand::random();
    *ip_cookies += 1;
    cookies.cookies.insert(*endpoint, SynCookie {
      cookie,
      created: Instant::now(),
    });
    Some(cookie)
  }

  /// Checks a handshake response against the outstanding cookie. The
  /// cookie is consumed on success and on failure alike.
  pub fn validate_syn_cookie(
    &self,
    endpoint: &Endpoint,
    node_id: Account,
    signature: &Signature,
  ) -> bool {
    let mut cookies = self.cookies.lock().unwrap();
    let stored = match cookies.cookies.remove(endpoint) {
      Some(stored) => stored,
      None => return false,
    };
    if let Some(count) = cookies.per_ip.get_mut(endpoint.ip()) {
      *count = count.saturating_sub(1);
    }
    node_id.verify(&stored.cookie, signature)
  }

  pub fn purge_syn_cookies(&self, cutoff: Duration) {
    let mut cookies = self.cookies.lock().unwrap();
    let now = Instant::now();
    let mut dropped: Vec<Ipv6Addr> = Vec::new();
    cookies.cookies.retain(|endpoint, cookie| {
      let keep = now.duration_since(cookie.created) < cutoff;
      if !keep {
        dropped.push(*endpoint.ip());
      }
      keep
    });
    for ip in dropped {
      if let Some(count) = cookies.per_ip.get_mut(&ip) {
        *count = count.saturating_sub(1);
      }
    }
  }
}

/// Canonical v6 form of any sender address.
pub fn map_to_v6(addr: SocketAddr) -> Endpoint {
  match addr {
    SocketAddr::V4(v4) => {
      SocketAddrV6::new(v4.ip().to_ipv6_mapped(), v4.port(), 0, 0)
    }
    SocketAddr::V6(v6) => SocketAddrV6::new(*v6.ip(), v6.port(), 0, 0),
  }
}

fn mapped_range(first: u32, last: u32) -> (Ipv6Addr, Ipv6Addr) {
  (
    Ipv4Addr::from(first).to_ipv6_mapped(),
    Ipv4Addr::from(last).to_ipv6_mapped(),
  )
}

/// Datagrams from unspecified, documentation, multicast and other
/// non-routable ranges are dropped before touching peer state. On the
/// live network private ranges are reserved too.
pub fn reserved_address(
  endpoint: &Endpoint,
  blacklist_loopback: bool,
  allow_local: bool,
) -> bool {
  let effective = *endpoint.ip();

  let in_range = |range: (Ipv6Addr, Ipv6Addr)| {
    effective >= range.0 && effective <= range.1
  };

  // rfc 1700 "this network"
  if in_range(mapped_range(0x0000_0000, 0x00ff_ffff)) {
    return true;
  }
  // rfc 5737 documentation ranges
  if in_range(mapped_range(0xc000_0200, 0xc000_02ff))
    || in_range(mapped_range(0xc633_6400, 0xc633_64ff))
    || in_range(mapped_range(0xcb00_7100, 0xcb00_71ff))
  {
    return true;
  }
  // v4 multicast and rfc 6890 future use
  if in_range(mapped_range(0xe000_0000, 0xefff_ffff))
    || in_range(mapped_range(0xf000_0000, 0xffff_ffff))
  {
    return true;
  }
  // rfc 6666 discard prefix
  let rfc6666 = (
    Ipv6Addr::new(0x100, 0, 0, 0, 0, 0, 0, 0),
    Ipv6Addr::new(0x100, 0, 0, 0, 0xffff, 0xffff, 0xffff, 0xffff),
  );
  // rfc 3849 documentation prefix
  let rfc3849 = (
    Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0),
    Ipv6Addr::new(
      0x2001, 0xdb8, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff,
    ),
  );
  // v6 multicast
  let v6_multicast = (
    Ipv6Addr::new(0xff00, 0, 0, 0, 0, 0, 0, 0),
    Ipv6Addr::new(
      0xff00, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff,
    ),
  );
  if [rfc6666, rfc3849, v6_multicast].into_iter().any(in_range) {
    return true;
  }
  if blacklist_loopback
    && (effective.is_loopback()
      || in_range(mapped_range(0x7f00_0000, 0x7fff_ffff)))
  {
    return true;
  }
  if !allow_local {
    // private v4 ranges, carrier-grade nat, and v6 unique-local
    if in_range(mapped_range(0x0a00_0000, 0x0aff_ffff))
      || in_range(mapped_range(0xac10_0000, 0xac1f_ffff))
      || in_range(mapped_range(0xc0a8_0000, 0xc0a8_ffff))
      || in_range(mapped_range(0x6440_0000, 0x647f_ffff))
    {
      return true;
    }
    let rfc4193 = (
      Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0),
      Ipv6Addr::new(
        0xfd00, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff,
      ),
    );
    if in_range(rfc4193) {
      return true;
    }
  }
  false
}
