use {
  ed25519_dalek::{PublicKey, SecretKey, Signature, Signer, Verifier},
  serde::{
    de::{self, Visitor},
    Deserialize,
    Deserializer,
    Serialize,
  },
  std::{
    fmt::{Debug, Display, Formatter},
    marker::PhantomData,
    ops::Deref,
    str::FromStr,
  },
  thiserror::Error,
};

/// Public key of an account chain in the lattice.
///
/// The same type identifies voting representatives and node identities;
/// all three are ed25519 public keys and sign with the same scheme.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Account([u8; 32]);

impl Account {
  pub const fn zero() -> Self {
    Self([0u8; 32])
  }

  pub fn is_zero(&self) -> bool {
    self.0 == [0u8; 32]
  }

  pub fn as_bytes(&self) -> &[u8; 32] {
    &self.0
  }

  pub fn from_bytes(bytes: [u8; 32]) -> Self {
    Self(bytes)
  }

  /// Verifies a detached signature made by this account's secret key.
  pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
    match PublicKey::from_bytes(&self.0) {
      Ok(key) => key.verify(message, signature).is_ok(),
      Err(_) => false,
    }
  }
}

impl Deref for Account {
  type Target = [u8];

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl Display for Account {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", bs58::encode(self.0).into_string())
  }
}

impl Debug for Account {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "Account({})", bs58::encode(self.0).into_string())
  }
}

impl From<Account> for String {
  fn from(account: Account) -> Self {
    bs58::encode(account.0).into_string()
  }
}

impl FromStr for Account {
  type Err = bs58::decode::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut bytes = [0u8; 32];
    bs58::decode(s).into(&mut bytes)?;
    Ok(Self(bytes))
  }
}

impl From<PublicKey> for Account {
  fn from(p: PublicKey) -> Self {
    Self(*p.as_bytes())
  }
}

/// An ed25519 keypair controlling an account, a representative or a
/// node identity.
pub struct Keypair(ed25519_dalek::Keypair);

impl Keypair {
  pub fn public(&self) -> Account {
    self.0.public.into()
  }

  pub fn secret(&self) -> &SecretKey {
    &self.0.secret
  }

  pub fn sign(&self, message: &[u8]) -> Signature {
    self.0.sign(message)
  }

  /// Generates a fresh random keypair.
  pub fn random() -> Self {
    let mut secret = [0u8; 32];
    rand::Rng::fill(&mut rand::thread_rng(), &mut secret[..]);
    Self::try_from(secret.as_slice()).expect("32 random bytes are a valid key")
  }
}

impl Clone for Keypair {
  fn clone(&self) -> Self {
    Self(ed25519_dalek::Keypair::from_bytes(&self.0.to_bytes()).unwrap())
  }
}

impl Deref for Keypair {
  type Target = ed25519_dalek::Keypair;

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl Debug for Keypair {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("Keypair").field(&self.0.public).finish()
  }
}

impl Display for Keypair {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "Keypair({})",
      bs58::encode(self.0.public.as_bytes()).into_string()
    )
  }
}

impl From<ed25519_dalek::Keypair> for Keypair {
  fn from(k: ed25519_dalek::Keypair) -> Self {
    Self(k)
  }
}

#[derive(Debug, Error)]
pub enum KeypairError {
  #[error("Failed parsing base58 string: {0:?}")]
  Base58ParseError(bs58::decode::Error),

  #[error("{0}")]
  Ed25519Error(#[from] ed25519_dalek::ed25519::Error),
}

impl TryFrom<&[u8]> for Keypair {
  type Error = KeypairError;

  fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
    let secret = SecretKey::from_bytes(value)?;
    let public: PublicKey = (&secret).into();
    Ok(Self(ed25519_dalek::Keypair { secret, public }))
  }
}

impl FromStr for Keypair {
  type Err = KeypairError;

  fn from_str(value: &str) -> Result<Self, Self::Err> {
    let mut secret = [0u8; 32];
    bs58::decode(value)
      .into(&mut secret)
      .map_err(KeypairError::Base58ParseError)?;
    let secret = SecretKey::from_bytes(&secret)?;
    let public = (&secret).into();
    Ok(Keypair(ed25519_dalek::Keypair { secret, public }))
  }
}

/// Deserialize an account from either a user-friendly base58
/// representation or a machine-friendly byte array.
impl<'de> Deserialize<'de> for Account {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    struct StringOrArray<T>(PhantomData<fn() -> T>);

    impl<'de, T> Visitor<'de> for StringOrArray<T>
    where
      T: Deserialize<'de> + FromStr<Err = bs58::decode::Error>,
    {
      type Value = T;

      fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("base58 string or byte array")
      }

      fn visit_str<E>(self, value: &str) -> Result<T, E>
      where
        E: de::Error,
      {
        FromStr::from_str(value)
          .map_err(|e| de::Error::custom(format!("{e:?}")))
      }

      fn visit_seq<A>(self, seq: A) -> Result<Self::Value, A::Error>
      where
        A: de::SeqAccess<'de>,
      {
        Deserialize::deserialize(de::value::SeqAccessDeserializer::new(seq))
      }
    }

    deserializer.deserialize_str(StringOrArray(PhantomData))
  }
}

impl Serialize for Account {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.serialize_str(&bs58::encode(self.0).into_string())
  }
}

#[cfg(test)]
mod tests {
  use super::{Account, Keypair};

  #[test]
  fn sign_verify_roundtrip() {
    let keypair = Keypair::random();
    let signature = keypair.sign(b"some message");
    assert!(keypair.public().verify(b"some message", &signature));
    assert!(!keypair.public().verify(b"another message", &signature));

    let other = Keypair::random();
    assert!(!other.public().verify(b"some message", &signature));
  }

  #[test]
  fn account_b58_roundtrip() {
    let keypair = Keypair::random();
    let account = keypair.public();
    let encoded: String = account.into();
    let decoded: Account = encoded.parse().unwrap();
    assert_eq!(account, decoded);
  }
}
