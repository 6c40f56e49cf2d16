mod b58;
mod hash;
mod keys;

pub use {
  b58::ToBase58String,
  hash::{BlockHash, Link, Root},
  keys::{Account, Keypair, KeypairError},
};
