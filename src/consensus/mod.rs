//! The consensus engine around the lattice: a single-writer block
//! processor, per-root elections decided by representative weight,
//! and the vote pipeline feeding them.

pub mod active;
pub mod arrival;
pub mod crawler;
pub mod election;
pub mod gap;
pub mod online;
pub mod processor;
pub mod votes;
mod vote;

pub use {
  active::ActiveElections,
  arrival::BlockArrival,
  crawler::RepCrawler,
  election::{
    ConfirmAction,
    ConfirmedElection,
    Election,
    ElectionContext,
    ElectionVoteResult,
  },
  gap::GapCache,
  online::OnlineReps,
  processor::BlockProcessor,
  vote::{Vote, VotePayload, FINAL_SEQUENCE},
  votes::{VoteCode, VoteProcessor},
};
