//! Anonymous ballot casting and tallying.
//!
//! A cast ballot flows through the [`VoterAnonymizer`], the [`BallotEncoder`]
//! and the [`BallotSealer`] before it is appended to a [`VoteLedger`]. The
//! [`TallyEngine`] later scans the ledger, unseals every record and counts
//! one vote per voter token.

#[macro_use]
extern crate serde;

mod admin;
mod anonymizer;
mod audit;
mod ballot;
mod cast;
mod config;
mod election;
mod error;
mod keys;
mod seal;
mod serde_hex;
mod store;
mod tally;
mod util;

pub use admin::*;
pub use anonymizer::*;
pub use audit::*;
pub use ballot::*;
pub use cast::*;
pub use config::*;
pub use election::*;
pub use error::*;
pub use keys::*;
pub use seal::*;
pub use serde_hex::*;
pub use store::*;
pub use tally::*;
pub use util::*;

#[cfg(test)]
mod tests;
