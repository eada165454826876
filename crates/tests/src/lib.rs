//! Integration tests for the Tally poll engine.
//!
//! This crate contains various test modules:
//!
//! - `lifecycle_tests`: state machine edges, idempotent close/reveal, cancel
//!   and archive housekeeping
//! - `ledger_tests`: one-ballot-per-voter semantics, tallies, late-vote
//!   rejection
//! - `scoring_tests`: multi-select matching policies end to end
//! - `leaderboard_tests`: cumulative scores, rank ordering and stability
//! - `scheduler_tests`: deadline sweeps against the shared close path
//! - `engine_tests`: full command-layer scenarios
//! - `adversarial_tests`: concurrent voters, duplicate admin actions,
//!   scheduler/admin races
//! - `sqlite_store_tests`: the durable store against a temp-file database,
//!   including restart survival
//! - `harness`: shared constructors for engines and commands
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package tests
//! ```

#[cfg(test)]
mod harness;

#[cfg(test)]
mod lifecycle_tests;

#[cfg(test)]
mod ledger_tests;



#[cfg(test)]
mod scheduler_tests;



#[cfg(test)]
mod sqlite_store_tests;
