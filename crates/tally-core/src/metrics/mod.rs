//! Metric recording over the `metrics` facade.
//!
//! The core only records; installing an exporter (Prometheus or otherwise)
//! is the embedding process's choice. Without an installed recorder every
//! call is a cheap no-op, so these helpers are safe on every hot path.

use crate::storage::VoteOutcome;
use metrics::{counter, histogram};

/// What caused a poll to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseTrigger {
    /// An admin invoked the close command.
    Admin,
    /// The expiration scheduler found the poll past its deadline.
    Scheduler,
}

impl CloseTrigger {
    /// Static string form for metrics labels and log fields.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Scheduler => "scheduler",
        }
    }
}

pub(crate) fn record_poll_created() {
    counter!("tally_polls_created_total").increment(1);
}

pub(crate) fn record_vote(outcome: VoteOutcome) {
    counter!("tally_votes_recorded_total", "outcome" => outcome.as_str()).increment(1);
}

pub(crate) fn record_poll_closed(trigger: CloseTrigger) {
    counter!("tally_polls_closed_total", "trigger" => trigger.as_str()).increment(1);
}

pub(crate) fn record_poll_revealed(voters_scored: usize) {
    counter!("tally_polls_revealed_total").increment(1);
    histogram!("tally_reveal_voters_scored").record(voters_scored as f64);
}

pub(crate) fn record_scheduler_sweep(closed: usize) {
    counter!("tally_scheduler_ticks_total").increment(1);
    if closed > 0 {
        counter!("tally_scheduler_closes_total").increment(closed as u64);
    }
}

pub(crate) fn record_storage_retry(op: &'static str) {
    counter!("tally_storage_retries_total", "op" => op).increment(1);
}
