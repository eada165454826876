//! Error taxonomy for poll operations.
//!
//! Every fallible operation in the crate returns [`PollError`]. The taxonomy
//! distinguishes caller-correctable usage errors from transient persistence
//! faults so the command layer can choose between surfacing a message and
//! retrying. Lifecycle-transition races are deliberately *not* errors: the
//! losing caller of a close/reveal race receives a no-op success.

use crate::poll::PollState;
use crate::types::{GuildId, PollId, TenantKey};
use thiserror::Error;

/// Why a poll is not accepting the requested operation.
///
/// Surfaced inside [`PollError::PollNotActive`] so user-facing messages can
/// distinguish "never existed", "not yet open", and "already closed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotActiveReason {
    /// No poll with this identifier exists.
    NotFound(PollId),
    /// The poll exists but has not been promoted to Active yet.
    NotYetOpen(PollId),
    /// The poll has been closed (or revealed/archived after closing).
    AlreadyClosed(PollId),
    /// The poll was cancelled before completing its lifecycle.
    Cancelled(PollId),
}

impl std::fmt::Display for NotActiveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "poll {id} does not exist"),
            Self::NotYetOpen(id) => write!(f, "poll {id} is not open for voting yet"),
            Self::AlreadyClosed(id) => write!(f, "poll {id} is already closed"),
            Self::Cancelled(id) => write!(f, "poll {id} was cancelled"),
        }
    }
}

impl NotActiveReason {
    /// Maps an observed poll state to the rejection reason a voter sees.
    #[must_use]
    pub fn from_state(id: PollId, state: PollState) -> Self {
        match state {
            PollState::Draft => Self::NotYetOpen(id),
            PollState::Cancelled => Self::Cancelled(id),
            // Active never produces a rejection; treat it as closed if it
            // somehow reaches here so callers still get a terminal answer.
            PollState::Active | PollState::Closed | PollState::Revealed | PollState::Archived => {
                Self::AlreadyClosed(id)
            }
        }
    }
}

/// Errors surfaced by poll lifecycle, ledger, scoring, and registry operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PollError {
    /// No configuration was loaded for this (guild, poll-type) pair.
    #[error("no poll configuration for guild {guild_id} and poll type '{poll_type}'")]
    UnknownTenant { guild_id: GuildId, poll_type: String },

    /// The tenant already has an active poll; it must be closed first.
    #[error("tenant {tenant} already has an active poll (id {existing})")]
    ConflictingActivePoll { tenant: TenantKey, existing: PollId },

    /// The poll is not accepting votes in its current state.
    #[error("poll is not active: {0}")]
    PollNotActive(NotActiveReason),

    /// A vote's chosen ordinals are out of range, duplicated, empty, or
    /// exceed the poll's max-selections bound.
    #[error("invalid option selection: {0}")]
    InvalidOptionSelection(String),

    /// Create-time validation failed (question, options, bounds, duration).
    #[error("invalid poll definition: {0}")]
    InvalidPollDefinition(String),

    /// Reveal was requested before a correct-option set was configured.
    #[error("poll {0} has no answer key configured")]
    NoAnswerKeyConfigured(PollId),

    /// The requested transition is not legal from the poll's current state.
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: PollState, to: PollState },

    /// The persistence backend stayed unavailable through the retry budget.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl PollError {
    /// Returns `true` if this error is caller-correctable usage, as opposed
    /// to an infrastructure fault. Usage errors should be surfaced verbatim
    /// and never retried.
    #[must_use]
    pub fn is_usage_error(&self) -> bool {
        !matches!(self, Self::StorageUnavailable(_))
    }

    /// Returns `true` if retrying the same operation may succeed.
    ///
    /// Only persistence faults are transient; every domain error is
    /// deterministic for a given poll state.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}
