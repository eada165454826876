//! Poll instances and their lifecycle state machine.
//!
//! A poll moves through `Draft -> Active -> Closed -> Revealed -> Archived`,
//! with `Cancelled` as a terminal state reachable from `Draft` or `Active`.
//! Creation instantiates a poll directly in `Active` - no standalone `Draft`
//! is ever observable - and every subsequent transition is performed as a
//! compare-and-swap by the store ([`crate::storage::PollStore::transition`]),
//! so exactly one caller wins each edge and concurrent losers observe a
//! consistent post-transition state without re-triggering side effects.

use crate::errors::PollError;
use crate::types::{PollId, TenantKey, VoterId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Lifecycle state of a poll instance.
///
/// Legal edges:
/// - `Draft -> Active`: performed atomically inside creation
/// - `Active -> Closed`: admin- or scheduler-triggered close
/// - `Closed -> Revealed`: answer disclosure, triggers scoring
/// - `Revealed -> Archived`: housekeeping after a retention window
/// - `Draft | Active -> Cancelled`: abandonment, no scoring
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    Draft,
    Active,
    Closed,
    Revealed,
    Archived,
    Cancelled,
}

impl PollState {
    /// Returns `true` if no further transition can leave this state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Archived | Self::Cancelled)
    }

    /// Returns `true` if the edge from `self` to `to` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, to: PollState) -> bool {
        matches!(
            (self, to),
            (Self::Draft, Self::Active)
                | (Self::Active, Self::Closed)
                | (Self::Closed, Self::Revealed)
                | (Self::Revealed, Self::Archived)
                | (Self::Draft | Self::Active, Self::Cancelled)
        )
    }

    /// Static string form used in storage columns and metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Revealed => "revealed",
            Self::Archived => "archived",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses the storage column form produced by [`Self::as_str`].
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "closed" => Some(Self::Closed),
            "revealed" => Some(Self::Revealed),
            "archived" => Some(Self::Archived),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One selectable option of a poll, identified by its stable ordinal.
///
/// Options are immutable once the poll leaves `Draft`, which - since creation
/// promotes straight to `Active` - means immutable from the moment they are
/// observable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub ordinal: u32,
    pub label: String,
}

/// A poll definition as submitted to the store for creation.
///
/// The store allocates the instance id and performs the create-and-bind
/// atomically; see [`crate::storage::PollStore::create_poll`].
#[derive(Clone, Debug)]
pub struct NewPoll {
    pub tenant: TenantKey,
    pub question: String,
    pub created_by: VoterId,
    pub options: Vec<PollOption>,
    pub max_selections: u32,
    pub show_votes_while_active: bool,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub correct_options: Option<BTreeSet<u32>>,
}

/// One concrete poll occurrence.
#[derive(Clone, Debug)]
pub struct PollInstance {
    pub id: PollId,
    pub tenant: TenantKey,
    pub question: String,
    pub created_by: VoterId,
    pub options: Vec<PollOption>,
    pub max_selections: u32,
    pub show_votes_while_active: bool,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub state: PollState,
    pub correct_options: Option<BTreeSet<u32>>,
}

impl PollInstance {
    /// Validates a ballot's chosen ordinals against this poll's option set
    /// and max-selections bound.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::InvalidOptionSelection`] if the selection is
    /// empty, contains duplicates, exceeds `max_selections`, or references
    /// an ordinal outside the option set.
    pub fn validate_selections(&self, selections: &[u32]) -> Result<(), PollError> {
        if selections.is_empty() {
            return Err(PollError::InvalidOptionSelection("no options chosen".into()));
        }
        if selections.len() > self.max_selections as usize {
            return Err(PollError::InvalidOptionSelection(format!(
                "{} options chosen, at most {} allowed",
                selections.len(),
                self.max_selections
            )));
        }
        let mut seen = BTreeSet::new();
        for &ordinal in selections {
            if ordinal as usize >= self.options.len() {
                return Err(PollError::InvalidOptionSelection(format!(
                    "ordinal {ordinal} out of range (poll has {} options)",
                    self.options.len()
                )));
            }
            if !seen.insert(ordinal) {
                return Err(PollError::InvalidOptionSelection(format!(
                    "ordinal {ordinal} chosen more than once"
                )));
            }
        }
        Ok(())
    }

    /// Validates an answer key against the option set.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::InvalidPollDefinition`] if the key is empty or
    /// references an ordinal outside the option set.
    pub fn validate_answer_key(&self, key: &BTreeSet<u32>) -> Result<(), PollError> {
        validate_answer_key(key, self.options.len())
    }
}

/// Shared answer-key validation for creation (before an instance exists) and
/// later configuration.
pub(crate) fn validate_answer_key(key: &BTreeSet<u32>, option_count: usize) -> Result<(), PollError> {
    if key.is_empty() {
        return Err(PollError::InvalidPollDefinition("answer key cannot be empty".into()));
    }
    if let Some(&ordinal) = key.iter().find(|&&o| o as usize >= option_count) {
        return Err(PollError::InvalidPollDefinition(format!(
            "answer key ordinal {ordinal} out of range (poll has {option_count} options)"
        )));
    }
    Ok(())
}
