//! Durable [`PollStore`] backed by `SQLite` via sqlx.
//!
//! Atomicity strategy:
//!
//! - The at-most-one-active-poll invariant is a partial unique index on
//!   `(guild_id, poll_type) WHERE state = 'active'`, so the conflict check
//!   and the bind are the same statement that inserts the poll.
//! - State transitions are conditional updates
//!   (`UPDATE .. SET state = ? WHERE id = ? AND state = ?`): the compare and
//!   the swap are one statement, and `rows_affected` identifies the winner.
//! - The reveal idempotence marker is `INSERT OR IGNORE` into `scored_polls`.
//! - Leaderboard increments happen in SQL
//!   (`points = points + excluded.points`), never read-modify-write in Rust.
//!
//! The pool is capped at a single connection, so multi-statement operations
//! (the vote-path state check plus upsert) execute serially; `SQLite` allows
//! only one writer at a time regardless, so this costs no real concurrency.
//!
//! Every operation runs inside the bounded-backoff retry of
//! [`super::retry`]; backend faults surface as
//! [`PollError::StorageUnavailable`] once the budget is exhausted.

use super::retry::{with_retry, RetryPolicy};
use super::{
    PollStore, ScoreDelta, Transition, UserScoreEntry, VoteOutcome, VoteRecord,
};
use crate::errors::{NotActiveReason, PollError};
use crate::poll::{validate_answer_key, NewPoll, PollInstance, PollOption, PollState};
use crate::types::{PollId, TenantKey, VoterId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use tracing::info;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS polls (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        guild_id INTEGER NOT NULL,
        poll_type TEXT NOT NULL,
        question TEXT NOT NULL,
        created_by TEXT NOT NULL,
        max_selections INTEGER NOT NULL,
        show_votes_while_active INTEGER NOT NULL,
        state TEXT NOT NULL,
        created_at TEXT NOT NULL,
        deadline TEXT NOT NULL,
        correct_options TEXT
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_active_poll_per_tenant
        ON polls (guild_id, poll_type) WHERE state = 'active'",
    "CREATE TABLE IF NOT EXISTS poll_options (
        poll_id INTEGER NOT NULL,
        ordinal INTEGER NOT NULL,
        label TEXT NOT NULL,
        PRIMARY KEY (poll_id, ordinal)
    )",
    "CREATE TABLE IF NOT EXISTS votes (
        poll_id INTEGER NOT NULL,
        voter_id TEXT NOT NULL,
        selections TEXT NOT NULL,
        submitted_at TEXT NOT NULL,
        PRIMARY KEY (poll_id, voter_id)
    )",
    "CREATE TABLE IF NOT EXISTS scored_polls (
        poll_id INTEGER PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS user_scores (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        guild_id INTEGER NOT NULL,
        poll_type TEXT NOT NULL,
        voter_id TEXT NOT NULL,
        points INTEGER NOT NULL DEFAULT 0,
        correct_count INTEGER NOT NULL DEFAULT 0,
        polls_participated INTEGER NOT NULL DEFAULT 0,
        UNIQUE (guild_id, poll_type, voter_id)
    )",
];

/// Durable store for deployments that must survive restarts.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    retry: RetryPolicy,
}

impl SqliteStore {
    /// Connects to `database_url` (e.g. `sqlite://./db/tally.db`), creating
    /// the file and schema if missing.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::StorageUnavailable`] if the database cannot be
    /// opened or the schema cannot be created.
    pub async fn new(database_url: &str, retry: RetryPolicy) -> Result<Self, PollError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(db_err)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await.map_err(db_err)?;
        }
        info!(url = database_url, "sqlite poll store ready");
        Ok(Self { pool, retry })
    }

    fn row_to_instance(row: &SqliteRow, options: Vec<PollOption>) -> Result<PollInstance, PollError> {
        let state_text: String = get_required(row, "state")?;
        let state = PollState::parse(&state_text).ok_or_else(|| {
            PollError::StorageUnavailable(format!("unknown poll state '{state_text}'"))
        })?;
        let correct_options: Option<String> = row.get("correct_options");
        let correct_options = correct_options
            .map(|json| serde_json::from_str::<BTreeSet<u32>>(&json))
            .transpose()
            .map_err(|e| PollError::StorageUnavailable(format!("answer key column: {e}")))?;

        Ok(PollInstance {
            id: get_u64(row, "id")?,
            tenant: TenantKey::new(get_u64(row, "guild_id")?, get_required::<String>(row, "poll_type")?),
            question: get_required(row, "question")?,
            created_by: get_required(row, "created_by")?,
            options,
            max_selections: get_u32(row, "max_selections")?,
            show_votes_while_active: get_required::<i64>(row, "show_votes_while_active")? != 0,
            created_at: get_required(row, "created_at")?,
            deadline: get_required(row, "deadline")?,
            state,
            correct_options,
        })
    }

    async fn options_for(&self, poll_id: PollId) -> Result<Vec<PollOption>, PollError> {
        let rows = sqlx::query(
            "SELECT ordinal, label FROM poll_options WHERE poll_id = ?1 ORDER BY ordinal",
        )
        .bind(to_i64(poll_id)?)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| Ok(PollOption { ordinal: get_u32(row, "ordinal")?, label: get_required(row, "label")? }))
            .collect()
    }

    async fn fetch_poll(&self, id: PollId) -> Result<Option<PollInstance>, PollError> {
        let row = sqlx::query("SELECT * FROM polls WHERE id = ?1")
            .bind(to_i64(id)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => {
                let options = self.options_for(id).await?;
                Ok(Some(Self::row_to_instance(&row, options)?))
            }
            None => Ok(None),
        }
    }

    async fn fetch_state(&self, id: PollId) -> Result<Option<PollState>, PollError> {
        let row = sqlx::query("SELECT state FROM polls WHERE id = ?1")
            .bind(to_i64(id)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|row| {
            let text: String = get_required(&row, "state")?;
            PollState::parse(&text).ok_or_else(|| {
                PollError::StorageUnavailable(format!("unknown poll state '{text}'"))
            })
        })
        .transpose()
    }
}

#[async_trait]
impl PollStore for SqliteStore {
    async fn create_poll(&self, new_poll: NewPoll) -> Result<PollInstance, PollError> {
        with_retry(self.retry, "create_poll", || {
            let new_poll = new_poll.clone();
            async move {
                let correct_options = new_poll
                    .correct_options
                    .as_ref()
                    .map(|key| serde_json::to_string(key))
                    .transpose()
                    .map_err(|e| PollError::StorageUnavailable(format!("answer key encode: {e}")))?;

                let mut tx = self.pool.begin().await.map_err(db_err)?;

                let inserted = sqlx::query(
                    "INSERT INTO polls (guild_id, poll_type, question, created_by,
                        max_selections, show_votes_while_active, state, created_at,
                        deadline, correct_options)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active', ?7, ?8, ?9)",
                )
                .bind(to_i64(new_poll.tenant.guild_id)?)
                .bind(&new_poll.tenant.poll_type)
                .bind(&new_poll.question)
                .bind(&new_poll.created_by)
                .bind(i64::from(new_poll.max_selections))
                .bind(i64::from(new_poll.show_votes_while_active))
                .bind(new_poll.created_at)
                .bind(new_poll.deadline)
                .bind(correct_options)
                .execute(&mut *tx)
                .await;

                let result = match inserted {
                    Ok(result) => result,
                    Err(err) if is_unique_violation(&err) => {
                        // The partial index rejected a second active poll;
                        // look up the incumbent for the error payload.
                        drop(tx);
                        let existing = sqlx::query(
                            "SELECT id FROM polls
                             WHERE guild_id = ?1 AND poll_type = ?2 AND state = 'active'",
                        )
                        .bind(to_i64(new_poll.tenant.guild_id)?)
                        .bind(&new_poll.tenant.poll_type)
                        .fetch_optional(&self.pool)
                        .await
                        .map_err(db_err)?
                        .map(|row| get_u64(&row, "id"))
                        .transpose()?
                        .unwrap_or_default();
                        return Err(PollError::ConflictingActivePoll {
                            tenant: new_poll.tenant.clone(),
                            existing,
                        });
                    }
                    Err(err) => return Err(db_err(err)),
                };

                let id = u64::try_from(result.last_insert_rowid())
                    .map_err(|_| PollError::StorageUnavailable("negative rowid".into()))?;

                for option in &new_poll.options {
                    sqlx::query(
                        "INSERT INTO poll_options (poll_id, ordinal, label) VALUES (?1, ?2, ?3)",
                    )
                    .bind(to_i64(id)?)
                    .bind(i64::from(option.ordinal))
                    .bind(&option.label)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
                }

                tx.commit().await.map_err(db_err)?;

                Ok(PollInstance {
                    id,
                    tenant: new_poll.tenant,
                    question: new_poll.question,
                    created_by: new_poll.created_by,
                    options: new_poll.options,
                    max_selections: new_poll.max_selections,
                    show_votes_while_active: new_poll.show_votes_while_active,
                    created_at: new_poll.created_at,
                    deadline: new_poll.deadline,
                    state: PollState::Active,
                    correct_options: new_poll.correct_options,
                })
            }
        })
        .await
    }

    async fn poll(&self, id: PollId) -> Result<Option<PollInstance>, PollError> {
        with_retry(self.retry, "poll", || self.fetch_poll(id)).await
    }

    async fn active_poll(&self, tenant: &TenantKey) -> Result<Option<PollInstance>, PollError> {
        with_retry(self.retry, "active_poll", || async {
            let row = sqlx::query(
                "SELECT id FROM polls
                 WHERE guild_id = ?1 AND poll_type = ?2 AND state = 'active'",
            )
            .bind(to_i64(tenant.guild_id)?)
            .bind(&tenant.poll_type)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
            match row {
                Some(row) => self.fetch_poll(get_u64(&row, "id")?).await,
                None => Ok(None),
            }
        })
        .await
    }

    async fn transition(
        &self,
        id: PollId,
        from: PollState,
        to: PollState,
    ) -> Result<Transition, PollError> {
        with_retry(self.retry, "transition", || async move {
            let result = sqlx::query("UPDATE polls SET state = ?3 WHERE id = ?1 AND state = ?2")
                .bind(to_i64(id)?)
                .bind(from.as_str())
                .bind(to.as_str())
                .execute(&self.pool)
                .await
                .map_err(db_err)?;

            if result.rows_affected() == 1 {
                return Ok(Transition::Applied);
            }
            match self.fetch_state(id).await? {
                Some(observed) => Ok(Transition::Superseded(observed)),
                None => Err(PollError::PollNotActive(NotActiveReason::NotFound(id))),
            }
        })
        .await
    }

    async fn set_answer_key(&self, id: PollId, key: BTreeSet<u32>) -> Result<(), PollError> {
        with_retry(self.retry, "set_answer_key", || {
            let key = key.clone();
            async move {
                let option_count = sqlx::query(
                    "SELECT COUNT(*) AS n FROM poll_options WHERE poll_id = ?1",
                )
                .bind(to_i64(id)?)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?
                .try_get::<i64, _>("n")
                .map_err(|e| PollError::StorageUnavailable(e.to_string()))?;

                if option_count == 0 {
                    return Err(PollError::PollNotActive(NotActiveReason::NotFound(id)));
                }
                validate_answer_key(&key, usize::try_from(option_count).unwrap_or(0))?;

                let json = serde_json::to_string(&key)
                    .map_err(|e| PollError::StorageUnavailable(format!("answer key encode: {e}")))?;
                let result = sqlx::query(
                    "UPDATE polls SET correct_options = ?2
                     WHERE id = ?1 AND state IN ('draft', 'active', 'closed')",
                )
                .bind(to_i64(id)?)
                .bind(json)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;

                if result.rows_affected() == 1 {
                    Ok(())
                } else {
                    let state = self
                        .fetch_state(id)
                        .await?
                        .ok_or(PollError::PollNotActive(NotActiveReason::NotFound(id)))?;
                    Err(PollError::InvalidPollDefinition(format!(
                        "answer key cannot be configured once the poll is {state}"
                    )))
                }
            }
        })
        .await
    }

    async fn record_vote(
        &self,
        poll_id: PollId,
        voter_id: VoterId,
        selections: Vec<u32>,
        now: DateTime<Utc>,
    ) -> Result<VoteOutcome, PollError> {
        with_retry(self.retry, "record_vote", || {
            let voter_id = voter_id.clone();
            let selections = selections.clone();
            async move {
                // Single-connection pool: the state check and the upsert in
                // this transaction execute with no interleaved writer.
                let mut tx = self.pool.begin().await.map_err(db_err)?;

                let poll_row = sqlx::query(
                    "SELECT state, max_selections FROM polls WHERE id = ?1",
                )
                .bind(to_i64(poll_id)?)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?
                .ok_or(PollError::PollNotActive(NotActiveReason::NotFound(poll_id)))?;

                let state_text: String = get_required(&poll_row, "state")?;
                let state = PollState::parse(&state_text).ok_or_else(|| {
                    PollError::StorageUnavailable(format!("unknown poll state '{state_text}'"))
                })?;
                if state != PollState::Active {
                    return Err(PollError::PollNotActive(NotActiveReason::from_state(
                        poll_id, state,
                    )));
                }

                let max_selections = get_u32(&poll_row, "max_selections")?;
                if selections.len() > max_selections as usize {
                    return Err(PollError::InvalidOptionSelection(format!(
                        "{} options chosen, at most {max_selections} allowed",
                        selections.len()
                    )));
                }

                let existing = sqlx::query(
                    "SELECT 1 AS present FROM votes WHERE poll_id = ?1 AND voter_id = ?2",
                )
                .bind(to_i64(poll_id)?)
                .bind(&voter_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;

                let json = serde_json::to_string(&selections)
                    .map_err(|e| PollError::StorageUnavailable(format!("ballot encode: {e}")))?;
                sqlx::query(
                    "INSERT INTO votes (poll_id, voter_id, selections, submitted_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT (poll_id, voter_id) DO UPDATE SET
                        selections = excluded.selections,
                        submitted_at = excluded.submitted_at",
                )
                .bind(to_i64(poll_id)?)
                .bind(&voter_id)
                .bind(json)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

                tx.commit().await.map_err(db_err)?;

                Ok(if existing.is_some() { VoteOutcome::Replaced } else { VoteOutcome::Accepted })
            }
        })
        .await
    }

    async fn votes(&self, poll_id: PollId) -> Result<Vec<VoteRecord>, PollError> {
        with_retry(self.retry, "votes", || async move {
            if self.fetch_state(poll_id).await?.is_none() {
                return Err(PollError::PollNotActive(NotActiveReason::NotFound(poll_id)));
            }
            let rows = sqlx::query(
                "SELECT voter_id, selections, submitted_at FROM votes WHERE poll_id = ?1",
            )
            .bind(to_i64(poll_id)?)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

            rows.iter()
                .map(|row| {
                    let json: String = get_required(row, "selections")?;
                    let selections = serde_json::from_str(&json).map_err(|e| {
                        PollError::StorageUnavailable(format!("ballot column: {e}"))
                    })?;
                    Ok(VoteRecord {
                        poll_id,
                        voter_id: get_required(row, "voter_id")?,
                        selections,
                        submitted_at: get_required(row, "submitted_at")?,
                    })
                })
                .collect()
        })
        .await
    }

    async fn tally(&self, poll_id: PollId) -> Result<BTreeMap<u32, u64>, PollError> {
        let options = with_retry(self.retry, "tally_options", || async move {
            if self.fetch_state(poll_id).await?.is_none() {
                return Err(PollError::PollNotActive(NotActiveReason::NotFound(poll_id)));
            }
            self.options_for(poll_id).await
        })
        .await?;

        let votes = self.votes(poll_id).await?;
        let mut counts: BTreeMap<u32, u64> = options.iter().map(|o| (o.ordinal, 0)).collect();
        for vote in &votes {
            for &ordinal in &vote.selections {
                *counts.entry(ordinal).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn overdue_polls(&self, now: DateTime<Utc>) -> Result<Vec<PollInstance>, PollError> {
        with_retry(self.retry, "overdue_polls", || async move {
            let rows = sqlx::query(
                "SELECT id FROM polls WHERE state = 'active' AND deadline <= ?1",
            )
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

            let mut overdue = Vec::with_capacity(rows.len());
            for row in &rows {
                if let Some(poll) = self.fetch_poll(get_u64(row, "id")?).await? {
                    overdue.push(poll);
                }
            }
            Ok(overdue)
        })
        .await
    }

    async fn claim_scored(&self, poll_id: PollId) -> Result<bool, PollError> {
        with_retry(self.retry, "claim_scored", || async move {
            let result = sqlx::query("INSERT OR IGNORE INTO scored_polls (poll_id) VALUES (?1)")
                .bind(to_i64(poll_id)?)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
            Ok(result.rows_affected() == 1)
        })
        .await
    }

    async fn apply_score_deltas(
        &self,
        tenant: &TenantKey,
        deltas: &[ScoreDelta],
    ) -> Result<(), PollError> {
        with_retry(self.retry, "apply_score_deltas", || async move {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            for delta in deltas {
                sqlx::query(
                    "INSERT INTO user_scores
                        (guild_id, poll_type, voter_id, points, correct_count, polls_participated)
                     VALUES (?1, ?2, ?3, ?4, ?5, 1)
                     ON CONFLICT (guild_id, poll_type, voter_id) DO UPDATE SET
                        points = points + excluded.points,
                        correct_count = correct_count + excluded.correct_count,
                        polls_participated = polls_participated + 1",
                )
                .bind(to_i64(tenant.guild_id)?)
                .bind(&tenant.poll_type)
                .bind(&delta.voter_id)
                .bind(to_i64(delta.points)?)
                .bind(i64::from(delta.was_correct))
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            }
            tx.commit().await.map_err(db_err)
        })
        .await
    }

    async fn score_entries(&self, tenant: &TenantKey) -> Result<Vec<UserScoreEntry>, PollError> {
        with_retry(self.retry, "score_entries", || async move {
            let rows = sqlx::query(
                "SELECT id, voter_id, points, correct_count, polls_participated
                 FROM user_scores WHERE guild_id = ?1 AND poll_type = ?2",
            )
            .bind(to_i64(tenant.guild_id)?)
            .bind(&tenant.poll_type)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

            rows.iter()
                .map(|row| {
                    Ok(UserScoreEntry {
                        voter_id: get_required(row, "voter_id")?,
                        points: get_u64(row, "points")?,
                        correct_count: get_u64(row, "correct_count")?,
                        polls_participated: get_u64(row, "polls_participated")?,
                        // Row ids are assigned in insertion order, which is
                        // exactly the first-participation order.
                        first_scored_seq: get_u64(row, "id")?,
                    })
                })
                .collect()
        })
        .await
    }
}

fn db_err(err: sqlx::Error) -> PollError {
    PollError::StorageUnavailable(err.to_string())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Extracts a non-nullable column, mapping decode failures to storage errors.
fn get_required<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, PollError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get::<T, _>(column)
        .map_err(|e| PollError::StorageUnavailable(format!("column '{column}': {e}")))
}

fn get_u64(row: &SqliteRow, column: &str) -> Result<u64, PollError> {
    let value: i64 = get_required(row, column)?;
    u64::try_from(value).map_err(|_| {
        PollError::StorageUnavailable(format!("column '{column}' value {value} out of range"))
    })
}

fn get_u32(row: &SqliteRow, column: &str) -> Result<u32, PollError> {
    let value: i64 = get_required(row, column)?;
    u32::try_from(value).map_err(|_| {
        PollError::StorageUnavailable(format!("column '{column}' value {value} out of range"))
    })
}

fn to_i64(value: u64) -> Result<i64, PollError> {
    i64::try_from(value)
        .map_err(|_| PollError::StorageUnavailable(format!("identifier {value} out of range")))
}
