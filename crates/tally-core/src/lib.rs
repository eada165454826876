//! # Tally Core
//!
//! Core library for the Tally multi-tenant poll engine.
//!
//! This crate provides the foundational components for:
//!
//! - **[`engine`]**: Validated command dispatch - create, vote, close,
//!   reveal, cancel, archive, dashboard - producing typed events for the
//!   command layer.
//!
//! - **[`poll`]**: Poll instances and the lifecycle state machine
//!   (Draft → Active → Closed → Revealed → Archived, plus Cancelled), driven
//!   exclusively through compare-and-swap transitions.
//!
//! - **[`ledger`]**: The vote ledger - one ballot per (poll, voter), atomic
//!   insert-or-replace conditional on poll state, snapshot tallies.
//!
//! - **[`scoring`]**: Pure scoring of frozen ballots against an answer key,
//!   with a configurable multi-select matching policy.
//!
//! - **[`leaderboard`]**: Cumulative per-tenant scores with atomic
//!   increments and deterministic ranked snapshots.
//!
//! - **[`scheduler`]**: Deadline sweeps that close overdue polls through the
//!   same idempotent path an admin close uses.
//!
//! - **[`tenant`]**: The registry mapping (guild, poll-type) pairs to their
//!   configuration and single active poll instance.
//!
//! - **[`storage`]**: The `PollStore` trait supplying the atomic conditional
//!   primitives everything above relies on, with in-memory and `SQLite`
//!   implementations.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          PollEngine                          │
//! │  ┌────────────────┐  ┌───────────────┐  ┌────────────────┐   │
//! │  │ TenantRegistry │  │  VoteLedger   │  │ ScoringEngine  │   │
//! │  └───────┬────────┘  └───────┬───────┘  └───────┬────────┘   │
//! │          │                   │                  │            │
//! │          │          ┌────────▼────────┐  ┌──────▼─────────┐  │
//! │          │          │ state CAS +     │  │ Leaderboard    │  │
//! │          │          │ conditional     │  │ Aggregator     │  │
//! │          │          │ vote writes     │  └──────┬─────────┘  │
//! │          │          └────────┬────────┘         │            │
//! │          └───────────────────┼──────────────────┘            │
//! │                              ▼                               │
//! │                    PollStore (memory | sqlite)               │
//! └──────────────────────────────────────────────────────────────┘
//!                  ▲
//!                  │ same close entry point
//!        ┌─────────┴──────────┐
//!        │ ExpirationScheduler│
//!        └────────────────────┘
//! ```
//!
//! ## Command Flow
//!
//! ```text
//! Inbound command
//!       │
//!       ▼
//! ┌───────────────┐
//! │ TenantRegistry│ ── unknown tenant ──► UnknownTenant
//! └──────┬────────┘
//!        │ resolved
//!        ▼
//! ┌───────────────┐     vote   ┌─────────────────────────────┐
//! │  PollEngine   │ ─────────► │ ledger write, atomic with   │
//! │  (dispatch)   │            │ the poll-state check        │
//! └──────┬────────┘            └─────────────────────────────┘
//!        │ close / reveal
//!        ▼
//! ┌──────────────────────────────┐
//! │ CAS transition: one winner   │ ── loser ──► no-op success
//! │ runs side effects            │
//! └──────┬───────────────────────┘
//!        │ reveal winner
//!        ▼
//! ┌──────────────────────────────┐
//! │ scored marker → scoring →    │
//! │ leaderboard increments       │
//! └──────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tally_core::config::TallyConfig;
//! use tally_core::engine::{CreatePoll, PollEngine};
//! use tally_core::scheduler::ExpirationScheduler;
//! use tally_core::storage::{MemoryStore, PollStore};
//! use tally_core::tenant::TenantRegistry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TallyConfig::load()?;
//! tally_core::logging::init(&config.logging);
//!
//! let store: Arc<dyn PollStore> = Arc::new(MemoryStore::new());
//! let registry = Arc::new(TenantRegistry::new(config.tenants.clone(), Arc::clone(&store)));
//! let engine = Arc::new(PollEngine::new(registry, store, config.scoring));
//!
//! let scheduler = ExpirationScheduler::new(
//!     Arc::clone(&engine),
//!     std::time::Duration::from_secs(config.scheduler.tick_interval_seconds),
//! );
//! let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
//! let sweep = scheduler.start_with_shutdown(shutdown_rx);
//!
//! let created = engine
//!     .create_poll(CreatePoll {
//!         guild_id: 123,
//!         poll_type: "world_pvp".into(),
//!         question: "Who wins tonight?".into(),
//!         options: vec!["Red".into(), "Blue".into()],
//!         max_selections: 1,
//!         duration_seconds: 300,
//!         show_votes_while_active: false,
//!         correct_answers: None,
//!         created_by: "admin".into(),
//!     })
//!     .await?;
//! println!("poll {} open until {}", created.poll_id, created.deadline);
//!
//! shutdown_tx.send(())?;
//! sweep.await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod errors;
pub mod leaderboard;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod poll;
pub mod scheduler;
pub mod scoring;
pub mod storage;
pub mod tenant;
pub mod types;

pub use errors::{NotActiveReason, PollError};
pub use metrics::CloseTrigger;
pub use types::{GuildId, PollId, TenantKey, VoterId};
