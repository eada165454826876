//! Shared constructors for integration tests.

use std::sync::Arc;
use tally_core::config::TenantConfig;
use tally_core::engine::{CreatePoll, PollEngine};
use tally_core::scoring::ScoringConfig;
use tally_core::storage::{MemoryStore, PollStore};
use tally_core::tenant::TenantRegistry;

pub const GUILD: u64 = 100;
pub const POLL_TYPE: &str = "world_pvp";

/// Engine over a fresh in-memory store with one configured tenant.
pub fn engine() -> Arc<PollEngine> {
    engine_with_scoring(ScoringConfig::default())
}

/// Engine over a fresh in-memory store with a custom scoring policy.
pub fn engine_with_scoring(scoring: ScoringConfig) -> Arc<PollEngine> {
    let store: Arc<dyn PollStore> = Arc::new(MemoryStore::new());
    engine_with_store(store, scoring)
}

/// Engine over an explicit store, with both `GUILD` and a second guild (200)
/// configured for the same poll type.
pub fn engine_with_store(store: Arc<dyn PollStore>, scoring: ScoringConfig) -> Arc<PollEngine> {
    let registry = Arc::new(TenantRegistry::new(
        vec![tenant_config(GUILD), tenant_config(200)],
        Arc::clone(&store),
    ));
    Arc::new(PollEngine::new(registry, store, scoring))
}

pub fn tenant_config(guild_id: u64) -> TenantConfig {
    TenantConfig {
        poll_type: POLL_TYPE.to_string(),
        guild_id,
        admin_role_id: 900 + guild_id,
        dashboard_command: format!("{POLL_TYPE}-dashboard"),
    }
}

/// A three-option, single-select poll with "Red" as the configured answer.
pub fn red_blue_green() -> CreatePoll {
    CreatePoll {
        guild_id: GUILD,
        poll_type: POLL_TYPE.to_string(),
        question: "Which team wins tonight?".into(),
        options: vec!["Red".into(), "Blue".into(), "Green".into()],
        max_selections: 1,
        duration_seconds: 300,
        show_votes_while_active: false,
        correct_answers: Some(vec![0]),
        created_by: "admin".into(),
    }
}

/// A four-option multi-select poll with `{0, 2}` as the configured answers.
pub fn multi_select() -> CreatePoll {
    CreatePoll {
        guild_id: GUILD,
        poll_type: POLL_TYPE.to_string(),
        question: "Which maps rotate in?".into(),
        options: vec!["Canyon".into(), "Harbor".into(), "Summit".into(), "Mines".into()],
        max_selections: 3,
        duration_seconds: 300,
        show_votes_while_active: true,
        correct_answers: Some(vec![0, 2]),
        created_by: "admin".into(),
    }
}
