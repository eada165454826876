//! Tenant registry: configuration resolution and the active-instance binding.
//!
//! The registry is populated once at startup from configuration and queried
//! read-mostly thereafter. Its one mutation point is [`TenantRegistry::bind_active`],
//! which creates a poll and binds it as the tenant's active instance in a
//! single transactional store step - the enforcement point for the
//! at-most-one-active-poll invariant.

use crate::config::TenantConfig;
use crate::errors::PollError;
use crate::poll::{NewPoll, PollInstance};
use crate::storage::PollStore;
use crate::types::{GuildId, TenantKey};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Maps (guild, poll-type) pairs to their configuration and active poll.
pub struct TenantRegistry {
    configs: HashMap<TenantKey, TenantConfig>,
    store: Arc<dyn PollStore>,
}

impl TenantRegistry {
    /// Builds the registry from loaded tenant configurations.
    #[must_use]
    pub fn new(tenants: Vec<TenantConfig>, store: Arc<dyn PollStore>) -> Self {
        let configs: HashMap<TenantKey, TenantConfig> = tenants
            .into_iter()
            .map(|t| (TenantKey::new(t.guild_id, t.poll_type.clone()), t))
            .collect();
        debug!(tenants = configs.len(), "tenant registry populated");
        Self { configs, store }
    }

    /// Resolves the configuration for a (guild, poll-type) pair.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::UnknownTenant`] if no configuration was loaded
    /// for that pair.
    pub fn resolve(&self, guild_id: GuildId, poll_type: &str) -> Result<&TenantConfig, PollError> {
        self.configs
            .get(&TenantKey::new(guild_id, poll_type))
            .ok_or_else(|| PollError::UnknownTenant { guild_id, poll_type: poll_type.to_string() })
    }

    /// Returns every configured tenant key.
    pub fn tenants(&self) -> impl Iterator<Item = &TenantKey> {
        self.configs.keys()
    }

    /// Returns the tenant's currently active poll instance, if any.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::StorageUnavailable`] on persistent backend
    /// failure.
    pub async fn active_instance(
        &self,
        tenant: &TenantKey,
    ) -> Result<Option<PollInstance>, PollError> {
        self.store.active_poll(tenant).await
    }

    /// Creates `new_poll` and binds it as its tenant's active instance in one
    /// transactional step.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::ConflictingActivePoll`] if the tenant already has
    /// an active instance; the existing poll is left untouched.
    pub async fn bind_active(&self, new_poll: NewPoll) -> Result<PollInstance, PollError> {
        self.store.create_poll(new_poll).await
    }
}
