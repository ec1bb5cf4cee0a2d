//! Role-to-client routing.
//!
//! Each of the three roles gets its own client instance, even when two roles name
//! the same provider and model. The router tracks which role is currently acting.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info, warn};
use triad_core::Role;

use crate::client::{ClientFactory, LlmClient};
use crate::config::{ProviderConfig, WorkflowConfig};
use crate::error::{OrchestratorError, Result};

pub struct ClientRouter {
    factory: Arc<dyn ClientFactory>,
    clients: BTreeMap<Role, Arc<dyn LlmClient>>,
    active: Option<Role>,
    providers: Vec<ProviderConfig>,
}

impl ClientRouter {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            clients: BTreeMap::new(),
            active: None,
            providers: Vec::new(),
        }
    }

    /// Bind a client to every role.
    ///
    /// All three roles are resolved and built before anything is committed. If any
    /// role names an unknown provider, or its client cannot be built, the staged
    /// clients are dropped and the router keeps its previous bindings.
    ///
    /// A model missing from its provider's list is appended to the router's copy of
    /// that provider with a warning; the list is advisory.
    pub fn initialize_from_config(
        &mut self,
        config: &WorkflowConfig,
        providers: Vec<ProviderConfig>,
    ) -> Result<()> {
        let mut staged_providers = providers;
        let mut staged_clients = BTreeMap::new();

        for role in Role::ALL {
            let selection = config.selection(role);
            let available = provider_names(&staged_providers);

            let provider = staged_providers
                .iter_mut()
                .find(|p| p.name == selection.provider)
                .ok_or_else(|| OrchestratorError::UnknownProvider {
                    provider: selection.provider.clone(),
                    role,
                    available,
                })?;

            if !provider.has_model(&selection.model) {
                warn!(
                    provider = %provider.name,
                    model = %selection.model,
                    role = %role,
                    "Model not listed for provider, adding it"
                );
                provider.models.push(selection.model.clone());
            }

            let client = self.factory.create_client(provider, &selection.model)?;
            debug!(role = %role, provider = %provider.name, model = %selection.model, "Client created");
            staged_clients.insert(role, client);
        }

        self.clients = staged_clients;
        self.providers = staged_providers;
        self.active = None;

        info!(
            planner = %config.planning_model,
            coder = %config.coding_model,
            reviewer = %config.review_model,
            "Client router initialized"
        );
        Ok(())
    }

    /// Make `role` the acting role and return its client. No I/O.
    pub fn switch_to(&mut self, role: Role) -> Result<Arc<dyn LlmClient>> {
        let client = self
            .clients
            .get(&role)
            .cloned()
            .ok_or(OrchestratorError::RoleNotBound(role))?;
        self.active = Some(role);
        Ok(client)
    }

    pub fn client(&self, role: Role) -> Option<Arc<dyn LlmClient>> {
        self.clients.get(&role).cloned()
    }

    pub fn active(&self) -> Option<Arc<dyn LlmClient>> {
        self.active.and_then(|role| self.client(role))
    }

    pub fn active_role(&self) -> Option<Role> {
        self.active
    }

    pub fn is_initialized(&self) -> bool {
        Role::ALL.iter().all(|role| self.clients.contains_key(role))
    }

    /// Provider registry as resolved by the last successful initialization.
    pub fn providers(&self) -> &[ProviderConfig] {
        &self.providers
    }

    /// Reset every bound client concurrently. Fails on the first error; resets
    /// that already finished are not undone.
    pub async fn clear_all_contexts(&self) -> Result<()> {
        try_join_all(self.clients.values().map(|client| client.clear_context())).await?;
        debug!(clients = self.clients.len(), "Cleared all client contexts");
        Ok(())
    }

    /// Drop every binding. Network resources are the clients' concern.
    pub fn dispose(&mut self) {
        self.clients.clear();
        self.active = None;
        self.providers.clear();
        debug!("Client router disposed");
    }
}

impl fmt::Debug for ClientRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRouter")
            .field("roles", &self.clients.keys().collect::<Vec<_>>())
            .field("active", &self.active)
            .field("providers", &provider_names(&self.providers))
            .finish()
    }
}

fn provider_names(providers: &[ProviderConfig]) -> String {
    providers
        .iter()
        .map(|p| p.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
