// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session provider, model and guide resolution.
//!
//! A session's `config` metadata may override the agent defaults; the
//! resolver computes the effective instance for each model call, so an
//! override takes effect on the very next turn.

use std::sync::Arc;

use starry_core::{Guide, ModelSection, Provider, Registries, SessionId, SessionManager};

use crate::error::RuntimeError;

pub struct Resolver {
    registries: Arc<Registries>,
    sessions: Arc<SessionManager>,
    defaults: ModelSection,
}

impl Resolver {
    pub fn new(
        registries: Arc<Registries>,
        sessions: Arc<SessionManager>,
        defaults: ModelSection,
    ) -> Self {
        Self {
            registries,
            sessions,
            defaults,
        }
    }

    /// Effective provider for a session: session override, agent
    /// default, else the first registered provider.
    pub fn provider_for(&self, session: &SessionId) -> Result<Arc<dyn Provider>, RuntimeError> {
        let configured = self
            .sessions
            .session_config(session)
            .and_then(|c| c.provider)
            .or_else(|| self.defaults.provider.clone());

        match configured {
            Some(id) => self
                .registries
                .providers
                .get(&id)
                .ok_or_else(|| RuntimeError::NoProvider(format!(": {id} not registered"))),
            None => self
                .registries
                .providers
                .list()
                .into_iter()
                .next()
                .ok_or_else(|| RuntimeError::NoProvider(String::new())),
        }
    }

    /// Effective model id: session override, agent default, else the
    /// provider's first model.
    pub fn model_for(
        &self,
        session: &SessionId,
        provider: &Arc<dyn Provider>,
    ) -> Result<String, RuntimeError> {
        let configured = self
            .sessions
            .session_config(session)
            .and_then(|c| c.model)
            .or_else(|| self.defaults.model.clone());

        match configured {
            Some(model) => Ok(model),
            None => provider
                .models()
                .first()
                .map(|m| m.id.clone())
                .ok_or_else(|| RuntimeError::NoModel(provider.id().to_string())),
        }
    }

    /// Effective guide, when one is configured and registered.
    pub fn guide_for(&self, session: &SessionId) -> Option<Arc<Guide>> {
        let configured = self
            .sessions
            .session_config(session)
            .and_then(|c| c.extra.get("guide").and_then(|v| v.as_str().map(String::from)))
            .or_else(|| self.defaults.guide.clone())?;
        self.registries.guides.get(&configured)
    }
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;
