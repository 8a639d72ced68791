//! Credential resolution for connector calls.
//!
//! Credentials are injected per stage call, not at connector construction,
//! so different stages may call the same logical connector slot with
//! different credential sets (e.g. one workflow writing to two warehouses).
//! The resolution strategy is injected into the interpreter; the mapping
//! from stages to credential sets is configuration, not code.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::EngineError;
use crate::workflow::{StageDefinition, WorkflowDefinition};

/// A resolved, flat credential map: parameter name -> value
/// (api_key, base_url, warehouse_id, ...).
pub type CredentialSet = serde_json::Map<String, Value>;

/// Strategy for resolving the credential set a stage call should use.
pub trait CredentialResolver: Send + Sync {
    /// Resolve credentials for one stage of a workflow.
    fn resolve(
        &self,
        stage: &StageDefinition,
        workflow: &WorkflowDefinition,
    ) -> Result<CredentialSet, EngineError>;
}

/// Default resolver: stage `credentials_key` selects a named set from the
/// workflow's credential configuration; stages without a key fall back to a
/// per-service-type default set registered at construction time.
#[derive(Default)]
pub struct ConfigCredentialResolver {
    defaults: HashMap<String, CredentialSet>,
}

impl ConfigCredentialResolver {
    /// Create a resolver with no service-type defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the default credential set for a service type.
    pub fn with_default(mut self, service_type: impl Into<String>, set: CredentialSet) -> Self {
        self.defaults.insert(service_type.into(), set);
        self
    }

    /// Service type bound to the stage's connector slot, if any.
    fn stage_service_type<'a>(
        stage: &StageDefinition,
        workflow: &'a WorkflowDefinition,
    ) -> Option<&'a str> {
        stage
            .connector
            .as_deref()
            .and_then(|slot| workflow.binding(slot))
            .map(|binding| binding.service_type.as_str())
    }
}

impl CredentialResolver for ConfigCredentialResolver {
    fn resolve(
        &self,
        stage: &StageDefinition,
        workflow: &WorkflowDefinition,
    ) -> Result<CredentialSet, EngineError> {
        if let Some(key) = &stage.credentials_key {
            return workflow.credentials.get(key).cloned().ok_or_else(|| {
                EngineError::configuration(format!(
                    "stage '{}' references unknown credential set '{}'",
                    stage.id, key
                ))
            });
        }

        if let Some(service_type) = Self::stage_service_type(stage, workflow) {
            if let Some(set) = self.defaults.get(service_type) {
                return Ok(set.clone());
            }
        }

        Ok(CredentialSet::new())
    }
}
