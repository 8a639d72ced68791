//! Per-run execution context.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use stocksync_connectors::Connector;

use crate::error::EngineError;
use crate::execution::StageResult;
use crate::workflow::{StageDefinition, WorkflowDefinition};

/// Mutable state threaded through stage execution for one run.
///
/// Created fresh per run and dropped at run end; nothing is shared between
/// concurrent runs.
pub struct ExecutionContext {
    /// Variable store, seeded from the workflow definition and mutated by
    /// stage outputs. Only the final value per key matters.
    pub variables: HashMap<String, Value>,

    /// Live connectors, keyed by logical slot name (source/target).
    /// Populated once at run start and never replaced.
    pub connectors: HashMap<String, Arc<dyn Connector>>,

    /// Results of stages executed so far, in execution order.
    pub stage_results: Vec<StageResult>,
}

impl ExecutionContext {
    /// Create a context seeded from the workflow's variables.
    pub fn new(workflow: &WorkflowDefinition) -> Self {
        Self {
            variables: workflow.variables.clone(),
            connectors: HashMap::new(),
            stage_results: Vec::new(),
        }
    }

    /// Set a variable value.
    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        tracing::debug!(variable = %name, "Set context variable");
        self.variables.insert(name, value);
    }

    /// Get a variable value.
    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Overlay caller-supplied variables; the caller wins on key collision.
    pub fn merge_variables(&mut self, overrides: HashMap<String, Value>) {
        for (name, value) in overrides {
            self.variables.insert(name, value);
        }
    }

    /// Get a connector by slot name.
    pub fn connector(&self, name: &str) -> Result<&Arc<dyn Connector>, EngineError> {
        self.connectors.get(name).ok_or_else(|| {
            let mut available: Vec<&str> = self.connectors.keys().map(String::as_str).collect();
            available.sort_unstable();
            EngineError::configuration(format!(
                "connector '{}' not found; available: {:?}",
                name, available
            ))
        })
    }

    /// Check whether every dependency of the stage has already completed
    /// successfully. Only results recorded so far count: iteration is
    /// single-pass in declared order, so dependencies must appear earlier
    /// in the stage list.
    pub fn dependencies_met(&self, stage: &StageDefinition) -> bool {
        stage.depends_on.iter().all(|dep| {
            self.stage_results
                .iter()
                .any(|r| r.stage_id == *dep && r.status.is_success())
        })
    }
}
