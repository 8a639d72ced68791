//! Workflow driver: runs a stage list end to end.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use stocksync_connectors::ConnectorRegistry;

use crate::context::ExecutionContext;
use crate::credentials::CredentialResolver;
use crate::error::EngineError;
use crate::execution::{ExecutionStatus, StageStatus, WorkflowExecution};
use crate::interpreter::StageInterpreter;
use crate::workflow::{ErrorStrategy, WorkflowDefinition};

/// Executes configurable stage-based workflows.
///
/// One engine serves any number of runs; each run gets its own context and
/// connector instances, so independent runs may execute concurrently.
pub struct WorkflowEngine {
    registry: Arc<ConnectorRegistry>,
    interpreter: StageInterpreter,
}

impl WorkflowEngine {
    /// Create an engine with a connector registry and credential strategy.
    pub fn new(registry: Arc<ConnectorRegistry>, credentials: Arc<dyn CredentialResolver>) -> Self {
        Self { registry, interpreter: StageInterpreter::new(credentials) }
    }

    /// Execute a complete workflow.
    ///
    /// Always returns an execution record; failures (including connector
    /// initialization) surface through its status and error message, never
    /// as an error return.
    pub async fn execute_workflow(
        &self,
        workflow: &WorkflowDefinition,
        triggered_by: &str,
        initial_variables: Option<HashMap<String, Value>>,
    ) -> WorkflowExecution {
        let mut execution =
            WorkflowExecution::start(&workflow.id, triggered_by, workflow.enabled_stage_count());

        tracing::info!(
            execution_id = %execution.id,
            workflow_id = %workflow.id,
            triggered_by,
            total_stages = execution.total_stages,
            "Starting workflow execution"
        );

        if let Err(e) = self.run(workflow, initial_variables, &mut execution).await {
            tracing::error!(execution_id = %execution.id, error = %e, "Workflow execution failed");
            execution.status = ExecutionStatus::Failed;
            execution.error_message = Some(e.to_string());
        } else if execution.status == ExecutionStatus::Running {
            execution.status = ExecutionStatus::Completed;
        }

        execution.finalize();
        tracing::info!(
            execution_id = %execution.id,
            status = %execution.status,
            completed = execution.completed_stages,
            failed = execution.failed_stages,
            skipped = execution.skipped_stages,
            "Workflow execution finished"
        );
        execution
    }

    /// The driver loop. Errors returned here are the run-level uncaught
    /// kind; stage-level failures are folded into the execution record.
    async fn run(
        &self,
        workflow: &WorkflowDefinition,
        initial_variables: Option<HashMap<String, Value>>,
        execution: &mut WorkflowExecution,
    ) -> Result<(), EngineError> {
        let mut ctx = ExecutionContext::new(workflow);
        if let Some(overrides) = initial_variables {
            ctx.merge_variables(overrides);
        }

        self.initialize_connectors(workflow, &mut ctx)?;

        // Single pass in declared order: a stage whose dependency appears
        // later in the list is skipped and never revisited.
        for stage in &workflow.stages {
            if !stage.enabled {
                tracing::info!(stage = %stage.id, "Skipping disabled stage");
                continue;
            }

            if !ctx.dependencies_met(stage) {
                tracing::warn!(
                    stage = %stage.id,
                    depends_on = ?stage.depends_on,
                    "Dependencies not met, skipping stage"
                );
                continue;
            }

            let result = self.interpreter.execute_stage(stage, workflow, &mut ctx).await;
            let failed = result.status == StageStatus::Failed;
            let error_message = result.error_message.clone();

            ctx.stage_results.push(result.clone());
            execution.record(result);

            if failed && stage.error_strategy == ErrorStrategy::Fail {
                execution.status = ExecutionStatus::Failed;
                execution.error_message = error_message;
                tracing::error!(stage = %stage.id, "Stage failed with fail strategy, halting run");
                break;
            }
        }

        execution.final_variables = ctx.variables.clone();
        Ok(())
    }

    /// Instantiate the source and target connectors into the context.
    ///
    /// Instances are bare: credentials are resolved and injected per stage
    /// call, so one slot can serve calls against different credential sets.
    fn initialize_connectors(
        &self,
        workflow: &WorkflowDefinition,
        ctx: &mut ExecutionContext,
    ) -> Result<(), EngineError> {
        for (slot, binding) in [("source", &workflow.source), ("target", &workflow.target)] {
            let connector = self.registry.create(&binding.service_type).ok_or_else(|| {
                EngineError::configuration(format!(
                    "unknown service type '{}' for connector '{}'",
                    binding.service_type, slot
                ))
            })?;
            ctx.connectors.insert(slot.to_string(), connector);
        }

        tracing::info!(
            source = %workflow.source.service_type,
            target = %workflow.target.service_type,
            "Initialized connectors"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use stocksync_connectors::{
        Arguments, Capabilities, Capability, Connector, ConnectorError, ConnectorSchema,
        OperationOutput, OperationSpec, WriteSummary,
    };

    use crate::credentials::ConfigCredentialResolver;

    static SOURCE_OPERATIONS: &[OperationSpec] = &[OperationSpec {
        name: "read_inventory",
        capability: Capability::ReadInventory,
        params: &["api_key", "base_url", "limit"],
        variadic: false,
    }];

    static TARGET_OPERATIONS: &[OperationSpec] = &[
        OperationSpec {
            name: "read_inventory",
            capability: Capability::ReadInventory,
            params: &["api_key", "base_url", "warehouse_id"],
            variadic: false,
        },
        OperationSpec {
            name: "write_inventory",
            capability: Capability::WriteInventory,
            params: &["api_key", "base_url", "items", "warehouse_id"],
            variadic: false,
        },
    ];

    /// Source stub returning a fixed item list.
    struct StubSource {
        items: Vec<Value>,
        calls: Arc<AtomicU32>,
        failures_before_success: u32,
    }

    #[async_trait]
    impl Connector for StubSource {
        fn service_type(&self) -> &'static str {
            "stub_source"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities { can_read_inventory: true, ..Default::default() }
        }

        fn inventory_schema(&self) -> ConnectorSchema {
            ConnectorSchema::default()
        }

        fn operations(&self) -> &'static [OperationSpec] {
            SOURCE_OPERATIONS
        }

        async fn test_connection(&self, _args: &Arguments) -> bool {
            true
        }

        async fn dispatch(
            &self,
            _spec: &OperationSpec,
            _args: &Arguments,
        ) -> Result<OperationOutput, ConnectorError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                return Err(ConnectorError::api("stub_source", "HTTP 503: unavailable"));
            }
            Ok(OperationOutput::Items(self.items.clone()))
        }
    }

    /// Target stub recording the arguments of every write call.
    struct StubTarget {
        existing: Vec<Value>,
        write_args: Arc<Mutex<Vec<Arguments>>>,
    }

    #[async_trait]
    impl Connector for StubTarget {
        fn service_type(&self) -> &'static str {
            "stub_target"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                can_read_inventory: true,
                can_write_inventory: true,
                ..Default::default()
            }
        }

        fn inventory_schema(&self) -> ConnectorSchema {
            ConnectorSchema::default()
        }

        fn operations(&self) -> &'static [OperationSpec] {
            TARGET_OPERATIONS
        }

        async fn test_connection(&self, _args: &Arguments) -> bool {
            true
        }

        async fn dispatch(
            &self,
            spec: &OperationSpec,
            args: &Arguments,
        ) -> Result<OperationOutput, ConnectorError> {
            match spec.name {
                "read_inventory" => Ok(OperationOutput::Items(self.existing.clone())),
                "write_inventory" => {
                    let items = args.require_items("write_inventory", "items")?.clone();
                    self.write_args.lock().unwrap().push(args.clone());
                    Ok(OperationOutput::Summary(WriteSummary {
                        success_count: items.len(),
                        failed_count: 0,
                        total_count: items.len(),
                        items: Some(items),
                    }))
                }
                other => Err(ConnectorError::UnknownOperation {
                    service: "stub_target",
                    operation: other.to_string(),
                }),
            }
        }
    }

    struct Fixture {
        engine: WorkflowEngine,
        source_calls: Arc<AtomicU32>,
        write_args: Arc<Mutex<Vec<Arguments>>>,
    }

    fn fixture(source_items: Vec<Value>, existing: Vec<Value>, failures: u32) -> Fixture {
        let source_calls = Arc::new(AtomicU32::new(0));
        let write_args: Arc<Mutex<Vec<Arguments>>> = Arc::new(Mutex::new(Vec::new()));

        let mut registry = ConnectorRegistry::new();
        {
            let calls = Arc::clone(&source_calls);
            registry.register("stub_source", move || {
                Arc::new(StubSource {
                    items: source_items.clone(),
                    calls: Arc::clone(&calls),
                    failures_before_success: failures,
                })
            });
        }
        {
            let write_args = Arc::clone(&write_args);
            registry.register("stub_target", move || {
                Arc::new(StubTarget {
                    existing: existing.clone(),
                    write_args: Arc::clone(&write_args),
                })
            });
        }

        let engine = WorkflowEngine::new(
            Arc::new(registry),
            Arc::new(ConfigCredentialResolver::new()),
        );
        Fixture { engine, source_calls, write_args }
    }

    fn workflow_from(json: Value) -> WorkflowDefinition {
        serde_json::from_value(json).unwrap()
    }

    fn sync_workflow_json() -> Value {
        serde_json::json!({
            "id": "shipstream-to-warepoint",
            "name": "Inventory sync",
            "source": {"service_type": "stub_source"},
            "target": {"service_type": "stub_target"},
            "credentials_config": {
                "source_creds": {"api_key": "src-key", "base_url": "https://src.example.com"},
                "target_creds": {"api_key": "tgt-key", "base_url": "https://tgt.example.com",
                                 "warehouse_id": 17, "extra_credential": "never-passed"}
            },
            "stages": [
                {"id": "read-source", "type": "connector_method", "connector": "source",
                 "method": "read_inventory", "credentials_key": "source_creds",
                 "output_variable": "source_items"},
                {"id": "read-target", "type": "connector_method", "connector": "target",
                 "method": "read_inventory", "credentials_key": "target_creds",
                 "output_variable": "target_items",
                 "depends_on": ["read-source"]},
                {"id": "extract-existing-skus", "type": "transform",
                 "parameters": {"transform_type": "extract_field", "field": "sku"},
                 "input_variables": ["target_items"],
                 "output_variable": "existing_skus",
                 "depends_on": ["read-target"]},
                {"id": "find-new-items", "type": "filter",
                 "parameters": {"filter_type": "exclude", "field": "sku",
                                "value_from_variable": "existing_skus"},
                 "input_variables": ["source_items"],
                 "output_variable": "items",
                 "depends_on": ["read-source", "extract-existing-skus"]},
                {"id": "write-new-items", "type": "connector_method", "connector": "target",
                 "method": "write_inventory", "credentials_key": "target_creds",
                 "input_variables": ["items"],
                 "output_variable": "write_result",
                 "depends_on": ["find-new-items"]}
            ]
        })
    }

    #[tokio::test]
    async fn test_end_to_end_sync() {
        let fixture = fixture(
            vec![serde_json::json!({"sku": "A"}), serde_json::json!({"sku": "B"})],
            vec![serde_json::json!({"sku": "A"})],
            0,
        );
        let workflow = workflow_from(sync_workflow_json());

        let execution = fixture.engine.execute_workflow(&workflow, "manual", None).await;

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.total_stages, 5);
        assert_eq!(execution.completed_stages, 5);
        assert_eq!(execution.failed_stages, 0);

        // The write stage received exactly the items absent from the target.
        let writes = fixture.write_args.lock().unwrap();
        assert_eq!(writes.len(), 1);
        let items = writes[0].get("items").unwrap().as_array().unwrap();
        assert_eq!(items, &vec![serde_json::json!({"sku": "B"})]);

        // Credentials were injected for declared parameter names only.
        assert_eq!(writes[0].get_str("api_key"), Some("tgt-key"));
        assert_eq!(writes[0].get_u64("warehouse_id"), Some(17));
        assert!(writes[0].get("extra_credential").is_none());

        assert_eq!(
            execution.final_variables.get("write_result").and_then(|v| v.get("success_count")),
            Some(&serde_json::json!(1))
        );
    }

    #[tokio::test]
    async fn test_total_stages_counts_enabled_only() {
        let fixture = fixture(vec![], vec![], 0);
        let workflow = workflow_from(serde_json::json!({
            "id": "wf", "name": "wf",
            "source": {"service_type": "stub_source"},
            "target": {"service_type": "stub_target"},
            "stages": [
                {"id": "a", "type": "log", "parameters": {"message": "a"}},
                {"id": "b", "type": "log", "enabled": false, "parameters": {"message": "b"}},
                {"id": "c", "type": "log", "parameters": {"message": "c"}}
            ]
        }));

        let execution = fixture.engine.execute_workflow(&workflow, "manual", None).await;

        assert_eq!(execution.total_stages, 2);
        assert_eq!(execution.completed_stages, 2);
        // Disabled stages never appear in the results.
        assert!(execution.stage_results.iter().all(|r| r.stage_id != "b"));
    }

    #[tokio::test]
    async fn test_fail_strategy_halts_run() {
        let fixture = fixture(vec![], vec![], 0);
        let workflow = workflow_from(serde_json::json!({
            "id": "wf", "name": "wf",
            "source": {"service_type": "stub_source"},
            "target": {"service_type": "stub_target"},
            "stages": [
                // Reserved type always fails; default strategy is fail.
                {"id": "broken", "type": "loop"},
                {"id": "after", "type": "log", "parameters": {"message": "never"}}
            ]
        }));

        let execution = fixture.engine.execute_workflow(&workflow, "manual", None).await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.error_message.is_some());
        assert_eq!(execution.stage_results.len(), 1);
        assert!(execution.stage_results.iter().all(|r| r.stage_id != "after"));
    }

    #[tokio::test]
    async fn test_continue_strategy_proceeds() {
        let fixture = fixture(vec![], vec![], 0);
        let workflow = workflow_from(serde_json::json!({
            "id": "wf", "name": "wf",
            "source": {"service_type": "stub_source"},
            "target": {"service_type": "stub_target"},
            "stages": [
                {"id": "broken", "type": "loop", "error_strategy": "continue"},
                {"id": "after", "type": "log", "parameters": {"message": "still runs"}}
            ]
        }));

        let execution = fixture.engine.execute_workflow(&workflow, "manual", None).await;

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.failed_stages, 1);
        assert_eq!(execution.completed_stages, 1);
        assert!(execution.stage_results.iter().any(|r| r.stage_id == "after"));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let fixture = fixture(vec![serde_json::json!({"sku": "A"})], vec![], 2);
        let workflow = workflow_from(serde_json::json!({
            "id": "wf", "name": "wf",
            "source": {"service_type": "stub_source"},
            "target": {"service_type": "stub_target"},
            "credentials_config": {
                "source_creds": {"api_key": "k", "base_url": "https://src.example.com"}
            },
            "stages": [
                {"id": "read", "type": "connector_method", "connector": "source",
                 "method": "read_inventory", "credentials_key": "source_creds",
                 "output_variable": "items",
                 "error_strategy": "retry", "retry_count": 3, "retry_delay": 0}
            ]
        }));

        let execution = fixture.engine.execute_workflow(&workflow, "manual", None).await;

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(fixture.source_calls.load(Ordering::SeqCst), 3);
        // One logical invocation, one result entry, retries recorded on it.
        assert_eq!(execution.stage_results.len(), 1);
        assert_eq!(execution.stage_results[0].retry_count, 2);
        assert_eq!(execution.stage_results[0].status, StageStatus::Success);
    }

    #[tokio::test]
    async fn test_retry_attempts_are_bounded() {
        let fixture = fixture(vec![], vec![], u32::MAX);
        let workflow = workflow_from(serde_json::json!({
            "id": "wf", "name": "wf",
            "source": {"service_type": "stub_source"},
            "target": {"service_type": "stub_target"},
            "credentials_config": {
                "source_creds": {"api_key": "k", "base_url": "https://src.example.com"}
            },
            "stages": [
                {"id": "read", "type": "connector_method", "connector": "source",
                 "method": "read_inventory", "credentials_key": "source_creds",
                 "error_strategy": "retry", "retry_count": 2, "retry_delay": 0}
            ]
        }));

        let execution = fixture.engine.execute_workflow(&workflow, "manual", None).await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        // retry_count = 2 means at most 3 attempts in total.
        assert_eq!(fixture.source_calls.load(Ordering::SeqCst), 3);
        assert_eq!(execution.stage_results.len(), 1);
    }

    #[tokio::test]
    async fn test_dependency_listed_later_never_runs() {
        let fixture = fixture(vec![], vec![], 0);
        // "first" depends on "second", which appears later in the list.
        // Single-pass iteration means "first" is skipped and not revisited,
        // even though "second" succeeds afterwards.
        let workflow = workflow_from(serde_json::json!({
            "id": "wf", "name": "wf",
            "source": {"service_type": "stub_source"},
            "target": {"service_type": "stub_target"},
            "stages": [
                {"id": "first", "type": "log", "parameters": {"message": "a"},
                 "depends_on": ["second"]},
                {"id": "second", "type": "log", "parameters": {"message": "b"}}
            ]
        }));

        let execution = fixture.engine.execute_workflow(&workflow, "manual", None).await;

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.stage_results.len(), 1);
        assert_eq!(execution.stage_results[0].stage_id, "second");
        // The skipped-for-dependency stage produced no result record at all.
        assert_eq!(execution.skipped_stages, 0);
    }

    #[tokio::test]
    async fn test_dependency_on_failed_stage_skips_dependent() {
        let fixture = fixture(vec![], vec![], 0);
        let workflow = workflow_from(serde_json::json!({
            "id": "wf", "name": "wf",
            "source": {"service_type": "stub_source"},
            "target": {"service_type": "stub_target"},
            "stages": [
                {"id": "broken", "type": "loop", "error_strategy": "continue"},
                {"id": "dependent", "type": "log", "parameters": {"message": "x"},
                 "depends_on": ["broken"]},
                {"id": "independent", "type": "log", "parameters": {"message": "y"}}
            ]
        }));

        let execution = fixture.engine.execute_workflow(&workflow, "manual", None).await;

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(execution.stage_results.iter().all(|r| r.stage_id != "dependent"));
        assert!(execution.stage_results.iter().any(|r| r.stage_id == "independent"));
    }

    #[tokio::test]
    async fn test_unknown_service_type_fails_run() {
        let fixture = fixture(vec![], vec![], 0);
        let workflow = workflow_from(serde_json::json!({
            "id": "wf", "name": "wf",
            "source": {"service_type": "feedonomics"},
            "target": {"service_type": "stub_target"},
            "stages": [
                {"id": "a", "type": "log", "parameters": {"message": "a"}}
            ]
        }));

        let execution = fixture.engine.execute_workflow(&workflow, "manual", None).await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.error_message.unwrap().contains("unknown service type 'feedonomics'"));
        assert!(execution.stage_results.is_empty());
    }

    #[tokio::test]
    async fn test_initial_variables_override_workflow_seed() {
        let fixture = fixture(vec![], vec![], 0);
        let workflow = workflow_from(serde_json::json!({
            "id": "wf", "name": "wf",
            "source": {"service_type": "stub_source"},
            "target": {"service_type": "stub_target"},
            "variables": {"mode": "full", "batch": 10},
            "stages": [
                {"id": "a", "type": "log", "parameters": {"message": "mode={mode}"},
                 "output_variable": "logged"}
            ]
        }));

        let overrides = HashMap::from([("mode".to_string(), serde_json::json!("delta"))]);
        let execution = fixture.engine.execute_workflow(&workflow, "api", Some(overrides)).await;

        assert_eq!(execution.final_variables.get("logged"), Some(&serde_json::json!("mode=delta")));
        assert_eq!(execution.final_variables.get("batch"), Some(&serde_json::json!(10)));
        assert_eq!(execution.triggered_by, "api");
    }

    #[tokio::test]
    async fn test_unsupported_capability_surfaces_as_stage_failure() {
        let fixture = fixture(vec![], vec![], 0);
        let workflow = workflow_from(serde_json::json!({
            "id": "wf", "name": "wf",
            "source": {"service_type": "stub_source"},
            "target": {"service_type": "stub_target"},
            "stages": [
                // The source declares no write operation at all.
                {"id": "bad-write", "type": "connector_method", "connector": "source",
                 "method": "write_inventory", "error_strategy": "continue"}
            ]
        }));

        let execution = fixture.engine.execute_workflow(&workflow, "manual", None).await;

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.failed_stages, 1);
        let message = execution.stage_results[0].error_message.as_deref().unwrap();
        assert!(message.contains("does not have method"));
    }
}
