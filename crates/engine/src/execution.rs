//! Execution records: per-stage results and the run-level record.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of a single stage execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Running,
    Success,
    Failed,
    Skipped,
}

impl StageStatus {
    /// Returns true if the stage completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, StageStatus::Success)
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StageStatus::Running => "running",
            StageStatus::Success => "success",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// Result of executing a single stage.
///
/// Created with status `running` when the stage starts, mutated to its
/// terminal status, then appended to the execution record exactly once per
/// logical stage invocation. A retried stage keeps only the final attempt's
/// result, with `retry_count` recording how many retries were spent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_id: String,
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_seconds: Option<f64>,

    /// Data produced by this stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    /// Number of items processed, for list-shaped outputs.
    #[serde(default)]
    pub items_processed: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Number of retries attempted before this result.
    #[serde(default)]
    pub retry_count: u32,
}

impl StageResult {
    /// Create a running result for the given stage.
    pub fn start(stage_id: impl Into<String>) -> Self {
        Self {
            stage_id: stage_id.into(),
            status: StageStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            execution_time_seconds: None,
            output: None,
            items_processed: 0,
            error_message: None,
            retry_count: 0,
        }
    }

    /// Mark the stage successful with the produced output.
    pub fn succeed(&mut self, output: Value, items_processed: usize) {
        self.status = StageStatus::Success;
        self.output = Some(output);
        self.items_processed = items_processed;
        self.finish();
    }

    /// Mark the stage failed with an error message.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = StageStatus::Failed;
        self.error_message = Some(message.into());
        self.finish();
    }

    /// Mark the stage skipped (condition gate evaluated false).
    pub fn skip(&mut self) {
        self.status = StageStatus::Skipped;
        self.finish();
    }

    fn finish(&mut self) {
        let completed = Utc::now();
        self.completed_at = Some(completed);
        self.execution_time_seconds =
            Some((completed - self.started_at).num_milliseconds() as f64 / 1000.0);
    }
}

/// Overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Record of one workflow run.
///
/// Finalized exactly once when the driver loop exits; the engine never
/// mutates it afterwards. Persisting it is the caller's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Unique execution identifier.
    pub id: String,

    /// Workflow that was executed.
    pub workflow_id: String,

    /// What triggered this run (api, scheduler, manual).
    pub triggered_by: String,

    pub started_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_seconds: Option<f64>,

    pub status: ExecutionStatus,

    pub stage_results: Vec<StageResult>,

    /// Count of enabled stages at run start.
    pub total_stages: usize,
    pub completed_stages: usize,
    pub failed_stages: usize,
    pub skipped_stages: usize,

    /// Snapshot of the context variables at run end.
    #[serde(default)]
    pub final_variables: HashMap<String, Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl WorkflowExecution {
    /// Create a running execution record.
    pub fn start(workflow_id: impl Into<String>, triggered_by: impl Into<String>, total_stages: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            triggered_by: triggered_by.into(),
            started_at: Utc::now(),
            completed_at: None,
            execution_time_seconds: None,
            status: ExecutionStatus::Running,
            stage_results: Vec::new(),
            total_stages,
            completed_stages: 0,
            failed_stages: 0,
            skipped_stages: 0,
            final_variables: HashMap::new(),
            error_message: None,
        }
    }

    /// Append a stage result and update the aggregate counters.
    pub fn record(&mut self, result: StageResult) {
        match result.status {
            StageStatus::Success => self.completed_stages += 1,
            StageStatus::Failed => self.failed_stages += 1,
            StageStatus::Skipped => self.skipped_stages += 1,
            StageStatus::Running => {}
        }
        self.stage_results.push(result);
    }

    /// Record end timestamp and elapsed seconds.
    pub fn finalize(&mut self) {
        let completed = Utc::now();
        self.completed_at = Some(completed);
        self.execution_time_seconds =
            Some((completed - self.started_at).num_milliseconds() as f64 / 1000.0);
    }
}
