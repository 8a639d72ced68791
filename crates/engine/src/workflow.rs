//! Workflow definition types - the persisted wire format.
//!
//! These types deserialize the workflow documents stored by the
//! configuration service. The shape of [`StageDefinition`] is the
//! compatibility-critical surface: existing documents encode stage graphs
//! that must keep executing identically.
//!
//! Stage parameters stay a free-form map on the wire; [`StageDefinition::params`]
//! parses them into one typed variant per stage kind at dispatch time.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;
use crate::transforms::FieldMapping;

/// Stage types the interpreter understands.
///
/// `condition` and `loop` are reserved by the wire format but rejected at
/// dispatch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    ConnectorMethod,
    Transform,
    Filter,
    MapFields,
    Condition,
    Loop,
    Log,
    SetVariable,
}

impl std::fmt::Display for StageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StageType::ConnectorMethod => "connector_method",
            StageType::Transform => "transform",
            StageType::Filter => "filter",
            StageType::MapFields => "map_fields",
            StageType::Condition => "condition",
            StageType::Loop => "loop",
            StageType::Log => "log",
            StageType::SetVariable => "set_variable",
        };
        write!(f, "{}", s)
    }
}

/// What happens when a stage fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    /// Stop the run and fail it.
    #[default]
    Fail,
    /// Skip this stage and continue.
    Skip,
    /// Log the error but continue.
    Continue,
    /// Retry the stage up to `retry_count` more times.
    Retry,
}

/// Binding of a logical connector slot to a service.
///
/// Carries the service-type tag plus any static service settings. Credential
/// placeholders in the settings are resolved externally before execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorBinding {
    /// Service type tag, e.g. "shipstream" or "warepoint".
    pub service_type: String,

    /// Static service-specific settings (default warehouse, etc).
    #[serde(flatten)]
    pub settings: serde_json::Map<String, Value>,
}

impl ConnectorBinding {
    /// Create a binding with no extra settings.
    pub fn new(service_type: impl Into<String>) -> Self {
        Self { service_type: service_type.into(), settings: serde_json::Map::new() }
    }
}

fn default_true() -> bool {
    true
}

fn default_retry_delay() -> u64 {
    5
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_timeout() -> u64 {
    3600
}

/// Configuration for a single stage in a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Unique stage identifier within the workflow.
    pub id: String,

    /// Human-readable stage name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Stage type.
    #[serde(rename = "type")]
    pub kind: StageType,

    /// Disabled stages are skipped entirely, not even dependency-checked.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Connector slot name (source/target), for connector_method stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector: Option<String>,

    /// Operation to invoke on the connector, for connector_method stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Named credential set for this stage's connector calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_key: Option<String>,

    /// Stage-type-specific parameters (free-form on the wire).
    #[serde(default)]
    pub parameters: serde_json::Map<String, Value>,

    /// Variables whose current values are supplied as call inputs.
    #[serde(default)]
    pub input_variables: Vec<String>,

    /// Variable that receives this stage's result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_variable: Option<String>,

    /// Stage ids that must have completed successfully before this one runs.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Predicate checked against the context before execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// How to handle a failure of this stage.
    #[serde(default)]
    pub error_strategy: ErrorStrategy,

    /// Number of retries for the retry strategy.
    #[serde(default)]
    pub retry_count: u32,

    /// Delay between retries in seconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
}

impl StageDefinition {
    /// Create a minimal stage of the given type.
    pub fn new(id: impl Into<String>, kind: StageType) -> Self {
        Self {
            id: id.into(),
            name: None,
            description: None,
            kind,
            enabled: true,
            connector: None,
            method: None,
            credentials_key: None,
            parameters: serde_json::Map::new(),
            input_variables: Vec::new(),
            output_variable: None,
            depends_on: Vec::new(),
            condition: None,
            error_strategy: ErrorStrategy::default(),
            retry_count: 0,
            retry_delay: default_retry_delay(),
        }
    }

    /// Parse the free-form parameter map into its typed form.
    pub fn params(&self) -> Result<StageParams, EngineError> {
        let raw = Value::Object(self.parameters.clone());
        match self.kind {
            StageType::ConnectorMethod => Ok(StageParams::ConnectorMethod),
            StageType::Transform => {
                let mut map = self.parameters.clone();
                // Absent transform_type means identity on the wire.
                map.entry("transform_type").or_insert_with(|| Value::String("identity".into()));
                serde_json::from_value(Value::Object(map))
                    .map(StageParams::Transform)
                    .map_err(|e| invalid_params(&self.id, e))
            }
            StageType::Filter => serde_json::from_value(raw)
                .map(StageParams::Filter)
                .map_err(|e| invalid_params(&self.id, e)),
            StageType::MapFields => serde_json::from_value(raw)
                .map(StageParams::MapFields)
                .map_err(|e| invalid_params(&self.id, e)),
            StageType::Log => serde_json::from_value(raw)
                .map(StageParams::Log)
                .map_err(|e| invalid_params(&self.id, e)),
            StageType::SetVariable => serde_json::from_value(raw)
                .map(StageParams::SetVariable)
                .map_err(|e| invalid_params(&self.id, e)),
            StageType::Condition | StageType::Loop => Err(EngineError::configuration(format!(
                "stage '{}': stage type '{}' is reserved and cannot be executed",
                self.id, self.kind
            ))),
        }
    }
}

fn invalid_params(stage_id: &str, e: serde_json::Error) -> EngineError {
    EngineError::configuration(format!("stage '{}': invalid parameters: {}", stage_id, e))
}

/// Typed view of a stage's parameter map, one variant per stage type.
#[derive(Debug, Clone)]
pub enum StageParams {
    /// Parameters are the free-form call-argument seed; used verbatim.
    ConnectorMethod,
    Transform(TransformParams),
    Filter(FilterParams),
    MapFields(MapFieldsParams),
    Log(LogParams),
    SetVariable(SetVariableParams),
}

/// Transform sub-behavior, selected by `transform_type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "transform_type", rename_all = "snake_case")]
pub enum TransformParams {
    /// Pass the input through unchanged.
    Identity,
    /// Project one field from each item of a list, or from a single object.
    ExtractField { field: String },
    /// Keep only items where `field` equals `value`.
    FilterField {
        field: String,
        #[serde(default)]
        value: Value,
    },
    /// Attach or overwrite a constant field on every item.
    AddField {
        field: String,
        #[serde(default)]
        value: Value,
    },
    /// Take an index range of a list.
    Slice {
        #[serde(default)]
        start: usize,
        #[serde(default)]
        end: Option<usize>,
    },
}

/// Membership mode for the filter stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Keep items whose field value is in the set.
    #[default]
    Include,
    /// Keep items whose field value is not in the set.
    Exclude,
}

/// Parameters for the filter stage.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterParams {
    /// Field to match on.
    #[serde(default)]
    pub field: Option<String>,

    #[serde(default, rename = "filter_type")]
    pub mode: FilterMode,

    /// Context variable holding the dynamic value set.
    #[serde(default, alias = "values_variable")]
    pub value_from_variable: Option<String>,

    /// Static value fallback when no variable set is configured.
    #[serde(default)]
    pub value: Option<Value>,
}

/// Parameters for the map_fields stage.
#[derive(Debug, Clone, Deserialize)]
pub struct MapFieldsParams {
    /// Static field-rename map (old name -> new name).
    #[serde(default)]
    pub mappings: HashMap<String, String>,

    /// Full mapping list with per-field transforms; takes precedence over
    /// `mappings` when present.
    #[serde(default)]
    pub field_mappings: Option<Vec<FieldMapping>>,
}

/// Log emission level for the log stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

/// Parameters for the log stage.
#[derive(Debug, Clone, Deserialize)]
pub struct LogParams {
    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub level: LogLevel,
}

/// Parameters for the set_variable stage.
#[derive(Debug, Clone, Deserialize)]
pub struct SetVariableParams {
    pub variable_name: String,

    #[serde(default)]
    pub value: Value,
}

/// Complete workflow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique workflow identifier.
    pub id: String,

    /// Human-readable workflow name.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default = "default_version")]
    pub version: String,

    /// Source connector binding.
    pub source: ConnectorBinding,

    /// Target connector binding.
    pub target: ConnectorBinding,

    /// Named credential sets referenced by stage `credentials_key`.
    #[serde(default, rename = "credentials_config")]
    pub credentials: HashMap<String, serde_json::Map<String, Value>>,

    /// Ordered stage list; declared order is the execution order.
    pub stages: Vec<StageDefinition>,

    /// Initial variable seed for the execution context.
    #[serde(default)]
    pub variables: HashMap<String, Value>,

    /// Advisory overall timeout; consumed by the external scheduler,
    /// not enforced by the engine.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Cron expression for the external scheduler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,

    #[serde(default = "default_true")]
    pub active: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl WorkflowDefinition {
    /// Number of enabled stages.
    pub fn enabled_stage_count(&self) -> usize {
        self.stages.iter().filter(|s| s.enabled).count()
    }

    /// Look up a stage by id.
    pub fn stage(&self, id: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// The binding for a logical connector slot, if it is one of the fixed names.
    pub fn binding(&self, slot: &str) -> Option<&ConnectorBinding> {
        match slot {
            "source" => Some(&self.source),
            "target" => Some(&self.target),
            _ => None,
        }
    }

    /// Static validation: duplicate ids, dangling dependencies, incomplete
    /// connector stages. Returns all problems found.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let mut seen = std::collections::HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.id.as_str()) {
                errors.push(format!("duplicate stage id '{}'", stage.id));
            }
        }

        for stage in &self.stages {
            for dep in &stage.depends_on {
                if self.stage(dep).is_none() {
                    errors.push(format!(
                        "stage '{}' depends on unknown stage '{}'",
                        stage.id, dep
                    ));
                }
            }

            if stage.kind == StageType::ConnectorMethod {
                if stage.connector.is_none() || stage.method.is_none() {
                    errors.push(format!(
                        "stage '{}': connector and method are required for connector_method stages",
                        stage.id
                    ));
                } else if let Some(connector) = &stage.connector {
                    if self.binding(connector).is_none() {
                        errors.push(format!(
                            "stage '{}' references unknown connector '{}'",
                            stage.id, connector
                        ));
                    }
                }
            }

            if let Err(e) = stage.params() {
                errors.push(e.to_string());
            }

            if let Some(key) = &stage.credentials_key {
                if !self.credentials.contains_key(key) {
                    errors.push(format!(
                        "stage '{}' references unknown credential set '{}'",
                        stage.id, key
                    ));
                }
            }
        }

        if let Some(schedule) = &self.schedule {
            if schedule.split_whitespace().count() != 5 {
                errors.push("schedule must be a 5-field cron expression".to_string());
            }
        }

        errors
    }
}
