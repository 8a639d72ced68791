//! Stage interpreter: executes one stage definition against the context.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use stocksync_connectors::Arguments;

use crate::context::ExecutionContext;
use crate::credentials::CredentialResolver;
use crate::error::EngineError;
use crate::execution::StageResult;
use crate::transforms::FieldTransformer;
use crate::workflow::{
    FilterMode, FilterParams, LogLevel, LogParams, MapFieldsParams, StageDefinition, StageParams,
    TransformParams, WorkflowDefinition,
};

/// Outcome of a single stage attempt.
enum StageOutcome {
    /// Condition gate evaluated false.
    Skipped,
    /// The stage produced this output (possibly null).
    Output(Value),
}

/// Executes stage definitions, handling conditions, credential injection and
/// per-stage retry.
pub struct StageInterpreter {
    credentials: Arc<dyn CredentialResolver>,
}

impl StageInterpreter {
    /// Create an interpreter with the given credential-resolution strategy.
    pub fn new(credentials: Arc<dyn CredentialResolver>) -> Self {
        Self { credentials }
    }

    /// Execute one stage, applying its retry policy.
    ///
    /// Retry is a bounded loop: at most `retry_count + 1` attempts, each one
    /// re-running the condition check and the full dispatch. Only the final
    /// attempt's result is returned; its `retry_count` records how many
    /// retries were spent.
    pub async fn execute_stage(
        &self,
        stage: &StageDefinition,
        workflow: &WorkflowDefinition,
        ctx: &mut ExecutionContext,
    ) -> StageResult {
        let max_attempts = match stage.error_strategy {
            crate::workflow::ErrorStrategy::Retry => stage.retry_count.saturating_add(1),
            _ => 1,
        };

        let mut attempt: u32 = 0;
        loop {
            let mut result = StageResult::start(&stage.id);
            result.retry_count = attempt;

            match self.run_once(stage, workflow, ctx).await {
                Ok(StageOutcome::Skipped) => {
                    result.skip();
                    return result;
                }
                Ok(StageOutcome::Output(output)) => {
                    if let Some(name) = &stage.output_variable {
                        if !output.is_null() {
                            ctx.set_variable(name.clone(), output.clone());
                        }
                    }
                    let items = items_processed(&output);
                    result.succeed(output, items);
                    return result;
                }
                Err(e) => {
                    tracing::error!(stage = %stage.id, error = %e, "Stage failed");
                    result.fail(e.to_string());

                    attempt += 1;
                    if attempt >= max_attempts {
                        return result;
                    }

                    tracing::info!(stage = %stage.id, attempt, "Retrying stage");
                    if stage.retry_delay > 0 {
                        tokio::time::sleep(Duration::from_secs(stage.retry_delay)).await;
                    }
                }
            }
        }
    }

    /// One attempt: condition gate, then dispatch on the stage type.
    async fn run_once(
        &self,
        stage: &StageDefinition,
        workflow: &WorkflowDefinition,
        ctx: &mut ExecutionContext,
    ) -> Result<StageOutcome, EngineError> {
        if let Some(condition) = &stage.condition {
            if !evaluate_condition(condition, ctx) {
                tracing::debug!(stage = %stage.id, condition = %condition, "Condition not met, skipping stage");
                return Ok(StageOutcome::Skipped);
            }
        }

        tracing::info!(stage = %stage.id, kind = %stage.kind, "Executing stage");

        let output = match stage.params()? {
            StageParams::ConnectorMethod => {
                self.execute_connector_method(stage, workflow, ctx).await?
            }
            StageParams::Transform(params) => execute_transform(&params, stage, ctx),
            StageParams::Filter(params) => execute_filter(&params, stage, ctx),
            StageParams::MapFields(params) => execute_map_fields(&params, stage, ctx),
            StageParams::SetVariable(params) => {
                ctx.set_variable(params.variable_name.clone(), params.value.clone());
                params.value
            }
            StageParams::Log(params) => execute_log(&params, ctx),
        };

        Ok(StageOutcome::Output(output))
    }

    /// Invoke a named connector operation with merged call arguments.
    ///
    /// Merge precedence (later wins): stage parameters, input variables,
    /// injected credentials. Credentials are only merged under parameter
    /// names the operation declares; undeclared arguments are dropped unless
    /// the operation is variadic.
    async fn execute_connector_method(
        &self,
        stage: &StageDefinition,
        workflow: &WorkflowDefinition,
        ctx: &mut ExecutionContext,
    ) -> Result<Value, EngineError> {
        let (Some(connector_name), Some(method)) = (stage.connector.as_deref(), stage.method.as_deref())
        else {
            return Err(EngineError::configuration(format!(
                "stage '{}': connector and method are required for connector_method stages",
                stage.id
            )));
        };

        let connector = Arc::clone(ctx.connector(connector_name)?);
        let spec = connector.operation(method).ok_or_else(|| {
            EngineError::configuration(format!(
                "connector '{}' does not have method '{}'",
                connector_name, method
            ))
        })?;

        let mut merged = stage.parameters.clone();

        for name in &stage.input_variables {
            if let Some(value) = ctx.variables.get(name) {
                merged.insert(name.clone(), value.clone());
            }
        }

        let credentials = self.credentials.resolve(stage, workflow)?;
        for (name, value) in credentials {
            if spec.declares(&name) {
                merged.insert(name, value);
            }
        }

        if !spec.variadic {
            merged.retain(|name, _| spec.declares(name));
        }

        let arg_names: Vec<&str> = merged.keys().map(String::as_str).collect();
        tracing::info!(
            connector = connector_name,
            method,
            args = ?arg_names,
            "Calling connector operation"
        );

        let output = connector.invoke(method, &Arguments::from(merged)).await?;
        Ok(output.into_value())
    }
}

/// Evaluate a stage condition against the context.
///
/// `exists:<var>` checks that the variable is present and truthy; any other
/// condition form does not gate execution.
fn evaluate_condition(condition: &str, ctx: &ExecutionContext) -> bool {
    if let Some(name) = condition.strip_prefix("exists:") {
        return ctx.variables.get(name).map(is_truthy).unwrap_or(false);
    }
    true
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// The first input variable's current value, or null.
fn stage_input(stage: &StageDefinition, ctx: &ExecutionContext) -> Value {
    stage
        .input_variables
        .first()
        .and_then(|name| ctx.variables.get(name))
        .cloned()
        .unwrap_or(Value::Null)
}

fn execute_transform(params: &TransformParams, stage: &StageDefinition, ctx: &ExecutionContext) -> Value {
    let input = stage_input(stage, ctx);

    // Wrong-shaped input degrades to passthrough rather than failing.
    match params {
        TransformParams::Identity => input,
        TransformParams::ExtractField { field } => match &input {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .filter(|item| item.is_object())
                    .map(|item| item.get(field).cloned().unwrap_or(Value::Null))
                    .collect(),
            ),
            Value::Object(map) => map.get(field).cloned().unwrap_or(Value::Null),
            _ => input,
        },
        TransformParams::FilterField { field, value } => match input {
            Value::Array(items) => Value::Array(
                items.into_iter().filter(|item| item.get(field) == Some(value)).collect(),
            ),
            other => other,
        },
        TransformParams::AddField { field, value } => match input {
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::Object(mut map) => {
                            map.insert(field.clone(), value.clone());
                            Value::Object(map)
                        }
                        other => other,
                    })
                    .collect(),
            ),
            Value::Object(mut map) => {
                map.insert(field.clone(), value.clone());
                Value::Object(map)
            }
            other => other,
        },
        TransformParams::Slice { start, end } => match input {
            Value::Array(items) => {
                let len = items.len();
                let start = (*start).min(len);
                let end = end.unwrap_or(len).min(len).max(start);
                Value::Array(items[start..end].to_vec())
            }
            other => other,
        },
    }
}

fn execute_filter(params: &FilterParams, stage: &StageDefinition, ctx: &ExecutionContext) -> Value {
    let input = stage_input(stage, ctx);

    let Value::Array(items) = input else {
        return input;
    };
    let Some(field) = &params.field else {
        return Value::Array(items);
    };

    if let Some(variable) = &params.value_from_variable {
        let Some(Value::Array(value_set)) = ctx.variables.get(variable) else {
            tracing::warn!(
                variable = %variable,
                "Filter value set is missing or not a list, passing input through"
            );
            return Value::Array(items);
        };

        return Value::Array(
            items
                .into_iter()
                .filter(|item| {
                    let member =
                        item.get(field).map(|value| value_set.contains(value)).unwrap_or(false);
                    match params.mode {
                        FilterMode::Include => member,
                        FilterMode::Exclude => !member,
                    }
                })
                .collect(),
        );
    }

    if let Some(value) = &params.value {
        return Value::Array(
            items.into_iter().filter(|item| item.get(field) == Some(value)).collect(),
        );
    }

    Value::Array(items)
}

fn execute_map_fields(params: &MapFieldsParams, stage: &StageDefinition, ctx: &ExecutionContext) -> Value {
    let input = stage_input(stage, ctx);

    // Full mapping lists carry per-field transforms; the plain rename map
    // keeps unmapped fields under their original names.
    if let Some(mappings) = &params.field_mappings {
        return match input {
            Value::Array(items) => Value::Array(FieldTransformer::map_item_list(&items, mappings)),
            Value::Object(_) => FieldTransformer::map_fields(&input, mappings),
            other => other,
        };
    }

    match input {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(map) => Some(rename_fields(map, &params.mappings)),
                    _ => None,
                })
                .collect(),
        ),
        Value::Object(map) => rename_fields(map, &params.mappings),
        other => other,
    }
}

fn rename_fields(map: serde_json::Map<String, Value>, rename: &HashMap<String, String>) -> Value {
    Value::Object(
        map.into_iter()
            .map(|(name, value)| (rename.get(&name).cloned().unwrap_or(name), value))
            .collect(),
    )
}

fn execute_log(params: &LogParams, ctx: &ExecutionContext) -> Value {
    let mut message = params.message.clone();

    for (name, value) in &ctx.variables {
        let len_token = format!("{{len({})}}", name);
        if message.contains(&len_token) {
            let rendered = match value {
                Value::Array(items) => items.len().to_string(),
                _ => "N/A".to_string(),
            };
            message = message.replace(&len_token, &rendered);
        }

        let token = format!("{{{}}}", name);
        if message.contains(&token) {
            message = message.replace(&token, &render_variable(value));
        }
    }

    match params.level {
        LogLevel::Debug => tracing::debug!("{}", message),
        LogLevel::Info => tracing::info!("{}", message),
        LogLevel::Warning => tracing::warn!("{}", message),
        LogLevel::Error => tracing::error!("{}", message),
    }

    Value::String(message)
}

fn render_variable(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Items processed by a stage: list length, or the length of an "items"
/// array inside an object output.
fn items_processed(output: &Value) -> usize {
    match output {
        Value::Array(items) => items.len(),
        Value::Object(map) => {
            map.get("items").and_then(Value::as_array).map(|items| items.len()).unwrap_or(0)
        }
        _ => 0,
    }
}
