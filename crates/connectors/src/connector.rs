//! Connector contract: capabilities, operation descriptors, and the trait itself.
//!
//! Every connector exposes a fixed set of named operations. Each operation is
//! described by an [`OperationSpec`] listing the parameter names it declares,
//! so callers can filter call arguments without runtime introspection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConnectorError;

/// A single connector capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ReadInventory,
    WriteInventory,
    ReadProducts,
    WriteProducts,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Capability::ReadInventory => "read_inventory",
            Capability::WriteInventory => "write_inventory",
            Capability::ReadProducts => "read_products",
            Capability::WriteProducts => "write_products",
        };
        write!(f, "{}", s)
    }
}

/// What operations a connector supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub can_read_inventory: bool,
    #[serde(default)]
    pub can_write_inventory: bool,
    #[serde(default)]
    pub can_read_products: bool,
    #[serde(default)]
    pub can_write_products: bool,
}

impl Capabilities {
    /// Returns true if the given capability is supported.
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::ReadInventory => self.can_read_inventory,
            Capability::WriteInventory => self.can_write_inventory,
            Capability::ReadProducts => self.can_read_products,
            Capability::WriteProducts => self.can_write_products,
        }
    }
}

/// Static descriptor for one named connector operation.
///
/// `params` lists the argument names the operation declares. When `variadic`
/// is false, callers drop any argument not named here before dispatch; when
/// true, everything is passed through (open-ended filter arguments).
#[derive(Debug, Clone, Copy)]
pub struct OperationSpec {
    pub name: &'static str,
    pub capability: Capability,
    pub params: &'static [&'static str],
    pub variadic: bool,
}

impl OperationSpec {
    /// Returns true if the operation declares a parameter with this name.
    pub fn declares(&self, name: &str) -> bool {
        self.params.contains(&name)
    }
}

/// Named call arguments for a connector operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Arguments(pub serde_json::Map<String, Value>);

impl Arguments {
    /// Create an empty argument map.
    pub fn new() -> Self {
        Self(serde_json::Map::new())
    }

    /// Insert an argument value.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    /// Look up an argument by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Get an argument as a string slice, if present and a string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    /// Get an argument as an unsigned integer, if present and numeric.
    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.0.get(name).and_then(Value::as_u64)
    }

    /// Get a required string argument.
    pub fn require_str(
        &self,
        operation: &'static str,
        name: &'static str,
    ) -> Result<&str, ConnectorError> {
        self.get_str(name)
            .ok_or(ConnectorError::MissingArgument { operation, argument: name })
    }

    /// Get a required list argument.
    pub fn require_items(
        &self,
        operation: &'static str,
        name: &'static str,
    ) -> Result<&Vec<Value>, ConnectorError> {
        self.0
            .get(name)
            .and_then(Value::as_array)
            .ok_or(ConnectorError::MissingArgument { operation, argument: name })
    }

    /// Iterate over argument entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Returns true if no arguments are present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<serde_json::Map<String, Value>> for Arguments {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Summary returned by write/create operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteSummary {
    pub success_count: usize,
    pub failed_count: usize,
    pub total_count: usize,

    /// Items that were successfully processed, when the service reports them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Value>>,
}

impl WriteSummary {
    /// Summary for an empty write (nothing to do).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Summary where every item failed.
    pub fn all_failed(total: usize) -> Self {
        Self { success_count: 0, failed_count: total, total_count: total, items: None }
    }
}

/// Output of a connector operation.
///
/// Read operations produce an item list; write operations produce a summary.
#[derive(Debug, Clone)]
pub enum OperationOutput {
    Items(Vec<Value>),
    Summary(WriteSummary),
}

impl OperationOutput {
    /// Fold the output into a JSON value for storage in the variable bag.
    pub fn into_value(self) -> Value {
        match self {
            OperationOutput::Items(items) => Value::Array(items),
            OperationOutput::Summary(summary) => {
                serde_json::to_value(summary).unwrap_or(Value::Null)
            }
        }
    }

    /// Number of items carried by this output, if it is a list.
    pub fn item_count(&self) -> Option<usize> {
        match self {
            OperationOutput::Items(items) => Some(items.len()),
            OperationOutput::Summary(_) => None,
        }
    }
}

/// A field exposed by a connector's data schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub description: String,
    pub data_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
}

impl SchemaField {
    pub fn new(
        name: &str,
        description: &str,
        data_type: &str,
        required: bool,
        example: Option<Value>,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            data_type: data_type.to_string(),
            required,
            example,
        }
    }
}

/// Schema describing the records a connector reads or writes.
///
/// Discovery surface only; the engine's control flow never consults it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectorSchema {
    pub fields: Vec<SchemaField>,
}

impl ConnectorSchema {
    /// Names of all schema fields.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

/// A connector adapts one external inventory service to the engine.
///
/// Connectors are constructed bare: authentication material (api_key,
/// base_url) arrives per call through the argument map, so one instance can
/// serve calls against different credential sets.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Service type tag, e.g. "shipstream".
    fn service_type(&self) -> &'static str;

    /// What this connector can do.
    fn capabilities(&self) -> Capabilities;

    /// Schema of the inventory records this connector produces.
    fn inventory_schema(&self) -> ConnectorSchema;

    /// Descriptors for every operation this connector exposes.
    fn operations(&self) -> &'static [OperationSpec];

    /// Check whether the service is reachable with the given arguments.
    async fn test_connection(&self, args: &Arguments) -> bool;

    /// Service-specific implementation of one operation.
    ///
    /// Only called through [`Connector::invoke`], which has already resolved
    /// the operation descriptor and verified the capability.
    async fn dispatch(
        &self,
        spec: &OperationSpec,
        args: &Arguments,
    ) -> Result<OperationOutput, ConnectorError>;

    /// Look up the descriptor for a named operation.
    fn operation(&self, name: &str) -> Option<&'static OperationSpec> {
        self.operations().iter().find(|spec| spec.name == name)
    }

    /// Invoke a named operation.
    ///
    /// Resolves the operation descriptor and checks the capability before
    /// dispatching, so an unsupported invocation never reaches the service.
    async fn invoke(
        &self,
        operation: &str,
        args: &Arguments,
    ) -> Result<OperationOutput, ConnectorError> {
        let spec = self.operation(operation).ok_or_else(|| ConnectorError::UnknownOperation {
            service: self.service_type(),
            operation: operation.to_string(),
        })?;

        if !self.capabilities().supports(spec.capability) {
            return Err(ConnectorError::NotSupported {
                service: self.service_type(),
                operation: spec.name,
            });
        }

        self.dispatch(spec, args).await
    }
}
