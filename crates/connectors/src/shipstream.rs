//! ShipStream connector: read-only access to the shipping platform.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::connector::{
    Arguments, Capabilities, Capability, Connector, ConnectorSchema, OperationOutput,
    OperationSpec, SchemaField,
};
use crate::error::ConnectorError;

const SERVICE: &str = "shipstream";

/// ShipStream caps inventory pages at 500 records.
const PAGE_LIMIT: u64 = 500;

static OPERATIONS: &[OperationSpec] = &[
    OperationSpec {
        name: "read_inventory",
        capability: Capability::ReadInventory,
        params: &[
            "api_key",
            "base_url",
            "limit",
            "sku",
            "inventory_warehouse_id",
            "inventory_location_id",
            "group_by",
        ],
        variadic: true,
    },
    OperationSpec {
        name: "read_products",
        capability: Capability::ReadProducts,
        params: &["api_key", "base_url", "limit", "sku"],
        variadic: true,
    },
];

/// Connector for the ShipStream shipping platform.
///
/// Inventory on ShipStream is maintained by the fulfillment side, so this
/// connector reads but never writes.
pub struct ShipStreamConnector {
    client: reqwest::Client,
}

impl ShipStreamConnector {
    /// Create a new ShipStream connector.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Create a ShipStream connector with a custom client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Build query parameters from every argument except the credentials.
    fn query_params(args: &Arguments) -> Vec<(String, String)> {
        args.iter()
            .filter(|(name, _)| name.as_str() != "api_key" && name.as_str() != "base_url")
            .filter_map(|(name, value)| {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => return None,
                };
                Some((name.clone(), rendered))
            })
            .collect()
    }

    async fn read_inventory(&self, args: &Arguments) -> Result<OperationOutput, ConnectorError> {
        let api_key = args.require_str("read_inventory", "api_key")?;
        let base_url = args.require_str("read_inventory", "base_url")?;
        let limit = args.get_u64("limit").unwrap_or(PAGE_LIMIT) as usize;

        let mut params = Self::query_params(args);
        params.retain(|(name, _)| name != "limit" && name != "page");
        params.push(("limit".to_string(), (limit as u64).min(PAGE_LIMIT).to_string()));

        let mut all_items: Vec<Value> = Vec::new();
        let mut page: u64 = 1;

        loop {
            tracing::debug!(page, params = ?params, "Fetching ShipStream inventory page");

            let response = self
                .client
                .get(format!("{}/v2/inventory", base_url))
                .header("API-Key", api_key)
                .query(&params)
                .query(&[("page", page)])
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(ConnectorError::api(SERVICE, format!("HTTP {}: {}", status, body)));
            }

            let body: Value = response
                .json()
                .await
                .map_err(|e| ConnectorError::invalid_response(SERVICE, e.to_string()))?;

            let page_items = body
                .get("inventory")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            if page_items.is_empty() {
                break;
            }

            let page_len = page_items.len();
            for item in page_items {
                all_items.push(normalize_inventory_record(&item));
            }

            // Stop on the last page: enough collected, short page, or page count reached.
            if all_items.len() >= limit || page_len < PAGE_LIMIT.min(limit as u64) as usize {
                break;
            }
            if page >= body.get("pages").and_then(Value::as_u64).unwrap_or(1) {
                break;
            }
            page += 1;
        }

        all_items.truncate(limit);
        tracing::info!(count = all_items.len(), "Fetched inventory from ShipStream");
        Ok(OperationOutput::Items(all_items))
    }

    async fn read_products(&self, args: &Arguments) -> Result<OperationOutput, ConnectorError> {
        let api_key = args.require_str("read_products", "api_key")?;
        let base_url = args.require_str("read_products", "base_url")?;

        let params = Self::query_params(args);

        let response = self
            .client
            .get(format!("{}/v2/products", base_url))
            .header("API-Key", api_key)
            .query(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectorError::api(SERVICE, format!("HTTP {}: {}", status, body)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ConnectorError::invalid_response(SERVICE, e.to_string()))?;

        let products = body
            .get("products")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        tracing::info!(count = products.len(), "Fetched products from ShipStream");
        Ok(OperationOutput::Items(products))
    }
}

impl Default for ShipStreamConnector {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a raw ShipStream inventory record to the standard field set.
fn normalize_inventory_record(item: &Value) -> Value {
    serde_json::json!({
        "sku": item.get("sku").cloned().unwrap_or(Value::Null),
        "on_hand": item.get("on_hand").cloned().unwrap_or(serde_json::json!(0)),
        "allocated": item.get("allocated").cloned().unwrap_or(serde_json::json!(0)),
        "available": item.get("available").cloned().unwrap_or(serde_json::json!(0)),
        "average_cost": item.get("average_cost").cloned().unwrap_or(Value::Null),
        "inventory_warehouse_id": item.get("inventory_warehouse_id").cloned().unwrap_or(Value::Null),
        "inventory_location_id": item.get("inventory_location_id").cloned().unwrap_or(Value::Null),
    })
}

#[async_trait]
impl Connector for ShipStreamConnector {
    fn service_type(&self) -> &'static str {
        SERVICE
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            can_read_inventory: true,
            can_write_inventory: false,
            can_read_products: true,
            can_write_products: false,
        }
    }

    fn inventory_schema(&self) -> ConnectorSchema {
        ConnectorSchema {
            fields: vec![
                SchemaField::new(
                    "sku",
                    "Stock Keeping Unit identifier",
                    "string",
                    true,
                    Some(serde_json::json!("ABC-123")),
                ),
                SchemaField::new(
                    "on_hand",
                    "Total quantity on hand",
                    "integer",
                    true,
                    Some(serde_json::json!(100)),
                ),
                SchemaField::new(
                    "allocated",
                    "Quantity allocated to orders",
                    "integer",
                    false,
                    Some(serde_json::json!(5)),
                ),
                SchemaField::new(
                    "available",
                    "Available quantity (on_hand - allocated)",
                    "integer",
                    true,
                    Some(serde_json::json!(95)),
                ),
                SchemaField::new(
                    "average_cost",
                    "Average cost per unit",
                    "object",
                    false,
                    Some(serde_json::json!({"amount": 10.50, "currency": "USD"})),
                ),
                SchemaField::new(
                    "inventory_warehouse_id",
                    "Warehouse holding the inventory",
                    "string",
                    false,
                    Some(serde_json::json!("warehouse-123")),
                ),
                SchemaField::new(
                    "inventory_location_id",
                    "Location within the warehouse",
                    "string",
                    false,
                    Some(serde_json::json!("location-456")),
                ),
            ],
        }
    }

    fn operations(&self) -> &'static [OperationSpec] {
        OPERATIONS
    }

    async fn test_connection(&self, args: &Arguments) -> bool {
        let (Some(api_key), Some(base_url)) = (args.get_str("api_key"), args.get_str("base_url"))
        else {
            return false;
        };

        match self
            .client
            .get(format!("{}/v2/inventory", base_url))
            .header("API-Key", api_key)
            .query(&[("limit", 1)])
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::error!(error = %e, "ShipStream connection test failed");
                false
            }
        }
    }

    async fn dispatch(
        &self,
        spec: &OperationSpec,
        args: &Arguments,
    ) -> Result<OperationOutput, ConnectorError> {
        match spec.name {
            "read_inventory" => self.read_inventory(args).await,
            "read_products" => self.read_products(args).await,
            other => Err(ConnectorError::UnknownOperation {
                service: SERVICE,
                operation: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_are_read_only() {
        let connector = ShipStreamConnector::new();
        let caps = connector.capabilities();
        assert!(caps.can_read_inventory);
        assert!(caps.can_read_products);
        assert!(!caps.can_write_inventory);
        assert!(!caps.can_write_products);
    }

    #[test]
    fn test_operation_lookup() {
        let connector = ShipStreamConnector::new();
        let spec = connector.operation("read_inventory").unwrap();
        assert!(spec.declares("inventory_warehouse_id"));
        assert!(spec.variadic);
        assert!(connector.operation("write_inventory").is_none());
    }

    #[tokio::test]
    async fn test_invoke_unknown_operation() {
        let connector = ShipStreamConnector::new();
        let result = connector.invoke("sync_orders", &Arguments::new()).await;
        assert!(matches!(result, Err(ConnectorError::UnknownOperation { .. })));
    }

    #[tokio::test]
    async fn test_missing_credentials_is_an_argument_error() {
        let connector = ShipStreamConnector::new();
        let result = connector.invoke("read_inventory", &Arguments::new()).await;
        assert!(matches!(
            result,
            Err(ConnectorError::MissingArgument { argument: "api_key", .. })
        ));
    }

    #[test]
    fn test_normalize_inventory_record() {
        let raw = serde_json::json!({
            "sku": "ABC-123",
            "on_hand": 10,
            "available": 7,
            "ignored_extra": "x"
        });
        let normalized = normalize_inventory_record(&raw);
        assert_eq!(normalized["sku"], serde_json::json!("ABC-123"));
        assert_eq!(normalized["allocated"], serde_json::json!(0));
        assert_eq!(normalized["available"], serde_json::json!(7));
        assert!(normalized.get("ignored_extra").is_none());
    }

    #[test]
    fn test_query_params_exclude_credentials() {
        let mut args = Arguments::new();
        args.insert("api_key", serde_json::json!("secret"));
        args.insert("base_url", serde_json::json!("https://api.example.com"));
        args.insert("sku", serde_json::json!("ABC-123"));
        args.insert("limit", serde_json::json!(100));

        let params = ShipStreamConnector::query_params(&args);
        assert!(params.iter().all(|(name, _)| name != "api_key" && name != "base_url"));
        assert!(params.contains(&("sku".to_string(), "ABC-123".to_string())));
        assert!(params.contains(&("limit".to_string(), "100".to_string())));
    }

    #[test]
    fn test_inventory_schema_fields() {
        let connector = ShipStreamConnector::new();
        let schema = connector.inventory_schema();
        assert!(schema.field_names().contains(&"sku"));
        assert!(schema.field_names().contains(&"available"));
    }
}
