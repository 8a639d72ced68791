//! WarePoint connector: read/write access to the warehouse platform.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::connector::{
    Arguments, Capabilities, Capability, Connector, ConnectorSchema, OperationOutput,
    OperationSpec, SchemaField, WriteSummary,
};
use crate::error::ConnectorError;

const SERVICE: &str = "warepoint";

static OPERATIONS: &[OperationSpec] = &[
    OperationSpec {
        name: "read_inventory",
        capability: Capability::ReadInventory,
        params: &["api_key", "base_url", "warehouse_id", "search_term", "limit", "is_active"],
        variadic: false,
    },
    OperationSpec {
        name: "write_inventory",
        capability: Capability::WriteInventory,
        params: &["api_key", "base_url", "items", "warehouse_id"],
        variadic: false,
    },
    OperationSpec {
        name: "read_products",
        capability: Capability::ReadProducts,
        params: &["api_key", "base_url", "search_term", "limit"],
        variadic: false,
    },
    OperationSpec {
        name: "write_products",
        capability: Capability::WriteProducts,
        params: &["api_key", "base_url", "items"],
        variadic: false,
    },
];

/// Connector for the WarePoint warehouse platform.
pub struct WarePointConnector {
    client: reqwest::Client,
}

impl WarePointConnector {
    /// Create a new WarePoint connector.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Create a WarePoint connector with a custom client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn read_inventory(&self, args: &Arguments) -> Result<OperationOutput, ConnectorError> {
        let api_key = args.require_str("read_inventory", "api_key")?;
        let base_url = args.require_str("read_inventory", "base_url")?;

        let mut params: Vec<(String, String)> = Vec::new();
        for name in ["warehouse_id", "search_term", "limit", "is_active"] {
            if let Some(value) = args.get(name) {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => continue,
                };
                params.push((name.to_string(), rendered));
            }
        }

        tracing::debug!(params = ?params, "Fetching WarePoint inventory");

        let response = self
            .client
            .get(format!("{}/api/admin/shop/inventory/search", base_url))
            .bearer_auth(api_key)
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

        let items: Vec<Value> = body
            .get("inventory")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
            .iter()
            .map(normalize_inventory_record)
            .collect();

        tracing::info!(count = items.len(), "Fetched inventory from WarePoint");
        Ok(OperationOutput::Items(items))
    }

    async fn write_inventory(&self, args: &Arguments) -> Result<OperationOutput, ConnectorError> {
        let api_key = args.require_str("write_inventory", "api_key")?;
        let base_url = args.require_str("write_inventory", "base_url")?;
        let items = args.require_items("write_inventory", "items")?;
        let default_warehouse_id = args.get("warehouse_id").and_then(Value::as_i64);

        if items.is_empty() {
            return Ok(OperationOutput::Summary(WriteSummary::empty()));
        }

        if items.len() == 1 {
            self.update_single(api_key, base_url, &items[0], default_warehouse_id).await
        } else {
            self.update_bulk(api_key, base_url, items, default_warehouse_id).await
        }
    }

    /// Update a single inventory record via the per-SKU endpoint.
    async fn update_single(
        &self,
        api_key: &str,
        base_url: &str,
        item: &Value,
        default_warehouse_id: Option<i64>,
    ) -> Result<OperationOutput, ConnectorError> {
        let Some(update) = valid_update(item, default_warehouse_id) else {
            return Err(ConnectorError::api(
                SERVICE,
                "inventory update requires sku, quantity_to_set and warehouse_id",
            ));
        };
        let sku = update["sku"].as_str().unwrap_or_default().to_string();

        let payload = serde_json::json!({
            "quantity_to_set": update["quantity_to_set"],
            "warehouse_id": update["warehouse_id"],
        });

        let response = self
            .client
            .put(format!("{}/api/admin/shop/inventory/{}", base_url, sku))
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;

        if response.status().is_success() {
            tracing::info!(sku = %sku, "Updated WarePoint inventory");
            Ok(OperationOutput::Summary(WriteSummary {
                success_count: 1,
                failed_count: 0,
                total_count: 1,
                items: Some(vec![update]),
            }))
        } else {
            let status = response.status().as_u16();
            tracing::error!(sku = %sku, status, "WarePoint inventory update failed");
            Ok(OperationOutput::Summary(WriteSummary::all_failed(1)))
        }
    }

    /// Update many inventory records via the bulk endpoint.
    async fn update_bulk(
        &self,
        api_key: &str,
        base_url: &str,
        items: &[Value],
        default_warehouse_id: Option<i64>,
    ) -> Result<OperationOutput, ConnectorError> {
        let updates: Vec<Value> = items
            .iter()
            .filter_map(|item| {
                let update = valid_update(item, default_warehouse_id);
                if update.is_none() {
                    tracing::warn!(item = %item, "Skipping invalid inventory item");
                }
                update
            })
            .collect();

        if updates.is_empty() {
            return Ok(OperationOutput::Summary(WriteSummary::all_failed(items.len())));
        }

        let payload = serde_json::json!({ "inventory_items": updates });

        let response = self
            .client
            .post(format!("{}/api/admin/shop/inventory/bulk_update", base_url))
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            tracing::error!(status, "WarePoint bulk update failed");
            return Ok(OperationOutput::Summary(WriteSummary::all_failed(updates.len())));
        }

        let results: Vec<Value> = response
            .json()
            .await
            .map_err(|e| ConnectorError::invalid_response(SERVICE, e.to_string()))?;

        // The service marks a processed row by attaching its warehouse_inventory record.
        let success_count = results
            .iter()
            .filter(|r| r.get("warehouse_inventory").map(|v| !v.is_null()).unwrap_or(false))
            .count();
        let failed_count = updates.len() - success_count.min(updates.len());

        tracing::info!(success_count, failed_count, "WarePoint bulk update completed");
        Ok(OperationOutput::Summary(WriteSummary {
            success_count,
            failed_count,
            total_count: updates.len(),
            items: Some(updates),
        }))
    }

    async fn read_products(&self, args: &Arguments) -> Result<OperationOutput, ConnectorError> {
        let api_key = args.require_str("read_products", "api_key")?;
        let base_url = args.require_str("read_products", "base_url")?;

        let mut params: Vec<(String, String)> = Vec::new();
        for name in ["search_term", "limit"] {
            if let Some(value) = args.get(name) {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => continue,
                };
                params.push((name.to_string(), rendered));
            }
        }

        let response = self
            .client
            .get(format!("{}/api/admin/shop/products/search", base_url))
            .bearer_auth(api_key)
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

        tracing::info!(count = products.len(), "Fetched products from WarePoint");
        Ok(OperationOutput::Items(products))
    }

    /// Create product records for SKUs the warehouse does not know yet.
    async fn write_products(&self, args: &Arguments) -> Result<OperationOutput, ConnectorError> {
        let api_key = args.require_str("write_products", "api_key")?;
        let base_url = args.require_str("write_products", "base_url")?;
        let items = args.require_items("write_products", "items")?;

        if items.is_empty() {
            return Ok(OperationOutput::Summary(WriteSummary::empty()));
        }

        let mut success_count = 0;
        let mut failed_count = 0;
        let mut created: Vec<Value> = Vec::new();

        for item in items {
            let Some(sku) = item.get("sku").and_then(Value::as_str) else {
                tracing::warn!(item = %item, "Skipping product without sku");
                failed_count += 1;
                continue;
            };

            let payload = serde_json::json!({
                "sku": sku,
                "product_name": item.get("product_name")
                    .or_else(|| item.get("name"))
                    .cloned()
                    .unwrap_or_else(|| Value::String(sku.to_string())),
            });

            let response = self
                .client
                .post(format!("{}/api/admin/shop/products", base_url))
                .bearer_auth(api_key)
                .json(&payload)
                .send()
                .await?;

            if response.status().is_success() {
                success_count += 1;
                created.push(item.clone());
            } else {
                tracing::error!(sku = %sku, status = response.status().as_u16(), "Product creation failed");
                failed_count += 1;
            }
        }

        tracing::info!(success_count, failed_count, "WarePoint product creation completed");
        Ok(OperationOutput::Summary(WriteSummary {
            success_count,
            failed_count,
            total_count: items.len(),
            items: Some(created),
        }))
    }
}

impl Default for WarePointConnector {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a raw WarePoint inventory record to the standard field set.
fn normalize_inventory_record(item: &Value) -> Value {
    let sku = item
        .get("base_sku")
        .filter(|v| !v.is_null())
        .or_else(|| item.get("item_sku"))
        .cloned()
        .unwrap_or(Value::Null);
    serde_json::json!({
        "sku": sku,
        "quantity": item.get("quantity").cloned().unwrap_or(Value::Null),
        "product_name": item.get("product_name").cloned().unwrap_or(Value::Null),
        "warehouse_id": item.get("shop_warehouseid").cloned().unwrap_or(Value::Null),
        "warehouse_name": item.get("warehouse_name").cloned().unwrap_or(Value::Null),
    })
}

/// Validate one inventory update, filling the warehouse from the default.
///
/// Returns the normalized update payload, or None when sku, quantity or
/// warehouse are missing.
fn valid_update(item: &Value, default_warehouse_id: Option<i64>) -> Option<Value> {
    let sku = item.get("sku").and_then(Value::as_str)?;
    let quantity = item.get("quantity_to_set").filter(|v| !v.is_null())?;
    let warehouse_id = item
        .get("warehouse_id")
        .and_then(Value::as_i64)
        .or(default_warehouse_id)?;

    Some(serde_json::json!({
        "sku": sku,
        "warehouse_id": warehouse_id,
        "quantity_to_set": quantity,
    }))
}

#[async_trait]
impl Connector for WarePointConnector {
    fn service_type(&self) -> &'static str {
        SERVICE
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            can_read_inventory: true,
            can_write_inventory: true,
            can_read_products: true,
            can_write_products: true,
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
                    "quantity_to_set",
                    "Quantity to set for this SKU",
                    "integer",
                    true,
                    Some(serde_json::json!(50)),
                ),
                SchemaField::new(
                    "warehouse_id",
                    "Warehouse to update inventory in",
                    "integer",
                    true,
                    Some(serde_json::json!(17)),
                ),
                SchemaField::new(
                    "quantity",
                    "Current quantity in the warehouse (read-only)",
                    "string",
                    false,
                    Some(serde_json::json!("50")),
                ),
                SchemaField::new(
                    "product_name",
                    "Product name (read-only)",
                    "string",
                    false,
                    Some(serde_json::json!("Sample Product")),
                ),
                SchemaField::new(
                    "warehouse_name",
                    "Warehouse name (read-only)",
                    "string",
                    false,
                    Some(serde_json::json!("Main Warehouse")),
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
            .get(format!("{}/api/admin/shop/inventory/search", base_url))
            .bearer_auth(api_key)
            .query(&[("limit", 1)])
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::error!(error = %e, "WarePoint connection test failed");
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
            "write_inventory" => self.write_inventory(args).await,
            "read_products" => self.read_products(args).await,
            "write_products" => self.write_products(args).await,
            other => Err(ConnectorError::UnknownOperation {
                service: SERVICE,
                operation: other.to_string(),
            }),
        }
    }
}
