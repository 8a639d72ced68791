//! Field transformation utilities for mapping records between services.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One field mapping from a source shape to a target shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Field name in the source record.
    pub source_field: String,

    /// Field name in the target record.
    pub target_field: String,

    /// Named scalar transform to apply; identity when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,

    /// Required mappings are dropped (with a warning) when the source field
    /// is missing; optional ones emit a null target field instead.
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// Stateless scalar-transform and field-mapping library.
pub struct FieldTransformer;

impl FieldTransformer {
    /// Apply a named transform to a value.
    ///
    /// Unknown transform names and transform failures (non-numeric input,
    /// divide by zero) pass the original value through unchanged; a single
    /// bad field never aborts a record mapping.
    pub fn apply_transform(value: &Value, transform: Option<&str>) -> Value {
        let Some(transform) = transform else {
            return value.clone();
        };
        if value.is_null() {
            return value.clone();
        }

        let result = match transform {
            "round" => as_number(value).map(|n| Value::from(n.round() as i64)),
            "round_to_cents" => {
                as_number(value).and_then(|n| serde_json::Number::from_f64((n * 100.0).round() / 100.0).map(Value::Number))
            }
            "uppercase" => Some(Value::String(as_string(value).to_uppercase())),
            "lowercase" => Some(Value::String(as_string(value).to_lowercase())),
            "string" => Some(Value::String(as_string(value))),
            "int" => as_number(value).map(|n| Value::from(n as i64)),
            "float" => as_number(value)
                .and_then(|n| serde_json::Number::from_f64(n).map(Value::Number)),
            other => {
                if let Some(multiplier) = other.strip_prefix("multiply_by_") {
                    binary_numeric(value, multiplier, |a, b| Some(a * b))
                } else if let Some(divisor) = other.strip_prefix("divide_by_") {
                    binary_numeric(value, divisor, |a, b| if b == 0.0 { None } else { Some(a / b) })
                } else if let Some(addend) = other.strip_prefix("add_") {
                    binary_numeric(value, addend, |a, b| Some(a + b))
                } else if let Some(subtrahend) = other.strip_prefix("subtract_") {
                    binary_numeric(value, subtrahend, |a, b| Some(a - b))
                } else {
                    tracing::warn!(transform = %other, "Unknown transform");
                    return value.clone();
                }
            }
        };

        match result {
            Some(transformed) => transformed,
            None => {
                tracing::error!(transform = %transform, value = %value, "Transform failed, keeping original value");
                value.clone()
            }
        }
    }

    /// Map one record from the source format to the target format.
    pub fn map_fields(source: &Value, mappings: &[FieldMapping]) -> Value {
        let mut target = serde_json::Map::new();

        for mapping in mappings {
            let source_value = source.get(&mapping.source_field);

            match source_value {
                None | Some(Value::Null) if mapping.required => {
                    tracing::warn!(
                        field = %mapping.source_field,
                        "Required field not found in source record"
                    );
                    continue;
                }
                None | Some(Value::Null) => {
                    target.insert(mapping.target_field.clone(), Value::Null);
                }
                Some(value) => {
                    let transformed =
                        Self::apply_transform(value, mapping.transform.as_deref());
                    target.insert(mapping.target_field.clone(), transformed);
                }
            }
        }

        Value::Object(target)
    }

    /// Map a list of records index-for-index; output length equals input length.
    pub fn map_item_list(items: &[Value], mappings: &[FieldMapping]) -> Vec<Value> {
        items.iter().map(|item| Self::map_fields(item, mappings)).collect()
    }
}

/// Numeric view of a JSON value: numbers directly, numeric strings parsed.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// String view of a JSON value without surrounding quotes.
fn as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn binary_numeric(value: &Value, operand: &str, op: impl Fn(f64, f64) -> Option<f64>) -> Option<Value> {
    let a = as_number(value)?;
    let b = operand.parse::<f64>().ok()?;
    let result = op(a, b)?;
    serde_json::Number::from_f64(result).map(Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(source: &str, target: &str, transform: Option<&str>, required: bool) -> FieldMapping {
        FieldMapping {
            source_field: source.to_string(),
            target_field: target.to_string(),
            transform: transform.map(String::from),
            required,
        }
    }

    #[test]
    fn test_identity_without_transform() {
        let value = serde_json::json!(42);
        assert_eq!(FieldTransformer::apply_transform(&value, None), value);
    }

    #[test]
    fn test_numeric_transforms() {
        assert_eq!(
            FieldTransformer::apply_transform(&serde_json::json!(9.6), Some("round")),
            serde_json::json!(10)
        );
        assert_eq!(
            FieldTransformer::apply_transform(&serde_json::json!(10.567), Some("round_to_cents")),
            serde_json::json!(10.57)
        );
        assert_eq!(
            FieldTransformer::apply_transform(&serde_json::json!("12.9"), Some("int")),
            serde_json::json!(12)
        );
        assert_eq!(
            FieldTransformer::apply_transform(&serde_json::json!(5), Some("multiply_by_3")),
            serde_json::json!(15.0)
        );
        assert_eq!(
            FieldTransformer::apply_transform(&serde_json::json!(10), Some("divide_by_4")),
            serde_json::json!(2.5)
        );
        assert_eq!(
            FieldTransformer::apply_transform(&serde_json::json!(10), Some("add_5")),
            serde_json::json!(15.0)
        );
        assert_eq!(
            FieldTransformer::apply_transform(&serde_json::json!(10), Some("subtract_5")),
            serde_json::json!(5.0)
        );
    }

    #[test]
    fn test_string_transforms() {
        assert_eq!(
            FieldTransformer::apply_transform(&serde_json::json!("abc-1"), Some("uppercase")),
            serde_json::json!("ABC-1")
        );
        assert_eq!(
            FieldTransformer::apply_transform(&serde_json::json!("ABC-1"), Some("lowercase")),
            serde_json::json!("abc-1")
        );
        assert_eq!(
            FieldTransformer::apply_transform(&serde_json::json!(42), Some("string")),
            serde_json::json!("42")
        );
    }

    #[test]
    fn test_failed_transform_keeps_original() {
        let value = serde_json::json!("not-a-number");
        assert_eq!(FieldTransformer::apply_transform(&value, Some("round")), value);
        // Divide by zero falls back too.
        let value = serde_json::json!(10);
        assert_eq!(FieldTransformer::apply_transform(&value, Some("divide_by_0")), value);
    }

    #[test]
    fn test_unknown_transform_passes_through() {
        let value = serde_json::json!("x");
        assert_eq!(FieldTransformer::apply_transform(&value, Some("reverse")), value);
    }

    #[test]
    fn test_map_fields_required_missing_is_dropped() {
        let source = serde_json::json!({"sku": "A"});
        let mappings = vec![
            mapping("sku", "sku", None, true),
            mapping("available", "quantity_to_set", None, true),
        ];

        let mapped = FieldTransformer::map_fields(&source, &mappings);
        assert_eq!(mapped, serde_json::json!({"sku": "A"}));
    }

    #[test]
    fn test_map_fields_optional_missing_is_null() {
        let source = serde_json::json!({"sku": "A"});
        let mappings = vec![
            mapping("sku", "sku", None, true),
            mapping("notes", "notes", None, false),
        ];

        let mapped = FieldTransformer::map_fields(&source, &mappings);
        assert_eq!(mapped, serde_json::json!({"sku": "A", "notes": null}));
    }

    #[test]
    fn test_map_fields_applies_transform() {
        let source = serde_json::json!({"available": "95.4"});
        let mappings = vec![mapping("available", "quantity_to_set", Some("int"), true)];

        let mapped = FieldTransformer::map_fields(&source, &mappings);
        assert_eq!(mapped, serde_json::json!({"quantity_to_set": 95}));
    }

    #[test]
    fn test_map_item_list_preserves_length() {
        let items = vec![
            serde_json::json!({"sku": "A", "available": 1}),
            serde_json::json!({"available": 2}),
            serde_json::json!({"sku": "C"}),
        ];
        let mappings = vec![
            mapping("sku", "sku", None, true),
            mapping("available", "quantity_to_set", None, true),
        ];

        let mapped = FieldTransformer::map_item_list(&items, &mappings);
        assert_eq!(mapped.len(), items.len());
        assert_eq!(mapped[0], serde_json::json!({"sku": "A", "quantity_to_set": 1}));
        assert_eq!(mapped[1], serde_json::json!({"quantity_to_set": 2}));
        assert_eq!(mapped[2], serde_json::json!({"sku": "C"}));
    }
}
