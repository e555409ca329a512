//! Schema validation helpers.
//!
//! This module validates a `serde_json::Value` against a [`Schema`] and
//! reports problems as [`Diagnostic`]s carrying the offending attribute path.
//!
//! # Example
//!
//! ```
//! use kapacitor_provider::schema::{Attribute, Schema};
//! use kapacitor_provider::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("type", Attribute::required_string().with_one_of(["stream", "batch"]));
//!
//! assert!(validate(&schema, &json!({"type": "stream"})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"type": "realtime"}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("type".to_string()));
//! ```

use crate::schema::{Attribute, AttributeType, Block, Diagnostic, NestedBlock, Schema};
use serde_json::Value;

/// Validate a JSON value against a schema.
///
/// Returns a list of diagnostics for any validation errors found.
/// An empty list means the value is valid.
///
/// # Validation Rules
///
/// - Required attributes must be present and non-null
/// - Optional attributes may be absent or null
/// - Computed attributes are skipped (provider sets these)
/// - Attribute types and `one_of` restrictions must match the schema
/// - Nested sets are validated recursively with min/max item constraints
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, value, "", &mut diagnostics);
    diagnostics
}

/// Validate a JSON value against a schema, returning Ok if valid or Err with diagnostics.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Check if a JSON value is valid against a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

fn validate_block(block: &Block, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    let obj = match value {
        Value::Object(map) => map,
        Value::Null => return,
        _ => {
            let mut diag =
                Diagnostic::error("Expected object").with_detail(format!("Got {}", value_type_name(value)));
            if !path.is_empty() {
                diag = diag.with_attribute(path);
            }
            diagnostics.push(diag);
            return;
        },
    };

    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        validate_attribute(attr, obj.get(name), &attr_path, diagnostics);
    }

    for (name, nested) in &block.blocks {
        let block_path = join_path(path, name);
        validate_set_block(nested, obj.get(name), &block_path, diagnostics);
    }
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    // Computed-only attributes are set by the provider.
    if attr.flags.computed && !attr.flags.optional && !attr.flags.required {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => {
            if !validate_attribute_type(&attr.attr_type, v, path, diagnostics) {
                return;
            }
            if let Some(s) = v.as_str() {
                if !attr.one_of.is_empty() && !attr.one_of.iter().any(|allowed| allowed == s) {
                    diagnostics.push(
                        Diagnostic::error(format!("Invalid value for '{}'", path))
                            .with_detail(format!(
                                "Expected one of: {}, got '{}'",
                                attr.one_of.join(", "),
                                s
                            ))
                            .with_attribute(path),
                    );
                }
            }
        },
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) -> bool {
    let (ok, expected) = match attr_type {
        AttributeType::String => (value.is_string(), "string"),
        AttributeType::Bool => (value.is_boolean(), "bool"),
    };
    if !ok {
        diagnostics.push(type_error(path, expected, value));
    }
    ok
}

fn validate_set_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match value {
        None | Some(Value::Null) => {
            if nested.min_items > 0 {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' requires at least {} item(s)",
                        path, nested.min_items
                    ))
                    .with_attribute(path),
                );
            }
        },
        Some(Value::Array(arr)) => {
            let len = arr.len() as u32;

            if len < nested.min_items {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' requires at least {} item(s), got {}",
                        path, nested.min_items, len
                    ))
                    .with_attribute(path),
                );
            }

            // max_items of 0 means unlimited
            if nested.max_items > 0 && len > nested.max_items {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' allows at most {} item(s), got {}",
                        path, nested.max_items, len
                    ))
                    .with_attribute(path),
                );
            }

            for (i, item) in arr.iter().enumerate() {
                let item_path = format!("{}.{}", path, i);
                validate_block(&nested.block, item, &item_path, diagnostics);
            }
        },
        Some(v) => {
            diagnostics.push(
                Diagnostic::error(format!("Expected set for block '{}'", path))
                    .with_detail(format!("Got {}", value_type_name(v)))
                    .with_attribute(path),
            );
        },
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_error(path: &str, expected: &str, value: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for '{}'", path))
        .with_detail(format!(
            "Expected {}, got {}",
            expected,
            value_type_name(value)
        ))
        .with_attribute(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Attribute;
    use serde_json::json;

    fn dbrp_schema() -> Schema {
        Schema::v0().with_block(
            "dbrp",
            NestedBlock::set(
                Block::new()
                    .with_attribute("database", Attribute::required_string())
                    .with_attribute("retention_policy", Attribute::optional_string()),
            )
            .with_min_items(1)
            .with_max_items(2),
        )
    }

    #[test]
    fn test_required_attribute() {
        let schema = Schema::v0().with_attribute("url", Attribute::required_string());

        assert!(validate(&schema, &json!({"url": "http://localhost:9092"})).is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Missing required attribute"));

        let diagnostics = validate(&schema, &json!({"url": null}));
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_optional_and_computed_attributes() {
        let schema = Schema::v0()
            .with_attribute("username", Attribute::optional_string())
            .with_attribute("id", Attribute::computed_string());

        assert!(validate(&schema, &json!({})).is_empty());
        // Computed attributes are not type-checked either.
        assert!(validate(&schema, &json!({"id": 42})).is_empty());
    }

    #[test]
    fn test_wrong_types() {
        let schema = Schema::v0()
            .with_attribute("tick_script", Attribute::required_string())
            .with_attribute("enabled", Attribute::optional_bool());

        let diagnostics = validate(&schema, &json!({"tick_script": 1, "enabled": "yes"}));
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics
            .iter()
            .all(|d| d.summary.starts_with("Invalid type")));
    }

    #[test]
    fn test_one_of() {
        let schema = Schema::v0().with_attribute(
            "type",
            Attribute::required_string().with_one_of(["stream", "batch"]),
        );

        assert!(is_valid(&schema, &json!({"type": "batch"})));

        let diagnostics = validate(&schema, &json!({"type": "realtime"}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].detail,
            Some("Expected one of: stream, batch, got 'realtime'".to_string())
        );

        // A type error is reported once, without a one_of error on top.
        let diagnostics = validate(&schema, &json!({"type": 7}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.starts_with("Invalid type"));
    }

    #[test]
    fn test_set_block_item_counts() {
        let schema = dbrp_schema();

        assert!(validate(&schema, &json!({"dbrp": [{"database": "telegraf"}]})).is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("at least 1"));

        let diagnostics = validate(&schema, &json!({"dbrp": []}));
        assert_eq!(diagnostics.len(), 1);

        let diagnostics = validate(
            &schema,
            &json!({"dbrp": [{"database": "a"}, {"database": "b"}, {"database": "c"}]}),
        );
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("at most 2"));
    }

    #[test]
    fn test_set_block_nested_paths() {
        let schema = dbrp_schema();

        let diagnostics = validate(
            &schema,
            &json!({"dbrp": [{"database": "telegraf"}, {"retention_policy": 30}]}),
        );
        assert_eq!(diagnostics.len(), 2);
        let mut paths: Vec<_> = diagnostics
            .iter()
            .filter_map(|d| d.attribute.clone())
            .collect();
        paths.sort();
        assert_eq!(paths, vec!["dbrp.1.database", "dbrp.1.retention_policy"]);

        let diagnostics = validate(&schema, &json!({"dbrp": "telegraf.autogen"}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Expected set"));
    }

    #[test]
    fn test_validate_result_helper() {
        let schema = Schema::v0().with_attribute("url", Attribute::required_string());

        assert!(validate_result(&schema, &json!({"url": "http://k"})).is_ok());
        assert_eq!(validate_result(&schema, &json!({})).unwrap_err().len(), 1);
    }

    #[test]
    fn test_validate_root_not_object() {
        let schema = Schema::v0().with_attribute("url", Attribute::required_string());

        let diagnostics = validate(&schema, &json!("not an object"));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Expected object"));
        assert!(diagnostics[0].attribute.is_none());
    }
}
