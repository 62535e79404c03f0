// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Declarative argument validation for tool calls.
//!
//! Covers the JSON-schema subset tools declare: an `object` root with
//! `properties` (each carrying a `type`), a `required` list, and
//! nothing else. Unknown arguments pass through untouched; the model is
//! allowed to send more than the schema names.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("missing required argument: {0}")]
    MissingRequired(String),

    #[error("argument {name} has wrong type: expected {expected}")]
    WrongType { name: String, expected: String },

    #[error("malformed schema: {0}")]
    Malformed(String),
}

/// Validate `arguments` against a tool's declared parameter schema.
pub fn validate_args(schema: &Value, arguments: &Map<String, Value>) -> Result<(), SchemaError> {
    let Some(root) = schema.as_object() else {
        // A tool with no schema accepts anything.
        return Ok(());
    };

    if let Some(required) = root.get("required") {
        let names = required
            .as_array()
            .ok_or_else(|| SchemaError::Malformed("required must be an array".to_string()))?;
        for name in names {
            let name = name
                .as_str()
                .ok_or_else(|| SchemaError::Malformed("required entries must be strings".to_string()))?;
            if !arguments.contains_key(name) {
                return Err(SchemaError::MissingRequired(name.to_string()));
            }
        }
    }

    if let Some(properties) = root.get("properties").and_then(Value::as_object) {
        for (name, declared) in properties {
            let Some(value) = arguments.get(name) else {
                continue;
            };
            let Some(expected) = declared.get("type").and_then(Value::as_str) else {
                continue;
            };
            if !type_matches(expected, value) {
                return Err(SchemaError::WrongType {
                    name: name.clone(),
                    expected: expected.to_string(),
                });
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown type names do not fail validation
        _ => true,
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
