//! Schema-driven record coercion
//!
//! Walks a record alongside its JSON schema, coercing each value to the
//! declared `type` and normalizing string formats through pluggable
//! [`FormatCoercer`]s. Fields absent from the schema, or deselected in the
//! catalog metadata, are dropped.

use std::collections::HashMap;

use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::catalog::StreamMetadata;
use crate::state::parse_instant_str;

/// Normalizes a string of a given schema `format`; `None` rejects it
pub type FormatCoercer = fn(&str) -> Option<String>;

/// Canonical `date-time` form
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} field(s) failed validation: {}", .paths.len(), .paths.join(", "))]
pub struct TransformError {
    pub paths: Vec<String>,
}

/// Parses any supported timestamp and renders it in [`DATE_TIME_FORMAT`]
pub fn coerce_date_time(raw: &str) -> Option<String> {
    parse_instant_str(raw).map(|dt| dt.format(DATE_TIME_FORMAT).to_string())
}

#[derive(Debug, Clone)]
pub struct Transformer {
    coercers: HashMap<String, FormatCoercer>,
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new().with_coercer("date-time", coerce_date_time)
    }
}

impl Transformer {
    /// A transformer with no format coercers
    pub fn new() -> Self {
        Self {
            coercers: HashMap::new(),
        }
    }

    pub fn with_coercer(mut self, format: impl Into<String>, coercer: FormatCoercer) -> Self {
        self.coercers.insert(format.into(), coercer);
        self
    }

    /// Coerce `record` to `schema`, applying field selection from `metadata`
    pub fn transform(
        &self,
        record: &Value,
        schema: &Value,
        metadata: &StreamMetadata,
    ) -> Result<Value, TransformError> {
        let mut errors = Vec::new();

        let filtered = match record {
            Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .filter(|(name, _)| metadata.field_included(name))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect(),
            ),
            other => other.clone(),
        };

        let out = self.value(&filtered, schema, "", &mut errors);
        match out {
            Some(value) if errors.is_empty() => Ok(value),
            _ => {
                if errors.is_empty() {
                    errors.push("$".to_string());
                }
                Err(TransformError { paths: errors })
            }
        }
    }

    fn value(&self, value: &Value, schema: &Value, path: &str, errors: &mut Vec<String>) -> Option<Value> {
        if let Some(options) = schema.get("anyOf").and_then(Value::as_array) {
            for option in options {
                let mut scratch = Vec::new();
                if let Some(v) = self.value(value, option, path, &mut scratch) {
                    if scratch.is_empty() {
                        return Some(v);
                    }
                }
            }
            errors.push(display_path(path));
            return None;
        }

        let types = schema_types(schema);
        if types.is_empty() {
            return Some(value.clone());
        }

        if value.is_null() {
            if types.contains(&"null") {
                return Some(Value::Null);
            }
            errors.push(display_path(path));
            return None;
        }

        for ty in types.iter().filter(|t| **t != "null") {
            let coerced = match *ty {
                "object" => self.object(value, schema, path, errors),
                "array" => self.array(value, schema, path, errors),
                "string" => self.string(value, schema),
                "integer" => integer(value),
                "number" => number(value),
                "boolean" => boolean(value),
                _ => None,
            };
            if coerced.is_some() {
                return coerced;
            }
        }

        errors.push(display_path(path));
        None
    }

    fn object(&self, value: &Value, schema: &Value, path: &str, errors: &mut Vec<String>) -> Option<Value> {
        let fields = value.as_object()?;
        let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
            return Some(value.clone());
        };

        let mut out = Map::new();
        for (name, field_schema) in properties {
            if let Some(field) = fields.get(name) {
                let field_path = format!("{path}.{name}");
                if let Some(v) = self.value(field, field_schema, &field_path, errors) {
                    out.insert(name.clone(), v);
                }
            }
        }
        Some(Value::Object(out))
    }

    fn array(&self, value: &Value, schema: &Value, path: &str, errors: &mut Vec<String>) -> Option<Value> {
        let items = value.as_array()?;
        let Some(item_schema) = schema.get("items") else {
            return Some(value.clone());
        };

        let out = items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| self.value(item, item_schema, &format!("{path}[{i}]"), errors))
            .collect();
        Some(Value::Array(out))
    }

    fn string(&self, value: &Value, schema: &Value) -> Option<Value> {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return None,
        };

        let coercer = schema
            .get("format")
            .and_then(Value::as_str)
            .and_then(|format| self.coercers.get(format));
        match coercer {
            Some(coerce) => coerce(&text).map(Value::String),
            None => Some(Value::String(text)),
        }
    }
}

fn schema_types(schema: &Value) -> Vec<&str> {
    match schema.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "$".to_string()
    } else {
        path.trim_start_matches('.').to_string()
    }
}

fn integer(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
        Value::Number(n) => {
            let f = n.as_f64()?;
            (f.fract() == 0.0 && f.abs() < i64::MAX as f64).then(|| Value::from(f as i64))
        }
        Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
        _ => None,
    }
}

fn number(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        _ => None,
    }
}

fn boolean(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(_) => Some(value.clone()),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(Value::Bool(true)),
            "false" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(Value::Bool(false)),
            Some(1) => Some(Value::Bool(true)),
            _ => None,
        },
        _ => None,
    }
}
