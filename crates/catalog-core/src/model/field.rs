//! Typed field values.

use serde_json::Value;

use crate::model::graph::Reference;
use crate::model::schema::{FieldKind, FieldSpec};

/// A graph field value classified against its field spec
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Explicit null on a nullable field
    Null,
    Literal(Value),
    Reference(Reference),
    References(Vec<Reference>),
}

impl FieldValue {
    /// Classify `value` against `spec`
    ///
    /// Checks the value's shape only. Whether a reference's type is a legal
    /// target is a separate question, see [`FieldSpec::accepts_target`].
    ///
    /// # Errors
    ///
    /// A human-readable reason when the value does not match the field kind.
    pub fn from_json(spec: &FieldSpec, value: &Value) -> Result<Self, String> {
        if value.is_null() {
            return if spec.nullable {
                Ok(FieldValue::Null)
            } else {
                Err("null is not allowed".to_string())
            };
        }

        match &spec.kind {
            FieldKind::String => match value.as_str() {
                Some("") if !spec.allow_blank => Err("must not be blank".to_string()),
                Some(_) => Ok(FieldValue::Literal(value.clone())),
                None => Err(mismatch("string", value)),
            },
            FieldKind::Boolean if value.is_boolean() => Ok(FieldValue::Literal(value.clone())),
            FieldKind::Boolean => Err(mismatch("boolean", value)),
            FieldKind::Integer if value.is_i64() || value.is_u64() => {
                Ok(FieldValue::Literal(value.clone()))
            }
            FieldKind::Integer => Err(mismatch("integer", value)),
            FieldKind::Choice { choices } => match value.as_str() {
                Some(s) if choices.iter().any(|c| c == s) => Ok(FieldValue::Literal(value.clone())),
                _ => Err(format!("expected one of {:?}, got {}", choices, value)),
            },
            FieldKind::Reference => Reference::from_value(value)
                .map(FieldValue::Reference)
                .ok_or_else(|| mismatch("reference", value)),
            FieldKind::ReferenceList => {
                let items = value
                    .as_array()
                    .ok_or_else(|| mismatch("reference list", value))?;
                items
                    .iter()
                    .map(|item| Reference::from_value(item).ok_or_else(|| mismatch("reference", item)))
                    .collect::<Result<Vec<_>, _>>()
                    .map(FieldValue::References)
            }
        }
    }

    pub fn references(&self) -> &[Reference] {
        match self {
            FieldValue::Reference(r) => std::slice::from_ref(r),
            FieldValue::References(rs) => rs,
            _ => &[],
        }
    }
}

fn mismatch(expected: &str, got: &Value) -> String {
    let got = match got {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    format!("expected {}, got {}", expected, got)
}
