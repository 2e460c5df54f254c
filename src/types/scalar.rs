use super::TypeStrategy;
use crate::core::{MapperError, Result, Value};
use crate::schema::PropertyMeta;

/// Untyped pass-through.
#[derive(Debug, Clone, Copy, Default)]
pub struct MixedType;

impl TypeStrategy for MixedType {
    fn name(&self) -> &str {
        "mixed"
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerType;

impl TypeStrategy for IntegerType {
    fn name(&self) -> &str {
        "integer"
    }

    fn normalize(&self, value: Value, meta: &PropertyMeta) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Text(ref s) if s.is_empty() => Ok(Value::Null),
            Value::Integer(_) => Ok(value),
            Value::Float(f) => Value::Float(f)
                .as_i64()
                .map(Value::Integer)
                .ok_or_else(|| unexpected(meta, &value)),
            Value::Boolean(b) => Ok(Value::Integer(b as i64)),
            Value::Text(ref s) => parse_number(s)
                .and_then(|n| n.as_i64())
                .map(Value::Integer)
                .ok_or_else(|| unexpected(meta, &value)),
            _ => Err(unexpected(meta, &value)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NumericType;

impl TypeStrategy for NumericType {
    fn name(&self) -> &str {
        "numeric"
    }

    fn normalize(&self, value: Value, meta: &PropertyMeta) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Text(ref s) if s.is_empty() => Ok(Value::Null),
            Value::Integer(_) | Value::Float(_) => Ok(value),
            Value::Boolean(b) => Ok(Value::Integer(b as i64)),
            Value::Text(ref s) => parse_number(s).ok_or_else(|| unexpected(meta, &value)),
            _ => Err(unexpected(meta, &value)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StringType;

impl TypeStrategy for StringType {
    fn name(&self) -> &str {
        "string"
    }

    fn normalize(&self, value: Value, meta: &PropertyMeta) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Text(ref s) if s.is_empty() => Ok(Value::Null),
            Value::Text(_) => Ok(value),
            Value::List(_) | Value::Map(_) => Err(unexpected(meta, &value)),
            other => Ok(Value::Text(other.to_string())),
        }
    }
}

/// Integer first, then float. Surrounding whitespace is ignored.
fn parse_number(text: &str) -> Option<Value> {
    let text = text.trim();
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Integer(i));
    }
    text.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Value::Float)
}

pub(super) fn unexpected(meta: &PropertyMeta, value: &Value) -> MapperError {
    MapperError::UnexpectedValue(format!(
        "Property {} of type {} cannot hold {} value '{}'",
        meta.name,
        meta.type_name,
        value.type_name(),
        value
    ))
}
