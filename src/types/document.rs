use std::collections::BTreeMap;

use super::TypeStrategy;
use super::scalar::unexpected;
use crate::core::{MapperError, Result, Value};
use crate::schema::{PropertyDef, PropertyMeta};

/// Structured document stored as JSON text.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonType;

impl TypeStrategy for JsonType {
    fn name(&self) -> &str {
        "json"
    }

    fn normalize(&self, value: Value, meta: &PropertyMeta) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Text(s) if s.is_empty() => Ok(Value::Null),
            Value::Text(s) => serde_json::from_str::<serde_json::Value>(&s)
                .map(Value::from)
                .map_err(|err| {
                    MapperError::UnexpectedValue(format!(
                        "Property {} holds malformed json: {}",
                        meta.name, err
                    ))
                }),
            // scalars are valid documents and come back unchanged from text
            Value::Integer(_) | Value::Float(_) | Value::Boolean(_) => Ok(value),
            Value::List(_) | Value::Map(_) => Ok(value),
            other => Err(unexpected(meta, &other)),
        }
    }

    fn store(&self, value: Value, _meta: &PropertyMeta) -> Result<Value> {
        if value.is_null() || value.is_empty_collection() {
            return Ok(Value::Null);
        }
        // serde_json leaves non-ascii characters unescaped
        let encoded = serde_json::to_string(&value.to_json())?;
        Ok(Value::Text(encoded))
    }

    fn normalize_meta(&self, mut def: PropertyDef) -> PropertyDef {
        def.strict.get_or_insert(true);
        def.default.get_or_insert(Value::Map(BTreeMap::new()));
        def
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeRegistry;

    fn meta() -> PropertyMeta {
        PropertyMeta::normalize("doc", PropertyDef::new("json"), &TypeRegistry::with_builtins())
            .unwrap()
    }

    #[test]
    fn test_meta_defaults_to_strict_empty_map() {
        let meta = meta();
        assert!(meta.strict);
        assert_eq!(meta.default, Value::Map(BTreeMap::new()));

        let relaxed = PropertyMeta::normalize(
            "doc",
            PropertyDef::new("json").strict(false),
            &TypeRegistry::with_builtins(),
        )
        .unwrap();
        assert!(!relaxed.strict);
    }

    #[test]
    fn test_store_restore_round_trip_keeps_unicode() {
        let meta = meta();
        let doc = Value::from(serde_json::json!({"title": "привет", "n": [1, 2]}));

        let stored = JsonType.store(doc.clone(), &meta).unwrap();
        let text = stored.as_str().unwrap();
        assert!(text.contains("привет"));

        assert_eq!(JsonType.restore(stored, &meta).unwrap(), doc);
    }

    #[test]
    fn test_empty_document_is_stored_as_null() {
        let meta = meta();
        assert_eq!(JsonType.store(Value::Map(BTreeMap::new()), &meta).unwrap(), Value::Null);
        assert_eq!(JsonType.store(Value::List(vec![]), &meta).unwrap(), Value::Null);
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        let meta = meta();
        let err = JsonType.normalize(Value::from("{oops"), &meta).unwrap_err();
        assert!(matches!(err, MapperError::UnexpectedValue(_)));
    }

    #[test]
    fn test_timestamp_is_not_a_document() {
        let meta = meta();
        let ts = Value::Timestamp(chrono::Utc::now().fixed_offset());
        let err = JsonType.normalize(ts, &meta).unwrap_err();
        assert!(matches!(err, MapperError::UnexpectedValue(_)));

        assert_eq!(JsonType.normalize(Value::from("7"), &meta).unwrap(), Value::Integer(7));
        assert_eq!(JsonType.normalize(Value::Boolean(true), &meta).unwrap(), Value::Boolean(true));
    }
}
