//! Coercion strategies keyed by logical property type.
//!
//! Every declared property names a type (`"integer"`, `"json"`, ...). The
//! strategy registered under that name decides how raw input is normalized
//! on write, how values are converted for storage and back, and what a
//! property defaults to.

mod composite;
mod document;
mod scalar;
mod timestamp;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use lazy_static::lazy_static;

use crate::core::{Result, Value};
use crate::schema::{PropertyDef, PropertyMeta};

pub use composite::{
    ArrayType, HstoreType, decode_array, decode_hstore, encode_array, encode_hstore,
};
pub use document::JsonType;
pub use scalar::{IntegerType, MixedType, NumericType, StringType};
pub use timestamp::TimestampType;

/// Key used when a property declares no type, or an unknown one.
pub const FALLBACK_TYPE: &str = "mixed";

lazy_static! {
    static ref SHARED_TYPES: Arc<TypeRegistry> = Arc::new(TypeRegistry::with_builtins());
}

/// Validation and conversion rules for one logical type.
///
/// All operations are pure: they look only at the value and the property
/// metadata.
pub trait TypeStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Called on every property write. `""` means "no value".
    fn normalize(&self, value: Value, _meta: &PropertyMeta) -> Result<Value> {
        if value.is_empty_text() {
            return Ok(Value::Null);
        }
        Ok(value)
    }

    /// Convert an entity value into its storage representation.
    fn store(&self, value: Value, _meta: &PropertyMeta) -> Result<Value> {
        Ok(value)
    }

    /// Convert a storage value back into an entity value.
    fn restore(&self, value: Value, meta: &PropertyMeta) -> Result<Value> {
        self.normalize(value, meta)
    }

    /// Value for a fresh entity that was given nothing explicit.
    fn default_value(&self, meta: &PropertyMeta) -> Result<Value> {
        Ok(meta.default.clone())
    }

    /// Fill type-specific defaults into a declaration. Declared values win.
    fn normalize_meta(&self, def: PropertyDef) -> PropertyDef {
        def
    }
}

#[derive(Debug, Clone)]
pub struct TypeRegistry {
    strategies: HashMap<String, Arc<dyn TypeStrategy>>,
    fallback: Arc<dyn TypeStrategy>,
}

impl TypeRegistry {
    /// Registry that resolves every key to the untyped strategy.
    pub fn empty() -> Self {
        let fallback: Arc<dyn TypeStrategy> = Arc::new(MixedType);
        let mut strategies = HashMap::new();
        strategies.insert(FALLBACK_TYPE.to_string(), fallback.clone());
        Self {
            strategies,
            fallback,
        }
    }

    pub fn with_builtins() -> Self {
        Self::with_timestamp_format(None)
    }

    /// Built-in strategies, with `timestamp_format` as the storage format of
    /// timestamp properties that declare none.
    pub fn with_timestamp_format(timestamp_format: Option<String>) -> Self {
        let timestamp = TimestampType::new(timestamp_format);

        let mut registry = Self::empty();
        registry
            .register("integer", IntegerType)
            .register("numeric", NumericType)
            .register("string", StringType)
            .register("json", JsonType)
            .register("datetime", timestamp.clone())
            .register("timestamp", timestamp)
            .register("array", ArrayType)
            .register("hstore", HstoreType);
        registry
    }

    /// Process-wide default registry. Immutable once built.
    pub fn shared() -> Arc<TypeRegistry> {
        SHARED_TYPES.clone()
    }

    pub fn register(&mut self, key: &str, strategy: impl TypeStrategy + 'static) -> &mut Self {
        self.register_arc(key, Arc::new(strategy))
    }

    pub fn register_arc(&mut self, key: &str, strategy: Arc<dyn TypeStrategy>) -> &mut Self {
        let key = key.trim().to_lowercase();
        if key == FALLBACK_TYPE {
            self.fallback = strategy.clone();
        }
        self.strategies.insert(key, strategy);
        self
    }

    /// Strategy for `key`; unknown or missing keys fall back to `mixed`.
    pub fn resolve(&self, key: Option<&str>) -> Arc<dyn TypeStrategy> {
        let Some(key) = key else {
            return self.fallback.clone();
        };

        let key = canonical_key(key);
        self.strategies
            .get(&key)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.strategies.contains_key(&canonical_key(key))
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.strategies.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn canonical_key(key: &str) -> String {
    let key = key.trim().to_lowercase();
    match key.as_str() {
        "int" => "integer".to_string(),
        "text" => "string".to_string(),
        _ => key,
    }
}
