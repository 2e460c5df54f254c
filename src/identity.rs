//! Identity map: one live entity per (class, primary key) within a context.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::trace;

use crate::core::{Result, Value};
use crate::entity::EntityRef;

/// Primary-key value of an entity.
///
/// `Single` for classes with one key property, `Composite` (in declared key
/// order) otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum Identity {
    Single(Value),
    Composite(Vec<(String, Value)>),
}

impl Identity {
    pub fn composite<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Composite(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn as_single(&self) -> Option<&Value> {
        match self {
            Self::Single(value) => Some(value),
            Self::Composite(_) => None,
        }
    }

    /// Component for `prop`. A single identity answers for any name.
    pub fn get(&self, prop: &str) -> Option<&Value> {
        match self {
            Self::Single(value) => Some(value),
            Self::Composite(pairs) => pairs.iter().find(|(k, _)| k == prop).map(|(_, v)| v),
        }
    }

    /// True when every component carries a value.
    pub fn is_complete(&self) -> bool {
        match self {
            Self::Single(value) => !value.is_null() && !value.is_empty_text(),
            Self::Composite(pairs) => {
                !pairs.is_empty() && pairs.iter().all(|(_, v)| !v.is_null() && !v.is_empty_text())
            }
        }
    }

    /// Stable textual key. Composite components are sorted by property name
    /// so the caller's ordering does not matter.
    pub fn key(&self) -> String {
        match self {
            Self::Single(value) => value.to_string(),
            Self::Composite(pairs) => {
                let mut sorted: Vec<&(String, Value)> = pairs.iter().collect();
                sorted.sort_by(|a, b| a.0.cmp(&b.0));
                sorted
                    .iter()
                    .map(|(k, v)| format!("{}:{}", k, v))
                    .collect::<Vec<_>>()
                    .join(";")
            }
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl From<Value> for Identity {
    fn from(value: Value) -> Self {
        Self::Single(value)
    }
}

impl From<i64> for Identity {
    fn from(id: i64) -> Self {
        Self::Single(Value::Integer(id))
    }
}

impl From<i32> for Identity {
    fn from(id: i32) -> Self {
        Self::Single(Value::Integer(id as i64))
    }
}

impl From<&str> for Identity {
    fn from(id: &str) -> Self {
        Self::Single(Value::from(id))
    }
}

impl From<String> for Identity {
    fn from(id: String) -> Self {
        Self::Single(Value::Text(id))
    }
}

/// Lowercase, with leading/trailing namespace separators removed.
pub fn normalize_class_name(class: &str) -> String {
    class
        .trim()
        .to_lowercase()
        .trim_matches(|c| c == ':' || c == '\\')
        .to_string()
}

/// Registry key for `(class, id)`.
pub fn identity_key(class: &str, id: &Identity) -> String {
    format!("{}@{}", normalize_class_name(class), id.key())
}

/// Maps `(class, primary key)` to the live entity instance.
///
/// Each [`MapperRegistry`](crate::MapperRegistry) owns one. While disabled
/// every operation is a no-op with a negative result.
pub struct IdentityMap {
    enabled: AtomicBool,
    members: Mutex<HashMap<String, EntityRef>>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            members: Mutex::new(HashMap::new()),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Register a persisted entity. Fresh entities and entities without a
    /// complete primary key are skipped.
    pub fn set(&self, entity: &EntityRef) -> Result<bool> {
        if !self.is_enabled() {
            return Ok(false);
        }

        let (class, id) = {
            let guard = entity.read()?;
            if guard.is_fresh() {
                return Ok(false);
            }
            (guard.schema().class_name().to_string(), guard.id()?)
        };

        if !id.is_complete() {
            return Ok(false);
        }

        let key = identity_key(&class, &id);
        trace!(key = %key, "identity map register");
        self.members.lock()?.insert(key, entity.clone());
        Ok(true)
    }

    pub fn get(&self, class: &str, id: &Identity) -> Result<Option<EntityRef>> {
        if !self.is_enabled() {
            return Ok(None);
        }
        let key = identity_key(class, id);
        Ok(self.members.lock()?.get(&key).cloned())
    }

    pub fn remove(&self, class: &str, id: &Identity) -> Result<bool> {
        if !self.is_enabled() {
            return Ok(false);
        }
        let key = identity_key(class, id);
        trace!(key = %key, "identity map evict");
        Ok(self.members.lock()?.remove(&key).is_some())
    }

    pub fn clear(&self) -> Result<()> {
        self.members.lock()?.clear();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.members.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IdentityMap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IdentityMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityMap")
            .field("enabled", &self.is_enabled())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_name_normalization() {
        assert_eq!(normalize_class_name("\\App\\Model\\User\\"), "app\\model\\user");
        assert_eq!(normalize_class_name("::app::User"), "app::user");
    }

    #[test]
    fn test_composite_key_ignores_caller_order() {
        let a = Identity::composite([("user_id", 1), ("group_id", 2)]);
        let b = Identity::composite([("group_id", 2), ("user_id", 1)]);

        assert_eq!(a.key(), "group_id:2;user_id:1");
        assert_eq!(identity_key("Membership", &a), identity_key("membership", &b));
    }

    #[test]
    fn test_completeness() {
        assert!(Identity::from(0).is_complete());
        assert!(!Identity::Single(Value::Null).is_complete());
        assert!(!Identity::from("").is_complete());
        assert!(!Identity::composite([("a", Value::Integer(1)), ("b", Value::Null)]).is_complete());
        assert!(!Identity::Composite(vec![]).is_complete());
    }

    #[test]
    fn test_disabled_map_is_inert() {
        let map = IdentityMap::new();
        map.disable();

        assert!(map.get("user", &Identity::from(1)).unwrap().is_none());
        assert!(!map.remove("user", &Identity::from(1)).unwrap());
        assert!(map.is_empty());

        map.enable();
        assert!(map.is_enabled());
    }
}
