//! Entity class declarations and their normalized metadata.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use regex::Regex;

use crate::core::{MapperError, Result, Value};
use crate::entity::events::{EntityHooks, LifecycleEvent, Listener, Listeners, NoHooks};
use crate::identity::Identity;
use crate::types::{FALLBACK_TYPE, TypeRegistry, TypeStrategy};

/// A property as declared. Unset fields are filled in during normalization,
/// first by the property's type, then by the global defaults.
#[derive(Debug, Clone, Default)]
pub struct PropertyDef {
    pub type_name: Option<String>,
    pub primary_key: Option<bool>,
    pub auto_increment: Option<bool>,
    pub refuse_update: Option<bool>,
    pub allow_null: Option<bool>,
    pub default: Option<Value>,
    pub pattern: Option<String>,
    pub strict: Option<bool>,
    pub format: Option<String>,
}

impl PropertyDef {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: Some(type_name.to_string()),
            ..<Self as Default>::default()
        }
    }

    /// Property without a declared type.
    pub fn untyped() -> Self {
        <Self as Default>::default()
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = Some(true);
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = Some(true);
        self
    }

    pub fn refuse_update(mut self) -> Self {
        self.refuse_update = Some(true);
        self
    }

    pub fn allow_null(mut self) -> Self {
        self.allow_null = Some(true);
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn pattern(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        self
    }

    pub fn format(mut self, format: &str) -> Self {
        self.format = Some(format.to_string());
        self
    }
}

/// Normalized, immutable description of one property.
#[derive(Clone)]
pub struct PropertyMeta {
    pub name: String,
    pub type_name: String,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub refuse_update: bool,
    pub allow_null: bool,
    pub default: Value,
    pub pattern: Option<Regex>,
    pub strict: bool,
    pub format: Option<String>,
    strategy: Arc<dyn TypeStrategy>,
}

impl PropertyMeta {
    /// Resolve the property's type, let it complete the declaration, apply
    /// the global defaults and force the primary-key invariants.
    pub fn normalize(name: &str, def: PropertyDef, types: &TypeRegistry) -> Result<Self> {
        let strategy = types.resolve(def.type_name.as_deref());
        let def = strategy.normalize_meta(def);

        let pattern = match def.pattern.as_deref() {
            Some(pattern) => Some(Regex::new(pattern).map_err(|err| {
                MapperError::InvalidSchema(format!(
                    "Property {} has malformed pattern {}: {}",
                    name, pattern, err
                ))
            })?),
            None => None,
        };

        let primary_key = def.primary_key.unwrap_or(false);
        let mut meta = Self {
            name: name.to_string(),
            type_name: def
                .type_name
                .map(|t| t.to_lowercase())
                .unwrap_or_else(|| FALLBACK_TYPE.to_string()),
            primary_key,
            auto_increment: def.auto_increment.unwrap_or(false),
            refuse_update: def.refuse_update.unwrap_or(false),
            allow_null: def.allow_null.unwrap_or(false),
            default: def.default.unwrap_or(Value::Null),
            pattern,
            strict: def.strict.unwrap_or(false),
            format: def.format,
            strategy,
        };

        if primary_key {
            meta.refuse_update = true;
            meta.allow_null = false;
        }

        Ok(meta)
    }

    pub fn strategy(&self) -> &Arc<dyn TypeStrategy> {
        &self.strategy
    }

    pub fn normalize_value(&self, value: Value) -> Result<Value> {
        self.strategy.normalize(value, self)
    }

    pub fn store_value(&self, value: Value) -> Result<Value> {
        self.strategy.store(value, self)
    }

    pub fn restore_value(&self, value: Value) -> Result<Value> {
        self.strategy.restore(value, self)
    }

    pub fn default_value(&self) -> Result<Value> {
        self.strategy.default_value(self)
    }
}

impl fmt::Debug for PropertyMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyMeta")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("primary_key", &self.primary_key)
            .field("auto_increment", &self.auto_increment)
            .field("refuse_update", &self.refuse_update)
            .field("allow_null", &self.allow_null)
            .field("default", &self.default)
            .field("pattern", &self.pattern.as_ref().map(Regex::as_str))
            .field("strict", &self.strict)
            .field("format", &self.format)
            .finish()
    }
}

/// Declaration of an entity class: where it is stored and what it holds.
///
/// ```
/// use rowmapper::{EntityClass, PropertyDef};
///
/// let user = EntityClass::new("app::User")
///     .collection("users")
///     .property("id", PropertyDef::new("integer").primary_key().auto_increment())
///     .property("name", PropertyDef::new("string"));
///
/// let admin = EntityClass::new("app::Admin")
///     .extends(&user)
///     .property("level", PropertyDef::new("int").default(1));
///
/// assert_eq!(admin.property_names(), vec!["id", "name", "level"]);
/// ```
#[derive(Clone)]
pub struct EntityClass {
    name: String,
    collection: Option<String>,
    readonly: Option<bool>,
    properties: Vec<(String, PropertyDef)>,
    hooks: Option<Arc<dyn EntityHooks>>,
}

impl EntityClass {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            collection: None,
            readonly: None,
            properties: Vec::new(),
            hooks: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(mut self, collection: &str) -> Self {
        self.collection = Some(collection.to_string());
        self
    }

    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = Some(readonly);
        self
    }

    /// Declare a property. Redeclaring a name replaces the earlier declaration
    /// in place.
    pub fn property(mut self, name: &str, def: PropertyDef) -> Self {
        match self.properties.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = def,
            None => self.properties.push((name.to_string(), def)),
        }
        self
    }

    pub fn hooks(mut self, hooks: impl EntityHooks + 'static) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// Inherit from `parent`: its properties come first, this class's
    /// declarations override them by name. Collection, readonly flag and hooks
    /// are inherited when not declared here.
    pub fn extends(mut self, parent: &EntityClass) -> Self {
        let mut merged = parent.properties.clone();
        for (name, def) in self.properties.drain(..) {
            match merged.iter_mut().find(|(n, _)| *n == name) {
                Some(slot) => slot.1 = def,
                None => merged.push((name, def)),
            }
        }
        self.properties = merged;

        if self.collection.is_none() {
            self.collection = parent.collection.clone();
        }
        if self.readonly.is_none() {
            self.readonly = parent.readonly;
        }
        if self.hooks.is_none() {
            self.hooks = parent.hooks.clone();
        }
        self
    }

    pub fn property_names(&self) -> Vec<&str> {
        self.properties.iter().map(|(n, _)| n.as_str()).collect()
    }
}

impl fmt::Debug for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityClass")
            .field("name", &self.name)
            .field("collection", &self.collection)
            .field("readonly", &self.readonly)
            .field("properties", &self.properties)
            .finish()
    }
}

/// Normalized metadata of one entity class, shared by its mapper and every
/// entity of the class.
pub struct EntitySchema {
    class_name: String,
    collection: String,
    readonly: bool,
    properties: Vec<PropertyMeta>,
    index: HashMap<String, usize>,
    primary_key: Vec<String>,
    hooks: Arc<dyn EntityHooks>,
    subscribers: RwLock<Listeners>,
}

impl EntitySchema {
    pub fn build(class: &EntityClass, types: &TypeRegistry) -> Result<Self> {
        let collection = class.collection.clone().ok_or_else(|| {
            MapperError::InvalidSchema(format!("{}: Undefined collection", class.name))
        })?;

        let mut properties = Vec::with_capacity(class.properties.len());
        let mut index = HashMap::new();
        let mut primary_key = Vec::new();

        for (name, def) in &class.properties {
            let meta = PropertyMeta::normalize(name, def.clone(), types)?;
            if meta.primary_key {
                primary_key.push(name.clone());
            }
            index.insert(name.clone(), properties.len());
            properties.push(meta);
        }

        if primary_key.is_empty() {
            return Err(MapperError::InvalidSchema(format!(
                "{}: Undefined primary key",
                class.name
            )));
        }

        Ok(Self {
            class_name: class.name.clone(),
            collection,
            readonly: class.readonly.unwrap_or(false),
            properties,
            index,
            primary_key,
            hooks: class.hooks.clone().unwrap_or_else(|| Arc::new(NoHooks)),
            subscribers: RwLock::new(Listeners::new()),
        })
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Properties in declaration order.
    pub fn properties(&self) -> &[PropertyMeta] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertyMeta> {
        self.index.get(name).map(|&idx| &self.properties[idx])
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Primary-key property names in declaration order.
    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn primary_key_meta(&self) -> impl Iterator<Item = &PropertyMeta> {
        self.primary_key
            .iter()
            .filter_map(|name| self.property(name))
    }

    /// Coerce every component of `id` through its key property, in declared
    /// key order. The result has the shape `Entity::id` produces, so lookups
    /// by `"05"` and by `5` resolve to one identity.
    pub fn normalize_identity(&self, id: &Identity) -> Result<Identity> {
        let illegal = || {
            MapperError::RuntimeInconsistency(format!("{}: Illegal id value", self.class_name()))
        };

        match id {
            Identity::Single(_) if self.primary_key.len() != 1 => return Err(illegal()),
            Identity::Composite(pairs) if pairs.len() < self.primary_key.len() => {
                return Err(illegal());
            }
            _ => {}
        }

        let mut pairs = Vec::with_capacity(self.primary_key.len());
        for meta in self.primary_key_meta() {
            let raw = id.get(&meta.name).cloned().ok_or_else(illegal)?;
            if raw.is_null() || raw.is_empty_text() {
                return Err(illegal());
            }
            let value = meta.normalize_value(raw)?;
            if value.is_null() {
                return Err(illegal());
            }
            pairs.push((meta.name.clone(), value));
        }

        if let [(_, value)] = pairs.as_slice() {
            return Ok(Identity::Single(value.clone()));
        }
        Ok(Identity::Composite(pairs))
    }

    pub fn hooks(&self) -> Arc<dyn EntityHooks> {
        self.hooks.clone()
    }

    /// Register a class-wide listener.
    pub fn subscribe(&self, event: LifecycleEvent, listener: Listener) -> Result<()> {
        self.subscribers.write()?.push(event, listener);
        Ok(())
    }

    /// Drop class-wide listeners, for one event or all of them.
    pub fn unsubscribe(&self, event: Option<LifecycleEvent>) -> Result<()> {
        self.subscribers.write()?.clear(event);
        Ok(())
    }

    /// Snapshot of the class-wide listeners.
    pub fn subscribers(&self) -> Result<Listeners> {
        Ok(self.subscribers.read()?.clone())
    }
}

impl fmt::Debug for EntitySchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySchema")
            .field("class_name", &self.class_name)
            .field("collection", &self.collection)
            .field("readonly", &self.readonly)
            .field("properties", &self.properties)
            .field("primary_key", &self.primary_key)
            .finish()
    }
}
