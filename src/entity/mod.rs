//! In-memory entities: property values, dirty tracking and lifecycle events.

pub mod events;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::trace;

use crate::core::{MapperError, Result, Value};
use crate::identity::Identity;
use crate::schema::EntitySchema;
use crate::storage::Record;

use events::{LifecycleEvent, Listener, Listeners};

/// One record of an entity class.
///
/// Properties are sparse: an absent property reads as its type's default.
/// Writes go through the property's coercion strategy and are tracked as
/// dirty until the next successful save or hydration.
pub struct Entity {
    schema: Arc<EntitySchema>,
    props: BTreeMap<String, Value>,
    // evaluated once, so time-based defaults stay stable for the instance
    defaults: BTreeMap<String, Value>,
    dirty: BTreeSet<String>,
    fresh: bool,
    listeners: Listeners,
}

impl Entity {
    /// A fresh entity with defaults applied.
    pub fn new(schema: Arc<EntitySchema>) -> Result<Self> {
        Self::with_values(schema, Vec::<(String, Value)>::new())
    }

    /// A fresh entity. Values go through the strict setter, then every
    /// non-nullable property still without a value gets its type default.
    pub fn with_values<I, K, V>(schema: Arc<EntitySchema>, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut entity = Self::blank(schema.clone(), true)?;
        for (prop, value) in values {
            entity.set_with(prop.as_ref(), value.into(), true)?;
        }

        for meta in schema.properties() {
            if meta.allow_null || entity.is_set(&meta.name) {
                continue;
            }
            if let Some(default) = entity.defaults.get(&meta.name).cloned() {
                entity.change(&meta.name, default);
            }
        }

        Ok(entity)
    }

    /// A non-fresh, empty entity, to be filled by `merge`.
    pub(crate) fn hydrated(schema: Arc<EntitySchema>) -> Result<Self> {
        Self::blank(schema, false)
    }

    fn blank(schema: Arc<EntitySchema>, fresh: bool) -> Result<Self> {
        let mut defaults = BTreeMap::new();
        for meta in schema.properties() {
            let default = meta.default_value()?;
            if !default.is_null() {
                defaults.insert(meta.name.clone(), default);
            }
        }

        Ok(Self {
            schema,
            props: BTreeMap::new(),
            defaults,
            dirty: BTreeSet::new(),
            fresh,
            listeners: Listeners::new(),
        })
    }

    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    pub fn class_name(&self) -> &str {
        self.schema.class_name()
    }

    pub fn has_prop(&self, prop: &str) -> bool {
        self.schema.has_property(prop)
    }

    /// True when the property holds an explicit, non-null value.
    pub fn is_set(&self, prop: &str) -> bool {
        self.props.get(prop).is_some_and(|v| !v.is_null())
    }

    pub fn get(&self, prop: &str) -> Result<Value> {
        if !self.schema.has_property(prop) {
            return Err(self.unknown(prop));
        }
        let value = self.props.get(prop).or_else(|| self.defaults.get(prop));
        Ok(value.cloned().unwrap_or(Value::Null))
    }

    /// Strict assignment: every violation is an error.
    pub fn set(&mut self, prop: &str, value: impl Into<Value>) -> Result<bool> {
        self.set_with(prop, value.into(), true)
    }

    /// Assign a property.
    ///
    /// In non-strict mode unknown properties, properties flagged `strict`,
    /// refuse-update properties of a persisted entity and nulls for
    /// non-nullable properties are skipped with `Ok(false)`. Pattern and
    /// shape failures raise in both modes.
    pub fn set_with(&mut self, prop: &str, value: Value, strict: bool) -> Result<bool> {
        let schema = self.schema.clone();
        let Some(meta) = schema.property(prop) else {
            if !strict {
                return Ok(false);
            }
            return Err(self.unknown(prop));
        };

        if !strict && meta.strict {
            return Ok(false);
        }

        if !self.fresh && meta.refuse_update {
            if !strict {
                return Ok(false);
            }
            return Err(MapperError::ReadonlyViolation(format!(
                "{}: Property {} refuse update",
                self.class_name(),
                prop
            )));
        }

        if let Some(pattern) = &meta.pattern
            && !value.is_null()
            && !value.is_empty_text()
        {
            let matched = !value.is_collection() && pattern.is_match(&value.to_string());
            if !matched {
                return Err(MapperError::PatternMismatch(
                    self.class_name().to_string(),
                    prop.to_string(),
                    pattern.as_str().to_string(),
                ));
            }
        }

        let value = meta.normalize_value(value)?;
        if value.is_null() && !meta.allow_null {
            if !strict {
                return Ok(false);
            }
            return Err(MapperError::NullNotAllowed(
                self.class_name().to_string(),
                prop.to_string(),
            ));
        }

        if self.props.get(prop) != Some(&value) {
            self.change(prop, value);
        }
        Ok(true)
    }

    /// Bulk non-strict assignment.
    pub fn set_props<I, K, V>(&mut self, values: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (prop, value) in values {
            self.set_with(prop.as_ref(), value.into(), false)?;
        }
        Ok(self)
    }

    /// Primary-key value: a single value for one key property, the ordered
    /// pairs otherwise.
    pub fn id(&self) -> Result<Identity> {
        let keys = self.schema.primary_key();
        if let [single] = keys {
            return Ok(Identity::Single(self.get(single)?));
        }

        let mut pairs = Vec::with_capacity(keys.len());
        for prop in keys {
            pairs.push((prop.clone(), self.get(prop)?));
        }
        Ok(Identity::Composite(pairs))
    }

    pub fn to_record(&self, only_dirty: bool) -> Record {
        if !only_dirty {
            return self.props.clone();
        }
        self.dirty
            .iter()
            .filter_map(|prop| self.props.get(prop).map(|v| (prop.clone(), v.clone())))
            .collect()
    }

    pub fn dirty_props(&self) -> Vec<&str> {
        self.dirty.iter().map(String::as_str).collect()
    }

    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn is_readonly(&self) -> bool {
        self.schema.is_readonly()
    }

    /// Register a listener on this instance only.
    pub fn listen(&mut self, event: LifecycleEvent, listener: Listener) {
        self.listeners.push(event, listener);
    }

    pub fn clear_listeners(&mut self, event: Option<LifecycleEvent>) {
        self.listeners.clear(event);
    }

    /// Unvalidated write of restored values. Reserved for the mapper after a
    /// successful storage round trip. A null value unsets the property.
    pub(crate) fn merge(&mut self, record: Record) -> &mut Self {
        for (prop, value) in record {
            if value.is_null() {
                self.props.remove(&prop);
            } else {
                self.props.insert(prop, value);
            }
        }
        self.fresh = false;
        self.dirty.clear();
        self
    }

    /// Run the class hook, then instance listeners, then class listeners.
    pub(crate) fn trigger(&mut self, event: LifecycleEvent) -> Result<usize> {
        let hooks = self.schema.hooks();
        hooks.dispatch(event, self)?;

        let listeners = self.listeners.clone();
        let mut fired = listeners.fire(event, self);

        let subscribers = self.schema.subscribers()?;
        fired += subscribers.fire(event, self);

        trace!(class = self.class_name(), event = %event, listeners = fired, "lifecycle event");
        Ok(fired)
    }

    fn change(&mut self, prop: &str, value: Value) {
        self.props.insert(prop.to_string(), value);
        self.dirty.insert(prop.to_string());
    }

    fn unknown(&self, prop: &str) -> MapperError {
        MapperError::UnknownProperty(self.class_name().to_string(), prop.to_string())
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("class", &self.class_name())
            .field("props", &self.props)
            .field("dirty", &self.dirty)
            .field("fresh", &self.fresh)
            .finish()
    }
}

/// Shared handle to an entity. Clones point at the same instance.
#[derive(Clone)]
pub struct EntityRef(Arc<RwLock<Entity>>);

impl EntityRef {
    pub fn new(entity: Entity) -> Self {
        Self(Arc::new(RwLock::new(entity)))
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, Entity>> {
        Ok(self.0.read()?)
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, Entity>> {
        Ok(self.0.write()?)
    }

    /// Reference identity.
    pub fn ptr_eq(&self, other: &EntityRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn get(&self, prop: &str) -> Result<Value> {
        self.read()?.get(prop)
    }

    pub fn set(&self, prop: &str, value: impl Into<Value>) -> Result<bool> {
        self.write()?.set(prop, value)
    }

    pub fn id(&self) -> Result<Identity> {
        self.read()?.id()
    }

    pub fn is_fresh(&self) -> Result<bool> {
        Ok(self.read()?.is_fresh())
    }

    pub fn is_dirty(&self) -> Result<bool> {
        Ok(self.read()?.is_dirty())
    }

    pub fn to_record(&self, only_dirty: bool) -> Result<Record> {
        Ok(self.read()?.to_record(only_dirty))
    }

    pub fn listen(&self, event: LifecycleEvent, listener: Listener) -> Result<()> {
        self.write()?.listen(event, listener);
        Ok(())
    }
}

impl From<Entity> for EntityRef {
    fn from(entity: Entity) -> Self {
        Self::new(entity)
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.read() {
            Ok(entity) => entity.fmt(f),
            Err(_) => f.write_str("EntityRef(<poisoned>)"),
        }
    }
}
