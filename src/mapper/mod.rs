//! Translates entity operations into storage calls for one entity class.

pub mod caching;
pub mod predicate;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::core::{MapperError, Result, Value};
use crate::entity::events::{LifecycleEvent, Listener};
use crate::entity::{Entity, EntityRef};
use crate::identity::{Identity, IdentityMap};
use crate::schema::EntitySchema;
use crate::storage::{Record, StorageService};

pub use caching::{CachingMapper, LruRecordCache, RecordCache, decode_record, encode_record};
pub use predicate::{Clause, Predicate};

/// What `find` should resolve: a primary-key value, or an entity whose key
/// is used and whose instance is reloaded.
#[derive(Debug, Clone)]
pub enum Lookup {
    Id(Identity),
    Entity(EntityRef),
}

impl From<Identity> for Lookup {
    fn from(id: Identity) -> Self {
        Self::Id(id)
    }
}

impl From<EntityRef> for Lookup {
    fn from(entity: EntityRef) -> Self {
        Self::Entity(entity)
    }
}

impl From<&EntityRef> for Lookup {
    fn from(entity: &EntityRef) -> Self {
        Self::Entity(entity.clone())
    }
}

impl From<Value> for Lookup {
    fn from(id: Value) -> Self {
        Self::Id(Identity::Single(id))
    }
}

impl From<i64> for Lookup {
    fn from(id: i64) -> Self {
        Self::Id(id.into())
    }
}

impl From<i32> for Lookup {
    fn from(id: i32) -> Self {
        Self::Id(id.into())
    }
}

impl From<&str> for Lookup {
    fn from(id: &str) -> Self {
        Self::Id(id.into())
    }
}

/// Persistence operations of one entity class.
#[async_trait]
pub trait DataMapper: Send + Sync {
    fn schema(&self) -> &Arc<EntitySchema>;

    /// `None` when the storage has no such record.
    async fn find(&self, target: Lookup, refresh: bool) -> Result<Option<EntityRef>>;

    /// Insert a fresh entity or write the dirty properties of a persisted
    /// one. `Ok(false)` when the storage refused the write.
    async fn save(&self, entity: &EntityRef) -> Result<bool>;

    async fn destroy(&self, entity: &EntityRef) -> Result<bool>;

    /// Reload a persisted entity in place. Fresh entities come back as they
    /// are.
    async fn refresh(&self, entity: &EntityRef) -> Result<Option<EntityRef>>;

    /// A fresh entity of this class.
    fn create(&self, values: Record) -> Result<EntityRef> {
        Entity::with_values(self.schema().clone(), values).map(EntityRef::new)
    }

    /// Register a listener for every entity of this class.
    fn subscribe(&self, event: LifecycleEvent, listener: Listener) -> Result<()> {
        self.schema().subscribe(event, listener)
    }
}

/// Storage-backed mapper.
pub struct Mapper {
    schema: Arc<EntitySchema>,
    storage: Arc<dyn StorageService>,
    identity_map: Arc<IdentityMap>,
}

impl Mapper {
    pub fn new(
        schema: Arc<EntitySchema>,
        storage: Arc<dyn StorageService>,
        identity_map: Arc<IdentityMap>,
    ) -> Self {
        Self {
            schema,
            storage,
            identity_map,
        }
    }

    pub fn storage(&self) -> &Arc<dyn StorageService> {
        &self.storage
    }

    pub fn identity_map(&self) -> &Arc<IdentityMap> {
        &self.identity_map
    }

    pub fn collection(&self) -> &str {
        self.schema.collection()
    }

    /// Hydrate a storage record into `existing`, or into a new persisted
    /// entity. The entity is not registered.
    pub fn package(&self, record: Record, existing: Option<EntityRef>) -> Result<EntityRef> {
        let props = self.record_to_props(record)?;
        let entity = match existing {
            Some(entity) => entity,
            None => EntityRef::new(Entity::hydrated(self.schema.clone())?),
        };
        entity.write()?.merge(props);
        Ok(entity)
    }

    /// Entities whose properties equal the given values. Instances already in
    /// the identity map are reused; others are hydrated but not registered.
    pub async fn select(&self, conditions: &[(&str, Value)]) -> Result<Vec<EntityRef>> {
        let mut predicate = Predicate::new();
        for (prop, value) in conditions {
            let meta = self.schema.property(prop).ok_or_else(|| {
                MapperError::UnknownProperty(self.schema.class_name().to_string(), prop.to_string())
            })?;
            let value = meta.store_value(meta.normalize_value(value.clone())?)?;
            predicate = predicate.eq(prop, self.storage.quote_identifier(prop), value);
        }

        let records = self.storage.fetch_all(self.collection(), &predicate).await?;
        debug!(class = self.schema.class_name(), found = records.len(), "select");

        let mut entities = Vec::with_capacity(records.len());
        for record in records {
            let registered = match self.record_identity(&record) {
                Some(id) => {
                    let id = self.schema.normalize_identity(&id)?;
                    self.identity_map.get(self.schema.class_name(), &id)?
                }
                None => None,
            };
            let entity = match registered {
                Some(entity) => entity,
                None => self.package(record, None)?,
            };
            entities.push(entity);
        }
        Ok(entities)
    }

    /// Raise `NullNotAllowed` for the first non-nullable property without a
    /// value. Fresh entities are checked in full, except for auto-increment
    /// keys; persisted ones only on their dirty properties.
    pub fn inspect_data(&self, entity: &Entity) -> Result<()> {
        let fresh = entity.is_fresh();
        let props: Vec<&str> = if fresh {
            self.schema.properties().iter().map(|meta| meta.name.as_str()).collect()
        } else {
            entity.dirty_props()
        };

        for prop in props {
            let Some(meta) = self.schema.property(prop) else {
                continue;
            };
            if meta.allow_null || (fresh && meta.auto_increment) || entity.is_set(prop) {
                continue;
            }
            return Err(MapperError::NullNotAllowed(
                self.schema.class_name().to_string(),
                prop.to_string(),
            ));
        }
        Ok(())
    }

    /// Primary-key predicate for `id`.
    pub fn predicate(&self, id: &Identity) -> Result<Predicate> {
        Predicate::for_identity(&self.schema, id, |name| self.storage.quote_identifier(name))
    }

    /// Registered instance for the lookup, together with the coerced
    /// identity it resolves to.
    pub(crate) fn lookup_registered(
        &self,
        target: Lookup,
    ) -> Result<(Identity, Option<EntityRef>)> {
        match target {
            Lookup::Entity(entity) => {
                let id = self.schema.normalize_identity(&entity.id()?)?;
                Ok((id, Some(entity)))
            }
            Lookup::Id(id) => {
                let id = self.schema.normalize_identity(&id)?;
                let registered = self.identity_map.get(self.schema.class_name(), &id)?;
                Ok((id, registered))
            }
        }
    }

    pub(crate) async fn fetch_record(&self, id: &Identity) -> Result<Option<Record>> {
        let predicate = self.predicate(id)?;
        self.storage.fetch_one(self.collection(), &predicate).await
    }

    /// Package and register.
    pub(crate) fn adopt(&self, record: Record, existing: Option<EntityRef>) -> Result<EntityRef> {
        let entity = self.package(record, existing)?;
        self.identity_map.set(&entity)?;
        Ok(entity)
    }

    fn check_writable(&self, entity: &Entity) -> Result<()> {
        if entity.is_readonly() {
            return Err(MapperError::ReadonlyViolation(format!(
                "{} is readonly",
                self.schema.class_name()
            )));
        }
        Ok(())
    }

    async fn insert(&self, entity: &EntityRef) -> Result<bool> {
        let record = {
            let mut guard = entity.write()?;
            guard.trigger(LifecycleEvent::BeforeInsert)?;
            self.inspect_data(&guard)?;
            self.props_to_record(guard.to_record(false))?
        };

        let collection = self.collection();
        if !self.storage.insert(collection, &record).await? {
            warn!(class = self.schema.class_name(), "insert refused by storage");
            return Ok(false);
        }

        let key_meta: Vec<(String, bool)> = self
            .schema
            .primary_key_meta()
            .map(|meta| (meta.name.clone(), meta.auto_increment))
            .collect();

        let mut keys = Record::new();
        for (name, auto_increment) in key_meta {
            let id = if auto_increment {
                self.storage.last_insert_id(collection, &name).await?
            } else {
                record.get(&name).cloned()
            };

            match id {
                Some(value) if !value.is_null() && !value.is_empty_text() => {
                    keys.insert(name, value);
                }
                _ => {
                    return Err(MapperError::RuntimeInconsistency(format!(
                        "{}: Insert record success, but get last-id failed",
                        self.schema.class_name()
                    )));
                }
            }
        }

        let keys = self.record_to_props(keys)?;
        let mut guard = entity.write()?;
        guard.merge(keys);
        let id = guard.id()?;
        debug!(class = self.schema.class_name(), id = %id, "inserted");
        guard.trigger(LifecycleEvent::AfterInsert)?;
        Ok(true)
    }

    async fn update(&self, entity: &EntityRef) -> Result<bool> {
        let (record, id) = {
            let mut guard = entity.write()?;
            guard.trigger(LifecycleEvent::BeforeUpdate)?;
            self.inspect_data(&guard)?;
            (self.props_to_record(guard.to_record(true))?, guard.id()?)
        };

        let predicate = self.predicate(&id)?;
        if !self.storage.update(self.collection(), &record, &predicate).await? {
            warn!(class = self.schema.class_name(), id = %id, "update refused by storage");
            return Ok(false);
        }
        debug!(class = self.schema.class_name(), id = %id, props = record.len(), "updated");

        let mut guard = entity.write()?;
        guard.merge(Record::new());
        guard.trigger(LifecycleEvent::AfterUpdate)?;
        Ok(true)
    }

    /// Storage form of every declared property present in `props`.
    fn props_to_record(&self, mut props: Record) -> Result<Record> {
        for meta in self.schema.properties() {
            if let Some(value) = props.remove(&meta.name) {
                let stored = if value.is_null() {
                    value
                } else {
                    meta.store_value(value)?
                };
                props.insert(meta.name.clone(), stored);
            }
        }
        Ok(props)
    }

    /// Entity form of a record. Undeclared columns are dropped.
    fn record_to_props(&self, mut record: Record) -> Result<Record> {
        let mut props = Record::new();
        for meta in self.schema.properties() {
            if let Some(value) = record.remove(&meta.name) {
                props.insert(meta.name.clone(), meta.restore_value(value)?);
            }
        }
        Ok(props)
    }

    fn record_identity(&self, record: &Record) -> Option<Identity> {
        let keys = self.schema.primary_key();
        if let [single] = keys {
            return record.get(single).cloned().map(Identity::Single);
        }
        let mut pairs = Vec::with_capacity(keys.len());
        for key in keys {
            pairs.push((key.clone(), record.get(key)?.clone()));
        }
        Some(Identity::Composite(pairs))
    }
}

#[async_trait]
impl DataMapper for Mapper {
    fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    async fn find(&self, target: Lookup, refresh: bool) -> Result<Option<EntityRef>> {
        let (id, registered) = self.lookup_registered(target)?;
        if registered.is_some() && !refresh {
            return Ok(registered);
        }

        let Some(record) = self.fetch_record(&id).await? else {
            debug!(class = self.schema.class_name(), id = %id, "not found");
            return Ok(None);
        };
        self.adopt(record, registered).map(Some)
    }

    async fn save(&self, entity: &EntityRef) -> Result<bool> {
        let fresh = {
            let mut guard = entity.write()?;
            self.check_writable(&guard)?;
            let fresh = guard.is_fresh();
            if !fresh && !guard.is_dirty() {
                return Ok(true);
            }
            guard.trigger(LifecycleEvent::BeforeSave)?;
            fresh
        };

        let saved = if fresh {
            self.insert(entity).await?
        } else {
            self.update(entity).await?
        };

        if saved {
            entity.write()?.trigger(LifecycleEvent::AfterSave)?;
        }
        Ok(saved)
    }

    async fn destroy(&self, entity: &EntityRef) -> Result<bool> {
        let id = {
            let mut guard = entity.write()?;
            self.check_writable(&guard)?;
            if guard.is_fresh() {
                return Ok(true);
            }
            guard.trigger(LifecycleEvent::BeforeDelete)?;
            guard.id()?
        };

        let predicate = self.predicate(&id)?;
        if !self.storage.delete(self.collection(), &predicate).await? {
            warn!(class = self.schema.class_name(), id = %id, "delete refused by storage");
            return Ok(false);
        }
        debug!(class = self.schema.class_name(), id = %id, "deleted");

        entity.write()?.trigger(LifecycleEvent::AfterDelete)?;
        self.identity_map.remove(self.schema.class_name(), &id)?;
        Ok(true)
    }

    async fn refresh(&self, entity: &EntityRef) -> Result<Option<EntityRef>> {
        if entity.is_fresh()? {
            return Ok(Some(entity.clone()));
        }
        self.find(Lookup::Entity(entity.clone()), true).await
    }
}

impl fmt::Debug for Mapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapper")
            .field("class", &self.schema.class_name())
            .field("collection", &self.schema.collection())
            .finish()
    }
}
