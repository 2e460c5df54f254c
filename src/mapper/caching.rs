//! Read-through record cache in front of a [`Mapper`].

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lru::LruCache;
use tracing::{debug, trace};

use super::{DataMapper, Lookup, Mapper};
use crate::core::{MapperError, Result};
use crate::entity::EntityRef;
use crate::identity::{Identity, IdentityMap, identity_key};
use crate::schema::EntitySchema;
use crate::storage::Record;

/// Key/record store used by [`CachingMapper`].
#[async_trait]
pub trait RecordCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Record>>;

    async fn put(&self, key: &str, record: Record) -> Result<()>;

    /// True when an entry was removed.
    async fn delete(&self, key: &str) -> Result<bool>;
}

/// In-process cache with least-recently-used eviction.
pub struct LruRecordCache {
    entries: Mutex<LruCache<String, Record>>,
}

impl LruRecordCache {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains(key))
            .unwrap_or(false)
    }
}

#[async_trait]
impl RecordCache for LruRecordCache {
    async fn get(&self, key: &str) -> Result<Option<Record>> {
        Ok(self.entries.lock()?.get(key).cloned())
    }

    async fn put(&self, key: &str, record: Record) -> Result<()> {
        self.entries.lock()?.put(key.to_string(), record);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.lock()?.pop(key).is_some())
    }
}

/// JSON text of a record, for caches that hold bytes.
pub fn encode_record(record: &Record) -> Result<String> {
    serde_json::to_string(record).map_err(|err| MapperError::Cache(err.to_string()))
}

pub fn decode_record(text: &str) -> Result<Record> {
    serde_json::from_str(text).map_err(|err| MapperError::Cache(err.to_string()))
}

/// Mapper whose `find` consults a record cache before storage.
///
/// Cached records carry no null columns, so they hydrate like a partial
/// record. Writes go to the wrapped mapper and drop the entry afterwards.
pub struct CachingMapper {
    inner: Arc<Mapper>,
    cache: Arc<dyn RecordCache>,
    prefix: String,
}

impl CachingMapper {
    pub fn new(inner: Arc<Mapper>, cache: Arc<dyn RecordCache>) -> Self {
        Self {
            inner,
            cache,
            prefix: String::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    pub fn inner(&self) -> &Arc<Mapper> {
        &self.inner
    }

    pub fn cache(&self) -> &Arc<dyn RecordCache> {
        &self.cache
    }

    pub fn identity_map(&self) -> &Arc<IdentityMap> {
        self.inner.identity_map()
    }

    /// `<prefix><class>@<identity key>`, built from the coerced identity.
    pub fn cache_key(&self, id: &Identity) -> Result<String> {
        let schema = self.inner.schema();
        let id = schema.normalize_identity(id)?;
        Ok(format!("{}{}", self.prefix, identity_key(schema.class_name(), &id)))
    }

    async fn cached_record(&self, id: &Identity) -> Result<Option<Record>> {
        let key = self.cache_key(id)?;
        if let Some(record) = self.cache.get(&key).await? {
            trace!(key = %key, "cache hit");
            return Ok(Some(record));
        }

        let Some(record) = self.inner.fetch_record(id).await? else {
            return Ok(None);
        };

        let cached: Record = record
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.cache.put(&key, cached).await?;
        trace!(key = %key, "cache fill");

        Ok(Some(record))
    }

    async fn invalidate(&self, id: &Identity) -> Result<()> {
        let key = self.cache_key(id)?;
        if self.cache.delete(&key).await? {
            debug!(key = %key, "cache invalidated");
        }
        Ok(())
    }
}

#[async_trait]
impl DataMapper for CachingMapper {
    fn schema(&self) -> &Arc<EntitySchema> {
        self.inner.schema()
    }

    async fn find(&self, target: Lookup, refresh: bool) -> Result<Option<EntityRef>> {
        let (id, registered) = self.inner.lookup_registered(target)?;
        if registered.is_some() && !refresh {
            return Ok(registered);
        }

        match self.cached_record(&id).await? {
            Some(record) => self.inner.adopt(record, registered).map(Some),
            None => Ok(None),
        }
    }

    async fn save(&self, entity: &EntityRef) -> Result<bool> {
        let persisted = !entity.is_fresh()?;
        let id = entity.id()?;

        let result = self.inner.save(entity).await;
        // the write may have reached storage before an after-hook failed
        if persisted && !matches!(result, Ok(false)) {
            self.invalidate(&id).await?;
        }
        result
    }

    async fn destroy(&self, entity: &EntityRef) -> Result<bool> {
        let persisted = !entity.is_fresh()?;
        let id = entity.id()?;

        let result = self.inner.destroy(entity).await;
        if persisted && !matches!(result, Ok(false)) {
            self.invalidate(&id).await?;
        }
        result
    }

    async fn refresh(&self, entity: &EntityRef) -> Result<Option<EntityRef>> {
        if entity.is_fresh()? {
            return Ok(Some(entity.clone()));
        }
        self.invalidate(&entity.id()?).await?;
        self.find(Lookup::Entity(entity.clone()), true).await
    }
}

impl fmt::Debug for CachingMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingMapper")
            .field("inner", &self.inner)
            .field("prefix", &self.prefix)
            .finish()
    }
}
