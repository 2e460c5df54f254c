//! Per-context registry of mappers and the registries they share.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::MapperConfig;
use crate::core::{MapperError, Result};
use crate::identity::{IdentityMap, normalize_class_name};
use crate::mapper::{CachingMapper, DataMapper, LruRecordCache, Mapper, RecordCache};
use crate::schema::{EntityClass, EntitySchema};
use crate::storage::StorageService;
use crate::types::TypeRegistry;

/// Owns one mapper per entity class together with the type registry and
/// identity map they share. Independent registries do not see each other's
/// entities.
pub struct MapperRegistry {
    config: MapperConfig,
    types: Arc<TypeRegistry>,
    identity_map: Arc<IdentityMap>,
    mappers: HashMap<String, Arc<dyn DataMapper>>,
}

impl MapperRegistry {
    pub fn new(config: MapperConfig) -> Result<Self> {
        let types = TypeRegistry::with_timestamp_format(config.timestamp_format.clone());
        Self::with_types(config, types)
    }

    /// Use a custom type registry instead of the built-ins.
    pub fn with_types(config: MapperConfig, types: TypeRegistry) -> Result<Self> {
        config.validate()?;

        let identity_map = IdentityMap::new();
        if !config.identity_map {
            identity_map.disable();
        }

        Ok(Self {
            config,
            types: Arc::new(types),
            identity_map: Arc::new(identity_map),
            mappers: HashMap::new(),
        })
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    pub fn identity_map(&self) -> &Arc<IdentityMap> {
        &self.identity_map
    }

    /// Normalize the class metadata and register a plain mapper for it.
    pub fn register(
        &mut self,
        class: &EntityClass,
        storage: Arc<dyn StorageService>,
    ) -> Result<Arc<Mapper>> {
        let mapper = Arc::new(self.build(class, storage)?);
        self.insert(class.name(), mapper.clone());
        Ok(mapper)
    }

    /// Register a caching mapper. Without an explicit cache, an LRU cache of
    /// the configured capacity is created.
    pub fn register_cached(
        &mut self,
        class: &EntityClass,
        storage: Arc<dyn StorageService>,
        cache: Option<Arc<dyn RecordCache>>,
    ) -> Result<Arc<CachingMapper>> {
        let inner = Arc::new(self.build(class, storage)?);
        let cache: Arc<dyn RecordCache> = match cache {
            Some(cache) => cache,
            None => Arc::new(LruRecordCache::new(self.config.cache_capacity)),
        };
        let mapper =
            Arc::new(CachingMapper::new(inner, cache).with_prefix(&self.config.cache_prefix));
        self.insert(class.name(), mapper.clone());
        Ok(mapper)
    }

    pub fn mapper(&self, class: &str) -> Result<Arc<dyn DataMapper>> {
        self.mappers
            .get(&normalize_class_name(class))
            .cloned()
            .ok_or_else(|| MapperError::UnknownClass(class.to_string()))
    }

    pub fn contains(&self, class: &str) -> bool {
        self.mappers.contains_key(&normalize_class_name(class))
    }

    /// Normalized names of the registered classes.
    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.mappers.keys().cloned().collect();
        names.sort();
        names
    }

    fn build(&self, class: &EntityClass, storage: Arc<dyn StorageService>) -> Result<Mapper> {
        if self.contains(class.name()) {
            return Err(MapperError::InvalidSchema(format!(
                "{} is already registered",
                class.name()
            )));
        }

        let schema = EntitySchema::build(class, &self.types)?;
        debug!(
            class = class.name(),
            collection = schema.collection(),
            properties = schema.properties().len(),
            "mapper registered"
        );
        Ok(Mapper::new(
            Arc::new(schema),
            storage,
            self.identity_map.clone(),
        ))
    }

    fn insert(&mut self, class: &str, mapper: Arc<dyn DataMapper>) {
        self.mappers.insert(normalize_class_name(class), mapper);
    }
}

impl fmt::Debug for MapperRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapperRegistry")
            .field("config", &self.config)
            .field("classes", &self.class_names())
            .field("identity_map", &self.identity_map)
            .finish()
    }
}
