// ============================================================================
// rowmapper Library
// ============================================================================

//! Data mapper between typed entities and flat storage records.
//!
//! Entity classes are declared as property tables ([`EntityClass`]), normalized
//! once into an [`EntitySchema`] when registered with a [`MapperRegistry`], and
//! persisted through a [`StorageService`]. Hydrated entities are kept in an
//! [`IdentityMap`] so repeated lookups return the same instance.
//!
//! ```
//! use std::sync::Arc;
//! use rowmapper::{
//!     DataMapper, EntityClass, InMemoryStorage, MapperConfig, MapperRegistry, PropertyDef, Record,
//!     Value,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> rowmapper::Result<()> {
//! let mut storage = InMemoryStorage::new();
//! storage.create_collection("users", Some("id"))?;
//!
//! let user = EntityClass::new("User")
//!     .collection("users")
//!     .property("id", PropertyDef::new("integer").primary_key().auto_increment())
//!     .property("name", PropertyDef::new("string"));
//!
//! let mut registry = MapperRegistry::new(MapperConfig::default())?;
//! let users = registry.register(&user, Arc::new(storage))?;
//!
//! let alice = users.create(Record::from([("name".to_string(), Value::from("alice"))]))?;
//! assert!(users.save(&alice).await?);
//! assert_eq!(alice.get("id")?, Value::Integer(1));
//!
//! let found = users.find(1.into(), false).await?.unwrap();
//! assert_eq!(found.get("name")?, Value::from("alice"));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod entity;
pub mod identity;
pub mod mapper;
pub mod registry;
pub mod schema;
pub mod storage;
pub mod types;

// Re-export main types for convenience
pub use crate::core::{MapperError, Result, Value};
pub use config::MapperConfig;
pub use entity::events::{EntityHooks, LifecycleEvent, Listener, Listeners};
pub use entity::{Entity, EntityRef};
pub use identity::{Identity, IdentityMap};
pub use mapper::{
    CachingMapper, DataMapper, Lookup, LruRecordCache, Mapper, Predicate, RecordCache,
};
pub use registry::MapperRegistry;
pub use schema::{EntityClass, EntitySchema, PropertyDef, PropertyMeta};
pub use storage::{InMemoryStorage, Record, StorageService};
pub use types::{TypeRegistry, TypeStrategy};
