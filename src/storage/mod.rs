//! Backing-store boundary consumed by the mapper.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::core::{MapperError, Result, Value};
use crate::mapper::predicate::Predicate;

pub use memory::{InMemoryStorage, StorageStats};

/// Flat storage-side row: property name to storage value.
pub type Record = BTreeMap<String, Value>;

/// Minimal surface a backing store has to offer.
///
/// `false` from a write means "not performed" and is reported to the caller
/// as such. `Err` is reserved for failures of the store itself.
#[async_trait]
pub trait StorageService: Send + Sync {
    async fn fetch_one(&self, collection: &str, predicate: &Predicate) -> Result<Option<Record>>;

    async fn fetch_all(&self, collection: &str, _predicate: &Predicate) -> Result<Vec<Record>> {
        Err(MapperError::Unsupported(format!(
            "listing records of {} is not supported by this storage",
            collection
        )))
    }

    async fn insert(&self, collection: &str, record: &Record) -> Result<bool>;

    /// Key generated by the last successful insert into `collection`.
    async fn last_insert_id(&self, collection: &str, key: &str) -> Result<Option<Value>>;

    async fn update(
        &self,
        collection: &str,
        record: &Record,
        predicate: &Predicate,
    ) -> Result<bool>;

    async fn delete(&self, collection: &str, predicate: &Predicate) -> Result<bool>;

    fn quote_identifier(&self, name: &str) -> String;
}
