use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use super::{Record, StorageService};
use crate::core::{MapperError, Result, Value};
use crate::mapper::predicate::Predicate;

/// One named set of records.
#[derive(Debug, Clone)]
pub struct Collection {
    name: String,
    auto_key: Option<String>,
    next_id: i64,
    last_id: Option<Value>,
    rows: Vec<Record>,
}

impl Collection {
    fn new(name: &str, auto_key: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            auto_key: auto_key.map(str::to_string),
            next_id: 1,
            last_id: None,
            rows: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Assign the auto key when missing, then append. A duplicate auto key
    /// refuses the insert.
    fn insert(&mut self, mut record: Record) -> bool {
        if let Some(key) = self.auto_key.clone() {
            let id = match record.get(&key) {
                Some(value) if !value.is_null() => value.clone(),
                _ => {
                    let id = Value::Integer(self.next_id);
                    record.insert(key.clone(), id.clone());
                    id
                }
            };

            if self.rows.iter().any(|row| row.get(&key) == Some(&id)) {
                return false;
            }
            if let Some(n) = id.as_i64() {
                self.next_id = self.next_id.max(n + 1);
            }
            self.last_id = Some(id);
        }

        self.rows.push(record);
        true
    }

    fn update(&mut self, record: &Record, predicate: &Predicate) -> usize {
        let mut affected = 0;
        for row in self.rows.iter_mut().filter(|row| predicate.matches(row)) {
            row.extend(record.iter().map(|(k, v)| (k.clone(), v.clone())));
            affected += 1;
        }
        affected
    }

    fn delete(&mut self, predicate: &Predicate) -> usize {
        let before = self.rows.len();
        self.rows.retain(|row| !predicate.matches(row));
        before - self.rows.len()
    }
}

/// Operation counters.
#[derive(Debug, Default)]
pub struct StorageStats {
    fetches: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
}

impl StorageStats {
    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Inserts, updates and deletes.
    pub fn writes(&self) -> u64 {
        self.inserts() + self.updates() + self.deletes()
    }
}

/// Storage service keeping every collection in process memory.
pub struct InMemoryStorage {
    /// Collections with individual locks
    collections: HashMap<String, Arc<RwLock<Collection>>>,
    stats: StorageStats,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            collections: HashMap::new(),
            stats: StorageStats::default(),
        }
    }

    /// Create a collection, optionally with an auto-increment key column.
    pub fn create_collection(&mut self, name: &str, auto_key: Option<&str>) -> Result<()> {
        if self.collections.contains_key(name) {
            return Err(MapperError::Storage(format!("Collection '{}' already exists", name)));
        }

        let collection = Arc::new(RwLock::new(Collection::new(name, auto_key)));
        self.collections.insert(name.to_string(), collection);
        Ok(())
    }

    pub fn drop_collection(&mut self, name: &str) -> Result<()> {
        if self.collections.remove(name).is_none() {
            return Err(not_found(name));
        }
        Ok(())
    }

    pub fn get_collection(&self, name: &str) -> Result<Arc<RwLock<Collection>>> {
        self.collections
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    pub fn collection_exists(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    pub fn list_collections(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    pub async fn row_count(&self, name: &str) -> Result<usize> {
        let handle = self.get_collection(name)?;
        let collection = handle.read().await;
        Ok(collection.len())
    }

    /// Every record of a collection, in insertion order.
    pub async fn scan(&self, name: &str) -> Result<Vec<Record>> {
        let handle = self.get_collection(name)?;
        let collection = handle.read().await;
        Ok(collection.rows.clone())
    }

    pub fn stats(&self) -> &StorageStats {
        &self.stats
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageService for InMemoryStorage {
    async fn fetch_one(&self, collection: &str, predicate: &Predicate) -> Result<Option<Record>> {
        self.stats.fetches.fetch_add(1, Ordering::Relaxed);
        let handle = self.get_collection(collection)?;
        let table = handle.read().await;
        Ok(table.rows.iter().find(|row| predicate.matches(row)).cloned())
    }

    async fn fetch_all(&self, collection: &str, predicate: &Predicate) -> Result<Vec<Record>> {
        self.stats.fetches.fetch_add(1, Ordering::Relaxed);
        let handle = self.get_collection(collection)?;
        let table = handle.read().await;
        Ok(table
            .rows
            .iter()
            .filter(|row| predicate.matches(row))
            .cloned()
            .collect())
    }

    async fn insert(&self, collection: &str, record: &Record) -> Result<bool> {
        self.stats.inserts.fetch_add(1, Ordering::Relaxed);
        let handle = self.get_collection(collection)?;
        let mut table = handle.write().await;
        let inserted = table.insert(record.clone());
        trace!(collection, inserted, "insert");
        Ok(inserted)
    }

    async fn last_insert_id(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        let handle = self.get_collection(collection)?;
        let table = handle.read().await;
        if table.auto_key.as_deref() != Some(key) {
            return Ok(None);
        }
        Ok(table.last_id.clone())
    }

    async fn update(
        &self,
        collection: &str,
        record: &Record,
        predicate: &Predicate,
    ) -> Result<bool> {
        self.stats.updates.fetch_add(1, Ordering::Relaxed);
        let handle = self.get_collection(collection)?;
        let mut table = handle.write().await;
        let affected = table.update(record, predicate);
        trace!(collection, affected, where_clause = %predicate, "update");
        Ok(affected > 0)
    }

    async fn delete(&self, collection: &str, predicate: &Predicate) -> Result<bool> {
        self.stats.deletes.fetch_add(1, Ordering::Relaxed);
        let handle = self.get_collection(collection)?;
        let mut table = handle.write().await;
        let affected = table.delete(predicate);
        trace!(collection, affected, where_clause = %predicate, "delete");
        Ok(affected > 0)
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

fn not_found(name: &str) -> MapperError {
    MapperError::Storage(format!("Collection '{}' not found", name))
}
