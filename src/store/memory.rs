use crate::{
    schema::index_name,
    store::{SchemaStore, StoreError},
};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};

#[derive(Debug, Default)]
struct MemoryCollection {
    documents: Vec<Document>,
    unique_fields: BTreeSet<String>,
}

impl MemoryCollection {
    // a missing field is indexed as null, same as MongoDB does
    fn value_of<'a>(document: &'a Document, field: &str) -> &'a Bson {
        document.get(field).unwrap_or(&Bson::Null)
    }

    fn has_duplicates(&self, field: &str) -> bool {
        let mut seen: Vec<&Bson> = Vec::with_capacity(self.documents.len());
        for document in &self.documents {
            let value = Self::value_of(document, field);
            if seen.contains(&value) {
                return true;
            }
            seen.push(value);
        }
        false
    }

    fn violated_field(&self, candidate: &Document) -> Option<&String> {
        self.unique_fields.iter().find(|field| {
            let value = Self::value_of(candidate, field);
            self.documents
                .iter()
                .any(|document| Self::value_of(document, field) == value)
        })
    }
}

type Databases = HashMap<String, BTreeMap<String, MemoryCollection>>;

/// An in-process stand-in for a MongoDB deployment.
///
/// Mirrors the behaviors the bootstrapper depends on: unique indexes reject
/// duplicate inserts, building a unique index over colliding documents fails,
/// and re-creating a collection reports `AlreadyExists` unless the store is
/// built with [`MemoryStore::tolerating_recreate`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    databases: Mutex<Databases>,
    unreachable: AtomicBool,
    // writes left before the connection drops, `None` means no limit
    write_budget: Mutex<Option<usize>>,
    read_only: bool,
    tolerate_recreate: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation fails as if the server could not be reached.
    pub fn unreachable(self) -> Self {
        self.disconnect();
        self
    }

    /// Accept `writes` writes, then behave as if the server went away.
    pub fn disconnect_after_writes(self, writes: usize) -> Self {
        *self.write_budget() = Some(writes);
        self
    }

    /// Drop the connection: from now on every operation fails.
    pub fn disconnect(&self) {
        self.unreachable.store(true, Ordering::SeqCst);
    }

    /// Bring the connection back, with no limit on further writes.
    pub fn reconnect(&self) {
        *self.write_budget() = None;
        self.unreachable.store(false, Ordering::SeqCst);
    }

    /// Reads succeed, any write is rejected as a permission error.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Creating an existing collection succeeds instead of erroring.
    pub fn tolerating_recreate(mut self) -> Self {
        self.tolerate_recreate = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Databases> {
        self.databases.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_budget(&self) -> MutexGuard<'_, Option<usize>> {
        self.write_budget
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn check_reachable(&self) -> Result<(), StoreError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Connection(
                "no server available at memory://".to_string(),
            ));
        }
        Ok(())
    }

    fn spend_write(&self) -> Result<(), StoreError> {
        let mut budget = self.write_budget();
        match *budget {
            Some(0) => {
                self.disconnect();
                Err(StoreError::Connection(
                    "connection to memory:// closed".to_string(),
                ))
            }
            Some(ref mut remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn check_writable(&self, action: &str, target: &str) -> Result<(), StoreError> {
        self.check_reachable()?;
        if self.read_only {
            return Err(StoreError::Permission(format!(
                "not authorized to {} on {}",
                action, target
            )));
        }
        self.spend_write()
    }

    /// Insert a document, creating the collection on first use.
    pub fn insert(
        &self,
        database: &str,
        collection: &str,
        document: Document,
    ) -> Result<(), StoreError> {
        self.check_writable("insert", collection)?;
        let mut databases = self.lock();
        let entry = databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();
        if let Some(field) = entry.violated_field(&document) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                field: field.clone(),
            });
        }
        entry.documents.push(document);
        Ok(())
    }

    pub fn document_count(&self, database: &str, collection: &str) -> usize {
        self.lock()
            .get(database)
            .and_then(|collections| collections.get(collection))
            .map(|entry| entry.documents.len())
            .unwrap_or(0)
    }

    /// Schema of a database: each collection with its unique fields.
    pub fn snapshot(&self, database: &str) -> BTreeMap<String, BTreeSet<String>> {
        self.lock()
            .get(database)
            .map(|collections| {
                collections
                    .iter()
                    .map(|(name, entry)| (name.clone(), entry.unique_fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl SchemaStore for MemoryStore {
    async fn ping(&self, _database: &str) -> Result<(), StoreError> {
        self.check_reachable()
    }

    async fn create_collection(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<(), StoreError> {
        self.check_writable("create", collection)?;
        let mut databases = self.lock();
        let collections = databases.entry(database.to_string()).or_default();
        if collections.contains_key(collection) {
            if self.tolerate_recreate {
                return Ok(());
            }
            return Err(StoreError::AlreadyExists(collection.to_string()));
        }
        collections.insert(collection.to_string(), MemoryCollection::default());
        Ok(())
    }

    async fn create_unique_index(
        &self,
        database: &str,
        collection: &str,
        field: &str,
    ) -> Result<String, StoreError> {
        self.check_writable("createIndex", collection)?;
        let mut databases = self.lock();
        let entry = databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();
        if !entry.unique_fields.contains(field) {
            if entry.has_duplicates(field) {
                return Err(StoreError::ConstraintConflict {
                    collection: collection.to_string(),
                    field: field.to_string(),
                    message: format!("duplicate key in {}.{}", collection, field),
                });
            }
            entry.unique_fields.insert(field.to_string());
        }
        Ok(index_name(field))
    }

    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>, StoreError> {
        self.check_reachable()?;
        Ok(self
            .lock()
            .get(database)
            .map(|collections| collections.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_unique_fields(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Vec<String>, StoreError> {
        self.check_reachable()?;
        Ok(self
            .lock()
            .get(database)
            .and_then(|collections| collections.get(collection))
            .map(|entry| entry.unique_fields.iter().cloned().collect())
            .unwrap_or_default())
    }
}
