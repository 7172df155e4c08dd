//! The database the bootstrapper talks to.
//!
//! The bootstrapper never reaches for an ambient connection: it is handed a
//! [`SchemaStore`] and every schema operation goes through it.
mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::{client_options, is_duplicate_key, MongoStore};

use async_trait::async_trait;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("could not reach the database: {0}")]
    Connection(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("collection {0} already exists")]
    AlreadyExists(String),
    #[error("existing documents in {collection} share a value for {field}: {message}")]
    ConstraintConflict {
        collection: String,
        field: String,
        message: String,
    },
    #[error("an index on {collection}.{field} already exists with different options: {message}")]
    IndexConflict {
        collection: String,
        field: String,
        message: String,
    },
    #[error("duplicate value for unique field {field} in {collection}")]
    DuplicateKey { collection: String, field: String },
    #[error("database error: {0}")]
    Backend(String),
}

/// Schema operations needed to bootstrap a database.
///
/// Implementations must make `create_unique_index` idempotent: declaring an
/// index identical to an existing one succeeds and returns its name.
/// `create_collection` may either succeed or return
/// [`StoreError::AlreadyExists`] when the collection is already there.
#[async_trait]
pub trait SchemaStore: Send + Sync {
    /// Round trip to the server, failing with [`StoreError::Connection`] if it
    /// cannot be reached.
    async fn ping(&self, database: &str) -> Result<(), StoreError>;

    async fn create_collection(&self, database: &str, collection: &str)
        -> Result<(), StoreError>;

    /// Create an ascending unique index on `field`, returning the index name.
    async fn create_unique_index(
        &self,
        database: &str,
        collection: &str,
        field: &str,
    ) -> Result<String, StoreError>;

    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>, StoreError>;

    /// Fields covered by a unique single-field index. Empty for a missing
    /// collection.
    async fn list_unique_fields(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Vec<String>, StoreError>;
}
