//! Idempotent schema bootstrapping.
//!
//! [`bootstrap`] makes sure every collection of a [`BootstrapSpec`] exists and
//! carries a unique index on its field. Running it again against a database
//! it already bootstrapped changes nothing. [`verify`] answers the same
//! question without writing anything.
use crate::{
    schema::{BootstrapSpec, CollectionSpec, SpecError},
    store::{SchemaStore, StoreError},
};

use serde::Serialize;
use tracing::{debug, info, instrument};

const BANNER: &str = "############################# INIT Script ####################################";

/// The step that was running when the bootstrap stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Ping { database: String },
    CreateCollection { collection: String },
    CreateUniqueIndex { collection: String, field: String },
    ListCollections { database: String },
    ListIndexes { collection: String },
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Ping { database } => write!(f, "reach database '{}'", database),
            Operation::CreateCollection { collection } => {
                write!(f, "create collection '{}'", collection)
            }
            Operation::CreateUniqueIndex { collection, field } => {
                write!(f, "create unique index on '{}.{}'", collection, field)
            }
            Operation::ListCollections { database } => {
                write!(f, "list collections of '{}'", database)
            }
            Operation::ListIndexes { collection } => {
                write!(f, "list indexes of '{}'", collection)
            }
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum BootstrapError {
    #[error("invalid bootstrap spec")]
    InvalidSpec(#[from] SpecError),
    #[error("failed to {operation}")]
    Store {
        operation: Operation,
        #[source]
        source: StoreError,
    },
}

impl BootstrapError {
    fn store(operation: Operation) -> impl FnOnce(StoreError) -> BootstrapError {
        move |source| BootstrapError::Store { operation, source }
    }

    /// The underlying store error, if the failure came from the database.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            BootstrapError::Store { source, .. } => Some(source),
            BootstrapError::InvalidSpec(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionOutcome {
    pub collection: String,
    /// `false` when the collection was already there before this run.
    pub created: bool,
    pub unique_field: String,
    pub index_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub database: String,
    pub collections: Vec<CollectionOutcome>,
}

/// Create the collection, treating an existing one as success.
///
/// Returns whether this call created it.
async fn ensure_collection<S: SchemaStore + ?Sized>(
    store: &S,
    database: &str,
    collection: &str,
) -> Result<bool, StoreError> {
    match store.create_collection(database, collection).await {
        Ok(()) => Ok(true),
        Err(StoreError::AlreadyExists(_)) => {
            debug!(collection, "collection already exists");
            Ok(false)
        }
        Err(error) => Err(error),
    }
}

#[instrument(skip(store, spec), fields(collection = %spec.collection, field = %spec.unique_field), err)]
async fn ensure_collection_spec<S: SchemaStore + ?Sized>(
    store: &S,
    database: &str,
    spec: &CollectionSpec,
) -> Result<CollectionOutcome, BootstrapError> {
    let created = ensure_collection(store, database, &spec.collection)
        .await
        .map_err(BootstrapError::store(Operation::CreateCollection {
            collection: spec.collection.clone(),
        }))?;

    let index_name = store
        .create_unique_index(database, &spec.collection, &spec.unique_field)
        .await
        .map_err(BootstrapError::store(Operation::CreateUniqueIndex {
            collection: spec.collection.clone(),
            field: spec.unique_field.clone(),
        }))?;

    info!(created, index = %index_name, "collection ready");
    Ok(CollectionOutcome {
        collection: spec.collection.clone(),
        created,
        unique_field: spec.unique_field.clone(),
        index_name,
    })
}

/// Ensure every collection in `spec` exists with its unique index.
///
/// The spec is validated before the store is touched, then the store is
/// pinged so that an unreachable server fails before anything is created.
/// The first error other than an already existing collection aborts the run.
#[instrument(skip_all, fields(database = %spec.database), err)]
pub async fn bootstrap<S: SchemaStore + ?Sized>(
    store: &S,
    spec: &BootstrapSpec,
) -> Result<BootstrapReport, BootstrapError> {
    spec.validate()?;
    info!("{}", BANNER);

    store
        .ping(&spec.database)
        .await
        .map_err(BootstrapError::store(Operation::Ping {
            database: spec.database.clone(),
        }))?;

    let mut collections = Vec::with_capacity(spec.collections.len());
    for collection_spec in &spec.collections {
        collections.push(ensure_collection_spec(store, &spec.database, collection_spec).await?);
    }

    info!("{}", BANNER);
    Ok(BootstrapReport {
        database: spec.database.clone(),
        collections,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub database: String,
    pub missing_collections: Vec<String>,
    pub missing_constraints: Vec<CollectionSpec>,
}

impl VerifyReport {
    pub fn is_complete(&self) -> bool {
        self.missing_collections.is_empty() && self.missing_constraints.is_empty()
    }
}

/// Report which collections and unique constraints of `spec` are missing.
/// Read-only.
#[instrument(skip_all, fields(database = %spec.database), err)]
pub async fn verify<S: SchemaStore + ?Sized>(
    store: &S,
    spec: &BootstrapSpec,
) -> Result<VerifyReport, BootstrapError> {
    spec.validate()?;

    let existing = store
        .list_collection_names(&spec.database)
        .await
        .map_err(BootstrapError::store(Operation::ListCollections {
            database: spec.database.clone(),
        }))?;

    let mut report = VerifyReport {
        database: spec.database.clone(),
        ..VerifyReport::default()
    };
    for collection_spec in &spec.collections {
        if !existing.contains(&collection_spec.collection) {
            report
                .missing_collections
                .push(collection_spec.collection.clone());
            report.missing_constraints.push(collection_spec.clone());
            continue;
        }
        let unique_fields = store
            .list_unique_fields(&spec.database, &collection_spec.collection)
            .await
            .map_err(BootstrapError::store(Operation::ListIndexes {
                collection: collection_spec.collection.clone(),
            }))?;
        if !unique_fields.contains(&collection_spec.unique_field) {
            report.missing_constraints.push(collection_spec.clone());
        }
    }

    info!(complete = report.is_complete(), "verified schema");
    Ok(report)
}
