use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Name of the database used by the bug-tracker services.
pub const DEFAULT_DATABASE_NAME: &str = "bug-tracker";

/// A collection that must exist, along with the field that must be unique
/// across its documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub collection: String,
    pub unique_field: String,
}

impl CollectionSpec {
    pub fn new(collection: &str, unique_field: &str) -> Self {
        CollectionSpec {
            collection: collection.to_string(),
            unique_field: unique_field.to_string(),
        }
    }
}

/// The bug-tracker layout: users are unique by email, projects by name.
pub fn default_collection_specs() -> Vec<CollectionSpec> {
    vec![
        CollectionSpec::new("user", "email"),
        CollectionSpec::new("project", "name"),
    ]
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SpecError {
    #[error("database name must not be empty")]
    EmptyDatabaseName,
    #[error("at least one collection must be specified")]
    NoCollections,
    #[error("collection name at position {0} is empty")]
    EmptyCollectionName(usize),
    #[error("unique field for collection {0} is empty")]
    EmptyUniqueField(String),
    #[error("collection {0} is specified more than once")]
    DuplicateCollection(String),
}

/// Everything the bootstrapper needs to know: which database, and the
/// ordered list of collections with their unique field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapSpec {
    pub database: String,
    pub collections: Vec<CollectionSpec>,
}

impl Default for BootstrapSpec {
    fn default() -> Self {
        BootstrapSpec {
            database: DEFAULT_DATABASE_NAME.to_string(),
            collections: default_collection_specs(),
        }
    }
}

impl BootstrapSpec {
    pub fn new(database: &str, collections: Vec<CollectionSpec>) -> Self {
        BootstrapSpec {
            database: database.to_string(),
            collections,
        }
    }

    /// Check the input constraints before anything touches the database.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.database.trim().is_empty() {
            return Err(SpecError::EmptyDatabaseName);
        }
        if self.collections.is_empty() {
            return Err(SpecError::NoCollections);
        }
        let mut seen = HashSet::new();
        for (position, spec) in self.collections.iter().enumerate() {
            if spec.collection.trim().is_empty() {
                return Err(SpecError::EmptyCollectionName(position));
            }
            if spec.unique_field.trim().is_empty() {
                return Err(SpecError::EmptyUniqueField(spec.collection.clone()));
            }
            if !seen.insert(spec.collection.as_str()) {
                return Err(SpecError::DuplicateCollection(spec.collection.clone()));
            }
        }
        Ok(())
    }
}

/// Name MongoDB gives a single-field ascending index.
pub fn index_name(field: &str) -> String {
    format!("{}_1", field)
}
