// Utilities for the integration tests
use crate::{
    conf::{AppConfig, BootstrapConfigError},
    schema::{default_collection_specs, BootstrapSpec},
    store::{MongoStore, StoreError},
};

pub const TEST_CONFIG_FILE: &str = "tests/config.test.yaml";

#[derive(thiserror::Error, Debug)]
pub enum TestStoreError {
    #[error("could not load test config")]
    Config(#[from] BootstrapConfigError),
    #[error("could not connect to test database")]
    Store(#[from] StoreError),
}

/// Connect to the MongoDB deployment described by the test config.
pub async fn test_store() -> Result<(AppConfig, MongoStore), TestStoreError> {
    let config = AppConfig::from_test_config()?;
    let store = MongoStore::connect(&config.database).await?;
    Ok((config, store))
}

/// A bootstrap spec for the default layout in a database nobody else uses,
/// so tests can run side by side and start from an empty database.
pub fn scratch_spec() -> BootstrapSpec {
    let database = format!("bug-tracker-test-{}", uuid::Uuid::new_v4().simple());
    BootstrapSpec::new(&database, default_collection_specs())
}

// drops a scratch database created by a test
pub async fn drop_database(store: &MongoStore, database: &str) -> mongodb::error::Result<()> {
    store.client().database(database).drop().await
}
