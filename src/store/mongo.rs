use crate::{
    conf::DatabaseConfig,
    store::{SchemaStore, StoreError},
    utils::o11y::logging::as_error,
};

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Document},
    error::{Error, ErrorKind, WriteFailure},
    options::{ClientOptions, IndexOptions},
    Client, Collection, IndexModel,
};
use tracing::{debug, instrument};

// Server error codes we act on.
const UNAUTHORIZED: i32 = 13;
const AUTHENTICATION_FAILED: i32 = 18;
const NAMESPACE_NOT_FOUND: i32 = 26;
const NAMESPACE_EXISTS: i32 = 48;
const INDEX_OPTIONS_CONFLICT: i32 = 85;
const INDEX_KEY_SPECS_CONFLICT: i32 = 86;
const ATLAS_ERROR: i32 = 8000;
const DUPLICATE_KEY: i32 = 11000;

fn error_code(error: &Error) -> Option<i32> {
    match error.kind.as_ref() {
        ErrorKind::Command(command_error) => Some(command_error.code),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => Some(write_error.code),
        _ => None,
    }
}

/// Whether the error is a unique index rejecting a write.
pub fn is_duplicate_key(error: &Error) -> bool {
    error_code(error) == Some(DUPLICATE_KEY)
}

/// Map the errors every operation can run into: unreachable server and
/// missing privileges. Anything else ends up as `Backend`.
fn classify(error: Error) -> StoreError {
    match error.kind.as_ref() {
        ErrorKind::ServerSelection { .. }
        | ErrorKind::Io(_)
        | ErrorKind::DnsResolve { .. }
        | ErrorKind::ConnectionPoolCleared { .. } => StoreError::Connection(error.to_string()),
        ErrorKind::Authentication { .. } => StoreError::Permission(error.to_string()),
        _ => match error_code(&error) {
            Some(UNAUTHORIZED | AUTHENTICATION_FAILED | ATLAS_ERROR) => {
                StoreError::Permission(error.to_string())
            }
            _ => StoreError::Backend(error.to_string()),
        },
    }
}

/// Client options for the configured deployment, credentials included.
pub async fn client_options(config: &DatabaseConfig) -> Result<ClientOptions, StoreError> {
    let mut options = ClientOptions::parse(config.uri())
        .await
        .inspect_err(as_error!("invalid mongodb connection string"))
        .map_err(classify)?;
    options.credential = config.credential();
    Ok(options)
}

/// A MongoDB deployment reached through a single client.
///
/// The client owns a connection pool; call [`MongoStore::shutdown`] once done
/// so the pool is released before the process exits.
pub struct MongoStore {
    client: Client,
}

impl MongoStore {
    #[instrument(skip_all, fields(host = %config.host, port = config.port), err)]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let options = client_options(config).await?;
        let client = Client::with_options(options)
            .inspect_err(as_error!("failed to create mongodb client"))
            .map_err(classify)?;
        Ok(MongoStore { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn shutdown(self) {
        self.client.shutdown().await;
    }

    fn collection(&self, database: &str, collection: &str) -> Collection<Document> {
        self.client.database(database).collection(collection)
    }
}

#[async_trait]
impl SchemaStore for MongoStore {
    #[instrument(skip(self), err)]
    async fn ping(&self, database: &str) -> Result<(), StoreError> {
        self.client
            .database(database)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(classify)?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn create_collection(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<(), StoreError> {
        match self.client.database(database).create_collection(collection).await {
            Ok(()) => Ok(()),
            Err(error) if error_code(&error) == Some(NAMESPACE_EXISTS) => {
                Err(StoreError::AlreadyExists(collection.to_string()))
            }
            Err(error) => Err(classify(error)),
        }
    }

    #[instrument(skip(self), err)]
    async fn create_unique_index(
        &self,
        database: &str,
        collection: &str,
        field: &str,
    ) -> Result<String, StoreError> {
        let index_model = IndexModel::builder()
            .keys(doc! { field: 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        match self
            .collection(database, collection)
            .create_index(index_model)
            .await
        {
            Ok(result) => {
                debug!(index = %result.index_name, "unique index in place");
                Ok(result.index_name)
            }
            Err(error) => match error_code(&error) {
                Some(DUPLICATE_KEY) => Err(StoreError::ConstraintConflict {
                    collection: collection.to_string(),
                    field: field.to_string(),
                    message: error.to_string(),
                }),
                Some(INDEX_OPTIONS_CONFLICT | INDEX_KEY_SPECS_CONFLICT) => {
                    Err(StoreError::IndexConflict {
                        collection: collection.to_string(),
                        field: field.to_string(),
                        message: error.to_string(),
                    })
                }
                _ => Err(classify(error)),
            },
        }
    }

    #[instrument(skip(self), err)]
    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>, StoreError> {
        self.client
            .database(database)
            .list_collection_names()
            .await
            .map_err(classify)
    }

    #[instrument(skip(self), err)]
    async fn list_unique_fields(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Vec<String>, StoreError> {
        let cursor = match self.collection(database, collection).list_indexes().await {
            Ok(cursor) => cursor,
            Err(error) if error_code(&error) == Some(NAMESPACE_NOT_FOUND) => {
                return Ok(Vec::new());
            }
            Err(error) => return Err(classify(error)),
        };
        let indexes: Vec<IndexModel> = cursor.try_collect().await.map_err(classify)?;

        let fields = indexes
            .into_iter()
            .filter(|index| {
                index
                    .options
                    .as_ref()
                    .and_then(|options| options.unique)
                    .unwrap_or(false)
            })
            .filter(|index| index.keys.len() == 1)
            .filter_map(|index| index.keys.keys().next().cloned())
            .collect();
        Ok(fields)
    }
}
