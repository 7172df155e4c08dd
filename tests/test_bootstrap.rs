use bugtracker_init::{
    bootstrap::{bootstrap, verify, BootstrapError, Operation},
    schema::{BootstrapSpec, CollectionSpec},
    store::{MemoryStore, SchemaStore, StoreError},
};
use mongodb::bson::doc;
use std::collections::BTreeSet;
use std::sync::Arc;

const DB: &str = "bug-tracker";

fn fields(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

#[tokio::test]
async fn test_bootstrap_empty_database() {
    let store = MemoryStore::new();
    let spec = BootstrapSpec::new(
        DB,
        vec![
            CollectionSpec::new("user", "email"),
            CollectionSpec::new("project", "name"),
        ],
    );

    bootstrap(&store, &spec).await.unwrap();

    let collections: BTreeSet<String> = store
        .list_collection_names(DB)
        .await
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(collections, fields(&["user", "project"]));

    store
        .insert(DB, "user", doc! { "email": "ada@example.com", "firstName": "Ada" })
        .unwrap();
    let duplicate = store.insert(DB, "user", doc! { "email": "ada@example.com", "firstName": "Bob" });
    assert_eq!(
        duplicate,
        Err(StoreError::DuplicateKey {
            collection: "user".to_string(),
            field: "email".to_string(),
        })
    );
}

#[tokio::test]
async fn test_bootstrap_is_idempotent() {
    let store = MemoryStore::new();
    let spec = BootstrapSpec::default();

    bootstrap(&store, &spec).await.unwrap();
    let first = store.snapshot(DB);
    assert_eq!(first.get("user"), Some(&fields(&["email"])));
    assert_eq!(first.get("project"), Some(&fields(&["name"])));

    for _ in 0..4 {
        let report = bootstrap(&store, &spec).await.unwrap();
        assert!(report.collections.iter().all(|outcome| !outcome.created));
        assert_eq!(store.snapshot(DB), first);
    }
}

#[tokio::test]
async fn test_bootstrap_is_idempotent_when_recreate_is_tolerated() {
    let store = MemoryStore::new().tolerating_recreate();
    let spec = BootstrapSpec::default();

    bootstrap(&store, &spec).await.unwrap();
    let first = store.snapshot(DB);
    bootstrap(&store, &spec).await.unwrap();
    assert_eq!(store.snapshot(DB), first);
    assert!(verify(&store, &spec).await.unwrap().is_complete());
}

#[tokio::test]
async fn test_unique_constraints_reject_duplicates() {
    let store = MemoryStore::new();
    bootstrap(&store, &BootstrapSpec::default()).await.unwrap();

    store
        .insert(DB, "user", doc! { "email": "ada@example.com" })
        .unwrap();
    store
        .insert(DB, "user", doc! { "email": "bob@example.com" })
        .unwrap();
    assert!(store
        .insert(DB, "user", doc! { "email": "bob@example.com" })
        .is_err());

    store.insert(DB, "project", doc! { "name": "apollo" }).unwrap();
    store.insert(DB, "project", doc! { "name": "gemini" }).unwrap();
    let duplicate = store.insert(DB, "project", doc! { "name": "apollo" });
    assert!(matches!(
        duplicate,
        Err(StoreError::DuplicateKey { ref field, .. }) if field == "name"
    ));

    assert_eq!(store.document_count(DB, "user"), 2);
    assert_eq!(store.document_count(DB, "project"), 2);
}

#[tokio::test]
async fn test_existing_data_is_kept() {
    let store = MemoryStore::new();
    store
        .insert(DB, "user", doc! { "email": "ada@example.com" })
        .unwrap();

    let report = bootstrap(&store, &BootstrapSpec::default()).await.unwrap();
    assert!(!report.collections[0].created);
    assert!(report.collections[1].created);
    assert_eq!(store.document_count(DB, "user"), 1);
}

#[tokio::test]
async fn test_unreachable_database_fails_with_connection_error() {
    let store = MemoryStore::new().unreachable();
    let error = bootstrap(&store, &BootstrapSpec::default())
        .await
        .unwrap_err();

    match error {
        BootstrapError::Store {
            operation,
            source: StoreError::Connection(_),
        } => assert_eq!(
            operation,
            Operation::Ping {
                database: DB.to_string()
            }
        ),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(store.snapshot(DB).is_empty());
}

#[tokio::test]
async fn test_lost_connection_leaves_prior_schema_untouched() {
    let store = MemoryStore::new();
    bootstrap(&store, &BootstrapSpec::default()).await.unwrap();
    store
        .insert(DB, "user", doc! { "email": "ada@example.com" })
        .unwrap();
    let before = store.snapshot(DB);

    store.disconnect();
    let error = bootstrap(&store, &BootstrapSpec::default())
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        BootstrapError::Store {
            operation: Operation::Ping { .. },
            source: StoreError::Connection(_),
        }
    ));

    store.reconnect();
    assert_eq!(store.snapshot(DB), before);
    assert_eq!(store.document_count(DB, "user"), 1);
}

#[tokio::test]
async fn test_connection_lost_midway_is_completed_by_next_run() {
    // collection and index on `user` go through, then the server goes away
    let store = MemoryStore::new().disconnect_after_writes(2);
    let spec = BootstrapSpec::default();

    let error = bootstrap(&store, &spec).await.unwrap_err();
    match error {
        BootstrapError::Store {
            operation,
            source: StoreError::Connection(_),
        } => assert_eq!(
            operation,
            Operation::CreateCollection {
                collection: "project".to_string()
            }
        ),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(store.snapshot(DB).get("user"), Some(&fields(&["email"])));
    assert_eq!(store.snapshot(DB).get("project"), None);

    store.reconnect();
    let report = bootstrap(&store, &spec).await.unwrap();
    assert!(!report.collections[0].created);
    assert!(report.collections[1].created);
    assert!(verify(&store, &spec).await.unwrap().is_complete());
}

#[tokio::test]
async fn test_permission_denied_is_surfaced() {
    let store = MemoryStore::new().read_only();
    let error = bootstrap(&store, &BootstrapSpec::default())
        .await
        .unwrap_err();

    assert!(matches!(
        error.store_error(),
        Some(StoreError::Permission(_))
    ));
    assert_eq!(error.to_string(), "failed to create collection 'user'");
}

#[tokio::test]
async fn test_conflicting_data_is_fatal() {
    let store = MemoryStore::new();
    store
        .insert(DB, "user", doc! { "email": "ada@example.com" })
        .unwrap();
    store
        .insert(DB, "user", doc! { "email": "ada@example.com" })
        .unwrap();

    let error = bootstrap(&store, &BootstrapSpec::default())
        .await
        .unwrap_err();
    match error {
        BootstrapError::Store {
            operation,
            source: StoreError::ConstraintConflict { collection, field, .. },
        } => {
            assert_eq!(
                operation,
                Operation::CreateUniqueIndex {
                    collection: "user".to_string(),
                    field: "email".to_string(),
                }
            );
            assert_eq!(collection, "user");
            assert_eq!(field, "email");
        }
        other => panic!("unexpected error: {:?}", other),
    }

    // the run stopped at the first failure
    assert_eq!(store.snapshot(DB).get("project"), None);
    assert_eq!(store.snapshot(DB).get("user"), Some(&BTreeSet::new()));
}

#[tokio::test]
async fn test_concurrent_bootstraps_converge() {
    let store = Arc::new(MemoryStore::new());
    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            bootstrap(store.as_ref(), &BootstrapSpec::default()).await
        }));
    }

    let mut created = 0;
    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        created += report
            .collections
            .iter()
            .filter(|outcome| outcome.created)
            .count();
    }
    // each collection is created by exactly one of the runs
    assert_eq!(created, 2);
    assert_eq!(store.snapshot(DB).get("user"), Some(&fields(&["email"])));
    assert_eq!(store.snapshot(DB).get("project"), Some(&fields(&["name"])));
}

#[tokio::test]
async fn test_other_databases_are_untouched() {
    let store = MemoryStore::new();
    store.create_collection("other", "user").await.unwrap();

    bootstrap(&store, &BootstrapSpec::default()).await.unwrap();
    assert_eq!(store.snapshot("other").get("user"), Some(&BTreeSet::new()));
}
