use eventstore_store::{ClockFlavor, EventStore, EventStoreResult, StoreConfig};
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};
use tempfile::tempdir;

async fn table_names(store: &EventStore) -> EventStoreResult<Vec<String>> {
    let rows = store
        .connection()
        .query_all_raw(Statement::from_string(
            DatabaseBackend::Sqlite,
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        ))
        .await?;
    let mut names = Vec::with_capacity(rows.len());
    for row in rows {
        names.push(row.try_get::<String>("", "name")?);
    }
    Ok(names)
}

#[tokio::test]
async fn connect_creates_event_and_constraint_tables() -> EventStoreResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let config = StoreConfig::default_sqlite(base.join("store.sqlite").to_string_lossy());
    let store = EventStore::connect(&config, base).await?;

    let names = table_names(&store).await?;
    assert!(names.iter().any(|name| name == "events2"));
    assert!(names.iter().any(|name| name == "unique_constraints"));

    assert_eq!(store.clock(), ClockFlavor::Sqlite);
    assert_eq!(store.name(), "store");
    Ok(())
}

#[tokio::test]
async fn reconnecting_keeps_schema_and_data() -> EventStoreResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let config = StoreConfig::default_sqlite(base.join("store.sqlite").to_string_lossy())
        .with_name("primary");
    let store = EventStore::connect(&config, base).await?;
    store
        .connection()
        .execute_raw(Statement::from_string(
            DatabaseBackend::Sqlite,
            "INSERT INTO unique_constraints (instance_id, unique_type, unique_field) \
             VALUES ('i1', 'username', 'ada')",
        ))
        .await?;
    drop(store);

    let store = EventStore::connect(&config, base).await?;
    assert_eq!(store.name(), "primary");
    let row = store
        .connection()
        .query_one_raw(Statement::from_string(
            DatabaseBackend::Sqlite,
            "SELECT COUNT(*) AS count FROM unique_constraints",
        ))
        .await?
        .expect("count row");
    assert_eq!(row.try_get::<i64>("", "count")?, 1);
    Ok(())
}
