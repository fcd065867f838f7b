use eventstore_store::{
    DatabaseConfig, EventStore, EventStoreError, EventStoreResult, MigrationConfig, PoolConfig,
    StoreConfig,
};
use tempfile::tempdir;

#[test]
fn store_config_reads_pool_and_backend() {
    let raw = r#"{
        "database": {
            "backend": "postgres",
            "url": "postgres://app@db:5432/zitadel?sslmode=disable"
        },
        "pool": { "max_connections": 8, "idle_timeout_ms": 1000 }
    }"#;
    let config: StoreConfig = serde_json::from_str(raw).expect("parse");
    assert_eq!(config.backend_name(), "postgres");
    assert_eq!(
        config.pool,
        Some(PoolConfig {
            max_connections: Some(8),
            idle_timeout_ms: Some(1000),
            ..PoolConfig::default()
        })
    );
    assert_eq!(config.database_name(), "zitadel");
    assert_eq!(config.clone().with_name("eu").database_name(), "eu");
}

#[test]
fn sqlite_name_comes_from_file_stem() {
    let config = StoreConfig::default_sqlite("/var/lib/events/primary.sqlite");
    assert_eq!(config.database_name(), "primary");
    let config = StoreConfig {
        database: DatabaseConfig::Sqlite { path: None },
        pool: None,
        name: None,
    };
    assert_eq!(config.database_name(), "eventstore");
}

#[test]
fn migration_config_defaults_and_validation() {
    let raw = r#"{
        "source": { "database": { "backend": "sqlite", "path": "source.sqlite" } },
        "destination": {
            "database": { "backend": "mysql", "url": "mysql://root@localhost/events" }
        },
        "instance_ids": ["i1"]
    }"#;
    let config: MigrationConfig = serde_json::from_str(raw).expect("parse");
    assert_eq!(config.batch_size, 500);
    assert_eq!(config.pipe_capacity, 64 * 1024);
    assert!(!config.replace_constraints);
    assert!(!config.ignore_previous_migrations);
    assert_eq!(config.instance_ids, vec!["i1".to_string()]);
    config.validate().expect("valid");

    let mut invalid = config.clone();
    invalid.batch_size = 0;
    assert!(matches!(
        invalid.validate(),
        Err(EventStoreError::Validation { .. })
    ));
    let mut invalid = config;
    invalid.instance_ids.push(String::new());
    assert!(invalid.validate().is_err());
}

#[test]
fn migration_config_load_reports_missing_file() {
    let dir = tempdir().expect("tempdir");
    let err = MigrationConfig::load(&dir.path().join("missing.json")).expect_err("missing");
    assert!(matches!(err, EventStoreError::Validation { .. }));
}

#[tokio::test]
async fn pool_settings_are_applied_on_connect() -> EventStoreResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let mut config = StoreConfig::default_sqlite(base.join("pool.sqlite").to_string_lossy());
    config.pool = Some(PoolConfig {
        max_connections: Some(2),
        min_connections: Some(1),
        connect_timeout_ms: Some(2_000),
        acquire_timeout_ms: Some(2_000),
        idle_timeout_ms: Some(10_000),
    });
    let store = EventStore::connect(&config, base).await?;
    assert_eq!(store.name(), "pool");
    Ok(())
}

#[tokio::test]
async fn load_or_init_writes_default_config() -> EventStoreResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let default_path = base.join("data.sqlite");
    let created = StoreConfig::load_or_init(base, &default_path)?;
    assert!(base.join("eventstore.json").exists());
    let loaded = StoreConfig::load_or_init(base, &base.join("other.sqlite"))?;
    assert_eq!(created, loaded);
    assert_eq!(loaded.database_name(), "data");
    Ok(())
}
