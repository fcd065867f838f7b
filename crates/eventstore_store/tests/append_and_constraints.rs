use eventstore_store::{
    Aggregate, AggregateFilter, Command, Event, EventCollector, EventPusher, EventQuerier,
    EventStore, EventStoreError, EventStoreResult, PositionClock, Query, StoreConfig,
    UniqueConstraint,
};
use serde_json::json;
use tempfile::{TempDir, tempdir};

async fn open(dir: &TempDir) -> EventStoreResult<EventStore> {
    let base = dir.path();
    let config = StoreConfig::default_sqlite(base.join("events.sqlite").to_string_lossy());
    EventStore::connect(&config, base).await
}

fn user(instance: &str, id: &str) -> Aggregate {
    Aggregate::new(instance, "user", id, "org1")
}

fn added(instance: &str, id: &str) -> Command {
    Command::new(user(instance, id), "user.added", "admin")
}

async fn all_of(store: &EventStore, instance: &str) -> EventStoreResult<Vec<Event>> {
    let mut collector = EventCollector::new();
    store
        .query(&Query::new(instance).filter(AggregateFilter::new()), &mut collector)
        .await?;
    Ok(collector.into_events())
}

#[tokio::test]
async fn append_assigns_sequences_and_increasing_positions() -> EventStoreResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(&dir).await?;

    let first = store
        .append(
            "i1",
            vec![
                added("i1", "u1").with_payload(&json!({ "username": "ada" }))?,
                Command::new(user("i1", "u1"), "user.renamed", "admin"),
                added("i1", "u2"),
            ],
            Vec::new(),
        )
        .await?;
    assert_eq!(
        first.iter().map(|event| event.sequence).collect::<Vec<_>>(),
        vec![1, 2, 1]
    );
    assert_eq!(first[0].position.value, first[2].position.value);
    assert_eq!(first[1].position.in_tx_order, first[0].position.in_tx_order + 1);
    assert!(first.iter().all(|event| event.instance_id == "i1"));

    let second = store
        .append(
            "i1",
            vec![Command::new(first[1].aggregate().with_version(2), "user.removed", "admin")],
            Vec::new(),
        )
        .await?;
    assert_eq!(second[0].sequence, 3);
    assert_eq!(second[0].revision, 2);
    assert_eq!(second[0].owner, "org1");
    assert!(second[0].position > first[2].position);

    let stored = all_of(&store, "i1").await?;
    assert_eq!(stored.len(), 4);
    assert_eq!(stored[0], first[0]);
    assert!(stored.windows(2).all(|pair| pair[0].position < pair[1].position));
    assert_eq!(
        stored[0].unmarshal::<serde_json::Value>()?,
        json!({ "username": "ada" })
    );
    assert_eq!(store.latest_position("i1").await?, Some(second[0].position));
    Ok(())
}

#[tokio::test]
async fn empty_append_writes_nothing() -> EventStoreResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(&dir).await?;
    let events = store.append("i1", Vec::new(), Vec::new()).await?;
    assert!(events.is_empty());
    assert_eq!(store.latest_position("i1").await?, None);
    Ok(())
}

#[tokio::test]
async fn commands_of_another_instance_are_rejected() -> EventStoreResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(&dir).await?;
    let err = store
        .append("i1", vec![added("i2", "u1")], Vec::new())
        .await
        .expect_err("foreign instance");
    assert!(matches!(err, EventStoreError::Validation { .. }));
    Ok(())
}

#[tokio::test]
async fn duplicate_constraint_rolls_back_the_whole_append() -> EventStoreResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(&dir).await?;
    store
        .append(
            "i1",
            vec![added("i1", "u1")],
            vec![UniqueConstraint::add("username", "ada")],
        )
        .await?;

    let err = store
        .append(
            "i1",
            vec![added("i1", "u2")],
            vec![UniqueConstraint::add("username", "ada").with_error_message("username taken")],
        )
        .await
        .expect_err("duplicate");
    match err {
        EventStoreError::ConstraintViolation {
            instance,
            unique_type,
            message,
        } => {
            assert_eq!(instance, "i1");
            assert_eq!(unique_type, "username");
            assert_eq!(message, "username taken");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(all_of(&store, "i1").await?.len(), 1);

    // Same value in another instance does not collide.
    store
        .append(
            "i2",
            vec![added("i2", "u1")],
            vec![UniqueConstraint::add("username", "ada")],
        )
        .await?;
    Ok(())
}

#[tokio::test]
async fn remove_and_remove_instance_free_values() -> EventStoreResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(&dir).await?;
    store
        .append(
            "i1",
            Vec::new(),
            vec![
                UniqueConstraint::add("username", "ada"),
                UniqueConstraint::add("email", "ada@example.com"),
            ],
        )
        .await?;

    store
        .append(
            "i1",
            Vec::new(),
            vec![
                UniqueConstraint::remove("username", "ada"),
                UniqueConstraint::remove("username", "never-added"),
                UniqueConstraint::add("username", "ada"),
            ],
        )
        .await?;

    store
        .append("i1", Vec::new(), vec![UniqueConstraint::remove_instance()])
        .await?;
    store
        .append(
            "i1",
            Vec::new(),
            vec![
                UniqueConstraint::add("username", "ada"),
                UniqueConstraint::add("email", "ada@example.com"),
            ],
        )
        .await?;
    Ok(())
}

#[tokio::test]
async fn global_and_case_insensitive_constraints() -> EventStoreResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(&dir).await?;
    store
        .append(
            "i1",
            Vec::new(),
            vec![UniqueConstraint::add("domain", "example.com").global()],
        )
        .await?;
    let err = store
        .append(
            "i2",
            Vec::new(),
            vec![UniqueConstraint::add("domain", "example.com").global()],
        )
        .await
        .expect_err("global duplicate");
    assert!(matches!(
        err,
        EventStoreError::ConstraintViolation { ref instance, .. } if instance.is_empty()
    ));

    store
        .append(
            "i1",
            Vec::new(),
            vec![UniqueConstraint::add("username", "Ada").ignore_case()],
        )
        .await?;
    let err = store
        .append(
            "i1",
            Vec::new(),
            vec![UniqueConstraint::add("username", "ADA").ignore_case()],
        )
        .await
        .expect_err("case-insensitive duplicate");
    assert!(matches!(err, EventStoreError::ConstraintViolation { .. }));
    Ok(())
}

#[tokio::test]
async fn next_position_is_after_every_stored_event() -> EventStoreResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(&dir).await?;
    let events = store.append("i1", vec![added("i1", "u1")], Vec::new()).await?;
    let next = store.next_position().await?;
    assert!(next.value > events[0].position.value);
    assert!(store.current_position().await?.value > 0.0);
    Ok(())
}
