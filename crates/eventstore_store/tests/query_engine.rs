use eventstore_store::{
    AggregateFilter, BulkTransfer, Columns, Event, EventCollector, EventFilter, EventQuerier,
    EventRecord, EventStore, EventStoreError, EventStoreResult, FrameWriter, ImportOptions,
    NumberCondition, Operation, Position, PositionBound, Projection, ProjectionReducer,
    ProjectionStatement, Query, StoreConfig, TextCondition, query_with,
};
use sea_orm::TransactionTrait;
use tempfile::{TempDir, tempdir};

fn record(
    aggregate_type: &str,
    id: &str,
    event_type: &str,
    sequence: u64,
    at: (f64, u32),
) -> EventRecord {
    EventRecord {
        instance_id: "i1".to_string(),
        aggregate_type: aggregate_type.to_string(),
        aggregate_id: id.to_string(),
        event_type: event_type.to_string(),
        sequence,
        revision: 1,
        created_at: 1_700_000_000_000_000 + sequence as i64,
        payload: Some(format!("{{\"n\":{sequence}}}")),
        creator: "admin".to_string(),
        owner: "org1".to_string(),
        position: at.0,
        in_tx_order: at.1,
    }
}

/// Store holding user u1 at (100,0), (100,1), (150,0) and org o1 at (120,0), (200,0).
async fn seeded(dir: &TempDir) -> EventStoreResult<EventStore> {
    let base = dir.path();
    let config = StoreConfig::default_sqlite(base.join("query.sqlite").to_string_lossy());
    let store = EventStore::connect(&config, base).await?;
    let records = vec![
        record("user", "u1", "user.added", 1, (100.0, 0)),
        record("user", "u1", "user.renamed", 2, (100.0, 1)),
        record("org", "o1", "org.added", 1, (120.0, 0)),
        record("user", "u1", "user.removed", 3, (150.0, 0)),
        record("org", "o1", "org.Renamed", 2, (200.0, 0)),
    ];
    import_records(&store, records).await?;
    Ok(store)
}

async fn import_records(store: &EventStore, records: Vec<EventRecord>) -> EventStoreResult<()> {
    let (writer, reader) = tokio::io::duplex(1024);
    let producer = tokio::spawn(async move {
        let mut frames = FrameWriter::new(writer);
        for record in &records {
            frames.write_row(record).await?;
        }
        frames.finish().await
    });
    let imported = store
        .import_events(reader, &ImportOptions { batch_size: 2 })
        .await?;
    let written = producer.await.expect("producer")?;
    assert_eq!(imported, written);
    Ok(())
}

async fn run(store: &EventStore, query: Query) -> EventStoreResult<Vec<Event>> {
    let mut collector = EventCollector::new();
    let count = store.query(&query, &mut collector).await?;
    let events = collector.into_events();
    assert_eq!(count, events.len());
    Ok(events)
}

fn positions(events: &[Event]) -> Vec<(f64, u32)> {
    events
        .iter()
        .map(|event| (event.position.value, event.position.in_tx_order))
        .collect()
}

fn users() -> AggregateFilter {
    AggregateFilter::new().aggregate_type("user")
}

#[tokio::test]
async fn cursor_with_tie_break_skips_only_seen_rows() -> EventStoreResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = seeded(&dir).await?;

    let events = run(
        &store,
        Query::new("i1")
            .filter(users())
            .position_after(Position::new(100.0, 0)),
    )
    .await?;
    assert_eq!(positions(&events), vec![(100.0, 1), (150.0, 0)]);

    let events = run(
        &store,
        Query::new("i1")
            .filter(users())
            .position_after(PositionBound::value(100.0)),
    )
    .await?;
    assert_eq!(positions(&events), vec![(150.0, 0)]);
    Ok(())
}

#[tokio::test]
async fn descending_order_reverses_ties() -> EventStoreResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = seeded(&dir).await?;
    let events = run(&store, Query::new("i1").filter(users()).descending()).await?;
    assert_eq!(
        positions(&events),
        vec![(150.0, 0), (100.0, 1), (100.0, 0)]
    );

    let events = run(
        &store,
        Query::new("i1")
            .filter(users())
            .position_before(Position::new(150.0, 0))
            .descending()
            .limit(1),
    )
    .await?;
    assert_eq!(positions(&events), vec![(100.0, 1)]);
    Ok(())
}

#[tokio::test]
async fn several_filters_share_order_and_limit() -> EventStoreResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = seeded(&dir).await?;
    let query = Query::new("i1")
        .filter(users().event(EventFilter::new().event_type("user.added")))
        .filter(AggregateFilter::new().aggregate_type("org"));

    let events = run(&store, query.clone()).await?;
    assert_eq!(
        positions(&events),
        vec![(100.0, 0), (120.0, 0), (200.0, 0)]
    );

    let events = run(&store, query.clone().limit(2)).await?;
    assert_eq!(positions(&events), vec![(100.0, 0), (120.0, 0)]);

    let events = run(&store, query.offset(1)).await?;
    assert_eq!(positions(&events), vec![(120.0, 0), (200.0, 0)]);
    Ok(())
}

#[tokio::test]
async fn text_and_number_conditions() -> EventStoreResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = seeded(&dir).await?;

    let events = run(
        &store,
        Query::new("i1").filter(
            AggregateFilter::new()
                .event(EventFilter::new().event_type(TextCondition::StartsWith("user.re".into()))),
        ),
    )
    .await?;
    assert_eq!(positions(&events), vec![(100.0, 1), (150.0, 0)]);

    let events = run(
        &store,
        Query::new("i1").filter(AggregateFilter::new().event(
            EventFilter::new().event_type(TextCondition::EqualsIgnoreCase("ORG.RENAMED".into())),
        )),
    )
    .await?;
    assert_eq!(positions(&events), vec![(200.0, 0)]);

    let events = run(
        &store,
        Query::new("i1").filter(
            AggregateFilter::new()
                .aggregate_id(TextCondition::In(vec!["u1".into(), "o1".into()]))
                .owner("org1")
                .event(EventFilter::new().sequence(NumberCondition::Greater(1))),
        ),
    )
    .await?;
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|event| event.sequence > 1));

    let events = run(
        &store,
        Query::new("i1").filter(
            AggregateFilter::new()
                .event(EventFilter::new().event_type("org.added"))
                .event(EventFilter::new().sequence(NumberCondition::Equals(3))),
        ),
    )
    .await?;
    assert_eq!(positions(&events), vec![(120.0, 0), (150.0, 0)]);

    let events = run(&store, Query::new("i2").filter(AggregateFilter::new())).await?;
    assert!(events.is_empty());
    Ok(())
}

#[tokio::test]
async fn query_without_filters_fails_to_build() -> EventStoreResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = seeded(&dir).await?;
    let mut collector = EventCollector::new();
    let err = store
        .query(&Query::new("i1"), &mut collector)
        .await
        .expect_err("no filters");
    assert!(matches!(err, EventStoreError::QueryBuild { .. }));
    Ok(())
}

#[tokio::test]
async fn reducer_errors_stop_the_query() -> EventStoreResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = seeded(&dir).await?;
    let mut seen = 0;
    let mut reducer = |_: Event| -> EventStoreResult<()> {
        seen += 1;
        Err(EventStoreError::validation("stop"))
    };
    let err = store
        .query(&Query::new("i1").filter(users()), &mut reducer)
        .await
        .expect_err("reducer error");
    assert!(matches!(err, EventStoreError::Validation { .. }));
    assert_eq!(seen, 1);
    Ok(())
}

#[tokio::test]
async fn reducer_errors_stop_a_large_result_early() -> EventStoreResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = seeded(&dir).await?;
    let records = (1..=2_000u64)
        .map(|sequence| {
            record(
                "session",
                "s1",
                "session.touched",
                sequence,
                (1_000.0 + sequence as f64, 0),
            )
        })
        .collect();
    import_records(&store, records).await?;

    let mut seen = 0;
    let mut reducer = |event: Event| -> EventStoreResult<()> {
        seen += 1;
        if event.sequence == 10 {
            return Err(EventStoreError::validation("enough"));
        }
        Ok(())
    };
    let sessions = Query::new("i1").filter(AggregateFilter::new().aggregate_type("session"));
    let err = store
        .query(&sessions, &mut reducer)
        .await
        .expect_err("reducer error");
    assert!(matches!(err, EventStoreError::Validation { .. }));
    assert_eq!(seen, 10);

    let events = run(&store, sessions.clone()).await?;
    assert_eq!(events.len(), 2_000);
    assert_eq!(events[1_999].sequence, 2_000);
    Ok(())
}

#[tokio::test]
async fn queries_run_inside_transactions() -> EventStoreResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = seeded(&dir).await?;
    let tx = store.connection().begin().await?;
    let mut collector = EventCollector::new();
    let count = query_with(&tx, &Query::new("i1").filter(users()), &mut collector).await?;
    tx.commit().await?;
    assert_eq!(count, 3);
    assert_eq!(collector.events[2].unmarshal::<serde_json::Value>()?["n"], 3);
    Ok(())
}

struct UserRows;

impl Projection for UserRows {
    fn name(&self) -> &str {
        "users"
    }

    fn event_types(&self) -> &[&'static str] {
        &["user.added", "user.renamed", "user.removed"]
    }

    fn reduce(&self, event: &Event) -> EventStoreResult<Vec<ProjectionStatement>> {
        let mut key = Columns::new();
        key.insert("id".to_string(), event.aggregate_id.clone().into());
        let statement = match event.event_type.as_str() {
            "user.added" => {
                let mut columns = Columns::new();
                columns.insert("payload".to_string(), event.payload.clone().into());
                ProjectionStatement::new(event, "users", key, Operation::Upsert(columns))
            }
            "user.renamed" => {
                ProjectionStatement::new(event, "users", key, Operation::Update(Columns::new()))
                    .expect_previous(event.sequence - 1)
            }
            _ => ProjectionStatement::new(event, "users", key, Operation::Delete)
                .expect_previous(event.sequence - 1),
        };
        Ok(vec![statement])
    }
}

#[tokio::test]
async fn projections_reduce_query_results_in_order() -> EventStoreResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = seeded(&dir).await?;
    let projection = UserRows;
    let mut reducer = ProjectionReducer::new(&projection);
    store
        .query(
            &Query::new("i1")
                .filter(users())
                .filter(AggregateFilter::new().aggregate_type("org")),
            &mut reducer,
        )
        .await?;
    assert_eq!(reducer.last_position(), Some(Position::new(200.0, 0)));

    let statements = reducer.into_statements();
    assert_eq!(statements.len(), 3);
    assert!(statements[0].is_applicable(None));
    assert!(statements[1].is_applicable(Some(1)));
    assert!(!statements[1].is_applicable(Some(2)));
    assert_eq!(statements[2].operation, Operation::Delete);
    assert_eq!(statements[2].position, Position::new(150.0, 0));
    Ok(())
}
