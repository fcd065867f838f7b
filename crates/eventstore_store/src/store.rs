use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::sea_query;
use sea_orm::sea_query::{
    Alias, Expr, ExprTrait, Func, MysqlQueryBuilder, Order, PostgresQueryBuilder, Query,
    QueryStatementWriter, SqliteQueryBuilder,
};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr,
    QueryResult, Statement,
};
use sea_orm_migration::MigratorTrait;

use crate::db::*;
use crate::migration::Migrator;
use crate::{DatabaseConfig, StoreConfig};
use eventstore_core::{
    ConstraintRecord, Event, EventRecord, EventStoreError, EventStoreResult, Position,
    PositionClock, created_at_from_micros,
};

/// Event store on one sea-orm connection pool.
#[derive(Clone)]
pub struct EventStore {
    conn: DatabaseConnection,
    clock: ClockFlavor,
    name: String,
}

/// Source of position readings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockFlavor {
    Sqlite,
    Postgres,
    Cockroach,
    Mysql,
}

impl ClockFlavor {
    fn sql(self) -> &'static str {
        match self {
            ClockFlavor::Sqlite => {
                "SELECT (julianday('now') - 2440587.5) * 86400.0 AS position"
            }
            ClockFlavor::Postgres => {
                "SELECT EXTRACT(EPOCH FROM clock_timestamp())::DOUBLE PRECISION AS position"
            }
            ClockFlavor::Cockroach => "SELECT cluster_logical_timestamp()::FLOAT8 AS position",
            ClockFlavor::Mysql => "SELECT CAST(UNIX_TIMESTAMP(NOW(6)) AS DOUBLE) AS position",
        }
    }
}

impl EventStore {
    pub async fn connect(config: &StoreConfig, base_dir: &Path) -> EventStoreResult<Self> {
        let url = build_connection_url(config, base_dir)?;
        let mut options = ConnectOptions::new(url);
        options.sqlx_logging(false);
        if let Some(pool) = &config.pool {
            if let Some(max) = pool.max_connections {
                options.max_connections(max);
            }
            if let Some(min) = pool.min_connections {
                options.min_connections(min);
            }
            if let Some(timeout_ms) = pool.connect_timeout_ms {
                options.connect_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.acquire_timeout_ms {
                options.acquire_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.idle_timeout_ms {
                options.idle_timeout(Duration::from_millis(timeout_ms));
            }
        }
        let conn = Database::connect(options)
            .await
            .map_err(|err| EventStoreError::connection(err.to_string()))?;
        let clock = detect_clock(&conn, conn.get_database_backend()).await?;
        Migrator::up(&conn, None).await.map_err(EventStoreError::from)?;
        let name = config.database_name();
        log::debug!("eventstore connected: name={name} clock={clock:?}");
        Ok(Self {
            conn,
            clock,
            name,
        })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    pub fn clock(&self) -> ClockFlavor {
        self.clock
    }

    /// Name recorded in migration markers written into this store.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Newest position of `instance`, if it has events.
    pub async fn latest_position(&self, instance: &str) -> EventStoreResult<Option<Position>> {
        newest_position(&self.conn, instance).await
    }
}

#[async_trait]
impl PositionClock for EventStore {
    /// Clock reading, raised to the newest stored position when rows were
    /// placed ahead of the clock.
    async fn current_position(&self) -> EventStoreResult<Position> {
        let reading = clock_reading(&self.conn, self.clock).await?;
        Ok(match highest_value(&self.conn).await? {
            Some(value) if value > reading.value => Position::at(value),
            _ => reading,
        })
    }

    async fn next_position(&self) -> EventStoreResult<Position> {
        let reading = clock_reading(&self.conn, self.clock).await?;
        Ok(match highest_value(&self.conn).await? {
            Some(value) if value >= reading.value => Position::at(value.next_up()),
            _ => reading,
        })
    }
}

/// Highest position value over every instance.
async fn highest_value<C: ConnectionTrait>(conn: &C) -> EventStoreResult<Option<f64>> {
    let select = Query::select()
        .expr_as(
            Func::max(Expr::col(Events2::Position)),
            Alias::new("position"),
        )
        .from(Events2::Table)
        .to_owned();
    match query_one(conn, &select).await? {
        Some(row) => Ok(row.try_get("", "position")?),
        None => Ok(None),
    }
}

async fn detect_clock(
    conn: &DatabaseConnection,
    backend: DatabaseBackend,
) -> EventStoreResult<ClockFlavor> {
    match backend {
        DatabaseBackend::Sqlite => Ok(ClockFlavor::Sqlite),
        DatabaseBackend::MySql => Ok(ClockFlavor::Mysql),
        DatabaseBackend::Postgres => {
            let row = conn
                .query_one_raw(Statement::from_string(
                    backend,
                    "SELECT version() AS version",
                ))
                .await?;
            let version: String = match row {
                Some(row) => row.try_get("", "version")?,
                None => String::new(),
            };
            if version.contains("CockroachDB") {
                Ok(ClockFlavor::Cockroach)
            } else {
                Ok(ClockFlavor::Postgres)
            }
        }
        _ => Err(EventStoreError::connection("unsupported database backend")),
    }
}

pub(crate) async fn clock_reading<C: ConnectionTrait>(
    conn: &C,
    clock: ClockFlavor,
) -> EventStoreResult<Position> {
    let backend = conn.get_database_backend();
    let row = conn
        .query_one_raw(Statement::from_string(backend, clock.sql()))
        .await?
        .ok_or_else(|| EventStoreError::storage("clock query returned no row"))?;
    let value: f64 = row.try_get("", "position")?;
    if !value.is_finite() {
        return Err(EventStoreError::storage(format!(
            "clock returned non-finite reading {value}"
        )));
    }
    Ok(Position::at(value))
}

pub(crate) async fn newest_position<C: ConnectionTrait>(
    conn: &C,
    instance: &str,
) -> EventStoreResult<Option<Position>> {
    let select = Query::select()
        .columns([Events2::Position, Events2::InTxOrder])
        .from(Events2::Table)
        .and_where(Expr::col(Events2::InstanceId).eq(instance))
        .order_by(Events2::Position, Order::Desc)
        .order_by(Events2::InTxOrder, Order::Desc)
        .limit(1)
        .to_owned();
    let Some(row) = query_one(conn, &select).await? else {
        return Ok(None);
    };
    let value: f64 = row.try_get("", &col_name(Events2::Position))?;
    let in_tx_order: i32 = row.try_get("", &col_name(Events2::InTxOrder))?;
    Ok(Some(Position::new(value, read_order(in_tx_order)?)))
}

fn build_connection_url(config: &StoreConfig, base_dir: &Path) -> EventStoreResult<String> {
    match &config.database {
        DatabaseConfig::Sqlite { .. } => {
            let path = config.sqlite_path(base_dir)?;
            Ok(format!("sqlite://{}?mode=rwc", path.display()))
        }
        DatabaseConfig::Postgres { url } => Ok(url.clone()),
        DatabaseConfig::Mysql { url } => Ok(url.clone()),
    }
}

pub(crate) const EVENT_COLUMNS: [Events2; 12] = [
    Events2::InstanceId,
    Events2::AggregateType,
    Events2::AggregateId,
    Events2::EventType,
    Events2::Sequence,
    Events2::Revision,
    Events2::CreatedAt,
    Events2::Payload,
    Events2::Creator,
    Events2::Owner,
    Events2::Position,
    Events2::InTxOrder,
];

pub(crate) fn event_values(record: &EventRecord) -> EventStoreResult<[sea_query::Value; 12]> {
    let sequence = i64::try_from(record.sequence).map_err(|_| {
        EventStoreError::validation(format!("sequence {} overflows", record.sequence))
    })?;
    let revision = i16::try_from(record.revision).map_err(|_| {
        EventStoreError::validation(format!("revision {} overflows", record.revision))
    })?;
    let in_tx_order = i32::try_from(record.in_tx_order).map_err(|_| {
        EventStoreError::validation(format!("in_tx_order {} overflows", record.in_tx_order))
    })?;
    Ok([
        record.instance_id.clone().into(),
        record.aggregate_type.clone().into(),
        record.aggregate_id.clone().into(),
        record.event_type.clone().into(),
        sequence.into(),
        revision.into(),
        record.created_at.into(),
        record.payload.clone().into(),
        record.creator.clone().into(),
        record.owner.clone().into(),
        record.position.into(),
        in_tx_order.into(),
    ])
}

pub(crate) fn read_record(row: &QueryResult) -> EventStoreResult<EventRecord> {
    let sequence: i64 = row.try_get("", &col_name(Events2::Sequence))?;
    let revision: i16 = row.try_get("", &col_name(Events2::Revision))?;
    let in_tx_order: i32 = row.try_get("", &col_name(Events2::InTxOrder))?;
    Ok(EventRecord {
        instance_id: row.try_get("", &col_name(Events2::InstanceId))?,
        aggregate_type: row.try_get("", &col_name(Events2::AggregateType))?,
        aggregate_id: row.try_get("", &col_name(Events2::AggregateId))?,
        event_type: row.try_get("", &col_name(Events2::EventType))?,
        sequence: u64::try_from(sequence)
            .map_err(|_| EventStoreError::storage(format!("negative sequence {sequence}")))?,
        revision: u16::try_from(revision)
            .map_err(|_| EventStoreError::storage(format!("negative revision {revision}")))?,
        created_at: row.try_get("", &col_name(Events2::CreatedAt))?,
        payload: row.try_get("", &col_name(Events2::Payload))?,
        creator: row.try_get("", &col_name(Events2::Creator))?,
        owner: row.try_get("", &col_name(Events2::Owner))?,
        position: row.try_get("", &col_name(Events2::Position))?,
        in_tx_order: read_order(in_tx_order)?,
    })
}

pub(crate) fn read_event(row: &QueryResult) -> EventStoreResult<Event> {
    let record = read_record(row)?;
    let created_at = created_at_from_micros(record.created_at)?;
    let payload = record
        .payload
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;
    Ok(Event {
        instance_id: record.instance_id,
        owner: record.owner,
        aggregate_type: record.aggregate_type,
        aggregate_id: record.aggregate_id,
        event_type: record.event_type,
        revision: record.revision,
        sequence: record.sequence,
        created_at,
        creator: record.creator,
        payload,
        position: Position::new(record.position, record.in_tx_order),
    })
}

pub(crate) fn read_constraint(row: &QueryResult) -> EventStoreResult<ConstraintRecord> {
    Ok(ConstraintRecord {
        instance_id: row.try_get("", &col_name(UniqueConstraints::InstanceId))?,
        unique_type: row.try_get("", &col_name(UniqueConstraints::UniqueType))?,
        unique_field: row.try_get("", &col_name(UniqueConstraints::UniqueField))?,
    })
}

fn read_order(value: i32) -> EventStoreResult<u32> {
    u32::try_from(value)
        .map_err(|_| EventStoreError::storage(format!("negative in_tx_order {value}")))
}

pub(crate) fn col_name(column: impl sea_query::Iden) -> String {
    column.to_string()
}

pub(crate) fn build_stmt<S: QueryStatementWriter>(
    backend: DatabaseBackend,
    stmt: &S,
) -> (String, sea_orm::sea_query::Values) {
    match backend {
        DatabaseBackend::Sqlite => stmt.build(SqliteQueryBuilder),
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        DatabaseBackend::MySql => stmt.build(MysqlQueryBuilder),
        _ => stmt.build(SqliteQueryBuilder),
    }
}

/// Executes `stmt` and returns the number of affected rows.
pub(crate) async fn exec<C, S>(conn: &C, stmt: &S) -> EventStoreResult<u64>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    Ok(try_exec(conn, stmt).await?)
}

/// Like [`exec`], keeping the database error for callers that inspect it.
pub(crate) async fn try_exec<C, S>(conn: &C, stmt: &S) -> Result<u64, DbErr>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let result = conn
        .execute_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(result.rows_affected())
}

pub(crate) async fn query_all<C, S>(conn: &C, stmt: &S) -> EventStoreResult<Vec<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let rows = conn
        .query_all_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(rows)
}

pub(crate) async fn query_one<C, S>(conn: &C, stmt: &S) -> EventStoreResult<Option<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let row = conn
        .query_one_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(row)
}
