use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use eventstore_core::{EventStoreError, EventStoreResult};

const DEFAULT_CONFIG_NAME: &str = "eventstore.json";
const DEFAULT_SQLITE_NAME: &str = "eventstore.sqlite";
const DEFAULT_BATCH_SIZE: u64 = 500;
const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Sqlite { path: Option<String> },
    Postgres { url: String },
    Mysql { url: String },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pool: Option<PoolConfig>,
    /// Name recorded in migration markers; derived from the database when unset.
    #[serde(default)]
    pub name: Option<String>,
}

impl StoreConfig {
    pub fn default_sqlite(path: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig::Sqlite {
                path: Some(path.into()),
            },
            pool: None,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn load_or_init(base_dir: &Path, default_sqlite_path: &Path) -> EventStoreResult<Self> {
        fs::create_dir_all(base_dir)
            .map_err(|err| EventStoreError::storage(format!("create config dir: {err}")))?;
        let config_path = base_dir.join(DEFAULT_CONFIG_NAME);
        if config_path.exists() {
            let raw = fs::read_to_string(&config_path)
                .map_err(|err| EventStoreError::storage(format!("read config: {err}")))?;
            let config: StoreConfig = serde_json::from_str(&raw)
                .map_err(|err| EventStoreError::validation(err.to_string()))?;
            return Ok(config);
        }
        let default = StoreConfig::default_sqlite(default_sqlite_path.to_string_lossy());
        let payload = serde_json::to_string_pretty(&default)
            .map_err(|err| EventStoreError::storage(format!("serialize config: {err}")))?;
        fs::write(&config_path, payload)
            .map_err(|err| EventStoreError::storage(format!("write config: {err}")))?;
        Ok(default)
    }

    pub fn sqlite_path(&self, base_dir: &Path) -> EventStoreResult<PathBuf> {
        match &self.database {
            DatabaseConfig::Sqlite { path } => {
                let path = path
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SQLITE_NAME.to_string());
                let candidate = PathBuf::from(path);
                if candidate.is_absolute() {
                    Ok(candidate)
                } else {
                    Ok(base_dir.join(candidate))
                }
            }
            _ => Err(EventStoreError::validation("config is not sqlite backend")),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.database {
            DatabaseConfig::Sqlite { .. } => "sqlite",
            DatabaseConfig::Postgres { .. } => "postgres",
            DatabaseConfig::Mysql { .. } => "mysql",
        }
    }

    /// Name identifying this store in migration markers.
    pub fn database_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match &self.database {
            DatabaseConfig::Sqlite { path } => {
                let path = path.as_deref().unwrap_or(DEFAULT_SQLITE_NAME);
                Path::new(path)
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.to_string())
            }
            DatabaseConfig::Postgres { url } | DatabaseConfig::Mysql { url } => {
                let without_query = url.split(['?', '#']).next().unwrap_or(url);
                without_query
                    .trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .unwrap_or(without_query)
                    .to_string()
            }
        }
    }
}

/// One copy run from `source` into `destination`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MigrationConfig {
    pub source: StoreConfig,
    pub destination: StoreConfig,
    /// Instances to copy; empty copies every instance.
    #[serde(default)]
    pub instance_ids: Vec<String>,
    /// Delete the destination's constraints of the copied instances first.
    #[serde(default)]
    pub replace_constraints: bool,
    /// Copy from the origin instead of the last successful watermark.
    #[serde(default)]
    pub ignore_previous_migrations: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_pipe_capacity")]
    pub pipe_capacity: usize,
}

fn default_batch_size() -> u64 {
    DEFAULT_BATCH_SIZE
}

fn default_pipe_capacity() -> usize {
    DEFAULT_PIPE_CAPACITY
}

impl MigrationConfig {
    pub fn new(source: StoreConfig, destination: StoreConfig) -> Self {
        Self {
            source,
            destination,
            instance_ids: Vec::new(),
            replace_constraints: false,
            ignore_previous_migrations: false,
            batch_size: DEFAULT_BATCH_SIZE,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }

    pub fn load(path: &Path) -> EventStoreResult<Self> {
        let raw = fs::read_to_string(path).map_err(|err| {
            EventStoreError::validation(format!("read {}: {err}", path.display()))
        })?;
        let config: MigrationConfig = serde_json::from_str(&raw)
            .map_err(|err| EventStoreError::validation(format!("{}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EventStoreResult<()> {
        if self.batch_size == 0 {
            return Err(EventStoreError::validation("batch_size must be positive"));
        }
        if self.pipe_capacity == 0 {
            return Err(EventStoreError::validation("pipe_capacity must be positive"));
        }
        if self.instance_ids.iter().any(String::is_empty) {
            return Err(EventStoreError::validation("instance ids must not be empty"));
        }
        Ok(())
    }
}
