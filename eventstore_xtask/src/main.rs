use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eventstore_store::{
    CopyOptions, EventStore, MigrationConfig, copy_events, copy_unique_constraints,
    last_successful_migration, migrate,
};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Eventstore(args) => copy_all(args).await,
        Command::Events(args) => copy_event_log(args).await,
        Command::Constraints(args) => copy_constraints(args).await,
        Command::LastMigration(args) => show_last_migration(args).await,
    }
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Copies an event store from one database into another"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy events, then unique constraints.
    Eventstore(CopyArgs),
    /// Copy only the events after the last successful watermark.
    Events(CopyArgs),
    /// Copy only the unique constraint index.
    Constraints(CopyArgs),
    /// Print the last successful migration recorded in the destination.
    LastMigration(ConfigArgs),
}

#[derive(Parser)]
struct ConfigArgs {
    /// Migration config (JSON) naming source and destination.
    #[arg(long, default_value = "migration.json")]
    config: PathBuf,
    /// Directory relative sqlite paths resolve against; defaults to the
    /// directory of the config file.
    #[arg(long)]
    base_dir: Option<PathBuf>,
}

#[derive(Parser)]
struct CopyArgs {
    #[command(flatten)]
    config: ConfigArgs,
    /// Instance to copy; repeat for several. Copies every instance when absent.
    #[arg(long = "instance")]
    instances: Vec<String>,
    /// Delete the destination's constraints of the copied instances first.
    #[arg(long, default_value_t = false)]
    replace_constraints: bool,
    /// Copy from the origin instead of the last successful watermark.
    #[arg(long, default_value_t = false)]
    ignore_previous: bool,
    /// Rows per export page and per insert batch.
    #[arg(long)]
    batch_size: Option<u64>,
}

impl ConfigArgs {
    fn base_dir(&self) -> PathBuf {
        if let Some(dir) = &self.base_dir {
            return dir.clone();
        }
        self.config
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn load(&self) -> Result<MigrationConfig> {
        MigrationConfig::load(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))
    }
}

impl CopyArgs {
    /// Config file with the command line overrides applied.
    fn migration_config(&self) -> Result<MigrationConfig> {
        let mut config = self.config.load()?;
        if !self.instances.is_empty() {
            config.instance_ids = self.instances.clone();
        }
        config.replace_constraints |= self.replace_constraints;
        config.ignore_previous_migrations |= self.ignore_previous;
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        config.validate().context("invalid migration config")?;
        Ok(config)
    }
}

async fn connect(config: &MigrationConfig, base_dir: &Path) -> Result<(EventStore, EventStore)> {
    let source = EventStore::connect(&config.source, base_dir)
        .await
        .context("failed to connect to source")?;
    let destination = EventStore::connect(&config.destination, base_dir)
        .await
        .context("failed to connect to destination")?;
    Ok((source, destination))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn copy_all(args: CopyArgs) -> Result<()> {
    let config = args.migration_config()?;
    let report = migrate(&config, &args.config.base_dir())
        .await
        .context("eventstore copy failed")?;
    print_json(&report)
}

async fn copy_event_log(args: CopyArgs) -> Result<()> {
    let config = args.migration_config()?;
    let (source, destination) = connect(&config, &args.config.base_dir()).await?;
    let report = copy_events(&source, &destination, &CopyOptions::from_config(&config))
        .await
        .context("event copy failed")?;
    print_json(&report)
}

async fn copy_constraints(args: CopyArgs) -> Result<()> {
    let config = args.migration_config()?;
    let (source, destination) = connect(&config, &args.config.base_dir()).await?;
    let report =
        copy_unique_constraints(&source, &destination, &CopyOptions::from_config(&config))
            .await
            .context("unique constraint copy failed")?;
    print_json(&report)
}

async fn show_last_migration(args: ConfigArgs) -> Result<()> {
    let config = args.load()?;
    let destination = EventStore::connect(&config.destination, &args.base_dir())
        .await
        .context("failed to connect to destination")?;
    let last = last_successful_migration(&destination, &config.destination.database_name())
        .await
        .context("failed to read migration markers")?;
    match last {
        Some(last) => print_json(&last),
        None => {
            log::info!(
                "no successful migration into {}",
                config.destination.database_name()
            );
            print_json(&Option::<()>::None)
        }
    }
}
