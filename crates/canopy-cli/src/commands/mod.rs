//! CLI command definitions and handlers.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use canopy_db::DbPool;
use canopy_graph::CanopyConfig;

pub mod migrate;
pub mod query;
pub mod score;
pub mod sync;

/// Canopy - versioned graph mirror for cultivation operations
#[derive(Parser)]
#[command(name = "canopy")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true, env = "CANOPY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database path (overrides config and CANOPY_DB)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the database or bring its schema up to date
    Migrate,

    /// Reconcile a snapshot batch file into the graph
    Sync(sync::SyncArgs),

    /// Show the neighborhood of a node
    Explore(query::ExploreArgs),

    /// List the most anomalous nodes or edges of a site
    Anomalies(query::AnomaliesArgs),

    /// Show sync-health statistics for a site
    Stats(query::StatsArgs),

    /// Write an anomaly score for a node or edge
    Score(score::ScoreArgs),
}

/// Loaded configuration plus an open, migrated database.
pub struct AppContext {
    pub config: CanopyConfig,
    pub pool: DbPool,
}

impl Cli {
    pub fn load_config(&self) -> Result<CanopyConfig> {
        let mut config = CanopyConfig::load(self.config.as_deref())
            .context("Failed to load configuration")?;
        if let Some(db) = &self.db {
            config.database_path = db.clone();
        }
        Ok(config)
    }

    pub async fn execute(self) -> Result<()> {
        let config = self.load_config()?;
        let db_path = config.database_path.to_string_lossy().to_string();
        let pool = canopy_db::init_pool(&db_path)
            .with_context(|| format!("Failed to open database {}", db_path))?;
        debug!(db = %db_path, "Opened database");
        let ctx = AppContext { config, pool };

        match self.command {
            Commands::Migrate => migrate::execute(&ctx).await,
            Commands::Sync(args) => sync::execute(&ctx, args).await,
            Commands::Explore(args) => query::explore(&ctx, args).await,
            Commands::Anomalies(args) => query::anomalies(&ctx, args).await,
            Commands::Stats(args) => query::stats(&ctx, args).await,
            Commands::Score(args) => score::execute(&ctx, args).await,
        }
    }
}
