//! Snapshot reconciliation command.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::{Path, PathBuf};

use canopy_core::SnapshotBatch;
use canopy_graph::{ReconciliationEngine, SyncSummary};

use super::AppContext;
use crate::output;

#[derive(Args)]
pub struct SyncArgs {
    /// JSON file holding a snapshot batch ({"nodes": [...], "edges": [...]})
    pub file: PathBuf,

    /// Print the per-partition reports as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn read_batch(path: &Path) -> Result<SnapshotBatch> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Malformed snapshot batch in {}", path.display()))
}

pub async fn execute(ctx: &AppContext, args: SyncArgs) -> Result<()> {
    let batch = read_batch(&args.file)?;
    let engine = ReconciliationEngine::new(ctx.pool.clone(), &ctx.config.sync)?;

    if !args.json {
        println!("{}", "Reconciling snapshot batch...".bold());
    }
    let reports = engine.reconcile_batch(batch).await?;

    if args.json {
        return output::print_json(&reports);
    }
    output::print_sync_reports(&reports);
    let summary = SyncSummary::from_reports(&reports);
    println!("\n{}", "Sync complete:".green().bold());
    println!("  Partitions:  {}", summary.partitions);
    println!("  Changed:     {}", summary.upserted.changed());
    println!("  Unchanged:   {}", summary.upserted.unchanged);
    println!("  Deactivated: {}", summary.deactivated);
    Ok(())
}
