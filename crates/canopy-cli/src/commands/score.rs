//! Anomaly score write-back command.

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;

use canopy_graph::queries::anomaly;

use super::AppContext;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ScoreTarget {
    Node,
    Edge,
}

#[derive(Args)]
pub struct ScoreArgs {
    /// What the id refers to
    #[arg(value_enum)]
    pub target: ScoreTarget,

    /// Node id (e.g. package:1A40...) or edge id
    pub id: String,

    /// Score in 0..=1
    pub score: f64,

    /// Structured explanation as JSON (nodes only)
    #[arg(long)]
    pub explanation: Option<String>,
}

pub async fn execute(ctx: &AppContext, args: ScoreArgs) -> Result<()> {
    match args.target {
        ScoreTarget::Node => {
            let explanation = match args.explanation.as_deref() {
                Some(raw) => Some(
                    serde_json::from_str::<serde_json::Value>(raw)
                        .context("--explanation is not valid JSON")?,
                ),
                None => None,
            };
            anomaly::record_node_score(&ctx.pool, None, &args.id, args.score, explanation).await?;
        }
        ScoreTarget::Edge => {
            if args.explanation.is_some() {
                bail!("Edges do not carry an anomaly explanation");
            }
            anomaly::record_edge_score(&ctx.pool, None, &args.id, args.score).await?;
        }
    }

    println!(
        "{} {} = {}",
        "Scored".green().bold(),
        args.id.yellow(),
        format!("{:.3}", args.score).cyan()
    );
    Ok(())
}
