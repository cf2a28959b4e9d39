//! Read-side graph commands: explore, anomalies, stats.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use canopy_core::{EdgeType, NodeType};
use canopy_graph::queries::anomaly;
use canopy_graph::{get_statistics, TraversalEngine};

use super::AppContext;
use crate::output;

fn parse_node_type(raw: &str) -> Result<NodeType, String> {
    raw.parse().map_err(|e: canopy_core::CanopyError| e.to_string())
}

fn parse_edge_type(raw: &str) -> Result<EdgeType, String> {
    raw.parse().map_err(|e: canopy_core::CanopyError| e.to_string())
}

#[derive(Args)]
pub struct ExploreArgs {
    /// Center node id (e.g. plant:PLT-0042)
    pub node_id: String,

    /// Traversal depth
    #[arg(long, default_value = "2")]
    pub hops: u32,

    /// Only walk edges of this type (repeatable)
    #[arg(long = "edge-type", value_parser = parse_edge_type)]
    pub edge_types: Vec<EdgeType>,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct AnomaliesArgs {
    #[arg(long)]
    pub site: String,

    #[arg(long, default_value = "0.5")]
    pub min_score: f64,

    #[arg(long, value_parser = parse_node_type)]
    pub node_type: Option<NodeType>,

    #[arg(long, default_value = "20")]
    pub limit: usize,

    /// Rank edges instead of nodes
    #[arg(long)]
    pub edges: bool,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct StatsArgs {
    #[arg(long)]
    pub site: String,

    #[arg(long)]
    pub json: bool,
}

pub async fn explore(ctx: &AppContext, args: ExploreArgs) -> Result<()> {
    let engine = TraversalEngine::new(ctx.pool.clone(), ctx.config.traversal.clone());
    let hood = engine
        .get_neighborhood(&args.node_id, args.hops, &args.edge_types)
        .await?;

    if args.json {
        return output::print_json(&hood);
    }
    println!(
        "{} {} (hops={}/{})",
        "Exploring".bold(),
        args.node_id.yellow(),
        args.hops,
        engine.config().max_hops
    );
    println!("{}", "─".repeat(50));
    output::print_neighborhood(&hood);
    Ok(())
}

pub async fn anomalies(ctx: &AppContext, args: AnomaliesArgs) -> Result<()> {
    if args.edges {
        if args.node_type.is_some() {
            anyhow::bail!("--node-type does not apply to --edges");
        }
        let edges =
            anomaly::get_anomalous_edges(&ctx.pool, &args.site, args.min_score, None, args.limit)
                .await?;
        if args.json {
            return output::print_json(&edges);
        }
        output::print_anomalous_edges(&edges);
        return Ok(());
    }

    let nodes = anomaly::get_anomalous_nodes(
        &ctx.pool,
        &args.site,
        args.min_score,
        args.node_type,
        args.limit,
    )
    .await?;
    if args.json {
        return output::print_json(&nodes);
    }
    output::print_anomalous_nodes(&nodes);
    Ok(())
}

pub async fn stats(ctx: &AppContext, args: StatsArgs) -> Result<()> {
    let stats = get_statistics(&ctx.pool, &args.site).await?;
    if args.json {
        return output::print_json(&stats);
    }
    output::print_statistics(&stats);
    Ok(())
}
