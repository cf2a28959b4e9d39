//! Terminal output formatting.

use anyhow::Result;
use colored::{ColoredString, Colorize};
use serde::Serialize;

use canopy_core::{GraphEdge, GraphNode};
use canopy_graph::{GraphStatistics, Neighborhood, SyncReport};

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn score_colored(score: Option<f64>) -> ColoredString {
    match score {
        Some(s) if s >= 0.8 => format!("{:.3}", s).red().bold(),
        Some(s) if s >= 0.5 => format!("{:.3}", s).yellow(),
        Some(s) => format!("{:.3}", s).normal(),
        None => "-".dimmed(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

pub fn print_sync_reports(reports: &[SyncReport]) {
    if reports.is_empty() {
        println!("{}", "Batch held no partitions.".dimmed());
        return;
    }

    println!(
        "{:<16} {:<6} {:<24} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "Site", "Kind", "Type", "Rows", "New", "Changed", "Revived", "Retired"
    );
    println!("{}", "-".repeat(94));
    for r in reports {
        println!(
            "{:<16} {:<6} {:<24} {:>8} {:>8} {:>8} {:>8} {:>8}",
            truncate(&r.site_id, 15),
            r.kind.as_str(),
            r.type_name.cyan(),
            r.received,
            r.upserted.inserted,
            r.upserted.updated,
            r.upserted.reactivated,
            r.deactivated
        );
    }
}

pub fn print_neighborhood(hood: &Neighborhood) {
    let Some(center) = hood.center() else {
        return;
    };
    let state = if center.is_active { "".normal() } else { " (inactive)".red() };
    println!("{} [{}] {}{}", "Center:".bold(), center.node_type.as_str().cyan(), center.label, state);

    if hood.nodes.len() > 1 {
        println!("\n{} ({}):", "Connected nodes".bold(), hood.nodes.len() - 1);
        for node in &hood.nodes[1..] {
            let state = if node.is_active { "".normal() } else { " (inactive)".red() };
            println!(
                "  {} [{}] {} {}{}",
                "•".dimmed(),
                node.node_type.as_str().dimmed(),
                node.label,
                node.node_id.dimmed(),
                state
            );
        }
    }

    if !hood.edges.is_empty() {
        println!("\n{} ({}):", "Edges".bold(), hood.edges.len());
        for e in &hood.edges {
            println!(
                "  {} {} {} {}",
                e.source_node_id.dimmed(),
                "-[".dimmed(),
                e.edge_type.as_str().yellow(),
                format!("]-> {}", e.target_node_id).dimmed()
            );
        }
    }

    if hood.nodes.len() == 1 && hood.edges.is_empty() {
        println!("{}", "No neighbors.".dimmed());
    }
}

pub fn print_anomalous_nodes(nodes: &[GraphNode]) {
    if nodes.is_empty() {
        println!("{}", "No anomalous nodes.".dimmed());
        return;
    }
    println!("{:<8} {:<20} {:<40} {:<30}", "Score", "Type", "Node", "Label");
    println!("{}", "-".repeat(100));
    for n in nodes {
        println!(
            "{:<8} {:<20} {:<40} {:<30}",
            score_colored(n.anomaly_score),
            n.node_type.as_str(),
            truncate(&n.node_id, 39),
            truncate(&n.label, 29)
        );
        if let Some(explanation) = &n.anomaly_explanation {
            println!("         {}", explanation.to_string().dimmed());
        }
    }
}

pub fn print_anomalous_edges(edges: &[GraphEdge]) {
    if edges.is_empty() {
        println!("{}", "No anomalous edges.".dimmed());
        return;
    }
    println!("{:<8} {:<24} {}", "Score", "Type", "Endpoints");
    println!("{}", "-".repeat(90));
    for e in edges {
        println!(
            "{:<8} {:<24} {} -> {}",
            score_colored(e.anomaly_score),
            e.edge_type.as_str(),
            e.source_node_id,
            e.target_node_id
        );
    }
}

pub fn print_statistics(stats: &GraphStatistics) {
    println!("{} {}", "Graph statistics for".bold(), stats.site_id.yellow());
    println!("{}", "─".repeat(40));
    println!("  Active nodes: {}", stats.total_nodes.to_string().cyan());
    for (t, count) in &stats.nodes_by_type {
        println!("    {:<24} {}", t.as_str(), count);
    }
    println!("  Active edges: {}", stats.total_edges.to_string().cyan());
    for (t, count) in &stats.edges_by_type {
        println!("    {:<24} {}", t.as_str(), count);
    }
    match stats.last_snapshot_at {
        Some(at) => println!("  Last snapshot: {}", at.to_rfc3339().green()),
        None => println!("  Last snapshot: {}", "never".yellow()),
    }
    println!("{}", "─".repeat(40));
}
