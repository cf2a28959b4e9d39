//! Schema migration command.

use anyhow::Result;
use canopy_db::queries::stats::count_rows;
use colored::Colorize;

use super::AppContext;

/// The pool is migrated on open; report where it lives and what it holds.
pub async fn execute(ctx: &AppContext) -> Result<()> {
    let (nodes, edges) = count_rows(&ctx.pool).await?;

    println!(
        "{} {}",
        "Database ready:".green().bold(),
        ctx.config.database_path.display()
    );
    println!("  Node rows: {}", nodes.to_string().cyan());
    println!("  Edge rows: {}", edges.to_string().cyan());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_graph::CanopyConfig;

    #[tokio::test]
    async fn test_migrate_reports_on_fresh_database() {
        let ctx = AppContext {
            config: CanopyConfig::default(),
            pool: canopy_db::init_memory_pool().unwrap(),
        };
        execute(&ctx).await.unwrap();
    }
}
