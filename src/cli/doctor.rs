//! CLI `doctor` command: run store diagnostics and print a health report.

use anyhow::{Context, Result};
use hindsight::config::HindsightConfig;
use hindsight::db;
use hindsight::index::{Collection, GraphStore, SqliteGraphStore, SqliteVecIndex, VectorIndex};
use hindsight::memory::stats::memory_stats;

use super::configured_model_name;

/// Run diagnostics against all three stores and print a health report.
pub fn doctor(config: &HindsightConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `hindsight serve` or `hindsight ingest` to initialize.");
        return Ok(());
    }

    let conn = db::open_database(&db_path).context("failed to open database (may be corrupt)")?;
    let report = db::check_database_health(&conn).context("failed to run health check")?;
    let stats = memory_stats(&conn, Some(&db_path))?;

    println!("Hindsight Health Report");
    println!("=======================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(stats.db_size_bytes));
    println!(
        "Schema version:    {} (expected {})",
        report.schema_version, report.expected_schema_version
    );
    println!("Journal mode:      {}", report.journal_mode);
    println!("sqlite-vec:        v{}", report.sqlite_vec_version);
    println!();

    let configured = configured_model_name(&config.embedding);
    println!("Embedding model:");
    println!("  Stored:          {}", report.embedding_model.as_deref().unwrap_or("(not set)"));
    println!("  Configured:      {configured}");
    if let Some(ref stored) = report.embedding_model {
        let dims_match = report.embedding_dimensions == Some(config.embedding.dimensions);
        if stored != configured || !dims_match {
            println!("  WARNING: model mismatch! Run `hindsight reindex --reembed` to update vectors.");
        } else {
            println!("  Status:          OK (match)");
        }
    }
    println!();

    println!("Row counts (live / deleted):");
    println!("  Entities:        {} / {}", stats.entities.live, stats.entities.deleted);
    println!("  Events:          {} / {}", stats.events.live, stats.events.deleted);
    println!("  Tasks:           {} / {}", stats.tasks.live, stats.tasks.deleted);
    println!("  Relationships:   {}", stats.relationships);
    println!();

    println!("Secondary indexes:");
    match SqliteVecIndex::open(config.resolved_vector_path(), config.embedding.dimensions) {
        Ok(index) => {
            let entities = index.count(Collection::Entities).unwrap_or(0);
            let events = index.count(Collection::Events).unwrap_or(0);
            println!("  Entity vectors:  {entities}");
            println!("  Event vectors:   {events}");
            if entities as u64 > stats.entities.live || events as u64 > stats.events.live {
                println!("  WARNING: vector index holds stale entries. Run `hindsight reindex`.");
            }
        }
        Err(e) => println!("  Vector index:    unavailable ({e})"),
    }
    match SqliteGraphStore::open(config.resolved_graph_path()).and_then(|g| g.counts()) {
        Ok((nodes, edges)) => {
            println!("  Graph nodes:     {nodes}");
            println!("  Graph edges:     {edges}");
            if (edges as u64) < stats.relationships {
                println!("  WARNING: graph is missing edges. Run `hindsight reindex`.");
            }
        }
        Err(e) => println!("  Graph store:     unavailable ({e})"),
    }
    println!();

    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("Recovery steps:");
        println!("  1. Restore from a backup: cp backup.db {}", db_path.display());
        println!("  2. Then rebuild the secondary indexes: hindsight reindex");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
