use anyhow::Result;
use hindsight::config::HindsightConfig;
use hindsight::memory::stats::memory_stats;

/// Display record counts in the terminal.
pub fn stats(config: &HindsightConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = hindsight::db::open_database(&db_path)?;

    let response = memory_stats(&conn, Some(&db_path))?;

    println!("Memory Statistics");
    println!("{}", "=".repeat(40));
    println!("  {:<14} {:>8} {:>8}", "", "live", "deleted");
    for (label, counts) in [
        ("Entities", response.entities),
        ("Events", response.events),
        ("Tasks", response.tasks),
    ] {
        println!("  {:<14} {:>8} {:>8}", label, counts.live, counts.deleted);
    }
    println!();

    println!("Tasks by status:");
    for (status, count) in &response.tasks_by_status {
        println!("  {:<14} {}", status, count);
    }
    println!();

    println!("Relationships:         {}", response.relationships);
    println!("Database size:         {} bytes", response.db_size_bytes);

    if let Some(ref oldest) = response.oldest_event {
        println!("Oldest event:          {oldest}");
    }
    if let Some(ref newest) = response.newest_event {
        println!("Newest event:          {newest}");
    }

    Ok(())
}
