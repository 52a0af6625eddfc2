use anyhow::Result;
use hindsight::config::HindsightConfig;
use hindsight::memory::reconcile::{reconcile, ReconcileOptions};

use super::{open_stores, spinner};

/// Rebuild the vector index and graph from the relational store.
pub async fn reindex(config: &HindsightConfig, reembed: bool) -> Result<()> {
    let stores = open_stores(config)?;

    if reembed {
        println!("Re-embedding with {}...", stores.embedder.model_name());
    }
    let pb = spinner("reconciling secondary indexes")?;
    let result =
        tokio::task::spawn_blocking(move || reconcile(&stores, ReconcileOptions { reembed })).await?;
    pb.finish_and_clear();
    let report = result?;

    println!("Reindex complete.");
    println!("  Embeddings regenerated: {}", report.embeddings_regenerated);
    println!("  Vectors upserted:       {}", report.vectors_upserted);
    println!("  Vectors removed:        {}", report.vectors_removed);
    println!("  Graph nodes synced:     {}", report.nodes_synced);
    println!("  Graph edges synced:     {}", report.edges_synced);
    if report.failures > 0 {
        println!("  Failures:               {} (see log)", report.failures);
    }
    Ok(())
}
