use anyhow::Result;
use hindsight::config::HindsightConfig;
use hindsight::retrieval::{RetrievalEngine, RetrievalRequest};

use super::{open_stores, preview};

/// Rank memories for `query` and print them.
pub async fn search(
    config: &HindsightConfig,
    query: &str,
    limit: Option<usize>,
    entity_context: Vec<String>,
) -> Result<()> {
    let stores = open_stores(config)?;
    let engine = RetrievalEngine::new(stores, config.retrieval.clone());

    let mut request = RetrievalRequest::new(query).with_entity_context(entity_context);
    request.limit = limit;
    let response = engine.retrieve(request).await?;

    if response.degraded {
        println!("Note: query embedding failed, ranking by recency and context only.\n");
    }
    if response.results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!(
        "Found {} result(s) from {} candidate(s)\n",
        response.results.len(),
        response.total_candidates
    );

    for (i, result) in response.results.iter().enumerate() {
        println!(
            "  {}. [{}] {} (score: {:.4} = semantic {:.3} / temporal {:.3} / relational {:.3})",
            i + 1,
            result.source,
            result.id,
            result.score,
            result.scores.semantic,
            result.scores.temporal,
            result.scores.relational,
        );
        println!("     {}", preview(&result.content, 120));
        println!();
    }

    if response.skipped > 0 {
        println!("{} candidate(s) skipped without a usable embedding.", response.skipped);
    }

    Ok(())
}
