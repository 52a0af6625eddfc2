use std::path::Path;

use anyhow::{Context, Result};
use hindsight::config::HindsightConfig;
use hindsight::memory::types::EventType;
use hindsight::pipeline::extraction::create_extractor;
use hindsight::pipeline::transcription::create_transcriber;
use hindsight::pipeline::{EventPipeline, IngestPayload};

use super::{open_stores, spinner};

pub struct IngestArgs<'a> {
    pub file: &'a Path,
    pub event_type: EventType,
    pub source: Option<String>,
    pub title: Option<String>,
}

/// Run one file through the extraction pipeline.
pub async fn ingest(config: &HindsightConfig, args: IngestArgs<'_>) -> Result<()> {
    let mut payload = if args.event_type == EventType::Audio {
        let audio = std::fs::read(args.file)
            .with_context(|| format!("failed to read {}", args.file.display()))?;
        let mut payload = IngestPayload::new(String::new(), EventType::Audio);
        payload.audio = Some(audio);
        payload
    } else {
        let content = std::fs::read_to_string(args.file)
            .with_context(|| format!("failed to read {}", args.file.display()))?;
        anyhow::ensure!(!content.trim().is_empty(), "{} is empty", args.file.display());
        IngestPayload::new(content, args.event_type)
    };

    let file_name = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    payload.source = Some(args.source.unwrap_or_else(|| "cli".to_string()));
    payload.source_id = Some(args.file.display().to_string());
    payload
        .metadata
        .insert("title".into(), args.title.unwrap_or(file_name).into());

    let stores = open_stores(config)?;
    let extractor = create_extractor(&config.extraction)?;
    let transcriber = create_transcriber(&config.transcription)?;
    let pipeline = EventPipeline::spawn(stores, extractor, transcriber, config);

    let pb = spinner("processing")?;
    let result = pipeline.process_event(payload).await;
    pb.finish_and_clear();
    let processed = result?;

    println!("Event:     {}", processed.event_id);
    println!("Entities:  {}", processed.entity_ids.len());
    for id in &processed.entity_ids {
        println!("  {id}");
    }
    println!("Tasks:     {}", processed.task_ids.len());
    for id in &processed.task_ids {
        println!("  {id}");
    }
    if processed.degraded {
        println!("Extraction failed; the raw content was stored without structure.");
    }
    Ok(())
}
