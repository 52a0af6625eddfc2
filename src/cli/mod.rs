pub mod doctor;
pub mod ingest;
pub mod reindex;
pub mod search;
pub mod stats;

use anyhow::{Context, Result};
use hindsight::config::{EmbeddingConfig, HindsightConfig};
use hindsight::embedding;
use hindsight::memory::Stores;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const MODEL_URL: &str =
    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/onnx/model.onnx";
const TOKENIZER_URL: &str =
    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/tokenizer.json";

/// Download the ONNX embedding model and tokenizer to the cache directory.
pub async fn model_download(config: &EmbeddingConfig) -> Result<()> {
    let cache_dir = hindsight::config::expand_tilde(&config.cache_dir);
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("failed to create cache dir: {}", cache_dir.display()))?;

    let model_path = cache_dir.join("model.onnx");
    let tokenizer_path = cache_dir.join("tokenizer.json");

    if model_path.exists() {
        println!("Model already exists at {}", model_path.display());
    } else {
        println!("Downloading model.onnx (~90MB)...");
        download_file(MODEL_URL, &model_path).await?;
        println!("Model saved to {}", model_path.display());
    }

    if tokenizer_path.exists() {
        println!("Tokenizer already exists at {}", tokenizer_path.display());
    } else {
        println!("Downloading tokenizer.json...");
        download_file(TOKENIZER_URL, &tokenizer_path).await?;
        println!("Tokenizer saved to {}", tokenizer_path.display());
    }

    println!("Model download complete. Ready for use.");
    Ok(())
}

/// Download a file with a progress bar. Writes to a temp file, then renames.
async fn download_file(url: &str, dest: &Path) -> Result<()> {
    let mut response = reqwest::get(url)
        .await
        .with_context(|| format!("HTTP request failed for {url}"))?;

    anyhow::ensure!(
        response.status().is_success(),
        "download failed with HTTP {}",
        response.status()
    );

    let pb = match response.content_length() {
        Some(size) => {
            let pb = ProgressBar::new(size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")?
                    .progress_chars("##-"),
            );
            pb
        }
        None => ProgressBar::new_spinner(),
    };

    let tmp_path = dest.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;

    while let Some(chunk) = response.chunk().await.context("error reading response")? {
        file.write_all(&chunk).await.context("error writing to file")?;
        pb.inc(chunk.len() as u64);
    }

    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest)
        .await
        .context("failed to rename temp file")?;

    pb.finish_and_clear();
    Ok(())
}

/// Open the configured stores with the configured embedding provider.
pub(crate) fn open_stores(config: &HindsightConfig) -> Result<Stores> {
    let embedder = embedding::create_provider(&config.embedding)?;
    Stores::open(config, embedder)
}

/// Model name the configured provider will report.
pub(crate) fn configured_model_name(config: &EmbeddingConfig) -> &str {
    match config.provider.as_str() {
        "hashing" => "hashing",
        _ => &config.model,
    }
}

/// A spinner on stderr for long-running steps.
pub(crate) fn spinner(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("  {spinner} {msg} ({elapsed})")?);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    Ok(pb)
}

pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}
