use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::llm::preview;

/// Where an input comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    File(PathBuf),
    Url(String),
}

impl Source {
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            Source::Url(raw.to_string())
        } else {
            Source::File(PathBuf::from(raw))
        }
    }
}

/// One unit of raw content handed to the curator model.
#[derive(Debug, Clone, PartialEq)]
pub struct Piece {
    pub source_type: &'static str,
    pub content: String,
}

/// Limits applied while reading sources.
#[derive(Debug, Clone, Copy)]
pub struct IngestLimits {
    pub chunk_size: usize,
    pub max_article_chars: usize,
    pub max_table_rows: usize,
}

/// Read a source into pieces. Long text files yield several chunks.
pub async fn load(source: &Source, limits: IngestLimits) -> Result<Vec<Piece>> {
    match source {
        Source::Url(url) => Ok(vec![Piece {
            source_type: "internet_article",
            content: fetch_article(url, limits.max_article_chars).await?,
        }]),
        Source::File(path) => load_file(path, limits).await,
    }
}

async fn load_file(path: &Path, limits: IngestLimits) -> Result<Vec<Piece>> {
    if !path.exists() {
        anyhow::bail!("Source file not found: {}", path.display());
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "md" => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            if text.chars().count() > limits.chunk_size {
                let chunks = chunk_text(&text, limits.chunk_size);
                info!(
                    path = %path.display(),
                    chars = text.chars().count(),
                    chunks = chunks.len(),
                    "Large transcript, curating in chunks"
                );
                Ok(chunks
                    .into_iter()
                    .map(|content| Piece {
                        source_type: "transcript_chunk",
                        content,
                    })
                    .collect())
            } else {
                Ok(vec![Piece {
                    source_type: "transcript",
                    content: text,
                }])
            }
        }
        "csv" => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(vec![Piece {
                source_type: "csv_data",
                content: summarize_csv(&text, limits.max_table_rows),
            }])
        }
        other => anyhow::bail!(
            "Unsupported file type '.{}' for {} (supported: .txt, .md, .csv)",
            other,
            path.display()
        ),
    }
}

/// Split CSV text into records. Newlines inside a quoted field stay in
/// their record. Blank records are dropped.
fn csv_records(text: &str) -> Vec<&str> {
    let mut records = Vec::new();
    let mut in_quotes = false;
    let mut begin = 0;
    for (i, c) in text.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '\n' if !in_quotes => {
                records.push(&text[begin..i]);
                begin = i + 1;
            }
            _ => {}
        }
    }
    records.push(&text[begin..]);
    records
        .into_iter()
        .map(|r| r.strip_suffix('\r').unwrap_or(r))
        .filter(|r| !r.trim().is_empty())
        .collect()
}

fn csv_field_count(record: &str) -> usize {
    let mut in_quotes = false;
    let mut count = 1;
    for c in record.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => count += 1,
            _ => {}
        }
    }
    count
}

/// Header, a row sample, and row and column counts of a CSV file.
fn summarize_csv(text: &str, max_rows: usize) -> String {
    let records = csv_records(text);
    let (header, rows) = match records.split_first() {
        Some((header, rows)) => (*header, rows),
        None => ("", &[][..]),
    };
    let columns = if header.is_empty() { 0 } else { csv_field_count(header) };
    let sample = rows[..rows.len().min(max_rows)].join("\n");
    format!(
        "SCHEMA:\n{}\n\nSAMPLE ({} of {} rows):\n{}\n\nSTATISTICS:\nrow_count = {}\ncolumn_count = {}",
        header,
        rows.len().min(max_rows),
        rows.len(),
        sample,
        rows.len(),
        columns
    )
}

/// Fetch a page and flatten it to plain text.
async fn fetch_article(url: &str, max_chars: usize) -> Result<String> {
    info!(url, "Fetching article URL");
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .user_agent("Mozilla/5.0 (compatible; pra/0.1)")
        .build()
        .context("Failed to create HTTP client")?;

    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to fetch URL {}", url))?
        .error_for_status()
        .with_context(|| format!("Failed to fetch URL {}", url))?;

    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let body = resp.bytes().await.context("Failed to read response body")?;

    // Convert HTML to text if applicable
    let text = if content_type.contains("html") {
        html2text::from_read(&body[..], 120)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).to_string())
    } else {
        String::from_utf8_lossy(&body).to_string()
    };
    let text = collapse_whitespace(&text);

    Ok(preview(&text, max_chars).to_string())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split text into `chunk_size`-char windows with 10% overlap.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = ((chunk_size as f64 * 0.9) as usize).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        start += step;
    }
    chunks
}
