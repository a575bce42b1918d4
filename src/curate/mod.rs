pub mod ingest;
pub mod types;

use anyhow::{Context, Result};
use tracing::info;

use crate::agents::parse::extract_object;
use crate::agents::prompts;
use crate::llm::CompletionClient;
use crate::state::AgentProfile;

use ingest::{IngestLimits, Piece, Source};
use types::CurationRecord;

/// Stage 1: turns raw inputs into `CurationRecord`s.
pub struct Curator {
    llm: CompletionClient,
    profile: AgentProfile,
    limits: IngestLimits,
}

impl Curator {
    pub fn new(llm: CompletionClient, profile: AgentProfile, limits: IngestLimits) -> Self {
        Self {
            llm,
            profile,
            limits,
        }
    }

    pub async fn curate(&self, raw_source: &str) -> Result<CurationRecord> {
        let source = Source::parse(raw_source);
        let pieces = ingest::load(&source, self.limits)
            .await
            .with_context(|| format!("Failed to ingest {}", raw_source))?;

        let mut records = Vec::with_capacity(pieces.len());
        for piece in &pieces {
            records.push(self.ask(piece).await?);
        }

        let record = match records.len() {
            1 => records.remove(0),
            _ => CurationRecord::merge("transcript_chunked", &records),
        };
        info!(
            source = raw_source,
            data_points = record.key_data_points.len(),
            quotes = record.verbatim_quotes.len(),
            "Source curated"
        );
        Ok(record)
    }

    /// Curate every source in order and merge into one combined context.
    pub async fn curate_all(&self, sources: &[String]) -> Result<CurationRecord> {
        let mut records = Vec::with_capacity(sources.len());
        for source in sources {
            info!(source = %source, "Curating");
            records.push(self.curate(source).await?);
        }
        Ok(CurationRecord::merge("combined", &records))
    }

    async fn ask(&self, piece: &Piece) -> Result<CurationRecord> {
        let user = prompts::curator_user(piece.source_type, &piece.content)?;
        let raw = self
            .llm
            .complete_with(&self.profile, prompts::CURATOR_SYSTEM, &user, 4096)
            .await?;
        let obj = extract_object(&raw)?;
        Ok(CurationRecord::from_value(
            piece.source_type,
            &serde_json::Value::Object(obj),
        ))
    }
}
