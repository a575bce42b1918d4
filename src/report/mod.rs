pub mod template;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::agents::analyst::SynthesisRecord;
use crate::agents::findings::EvidenceFindings;
use crate::agents::parse::{extract_object, string_list};
use crate::agents::prompts;
use crate::llm::CompletionClient;
use crate::state::{AgentProfile, RunContext};

pub use template::{escape_html, report_file_name, unescape_html};

/// Rendered report markup. Only the citation validator edits it after render.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub html: String,
}

impl Report {
    pub async fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(path, &self.html)
            .await
            .with_context(|| format!("Failed to write report {}", path.display()))
    }
}

/// Model-written HTML fragments, one per report section.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Narrative {
    pub executive_summary: String,
    pub supporting_section: String,
    pub skeptic_section: String,
    pub micro_macro_section: String,
    pub decision_tree_section: String,
    pub recommendation_section: String,
}

impl Narrative {
    fn from_model(obj: &Map<String, Value>) -> Self {
        let field = |key: &str| string_list(obj.get(key)).join("\n");
        Self {
            executive_summary: field("executive_summary"),
            supporting_section: field("supporting_section"),
            skeptic_section: field("skeptic_section"),
            micro_macro_section: field("micro_macro_section"),
            decision_tree_section: field("decision_tree_section"),
            recommendation_section: field("recommendation_section"),
        }
    }

    /// Unparseable output becomes the whole summary.
    pub fn parse_or_fallback(raw: &str) -> Self {
        match extract_object(raw) {
            Ok(obj) => Self::from_model(&obj),
            Err(e) => {
                warn!(error = %e, "Narrative was not JSON, using raw text as summary");
                Self {
                    executive_summary: raw.to_string(),
                    ..Default::default()
                }
            }
        }
    }
}

/// Stage 4: narrative request plus deterministic assembly.
pub struct ReportRenderer {
    llm: CompletionClient,
    profile: AgentProfile,
}

impl ReportRenderer {
    pub fn new(llm: CompletionClient, profile: AgentProfile) -> Self {
        Self { llm, profile }
    }

    pub async fn render(
        &self,
        ctx: &RunContext,
        synthesis: &SynthesisRecord,
        supporting: &EvidenceFindings,
        refuting: &EvidenceFindings,
    ) -> Result<Report> {
        let generated_at = Utc::now();
        let analyst_output = serde_json::to_string_pretty(synthesis).unwrap_or_default();
        let timestamp = generated_at.to_rfc3339();
        let user = prompts::report_builder_user(
            &ctx.hypothesis,
            &analyst_output,
            &ctx.run_id,
            &timestamp,
        )?;

        let raw = self
            .llm
            .complete_with(&self.profile, prompts::REPORT_BUILDER_SYSTEM, &user, 8000)
            .await?;
        let narrative = Narrative::parse_or_fallback(&raw);

        let html = template::assemble(&template::Page {
            hypothesis: &ctx.hypothesis,
            run_id: &ctx.run_id,
            generated_at,
            synthesis,
            supporting,
            refuting,
            narrative: &narrative,
        });
        info!(run_id = %ctx.run_id, bytes = html.len(), "Report rendered");
        Ok(Report { html })
    }
}

/// Where a report for this run lands, honoring an explicit file name.
pub fn report_path(output_dir: &Path, ctx: &RunContext, slug_len: usize, override_name: Option<&str>) -> PathBuf {
    match override_name {
        Some(name) => output_dir.join(name),
        None => output_dir.join(report_file_name(
            ctx.started_at,
            &ctx.hypothesis,
            ctx.short_id(),
            slug_len,
        )),
    }
}
