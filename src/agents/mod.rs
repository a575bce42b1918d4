pub mod analyst;
pub mod findings;
pub mod parse;
pub mod prompts;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::curate::types::CurationRecord;
use crate::llm::{preview, CompletionClient};
use crate::search::{SearchHit, SearchProvider};
use crate::state::AgentProfile;

use findings::{EvidenceFindings, Polarity};
use parse::{extract_object, extract_structured};

/// Search limits shared by both evidence agents.
#[derive(Debug, Clone, Copy)]
pub struct SearchBudget {
    pub max_queries: usize,
    pub max_results: usize,
    pub politeness_delay: Duration,
}

/// Everything one agent gathered from the search loop.
#[derive(Debug, Default)]
struct SearchRound {
    pool: Vec<SearchHit>,
    context: String,
}

/// A one-sided evidence hunter. The Researcher and the Skeptic are the same
/// machine pointed in opposite directions; neither sees the other's state.
pub struct EvidenceAgent {
    polarity: Polarity,
    llm: CompletionClient,
    profile: AgentProfile,
    search: Arc<dyn SearchProvider>,
    budget: SearchBudget,
}

impl EvidenceAgent {
    pub fn new(
        polarity: Polarity,
        llm: CompletionClient,
        profile: AgentProfile,
        search: Arc<dyn SearchProvider>,
        budget: SearchBudget,
    ) -> Self {
        Self {
            polarity,
            llm,
            profile,
            search,
            budget,
        }
    }

    pub async fn run(&self, hypothesis: &str, curated: &CurationRecord) -> Result<EvidenceFindings> {
        info!(
            agent = self.llm.agent(),
            hypothesis = preview(hypothesis, 120),
            "Evidence agent starting"
        );

        let queries = self.generate_queries(hypothesis, curated).await?;
        info!(agent = self.llm.agent(), count = queries.len(), "Generated search queries");

        let round = self.run_searches(&queries).await;
        let findings = self.synthesize(hypothesis, curated, &round).await?;

        info!(
            agent = self.llm.agent(),
            claims = findings.claims.len(),
            sources = findings.sources.len(),
            "Evidence agent finished"
        );
        let orphans = findings.orphan_claims().len();
        if orphans > 0 {
            warn!(agent = self.llm.agent(), orphans, "Claims cite URLs missing from sources");
        }
        Ok(findings)
    }

    pub fn fallback_query(&self, hypothesis: &str) -> String {
        match self.polarity {
            Polarity::Supporting => format!("market trends supporting {}", hypothesis),
            Polarity::Refuting => format!("problems with {} failures market saturation", hypothesis),
        }
    }

    async fn generate_queries(&self, hypothesis: &str, curated: &CurationRecord) -> Result<Vec<String>> {
        let system = match self.polarity {
            Polarity::Supporting => prompts::QUERY_SYSTEM_SUPPORTING,
            Polarity::Refuting => prompts::QUERY_SYSTEM_REFUTING,
        };
        let user = prompts::query_user(
            self.polarity,
            hypothesis,
            &curated.prompt_context(1500),
            self.budget.max_queries,
        )?;

        let raw = self.llm.complete_with(&self.profile, system, &user, 1024).await?;
        let queries = parse_queries(&raw, self.budget.max_queries);
        if queries.is_empty() {
            warn!(agent = self.llm.agent(), "Query generation unusable, using fallback query");
            return Ok(vec![self.fallback_query(hypothesis)]);
        }
        Ok(queries)
    }

    /// Run queries in order. A failing query contributes nothing.
    async fn run_searches(&self, queries: &[String]) -> SearchRound {
        let mut round = SearchRound::default();
        let mut blocks = Vec::new();

        for (i, query) in queries.iter().enumerate() {
            if i > 0 && !self.budget.politeness_delay.is_zero() {
                tokio::time::sleep(self.budget.politeness_delay).await;
            }
            let hits = match self.search.search(query).await {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(agent = self.llm.agent(), query = %query, error = %e, "Search failed");
                    continue;
                }
            };
            debug!(agent = self.llm.agent(), query = %query, results = hits.len(), "Search done");

            for hit in hits.into_iter().take(self.budget.max_results) {
                blocks.push(format!(
                    "SOURCE: {}\nURL: {}\nSNIPPET: {}",
                    hit.title, hit.url, hit.snippet
                ));
                round.pool.push(hit);
            }
        }

        round.context = blocks.join("\n\n");
        round
    }

    async fn synthesize(
        &self,
        hypothesis: &str,
        curated: &CurationRecord,
        round: &SearchRound,
    ) -> Result<EvidenceFindings> {
        let (system, verb) = match self.polarity {
            Polarity::Supporting => (prompts::RESEARCHER_SYSTEM, "support"),
            Polarity::Refuting => (prompts::SKEPTIC_SYSTEM, "challenge"),
        };
        let search_context = if round.context.is_empty() {
            "(no search results were found)".to_string()
        } else {
            preview(&round.context, 4000).to_string()
        };
        let user = prompts::evidence_user(
            verb,
            hypothesis,
            &curated.prompt_context(2000),
            &search_context,
        )?;

        let raw = self.llm.complete_with(&self.profile, system, &user, 4096).await?;
        let obj = extract_object(&raw)?;
        Ok(EvidenceFindings::from_model(self.polarity, obj, &round.pool))
    }
}

/// A JSON array of query strings, capped. Anything else yields no queries.
fn parse_queries(raw: &str, max: usize) -> Vec<String> {
    match extract_structured(raw) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .filter_map(|q| match q {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                _ => None,
            })
            .take(max)
            .collect(),
        _ => Vec::new(),
    }
}
