use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::agents::analyst::Analyst;
use crate::agents::findings::Polarity;
use crate::agents::{EvidenceAgent, SearchBudget};
use crate::citations::probe::LinkProbe;
use crate::citations::CitationValidator;
use crate::curate::ingest::IngestLimits;
use crate::curate::Curator;
use crate::llm::{preview, CompletionClient, ModelBackend, RetryPolicy};
use crate::report::{report_path, ReportRenderer};
use crate::search::SearchProvider;
use crate::state::{AgentProfile, PipelineConfig, RunContext};

/// External capabilities the pipeline is built on.
#[derive(Clone)]
pub struct Capabilities {
    pub backend: Option<Arc<dyn ModelBackend>>,
    pub search: Arc<dyn SearchProvider>,
    pub probe: Arc<dyn LinkProbe>,
}

/// CURATE, then RESEARCH and SKEPTIC together, then ANALYZE, RENDER, VALIDATE.
/// Any stage failure aborts the run.
pub struct Pipeline {
    config: PipelineConfig,
    caps: Capabilities,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, caps: Capabilities) -> Self {
        Self { config, caps }
    }

    fn client(&self, ctx: &Arc<RunContext>, profile: &AgentProfile) -> CompletionClient {
        CompletionClient::new(
            self.caps.backend.clone(),
            ctx.clone(),
            profile.name,
            RetryPolicy {
                max_attempts: self.config.max_retries,
                base_delay: self.config.retry_base_delay,
            },
        )
    }

    fn evidence_agent(&self, ctx: &Arc<RunContext>, polarity: Polarity) -> EvidenceAgent {
        let profile = match polarity {
            Polarity::Supporting => &self.config.researcher,
            Polarity::Refuting => &self.config.skeptic,
        };
        EvidenceAgent::new(
            polarity,
            self.client(ctx, profile),
            profile.clone(),
            self.caps.search.clone(),
            SearchBudget {
                max_queries: self.config.max_search_queries,
                max_results: self.config.max_search_results,
                politeness_delay: self.config.politeness_delay,
            },
        )
    }

    /// Run every stage and return the path of the written report.
    pub async fn run(&self, ctx: Arc<RunContext>, output_name: Option<&str>) -> Result<PathBuf> {
        if ctx.sources.is_empty() {
            anyhow::bail!("No input sources supplied");
        }
        info!(
            run_id = %ctx.run_id,
            hypothesis = preview(&ctx.hypothesis, 120),
            sources = ctx.sources.len(),
            "Pipeline starting"
        );

        info!(run_id = %ctx.run_id, stage = "curate", "Stage started");
        let curator = Curator::new(
            self.client(&ctx, &self.config.curator),
            self.config.curator.clone(),
            IngestLimits {
                chunk_size: self.config.chunk_size,
                max_article_chars: self.config.max_article_chars,
                max_table_rows: self.config.max_table_rows,
            },
        );
        let curated = curator
            .curate_all(&ctx.sources)
            .await
            .context("Curation stage failed")?;

        info!(run_id = %ctx.run_id, stage = "evidence", "Stage started: researcher and skeptic in parallel");
        let researcher = self.evidence_agent(&ctx, Polarity::Supporting);
        let skeptic = self.evidence_agent(&ctx, Polarity::Refuting);
        let (supporting, refuting) = tokio::try_join!(
            async {
                researcher
                    .run(&ctx.hypothesis, &curated)
                    .await
                    .context("Researcher failed")
            },
            async {
                skeptic
                    .run(&ctx.hypothesis, &curated)
                    .await
                    .context("Skeptic failed")
            }
        )?;

        info!(run_id = %ctx.run_id, stage = "analyze", "Stage started");
        let analyst = Analyst::new(self.client(&ctx, &self.config.analyst), self.config.analyst.clone());
        let synthesis = analyst
            .synthesize(&ctx.hypothesis, &curated, &supporting, &refuting)
            .await
            .context("Analysis stage failed")?;

        info!(run_id = %ctx.run_id, stage = "render", tier = %synthesis.tier, "Stage started");
        let renderer = ReportRenderer::new(
            self.client(&ctx, &self.config.report_builder),
            self.config.report_builder.clone(),
        );
        let mut report = renderer
            .render(&ctx, &synthesis, &supporting, &refuting)
            .await
            .context("Render stage failed")?;
        let path = report_path(&self.config.output_dir, &ctx, self.config.slug_len, output_name);
        report.write_to(&path).await?;

        info!(run_id = %ctx.run_id, stage = "validate", "Stage started");
        let validator = CitationValidator::new(self.caps.search.clone(), self.caps.probe.clone());
        let before = report.html.clone();
        validator.validate_and_fix(&mut report).await;
        if report.html != before {
            report.write_to(&path).await?;
        }

        let elapsed = chrono::Utc::now() - ctx.started_at;
        info!(
            run_id = %ctx.run_id,
            path = %path.display(),
            elapsed_secs = elapsed.num_seconds(),
            "Pipeline complete"
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::agents::prompts;
    use crate::citations::probe::testing::MapProbe;
    use crate::search::testing::{hit, FixedSearch};

    const TREND_URL: &str = "https://example.com/travel-trends-2024";
    const HYPOTHESIS: &str = "Should we add a price comparison tool?";

    /// Replies by system prompt, so concurrent agents get their own answers.
    struct RoutedBackend {
        skeptic_synthesis: String,
        user_prompts: Mutex<Vec<(String, String)>>,
    }

    impl RoutedBackend {
        fn new() -> Self {
            Self {
                skeptic_synthesis: json!({"refuting_evidence": [{"claim": "Margins are thin"}]}).to_string(),
                user_prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelBackend for RoutedBackend {
        async fn call(&self, system: &str, user: &str, _model: &str, _temperature: f32, _max_tokens: u32) -> Result<String> {
            let (role, reply) = if system == prompts::CURATOR_SYSTEM {
                (
                    "curator",
                    json!({
                        "summary": "Users want to compare prices.",
                        "key_data_points": ["38% of surveyed users requested comparison"],
                        "verbatim_quotes": ["I always check three sites."]
                    })
                    .to_string(),
                )
            } else if system == prompts::QUERY_SYSTEM_SUPPORTING {
                ("researcher", r#"["travel price comparison demand"]"#.to_string())
            } else if system == prompts::QUERY_SYSTEM_REFUTING {
                ("skeptic", r#"["price comparison tool failures"]"#.to_string())
            } else if system == prompts::RESEARCHER_SYSTEM {
                (
                    "researcher",
                    json!({"supporting_evidence": [{"claim": "Comparison drives conversion", "source_url": TREND_URL}]})
                        .to_string(),
                )
            } else if system == prompts::SKEPTIC_SYSTEM {
                ("skeptic", self.skeptic_synthesis.clone())
            } else if system == prompts::ANALYST_SYSTEM {
                (
                    "analyst",
                    json!({
                        "recommendation_tier": "BUILD_MVP",
                        "micro_macro_pairs": [],
                        "decision_tree_path": [
                            {"id": "USER_DEMAND", "question": "Demand?", "answer": "Yes"},
                            {"id": "COMPETITOR_LANDSCAPE", "question": "Superior competitor?", "answer": "No"}
                        ],
                        "supporting_summary": [],
                        "skeptic_rebuttal": [],
                        "final_recommendation": "Start lean."
                    })
                    .to_string(),
                )
            } else {
                (
                    "report_builder",
                    json!({"executive_summary": format!("<p>See <a href=\"{}\">Travel Trends 2024</a>.</p>", TREND_URL)})
                        .to_string(),
                )
            };
            self.user_prompts
                .lock()
                .unwrap()
                .push((role.to_string(), user.to_string()));
            Ok(reply)
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        config: PipelineConfig,
        ctx: Arc<RunContext>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let transcript = dir.path().join("interview.txt");
        std::fs::write(&transcript, "I always check three sites before booking.").unwrap();
        let config = PipelineConfig {
            output_dir: dir.path().join("output"),
            log_dir: dir.path().join("logs"),
            politeness_delay: std::time::Duration::ZERO,
            retry_base_delay: std::time::Duration::from_millis(1),
            ..Default::default()
        };
        let ctx = Arc::new(RunContext::new(
            HYPOTHESIS,
            vec![transcript.to_string_lossy().into_owned()],
            &config.log_dir,
        ));
        Fixture {
            _dir: dir,
            config,
            ctx,
        }
    }

    fn trend_search() -> Arc<FixedSearch> {
        Arc::new(FixedSearch::new(vec![hit(
            "Travel Trends 2024",
            TREND_URL,
            "Comparison tools drive conversion.",
        )]))
    }

    #[tokio::test]
    async fn test_end_to_end_price_comparison() {
        let f = fixture();
        let backend = Arc::new(RoutedBackend::new());
        let probe = Arc::new(MapProbe::new(&[(TREND_URL, 200)]));
        let pipeline = Pipeline::new(
            f.config.clone(),
            Capabilities {
                backend: Some(backend.clone()),
                search: trend_search(),
                probe: probe.clone(),
            },
        );

        let path = pipeline.run(f.ctx.clone(), None).await.unwrap();

        assert!(path.starts_with(&f.config.output_dir));
        let html = std::fs::read_to_string(&path).unwrap();
        assert!(html.contains(&format!("<h1>{}</h1>", HYPOTHESIS)));
        assert!(html.contains("tier-build-mvp"));
        assert!(html.contains(&format!(r#"href="{}""#, TREND_URL)));
        assert!(!html.contains("(Unverified)"));
        assert_eq!(probe.probed(), vec![TREND_URL.to_string()]);

        // both sides carry the backfilled source into the sources index
        let sources = html.split(r#"<section id="sources">"#).nth(1).unwrap();
        assert_eq!(sources.matches(TREND_URL).count(), 2);

        // analyst saw both sides' sources, neither agent saw the other's prompt
        let prompts = backend.user_prompts.lock().unwrap();
        let analyst = &prompts.iter().find(|(r, _)| r == "analyst").unwrap().1;
        assert!(analyst.contains("38% of surveyed users requested comparison"));
        assert_eq!(analyst.matches(TREND_URL).count(), 3);
        for (role, user) in prompts.iter() {
            if role == "researcher" {
                assert!(!user.contains("price comparison tool failures"));
            }
            if role == "skeptic" {
                assert!(!user.contains("travel price comparison demand"));
            }
        }

        let traces = std::fs::read_to_string(f.ctx.trace.path()).unwrap();
        assert_eq!(traces.lines().count(), 7);
        let agents: BTreeSet<String> = traces
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["agent"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            agents,
            ["analyst", "curator", "report_builder", "researcher", "skeptic"]
                .into_iter()
                .map(String::from)
                .collect()
        );
    }

    #[tokio::test]
    async fn test_skeptic_failure_aborts_without_report() {
        let f = fixture();
        let mut backend = RoutedBackend::new();
        backend.skeptic_synthesis = "I refuse to answer in JSON.".to_string();
        let pipeline = Pipeline::new(
            f.config.clone(),
            Capabilities {
                backend: Some(Arc::new(backend)),
                search: trend_search(),
                probe: Arc::new(MapProbe::default()),
            },
        );

        let err = pipeline.run(f.ctx.clone(), None).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Skeptic failed"));
        assert!(!f.config.output_dir.exists());
    }

    #[tokio::test]
    async fn test_missing_backend_fails_at_curation() {
        let f = fixture();
        let pipeline = Pipeline::new(
            f.config.clone(),
            Capabilities {
                backend: None,
                search: trend_search(),
                probe: Arc::new(MapProbe::default()),
            },
        );
        let err = pipeline.run(f.ctx.clone(), None).await.unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("Curation stage failed"));
        assert!(msg.contains("no model backend configured"));
    }

    #[tokio::test]
    async fn test_no_sources_is_rejected() {
        let f = fixture();
        let ctx = Arc::new(RunContext::new(HYPOTHESIS, vec![], &f.config.log_dir));
        let pipeline = Pipeline::new(
            f.config.clone(),
            Capabilities {
                backend: Some(Arc::new(RoutedBackend::new())),
                search: trend_search(),
                probe: Arc::new(MapProbe::default()),
            },
        );
        assert!(pipeline.run(ctx, None).await.is_err());
    }

    #[tokio::test]
    async fn test_output_name_override() {
        let f = fixture();
        let pipeline = Pipeline::new(
            f.config.clone(),
            Capabilities {
                backend: Some(Arc::new(RoutedBackend::new())),
                search: trend_search(),
                probe: Arc::new(MapProbe::new(&[(TREND_URL, 200)])),
            },
        );
        let path = pipeline.run(f.ctx.clone(), Some("custom.html")).await.unwrap();
        assert_eq!(path, f.config.output_dir.join("custom.html"));
        assert!(path.exists());
    }
}
