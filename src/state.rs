use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Model selection and sampling temperature for one agent.
#[derive(Debug, Clone)]
pub struct AgentProfile {
    pub name: &'static str,
    pub model: String,
    pub temperature: f32,
}

impl AgentProfile {
    fn from_env(name: &'static str, default_model: &str, temperature: f32) -> Self {
        let key = format!("PRA_{}_MODEL", name.to_uppercase());
        let model = dotenv::var(key).unwrap_or_else(|_| default_model.to_string());
        Self {
            name,
            model,
            temperature,
        }
    }
}

/// Pipeline tunables. Everything has a default; `.env` / environment overrides.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub output_dir: PathBuf,
    pub log_dir: PathBuf,
    pub max_search_queries: usize,
    pub max_search_results: usize,
    pub politeness_delay: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub probe_timeout: Duration,
    pub max_article_chars: usize,
    pub chunk_size: usize,
    pub max_table_rows: usize,
    pub slug_len: usize,
    pub curator: AgentProfile,
    pub researcher: AgentProfile,
    pub skeptic: AgentProfile,
    pub analyst: AgentProfile,
    pub report_builder: AgentProfile,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let profile = |name, temperature| AgentProfile {
            name,
            model: "default".to_string(),
            temperature,
        };
        Self {
            output_dir: PathBuf::from("output"),
            log_dir: PathBuf::from("logs"),
            max_search_queries: 5,
            max_search_results: 8,
            politeness_delay: Duration::from_millis(500),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(10),
            max_article_chars: 15_000,
            chunk_size: 3_000,
            max_table_rows: 50,
            slug_len: 50,
            curator: profile("curator", 0.2),
            researcher: profile("researcher", 0.4),
            skeptic: profile("skeptic", 0.7),
            analyst: profile("analyst", 0.1),
            report_builder: profile("report_builder", 0.3),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    dotenv::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let model = dotenv::var("LLM_MODEL").unwrap_or_else(|_| "default".to_string());

        Self {
            output_dir: dotenv::var("PRA_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.output_dir),
            log_dir: dotenv::var("PRA_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.log_dir),
            max_search_queries: env_or("PRA_MAX_SEARCH_QUERIES", d.max_search_queries),
            max_search_results: env_or("PRA_MAX_SEARCH_RESULTS", d.max_search_results),
            politeness_delay: Duration::from_millis(env_or("PRA_POLITENESS_DELAY_MS", 500)),
            max_retries: env_or("PRA_MAX_RETRIES", d.max_retries).max(1),
            retry_base_delay: Duration::from_millis(env_or("PRA_RETRY_BASE_DELAY_MS", 2_000)),
            probe_timeout: Duration::from_secs(env_or("PRA_PROBE_TIMEOUT_SECS", 10)),
            max_article_chars: env_or("PRA_MAX_ARTICLE_CHARS", d.max_article_chars),
            chunk_size: env_or("PRA_CHUNK_SIZE", d.chunk_size).max(100),
            max_table_rows: env_or("PRA_MAX_TABLE_ROWS", d.max_table_rows),
            slug_len: d.slug_len,
            curator: AgentProfile::from_env("curator", &model, 0.2),
            researcher: AgentProfile::from_env("researcher", &model, 0.4),
            skeptic: AgentProfile::from_env("skeptic", &model, 0.7),
            analyst: AgentProfile::from_env("analyst", &model, 0.1),
            report_builder: AgentProfile::from_env("report_builder", &model, 0.3),
        }
    }
}

/// Generate a run id of the form `PRA-20260219T093000-1a2b3c4d`.
pub fn make_run_id(now: DateTime<Utc>) -> String {
    let short = uuid::Uuid::new_v4().simple().to_string();
    format!("PRA-{}-{}", now.format("%Y%m%dT%H%M%S"), &short[..8])
}

/// One pipeline execution. Built once and shared read-only by every stage.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: String,
    pub hypothesis: String,
    pub sources: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub trace: TraceLog,
}

impl RunContext {
    pub fn new(hypothesis: &str, sources: Vec<String>, log_dir: &Path) -> Self {
        let started_at = Utc::now();
        let run_id = make_run_id(started_at);
        let trace = TraceLog::new(log_dir.join(format!("{}_traces.jsonl", run_id)));
        Self {
            run_id,
            hypothesis: hypothesis.to_string(),
            sources,
            started_at,
            trace,
        }
    }

    /// The uuid tail of the run id, used in report file names.
    pub fn short_id(&self) -> &str {
        self.run_id.rsplit('-').next().unwrap_or(&self.run_id)
    }

    pub fn log_path(log_dir: &Path, run_id: &str) -> PathBuf {
        log_dir.join(format!("{}.log", run_id))
    }
}

/// One line of the per-run trace file.
#[derive(Debug, Clone, Serialize)]
pub struct TraceRecord {
    pub run_id: String,
    pub agent: String,
    pub model: String,
    pub temperature: f32,
    pub timestamp: DateTime<Utc>,
    pub system_prompt_chars: usize,
    pub user_prompt_chars: usize,
    pub completion_chars: usize,
}

/// Append-only JSONL sink shared by every agent of a run.
#[derive(Debug, Clone)]
pub struct TraceLog {
    path: PathBuf,
}

impl TraceLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. Never fails the caller.
    pub async fn append(&self, record: &TraceRecord) {
        if let Err(e) = self.try_append(record).await {
            warn!(path = %self.path.display(), error = %e, "Failed to write trace record");
        }
    }

    async fn try_append(&self, record: &TraceRecord) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        // Single write per record so concurrent agents never interleave lines.
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
