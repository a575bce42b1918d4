use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::citations::probe::HttpProbe;
use crate::llm::{LlmClient, ModelBackend};
use crate::logging;
use crate::pipeline::{Capabilities, Pipeline};
use crate::search::NoSearch;
use crate::state::{PipelineConfig, RunContext};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// The product question to evaluate.
    #[arg(long)]
    pub hypothesis: String,
    /// Local transcripts (.txt, .md) or survey exports (.csv).
    #[arg(long, num_args = 1..)]
    pub inputs: Vec<PathBuf>,
    /// Article URLs to curate.
    #[arg(long = "url", num_args = 1..)]
    pub urls: Vec<String>,
    /// Report file name inside the output directory.
    #[arg(long)]
    pub output: Option<String>,
}

impl RunArgs {
    pub fn sources(&self) -> Vec<String> {
        self.inputs
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .chain(self.urls.iter().cloned())
            .collect()
    }
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let sources = args.sources();
    if sources.is_empty() {
        anyhow::bail!("No input sources provided. Pass --inputs <file>... and/or --url <url>...");
    }

    let config = PipelineConfig::from_env();
    let ctx = Arc::new(RunContext::new(&args.hypothesis, sources, &config.log_dir));
    logging::init(Some(&RunContext::log_path(&config.log_dir, &ctx.run_id)))?;
    info!(run_id = %ctx.run_id, trace = %ctx.trace.path().display(), "Run initialized");

    let backend = LlmClient::from_env()?.map(|c| Arc::new(c) as Arc<dyn ModelBackend>);
    if backend.is_none() {
        tracing::warn!("LLM_BASE_URL is not set, the first model call will fail");
    }
    let caps = Capabilities {
        backend,
        search: Arc::new(NoSearch),
        probe: Arc::new(HttpProbe::new(config.probe_timeout)?),
    };

    let path = Pipeline::new(config, caps)
        .run(ctx, args.output.as_deref())
        .await?;
    println!("{}", path.display());
    Ok(())
}
