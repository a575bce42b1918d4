use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use crate::citations::probe::HttpProbe;
use crate::citations::{CitationValidator, Resolution};
use crate::logging;
use crate::search::NoSearch;
use crate::state::PipelineConfig;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Rendered report to check in place.
    pub report: PathBuf,
}

pub async fn execute(args: ValidateArgs) -> Result<()> {
    logging::init(None)?;
    let config = PipelineConfig::from_env();
    let validator = CitationValidator::new(
        Arc::new(NoSearch),
        Arc::new(HttpProbe::new(config.probe_timeout)?),
    );

    let outcomes = validator.validate_file(&args.report).await?;
    for o in &outcomes {
        let status = match o.resolution {
            Resolution::Unchanged if o.valid => "ok",
            Resolution::Unchanged => "flagged",
            Resolution::Repaired => "repaired",
            Resolution::Unverified => "unverified",
        };
        match &o.replacement {
            Some(to) => println!("{:<10} {} -> {} ({})", status, o.url, to, o.reason),
            None => println!("{:<10} {} ({})", status, o.url, o.reason),
        }
    }
    Ok(())
}
