pub mod run;
pub mod validate;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "pra",
    version,
    about = "Evidence-backed product research reports from interviews, surveys and articles"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the full research pipeline and write an HTML report.
    Run(run::RunArgs),
    /// Re-check and repair the citations of an existing report.
    Validate(validate::ValidateArgs),
}

pub async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(args) => run::execute(args).await,
        Command::Validate(args) => validate::execute(args).await,
    }
}
