mod agents;
mod citations;
mod commands;
mod curate;
mod llm;
mod logging;
mod pipeline;
mod report;
mod search;
mod state;

use clap::Parser;

use commands::Cli;

#[tokio::main]
async fn main() {
    let _ = dotenv::dotenv();
    let cli = Cli::parse();

    if let Err(e) = commands::dispatch(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
