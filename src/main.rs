mod agent;
mod commands;
mod config;
mod error;
mod llm;
mod metrics;
mod notebooks;
mod prism;
mod state;
mod tasks;
#[cfg(test)]
mod test_support;
mod tools;
mod trace;

use clap::Parser;
use tracing::Level;

use commands::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    // Load env
    let _ = dotenv::dotenv();

    commands::dispatch(cli).await
}
