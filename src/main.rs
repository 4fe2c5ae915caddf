use anyhow::Result;
use clap::Parser;
use mqttwatch::cli::{commands, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Start(args) => commands::run_start(args).await,
        Commands::Test(args) => commands::run_test(args).await,
        Commands::State(args) => commands::run_state(args).await,
    }
}
