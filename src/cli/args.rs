//! Command-line interface definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

const DEFAULT_CONFIG: &str = "config/mqttwatch.toml";

#[derive(Parser)]
#[command(name = "mqttwatch", version, about = "MQTT notification watcher")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the connection service in the foreground until interrupted.
    Start(StartArgs),
    /// Test connectivity against a stored broker and refresh its save gate.
    Test(TestArgs),
    /// Print the persisted state: app state, brokers, unread counts.
    State(StateArgs),
}

// ---------------------------------------------------------------------------
// Per-command arguments
// ---------------------------------------------------------------------------

#[derive(Parser)]
pub struct StartArgs {
    /// Path to the configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Activate this broker before connecting.
    #[arg(long)]
    pub broker: Option<u64>,

    /// Log filter directive, overriding the config file.
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Parser)]
pub struct TestArgs {
    /// Path to the configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Id of the broker to test.
    #[arg(long)]
    pub broker: u64,

    /// Log filter directive, overriding the config file.
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Parser)]
pub struct StateArgs {
    /// Path to the configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,
}
