use clap::{Parser, Subcommand};
use std::path::PathBuf;

const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:9237";
const DEFAULT_METRICS_PATH: &str = "/metrics";

#[derive(Parser, Debug)]
#[command(
    name = "sql-exporter",
    version,
    about = "Prometheus metrics exporter for SQL query results"
)]
pub struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        env = "CONFIG",
        default_value = "sql_exporter.yml",
        global = true
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the exporter server (default)
    Start {
        /// Address to listen on for the web interface and telemetry
        #[arg(short, long, default_value = DEFAULT_LISTEN_ADDRESS)]
        listen_address: String,

        /// Path under which to expose metrics
        #[arg(short, long, default_value = DEFAULT_METRICS_PATH)]
        metrics_path: String,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Display the effective configuration (with DSN credentials masked)
    Show,

    /// Validate the configuration file
    Validate,
}

impl Cli {
    /// Get the command to execute, defaulting to Start if none provided
    pub fn get_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Start {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            metrics_path: DEFAULT_METRICS_PATH.to_string(),
        })
    }
}
