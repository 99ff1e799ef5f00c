use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "thrum")]
#[command(about = "Durable multi-agent coordination fabric", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Repository root (defaults to the current directory)
    #[arg(long, global = true)]
    pub repo: Option<String>,

    /// Log filter, e.g. "info" or "thrum_sync=debug"
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the daemon in the foreground
    Daemon,

    /// Query a running daemon's health
    Status {
        /// Print the full health report as JSON
        #[arg(long)]
        json: bool,
    },
}
