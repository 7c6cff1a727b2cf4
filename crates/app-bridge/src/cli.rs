use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "app-bridge",
    version,
    about = "Local relay between a creative application and its control surfaces"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    pub config: PathBuf,

    /// Relay listen address (overrides config file setting)
    #[arg(long, global = true)]
    pub listen: Option<String>,

    /// Notification source URL (overrides config file setting)
    #[arg(long)]
    pub notify_endpoint: Option<String>,

    /// Do not start the notification client
    #[arg(long)]
    pub no_notifier: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Run the relay (default)
    Serve,

    /// Send one command through a running relay and print the response
    Send {
        /// Application name the command is addressed to
        #[arg(short, long)]
        application: String,

        /// Command payload as JSON
        #[arg(long = "command")]
        payload: String,

        /// Seconds to wait for the response
        #[arg(long, default_value_t = 20)]
        timeout: u64,
    },
}
