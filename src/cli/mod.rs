pub mod commands;
pub mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::build_id::BuildId;

#[derive(Parser)]
#[command(name = "logfanout")]
#[command(about = "Persist build logs and stream them live to viewers")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the log fan-out server
    Serve(ServeArgs),
    /// Stream a build's log from a running server
    Tail(TailArgs),
}

#[derive(clap::Args, Debug, Default)]
pub struct ServeArgs {
    /// Address to listen on (overrides config)
    #[arg(long, env = "LOGFANOUT_LISTEN")]
    pub listen: Option<String>,

    /// Directory holding one log file per build (overrides config)
    #[arg(long, env = "LOGFANOUT_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Keep build logs in memory only
    #[arg(long)]
    pub memory: bool,

    /// Per-send timeout for viewers in milliseconds, 0 disables
    #[arg(long, env = "LOGFANOUT_SEND_TIMEOUT_MS")]
    pub send_timeout_ms: Option<u64>,

    /// Config file path (defaults to ./.logfanout.toml when present)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

#[derive(clap::Args, Debug)]
pub struct TailArgs {
    /// Build to stream
    pub build: BuildId,

    /// Server base URL
    #[arg(long, env = "LOGFANOUT_URL", default_value = "http://127.0.0.1:8080")]
    pub url: String,
}
