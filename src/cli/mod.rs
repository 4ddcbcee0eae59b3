use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Rank restaurants from crowd discussion signals", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the read API server
    #[command(name = "serve")]
    Serve(ServeCommand),

    /// Run a background job worker
    #[command(name = "work")]
    Work(WorkCommand),

    /// Queue a city bootstrap job
    #[command(name = "bootstrap")]
    Bootstrap(BootstrapCommand),
}

#[derive(Debug, Args)]
pub struct ServeCommand {
    #[arg(long, env = "CHOWRANK_BIND_ADDRESS", default_value = "127.0.0.1:3000")]
    pub bind_address: SocketAddr,

    #[arg(long, env = "CHOWRANK_CONFIG", default_value = "chowrank.json")]
    pub config: PathBuf,
}

#[derive(Debug, Args)]
pub struct WorkCommand {
    #[arg(long, env = "CHOWRANK_CONFIG", default_value = "chowrank.json")]
    pub config: PathBuf,
}

#[derive(Debug, Args)]
pub struct BootstrapCommand {
    /// Free-text city query, e.g. "austin" or "new york city"
    pub city: String,

    #[arg(long, env = "CHOWRANK_CONFIG", default_value = "chowrank.json")]
    pub config: PathBuf,
}

pub fn print_json<T>(value: &T) -> anyhow::Result<()>
where
    T: serde::Serialize,
{
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
