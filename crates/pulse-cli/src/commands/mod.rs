//! CLI command definitions and handlers.

use anyhow::Result;
use clap::{Parser, Subcommand};

pub mod listen;
pub mod publish;
pub mod serve;

/// Pulse - realtime event distribution for the task board
#[derive(Parser)]
#[command(name = "pulse")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the fan-out server
    Serve(serve::ServeArgs),

    /// Subscribe to topics and print incoming events
    Listen(listen::ListenArgs),

    /// Post an event to a running server
    Publish(publish::PublishArgs),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Serve(args) => serve::execute(args).await,
            Commands::Listen(args) => listen::execute(args).await,
            Commands::Publish(args) => publish::execute(args).await,
        }
    }
}
