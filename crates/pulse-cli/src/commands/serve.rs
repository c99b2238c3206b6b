//! Fan-out server command.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use pulse_core::PulseConfig;
use std::path::PathBuf;

#[derive(Args)]
pub struct ServeArgs {
    /// Port to listen on [default: 3030]
    #[arg(long)]
    pub port: Option<u16>,

    /// Host to bind to [default: 127.0.0.1]
    #[arg(long)]
    pub host: Option<String>,

    /// Redis URL for cross-process fan-out. Omit for single-process mode
    #[arg(long)]
    pub redis_url: Option<String>,

    /// Path to a TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Cap on events buffered per server-push stream
    #[arg(long)]
    pub max_buffered: Option<usize>,

    /// Also write logs to a file
    #[arg(long)]
    pub log: bool,

    /// Log file path [default: .pulse/serve.log]
    #[arg(long, requires = "log")]
    pub log_file: Option<PathBuf>,
}

impl ServeArgs {
    /// Layer the flags over the file and environment configuration.
    fn into_config(self) -> Result<PulseConfig> {
        let mut config = PulseConfig::load(self.config.as_deref())?;
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(url) = self.redis_url {
            config.broker.url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Some(max) = self.max_buffered {
            config.stream.max_buffered = Some(max);
        }
        Ok(config)
    }
}

pub async fn execute(args: ServeArgs) -> Result<()> {
    let config = args.into_config()?;
    let addr = config.bind_addr();

    println!();
    println!("  {} {}", "Pulse".cyan().bold(), "Fan-Out Server".bold());
    println!();
    println!("  {}  ws://{}/ws", "WebSocket".green(), addr);
    println!("  {}     http://{}/events", "Events".green(), addr);
    println!("  {}    http://{}/internal/publish", "Publish".green(), addr);
    match &config.broker.url {
        Some(url) => println!(
            "  {}     {} ({})",
            "Broker".green(),
            url,
            config.broker.channel()
        ),
        None => println!("  {}     {}", "Broker".green(), "single-process".dimmed()),
    }
    println!();
    println!("  {}", "Ctrl+C to stop".dimmed());
    println!();

    pulse_web::run_server(config).await
}
