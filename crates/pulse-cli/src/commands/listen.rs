//! Listen command: subscribe to topics over a socket and print events.

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use pulse_client::{ClientConfig, ClientManager, WsConnector};
use pulse_core::{Event, Subscription, Topic};
use std::sync::Arc;

use crate::output;

#[derive(Args)]
pub struct ListenArgs {
    /// WebSocket endpoint of the server
    #[arg(long, env = "PULSE_WS_URL", default_value = "ws://127.0.0.1:3030/ws")]
    pub url: String,

    /// Project id to follow (repeatable)
    #[arg(long = "project")]
    pub projects: Vec<String>,

    /// User id whose notifications to follow (repeatable)
    #[arg(long = "user")]
    pub users: Vec<String>,

    /// Raw topic such as `project:*` (repeatable)
    #[arg(long = "topic")]
    pub topics: Vec<String>,

    /// Client id to identify as; events it caused are hidden
    #[arg(long)]
    pub client_id: Option<String>,

    /// Print raw JSON instead of a summary line
    #[arg(long)]
    pub json: bool,
}

impl ListenArgs {
    /// Every topic named by the flags, validated.
    pub fn requested_topics(&self) -> Result<Vec<Topic>> {
        let mut topics: Vec<Topic> = self
            .projects
            .iter()
            .map(|id| Topic::project(id))
            .chain(self.users.iter().map(|id| Topic::user(id)))
            .collect::<Result<_, _>>()?;
        for raw in &self.topics {
            topics.push(Topic::parse(raw)?);
        }
        topics.sort();
        topics.dedup();
        if topics.is_empty() {
            bail!("Nothing to listen to: pass --project, --user or --topic");
        }
        Ok(topics)
    }
}

pub async fn execute(args: ListenArgs) -> Result<()> {
    let topics = args.requested_topics()?;
    let config = match &args.client_id {
        Some(id) => ClientConfig::with_client_id(id.clone()),
        None => ClientConfig::default(),
    };

    let manager = ClientManager::new(config, Arc::new(WsConnector::new(args.url.clone())));
    let json = args.json;
    let _listener = listen_all(&manager, args.client_id.is_some(), move |event| {
        if json {
            println!("{}", serde_json::to_string(event)?);
        } else {
            println!("{}", output::event_line(event));
        }
        Ok(())
    });

    let _subscriptions: Vec<_> = topics
        .iter()
        .map(|topic| manager.subscribe_to_topic(topic.clone()))
        .collect();

    println!(
        "{} {} as {}",
        "Listening on".dimmed(),
        topics
            .iter()
            .map(Topic::as_str)
            .collect::<Vec<_>>()
            .join(", ")
            .cyan(),
        manager.client_id().dimmed()
    );

    tokio::signal::ctrl_c().await?;
    Ok(())
}

/// Listen for every kind. With `hide_own`, events this client caused are
/// skipped.
fn listen_all<F>(manager: &ClientManager, hide_own: bool, listener: F) -> Subscription
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
{
    if hide_own {
        manager.on_all_remote_events(listener)
    } else {
        manager.on_all_events(listener)
    }
}
