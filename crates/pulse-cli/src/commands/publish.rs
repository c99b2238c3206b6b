//! Publish command: post one event to a running server.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use pulse_client::HttpPublisher;
use pulse_core::Event;

#[derive(Args)]
pub struct PublishArgs {
    /// Event JSON, e.g. '{"type":"task_deleted","task_id":"t1","project_id":"p1"}'
    pub event: String,

    /// Base URL of the server
    #[arg(long, env = "PULSE_URL", default_value = "http://127.0.0.1:3030")]
    pub url: String,

    /// Client id to record as the event's origin
    #[arg(long)]
    pub origin: Option<String>,
}

fn parse_event(raw: &str, origin: Option<String>) -> Result<Event> {
    let event: Event = serde_json::from_str(raw).context("Invalid event JSON")?;
    Ok(match origin {
        Some(origin) => event.with_origin(Some(origin)),
        None => event,
    })
}

pub async fn execute(args: PublishArgs) -> Result<()> {
    let event = parse_event(&args.event, args.origin)?;
    let publisher = HttpPublisher::with_url(&args.url);
    publisher
        .try_publish(&event)
        .await
        .with_context(|| format!("Failed to publish to {}", publisher.base_url()))?;

    println!("{} {}", "Published".green(), event.kind().as_str().bold());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::EventKind;

    #[test]
    fn test_parse_event_sets_origin() {
        let event = parse_event(
            r#"{"type":"task_deleted","task_id":"t1","project_id":"p1"}"#,
            Some("cli".to_string()),
        )
        .unwrap();
        assert_eq!(event.kind(), EventKind::TaskDeleted);
        assert_eq!(event.origin.as_deref(), Some("cli"));
    }

    #[test]
    fn test_parse_event_keeps_embedded_origin() {
        let event = parse_event(
            r#"{"type":"task_deleted","task_id":"t1","origin":"web-7"}"#,
            None,
        )
        .unwrap();
        assert_eq!(event.origin.as_deref(), Some("web-7"));
    }

    #[test]
    fn test_parse_event_rejects_unknown_kind() {
        assert!(parse_event(r#"{"type":"task_exploded"}"#, None).is_err());
    }
}
