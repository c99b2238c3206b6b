//! Terminal output formatting.

use colored::{ColoredString, Colorize};
use pulse_core::{topics_for_event, Event, EventKind};

/// Kind name padded to a fixed column, then colored.
fn kind_colored(kind: EventKind) -> ColoredString {
    let padded = format!("{:<22}", kind.as_str());
    let name = padded.as_str();
    match kind {
        EventKind::TaskCreated | EventKind::CommentCreated | EventKind::StageCreated => {
            name.green()
        }
        EventKind::TaskDeleted | EventKind::CommentDeleted | EventKind::StageDeleted => {
            name.red()
        }
        EventKind::TaskMoved => name.yellow(),
        EventKind::NotificationCreated | EventKind::NotificationRead => name.magenta(),
        _ => name.cyan(),
    }
}

/// One summary line per event: kind, topics, origin.
pub fn event_line(event: &Event) -> String {
    let topics = topics_for_event(event)
        .iter()
        .map(|t| t.as_str().to_string())
        .collect::<Vec<_>>()
        .join(",");
    let mut line = format!("{} {}", kind_colored(event.kind()), topics);
    if let Some(origin) = &event.origin {
        line.push_str(&format!(" {}", format!("from {}", origin).dimmed()));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::EventPayload;

    #[test]
    fn test_event_line_plain() {
        colored::control::set_override(false);
        let event = Event::new(EventPayload::TaskDeleted {
            task_id: "t1".to_string(),
            project_id: Some("p1".to_string()),
        })
        .with_origin(Some("c1"));
        assert_eq!(event_line(&event), "task_deleted           project:p1 from c1");
    }
}
