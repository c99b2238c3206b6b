//! Server-sent events endpoint.
//!
//! `GET /events?project_id=p1&user_id=u1&topics=project:p2,user:*` streams
//! matching events until the client goes away. When the stream's buffer cap
//! drops events, a `resync` frame carrying the number of lost events precedes
//! the next event so the client can refetch.

use std::convert::Infallible;

use axum::{
    extract::{Query, State},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use pulse_core::{Event, SubscriptionRequest, SubscriptionStream};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub topic: Option<String>,
    /// Comma-separated topic list.
    pub topics: Option<String>,
    pub project_id: Option<String>,
    pub user_id: Option<String>,
    pub client_id: Option<String>,
}

impl EventsQuery {
    pub fn into_request(self) -> SubscriptionRequest {
        let topics = self
            .topics
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        SubscriptionRequest {
            topic: self.topic,
            topics,
            project_id: self.project_id,
            user_id: self.user_id,
            client_id: self.client_id,
            kinds: Vec::new(),
        }
    }
}

pub async fn stream_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let request = query.into_request();
    debug!(?request, "Opening event stream");
    let stream = SubscriptionStream::open(&state.bus, &request, state.stream_options);

    let frames = futures::stream::unfold(stream, |stream| async move {
        let event = stream.next_event().await?;
        let mut frames = Vec::with_capacity(2);
        let dropped = stream.take_dropped();
        if dropped > 0 {
            frames.push(SseEvent::default().event("resync").data(dropped.to_string()));
        }
        frames.push(frame(&event));
        Some((futures::stream::iter(frames), stream))
    })
    .flatten()
    .map(Ok::<_, Infallible>);

    Sse::new(frames).keep_alive(KeepAlive::default())
}

fn frame(event: &Event) -> SseEvent {
    match serde_json::to_string(event) {
        Ok(json) => SseEvent::default().event(event.kind().as_str()).data(json),
        Err(e) => {
            warn!(kind = %event.kind(), error = %e, "Failed to serialize event for SSE");
            SseEvent::default().comment("unserializable event skipped")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_to_request() {
        let query = EventsQuery {
            topics: Some("project:p2, user:* ,,".to_string()),
            project_id: Some("p1".to_string()),
            ..EventsQuery::default()
        };
        let request = query.into_request();
        assert_eq!(request.topics, vec!["project:p2", "user:*"]);
        assert_eq!(request.project_id.as_deref(), Some("p1"));
        assert!(request.kinds.is_empty());
    }
}
