//! Subscription stream adapter.
//!
//! Turns push-based bus delivery into a pull-based, cancellable sequence for
//! one logical subscriber, e.g. a long-lived GraphQL subscription or an SSE
//! response. The stream registers its bus listener at construction, so events
//! published between creation and the first pull are buffered, not lost.
//!
//! The buffer is unbounded unless [`StreamOptions::max_buffered`] is set, in
//! which case the oldest events are dropped and counted in
//! [`SubscriptionStream::dropped`].

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::Stream;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bus::{LocalEventBus, Subscription};
use crate::event::{Event, EventKind};
use crate::topic::{intersects, topics_for_event, topics_for_request, SubscriptionRequest, Topic};

/// Buffering options for a [`SubscriptionStream`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamOptions {
    /// Cap on buffered events; `None` means unbounded.
    pub max_buffered: Option<usize>,
}

struct Pending {
    queue: Mutex<VecDeque<Event>>,
    ready: Notify,
    cancel: CancellationToken,
    dropped: AtomicU64,
    max_buffered: Option<usize>,
}

impl Pending {
    fn push(&self, event: Event) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(max) = self.max_buffered {
            while queue.len() >= max.max(1) {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        queue.push_back(event);
        drop(queue);
        self.ready.notify_one();
    }

    fn pop(&self) -> Option<Event> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn clear(&self) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A cancellable pull sequence of events matching one subscriber's filter.
pub struct SubscriptionStream {
    pending: Arc<Pending>,
    subscription: Subscription,
}

impl SubscriptionStream {
    /// Open a stream for the topics (and optional kinds) of `request`.
    pub fn open(bus: &LocalEventBus, request: &SubscriptionRequest, options: StreamOptions) -> Self {
        let topics: HashSet<Topic> = topics_for_request(request).into_iter().collect();
        if topics.is_empty() {
            debug!(?request, "Subscription request grants no topics");
        }
        let kinds: Vec<EventKind> = if request.kinds.is_empty() {
            EventKind::ALL.to_vec()
        } else {
            request.kinds.clone()
        };
        Self::with_filter(bus, &kinds, options, move |event| {
            intersects(&topics, &topics_for_event(event))
        })
    }

    /// Open a stream over `kinds`, keeping events accepted by `filter`.
    pub fn with_filter<F>(
        bus: &LocalEventBus,
        kinds: &[EventKind],
        options: StreamOptions,
        filter: F,
    ) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        let pending = Arc::new(Pending {
            queue: Mutex::new(VecDeque::new()),
            ready: Notify::new(),
            cancel: CancellationToken::new(),
            dropped: AtomicU64::new(0),
            max_buffered: options.max_buffered,
        });

        let sink = Arc::clone(&pending);
        let subscription = bus.subscribe_many(kinds, move |event| {
            if !sink.cancel.is_cancelled() && filter(event) {
                sink.push(event.clone());
            }
            Ok(())
        });

        Self {
            pending,
            subscription,
        }
    }

    /// Next event in publish order, or `None` once the stream is cancelled.
    pub async fn next_event(&self) -> Option<Event> {
        loop {
            if self.pending.cancel.is_cancelled() {
                return None;
            }
            let notified = self.pending.ready.notified();
            if let Some(event) = self.pending.pop() {
                return Some(event);
            }
            tokio::select! {
                biased;
                _ = self.pending.cancel.cancelled() => return None,
                _ = notified => {}
            }
        }
    }

    /// Stop the stream: unsubscribe, discard buffered events and resolve every
    /// pending and future pull with `None`. Idempotent.
    pub fn cancel(&self) {
        if self.pending.cancel.is_cancelled() {
            return;
        }
        self.pending.cancel.cancel();
        self.subscription.unsubscribe();
        self.pending.clear();
        debug!("Subscription stream cancelled");
    }

    pub fn is_cancelled(&self) -> bool {
        self.pending.cancel.is_cancelled()
    }

    /// Events currently waiting to be pulled.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Events discarded by the drop-oldest policy since creation.
    pub fn dropped(&self) -> u64 {
        self.pending.dropped.load(Ordering::Relaxed)
    }

    /// Return and reset the dropped-event counter.
    pub fn take_dropped(&self) -> u64 {
        self.pending.dropped.swap(0, Ordering::Relaxed)
    }

    /// Adapt into a [`futures::Stream`] that ends on cancellation.
    pub fn into_stream(self) -> impl Stream<Item = Event> + Send + 'static {
        futures::stream::unfold(self, |stream| async move {
            let event = stream.next_event().await?;
            Some((event, stream))
        })
    }
}

impl Drop for SubscriptionStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::tests::{notification, task_moved};
    use crate::event::EventPayload;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::time::timeout;

    fn task_id(event: &Event) -> &str {
        match &event.payload {
            EventPayload::TaskMoved { task_id, .. } => task_id,
            _ => panic!("unexpected event {event:?}"),
        }
    }

    #[tokio::test]
    async fn test_buffered_events_are_pulled_in_order() {
        let bus = LocalEventBus::new();
        let stream = SubscriptionStream::open(
            &bus,
            &SubscriptionRequest::for_project("p1"),
            StreamOptions::default(),
        );

        for id in ["A", "B", "C"] {
            bus.publish(task_moved(Some("p1"), id));
        }
        bus.flush().await;
        assert_eq!(stream.buffered(), 3);

        for expected in ["A", "B", "C"] {
            let event = stream.next_event().await.unwrap();
            assert_eq!(task_id(&event), expected);
        }
    }

    #[tokio::test]
    async fn test_pull_waits_for_next_event() {
        let bus = LocalEventBus::new();
        let stream = Arc::new(SubscriptionStream::open(
            &bus,
            &SubscriptionRequest::for_project("p1"),
            StreamOptions::default(),
        ));

        let puller = Arc::clone(&stream);
        let pull = tokio::spawn(async move { puller.next_event().await });
        tokio::task::yield_now().await;

        bus.publish(task_moved(Some("p1"), "late"));
        let event = timeout(Duration::from_secs(1), pull)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(task_id(&event), "late");
    }

    #[tokio::test]
    async fn test_filters_by_topic() {
        let bus = LocalEventBus::new();
        let stream = SubscriptionStream::open(
            &bus,
            &SubscriptionRequest::for_project("p1"),
            StreamOptions::default(),
        );

        bus.publish(task_moved(Some("p2"), "other"));
        bus.publish(task_moved(None, "orphan"));
        bus.publish(notification(Some("u1")));
        bus.publish(task_moved(Some("p1"), "mine"));

        let event = timeout(Duration::from_secs(1), stream.next_event())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task_id(&event), "mine");
        assert_eq!(stream.buffered(), 0);
    }

    #[tokio::test]
    async fn test_kind_restriction() {
        let bus = LocalEventBus::new();
        let request = SubscriptionRequest {
            kinds: vec![EventKind::NotificationCreated],
            ..SubscriptionRequest::for_user("u1")
        };
        let stream = SubscriptionStream::open(&bus, &request, StreamOptions::default());
        assert_eq!(bus.listener_count(EventKind::TaskMoved), 0);
        assert_eq!(bus.listener_count(EventKind::NotificationCreated), 1);

        bus.publish(notification(Some("u1")));
        let event = timeout(Duration::from_secs(1), stream.next_event())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind(), EventKind::NotificationCreated);
    }

    #[tokio::test]
    async fn test_cancel_ends_pending_and_future_pulls() {
        let bus = LocalEventBus::new();
        let stream = Arc::new(SubscriptionStream::open(
            &bus,
            &SubscriptionRequest::for_project("p1"),
            StreamOptions::default(),
        ));

        let puller = Arc::clone(&stream);
        let pull = tokio::spawn(async move { puller.next_event().await });
        tokio::task::yield_now().await;

        stream.cancel();
        stream.cancel();

        let result = timeout(Duration::from_secs(1), pull).await.unwrap().unwrap();
        assert!(result.is_none());
        assert!(stream.is_cancelled());
        assert_eq!(bus.listener_count(EventKind::TaskMoved), 0);

        bus.publish(task_moved(Some("p1"), "after"));
        bus.flush().await;
        assert!(stream.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_discards_buffered_events() {
        let bus = LocalEventBus::new();
        let stream = SubscriptionStream::open(
            &bus,
            &SubscriptionRequest::for_project("p1"),
            StreamOptions::default(),
        );
        bus.publish(task_moved(Some("p1"), "queued"));
        bus.flush().await;

        stream.cancel();
        assert_eq!(stream.buffered(), 0);
        assert!(stream.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_bounded_buffer_drops_oldest() {
        let bus = LocalEventBus::new();
        let stream = SubscriptionStream::open(
            &bus,
            &SubscriptionRequest::for_project("p1"),
            StreamOptions {
                max_buffered: Some(2),
            },
        );

        for id in ["A", "B", "C"] {
            bus.publish(task_moved(Some("p1"), id));
        }
        bus.flush().await;

        assert_eq!(stream.dropped(), 1);
        assert_eq!(task_id(&stream.next_event().await.unwrap()), "B");
        assert_eq!(task_id(&stream.next_event().await.unwrap()), "C");
        assert_eq!(stream.take_dropped(), 1);
        assert_eq!(stream.dropped(), 0);
    }

    #[tokio::test]
    async fn test_into_stream_yields_events() {
        let bus = LocalEventBus::new();
        let stream = SubscriptionStream::open(
            &bus,
            &SubscriptionRequest::for_project("p1"),
            StreamOptions::default(),
        );
        bus.publish(task_moved(Some("p1"), "one"));
        bus.publish(task_moved(Some("p1"), "two"));

        let mut events = Box::pin(stream.into_stream());
        let first = timeout(Duration::from_secs(1), events.next()).await.unwrap().unwrap();
        let second = timeout(Duration::from_secs(1), events.next()).await.unwrap().unwrap();
        assert_eq!(task_id(&first), "one");
        assert_eq!(task_id(&second), "two");
    }

    #[tokio::test]
    async fn test_dropping_stream_unsubscribes() {
        let bus = LocalEventBus::new();
        let stream = SubscriptionStream::open(
            &bus,
            &SubscriptionRequest::for_project("p1"),
            StreamOptions::default(),
        );
        assert_eq!(bus.listener_count(EventKind::TaskMoved), 1);
        drop(stream);
        assert_eq!(bus.listener_count(EventKind::TaskMoved), 0);
    }
}
