//! Typed publish entry points for the write path.
//!
//! Call these only after the corresponding database write has committed.
//! They are fire-and-forget: nothing is returned and nothing blocks on
//! delivery.

use tracing::debug;

use crate::bus::LocalEventBus;
use crate::event::{
    CommentSnapshot, Event, EventPayload, NotificationSnapshot, StageSnapshot, TaskSnapshot,
};

/// Publishes task board events on a [`LocalEventBus`].
#[derive(Clone)]
pub struct Broadcaster {
    bus: LocalEventBus,
}

impl Broadcaster {
    pub fn new(bus: LocalEventBus) -> Self {
        Self { bus }
    }

    /// The underlying bus.
    pub fn bus(&self) -> &LocalEventBus {
        &self.bus
    }

    /// Publish an already-built event.
    pub fn broadcast(&self, event: Event) {
        debug!(kind = %event.kind(), origin = ?event.origin, "Broadcasting event");
        self.bus.publish(event);
    }

    fn send(&self, payload: EventPayload, origin: Option<&str>) {
        self.broadcast(Event::new(payload).with_origin(origin));
    }

    pub fn task_created(&self, task: TaskSnapshot, origin: Option<&str>) {
        self.send(EventPayload::TaskCreated { task }, origin);
    }

    pub fn task_updated(&self, task: TaskSnapshot, origin: Option<&str>) {
        self.send(EventPayload::TaskUpdated { task }, origin);
    }

    /// A task changed stage and/or position within a stage.
    #[allow(clippy::too_many_arguments)]
    pub fn task_moved(
        &self,
        task_id: &str,
        project_id: Option<&str>,
        from_stage_id: Option<&str>,
        to_stage_id: Option<&str>,
        position: i64,
        origin: Option<&str>,
    ) {
        self.send(
            EventPayload::TaskMoved {
                task_id: task_id.to_string(),
                project_id: project_id.map(str::to_string),
                from_stage_id: from_stage_id.map(str::to_string),
                to_stage_id: to_stage_id.map(str::to_string),
                position,
            },
            origin,
        );
    }

    pub fn task_deleted(&self, task_id: &str, project_id: Option<&str>, origin: Option<&str>) {
        self.send(
            EventPayload::TaskDeleted {
                task_id: task_id.to_string(),
                project_id: project_id.map(str::to_string),
            },
            origin,
        );
    }

    pub fn comment_created(
        &self,
        project_id: Option<&str>,
        comment: CommentSnapshot,
        origin: Option<&str>,
    ) {
        self.send(
            EventPayload::CommentCreated {
                project_id: project_id.map(str::to_string),
                comment,
            },
            origin,
        );
    }

    pub fn comment_updated(
        &self,
        project_id: Option<&str>,
        comment: CommentSnapshot,
        origin: Option<&str>,
    ) {
        self.send(
            EventPayload::CommentUpdated {
                project_id: project_id.map(str::to_string),
                comment,
            },
            origin,
        );
    }

    pub fn comment_deleted(
        &self,
        comment_id: &str,
        task_id: &str,
        project_id: Option<&str>,
        origin: Option<&str>,
    ) {
        self.send(
            EventPayload::CommentDeleted {
                comment_id: comment_id.to_string(),
                task_id: task_id.to_string(),
                project_id: project_id.map(str::to_string),
            },
            origin,
        );
    }

    pub fn stage_created(&self, stage: StageSnapshot, origin: Option<&str>) {
        self.send(EventPayload::StageCreated { stage }, origin);
    }

    pub fn stage_updated(&self, stage: StageSnapshot, origin: Option<&str>) {
        self.send(EventPayload::StageUpdated { stage }, origin);
    }

    pub fn stage_deleted(&self, stage_id: &str, project_id: Option<&str>, origin: Option<&str>) {
        self.send(
            EventPayload::StageDeleted {
                stage_id: stage_id.to_string(),
                project_id: project_id.map(str::to_string),
            },
            origin,
        );
    }

    pub fn project_updated(&self, project_id: &str, name: Option<&str>, origin: Option<&str>) {
        self.send(
            EventPayload::ProjectUpdated {
                project_id: project_id.to_string(),
                name: name.map(str::to_string),
            },
            origin,
        );
    }

    /// Notifications are addressed to a user, so they carry no origin.
    pub fn notification_created(&self, notification: NotificationSnapshot) {
        self.send(EventPayload::NotificationCreated { notification }, None);
    }

    pub fn notification_read(&self, notification_id: &str, user_id: Option<&str>) {
        self.send(
            EventPayload::NotificationRead {
                notification_id: notification_id.to_string(),
                user_id: user_id.map(str::to_string),
            },
            None,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_entry_points_build_tagged_events() {
        let bus = LocalEventBus::new();
        let seen: Arc<Mutex<Vec<Event>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let _sub = bus.subscribe_all(move |event| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        });

        let broadcaster = Broadcaster::new(bus.clone());
        broadcaster.task_moved("t1", Some("p1"), Some("s1"), Some("s2"), 4, Some("client-1"));
        broadcaster.comment_deleted("c1", "t1", Some("p1"), None);
        broadcaster.notification_read("n1", Some("u1"));
        bus.flush().await;

        let seen = seen.lock().unwrap();
        let kinds: Vec<EventKind> = seen.iter().map(Event::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::TaskMoved,
                EventKind::CommentDeleted,
                EventKind::NotificationRead
            ]
        );
        assert_eq!(seen[0].origin.as_deref(), Some("client-1"));
        assert_eq!(seen[0].project_id(), Some("p1"));
        assert_eq!(seen[1].origin, None);
        assert_eq!(seen[2].recipient_id(), Some("u1"));
    }
}
