//! Realtime event model.
//!
//! An [`Event`] is the immutable description of one committed write on the
//! task board. Its wire form is a flat JSON object tagged by `type`:
//!
//! ```json
//! {"type":"task_moved","task_id":"t1","project_id":"p1","to_stage_id":"s2","position":3,"origin":"client-1"}
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Snapshot of a task as seen by realtime clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub project_id: Option<String>,
    pub stage_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub assignee: Option<String>,
    #[serde(default)]
    pub position: i64,
    pub updated_at: Option<String>,
}

/// Snapshot of a task comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentSnapshot {
    pub id: String,
    pub task_id: String,
    pub author_id: String,
    pub body: String,
    pub created_at: Option<String>,
}

/// Snapshot of a board stage (Kanban column).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub id: String,
    pub project_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub position: i64,
}

/// Snapshot of a user notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSnapshot {
    pub id: String,
    pub recipient_id: Option<String>,
    pub message: String,
    pub task_id: Option<String>,
    #[serde(default)]
    pub read: bool,
    pub created_at: Option<String>,
}

/// Event payloads, one variant per event kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    TaskCreated {
        task: TaskSnapshot,
    },
    TaskUpdated {
        task: TaskSnapshot,
    },
    TaskMoved {
        task_id: String,
        project_id: Option<String>,
        from_stage_id: Option<String>,
        to_stage_id: Option<String>,
        #[serde(default)]
        position: i64,
    },
    TaskDeleted {
        task_id: String,
        project_id: Option<String>,
    },
    CommentCreated {
        project_id: Option<String>,
        comment: CommentSnapshot,
    },
    CommentUpdated {
        project_id: Option<String>,
        comment: CommentSnapshot,
    },
    CommentDeleted {
        comment_id: String,
        task_id: String,
        project_id: Option<String>,
    },
    StageCreated {
        stage: StageSnapshot,
    },
    StageUpdated {
        stage: StageSnapshot,
    },
    StageDeleted {
        stage_id: String,
        project_id: Option<String>,
    },
    ProjectUpdated {
        project_id: String,
        name: Option<String>,
    },
    NotificationCreated {
        notification: NotificationSnapshot,
    },
    NotificationRead {
        notification_id: String,
        user_id: Option<String>,
    },
}

/// Discriminant of an [`EventPayload`], used to key bus listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskCreated,
    TaskUpdated,
    TaskMoved,
    TaskDeleted,
    CommentCreated,
    CommentUpdated,
    CommentDeleted,
    StageCreated,
    StageUpdated,
    StageDeleted,
    ProjectUpdated,
    NotificationCreated,
    NotificationRead,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 13] = [
        Self::TaskCreated,
        Self::TaskUpdated,
        Self::TaskMoved,
        Self::TaskDeleted,
        Self::CommentCreated,
        Self::CommentUpdated,
        Self::CommentDeleted,
        Self::StageCreated,
        Self::StageUpdated,
        Self::StageDeleted,
        Self::ProjectUpdated,
        Self::NotificationCreated,
        Self::NotificationRead,
    ];

    /// Wire name of this kind (the `type` tag).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskCreated => "task_created",
            Self::TaskUpdated => "task_updated",
            Self::TaskMoved => "task_moved",
            Self::TaskDeleted => "task_deleted",
            Self::CommentCreated => "comment_created",
            Self::CommentUpdated => "comment_updated",
            Self::CommentDeleted => "comment_deleted",
            Self::StageCreated => "stage_created",
            Self::StageUpdated => "stage_updated",
            Self::StageDeleted => "stage_deleted",
            Self::ProjectUpdated => "project_updated",
            Self::NotificationCreated => "notification_created",
            Self::NotificationRead => "notification_read",
        }
    }

    /// Parse from the wire name. Unknown names yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A realtime event: payload plus the id of the client whose write caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub payload: EventPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl Event {
    /// Create an event with no origin.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            origin: None,
        }
    }

    /// Tag the event with the client id that caused it.
    pub fn with_origin(mut self, origin: Option<impl Into<String>>) -> Self {
        self.origin = origin.map(Into::into);
        self
    }

    /// The kind discriminant of this event.
    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::TaskCreated { .. } => EventKind::TaskCreated,
            EventPayload::TaskUpdated { .. } => EventKind::TaskUpdated,
            EventPayload::TaskMoved { .. } => EventKind::TaskMoved,
            EventPayload::TaskDeleted { .. } => EventKind::TaskDeleted,
            EventPayload::CommentCreated { .. } => EventKind::CommentCreated,
            EventPayload::CommentUpdated { .. } => EventKind::CommentUpdated,
            EventPayload::CommentDeleted { .. } => EventKind::CommentDeleted,
            EventPayload::StageCreated { .. } => EventKind::StageCreated,
            EventPayload::StageUpdated { .. } => EventKind::StageUpdated,
            EventPayload::StageDeleted { .. } => EventKind::StageDeleted,
            EventPayload::ProjectUpdated { .. } => EventKind::ProjectUpdated,
            EventPayload::NotificationCreated { .. } => EventKind::NotificationCreated,
            EventPayload::NotificationRead { .. } => EventKind::NotificationRead,
        }
    }

    /// The project this event belongs to, if any.
    pub fn project_id(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::TaskCreated { task } | EventPayload::TaskUpdated { task } => {
                task.project_id.as_deref()
            }
            EventPayload::TaskMoved { project_id, .. }
            | EventPayload::TaskDeleted { project_id, .. }
            | EventPayload::CommentCreated { project_id, .. }
            | EventPayload::CommentUpdated { project_id, .. }
            | EventPayload::CommentDeleted { project_id, .. }
            | EventPayload::StageDeleted { project_id, .. } => project_id.as_deref(),
            EventPayload::StageCreated { stage } | EventPayload::StageUpdated { stage } => {
                stage.project_id.as_deref()
            }
            EventPayload::ProjectUpdated { project_id, .. } => Some(project_id.as_str()),
            EventPayload::NotificationCreated { .. } | EventPayload::NotificationRead { .. } => {
                None
            }
        }
    }

    /// The user this event is addressed to, if any.
    pub fn recipient_id(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::NotificationCreated { notification } => {
                notification.recipient_id.as_deref()
            }
            EventPayload::NotificationRead { user_id, .. } => user_id.as_deref(),
            _ => None,
        }
    }

    /// Whether this event was caused by the given client.
    pub fn originated_from(&self, client_id: &str) -> bool {
        self.origin.as_deref() == Some(client_id)
    }
}
