//! Topic model.
//!
//! Topics partition events by owning scope: `project:<id>` for board activity
//! and `user:<id>` for per-user notifications. `project:*` and `user:*` match
//! every id of their scope.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::error::{PulseError, PulseResult};
use crate::event::{Event, EventKind};

/// Id segment that matches every id of a scope.
pub const WILDCARD: &str = "*";

/// Owning scope of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    Project,
    User,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::User => "user",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "project" => Some(Self::Project),
            "user" => Some(Self::User),
            _ => None,
        }
    }
}

/// A topic key of the form `<scope>:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic(String);

impl Topic {
    /// Topic for all activity on one project.
    ///
    /// The id must be non-blank and contain neither `:` nor `*`; use
    /// [`Topic::wildcard`] to follow every project.
    pub fn project(project_id: &str) -> PulseResult<Self> {
        Self::scoped(Scope::Project, project_id)
    }

    /// Topic for everything addressed to one user. Same id rules as
    /// [`Topic::project`].
    pub fn user(user_id: &str) -> PulseResult<Self> {
        Self::scoped(Scope::User, user_id)
    }

    fn scoped(scope: Scope, id: &str) -> PulseResult<Self> {
        let id = id.trim();
        if id.is_empty() || id.contains(':') || id.contains(WILDCARD) {
            return Err(PulseError::invalid_topic(format!("{}:{}", scope.as_str(), id)));
        }
        Ok(Self(format!("{}:{}", scope.as_str(), id)))
    }

    /// Wildcard topic matching every id of `scope`.
    pub fn wildcard(scope: Scope) -> Self {
        Self(format!("{}:{}", scope.as_str(), WILDCARD))
    }

    /// Parse and validate a raw topic string.
    pub fn parse(raw: &str) -> PulseResult<Self> {
        let raw = raw.trim();
        let (scope, id) = raw
            .split_once(':')
            .ok_or_else(|| PulseError::invalid_topic(raw))?;
        let id = id.trim();
        if Scope::parse(scope.trim()).is_none() || id.is_empty() || id.contains(':') {
            return Err(PulseError::invalid_topic(raw));
        }
        Ok(Self(format!("{}:{}", scope.trim(), id)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The scope segment. Always valid for a constructed topic.
    pub fn scope(&self) -> Option<Scope> {
        self.0.split_once(':').and_then(|(scope, _)| Scope::parse(scope))
    }

    /// Whether this is a `<scope>:*` sentinel.
    pub fn is_wildcard(&self) -> bool {
        self.0.ends_with(":*")
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Topic {
    type Error = PulseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.0
    }
}

/// A request for a set of topics, as sent by socket clients and server-push
/// callers. Every field is optional; blank or invalid values contribute nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Correlation id of the requesting client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Restrict to these event kinds. Empty means every kind. Socket
    /// connections ignore this field.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<EventKind>,
}

impl SubscriptionRequest {
    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Self::default()
        }
    }

    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn for_topic(topic: &Topic) -> Self {
        Self {
            topic: Some(topic.to_string()),
            ..Self::default()
        }
    }
}

/// Topics an event is delivered on. Empty when no owning scope resolves.
pub fn topics_for_event(event: &Event) -> BTreeSet<Topic> {
    let mut topics = BTreeSet::new();
    if let Some(project_id) = event.project_id() {
        topics.extend(Topic::project(project_id).ok());
    }
    if let Some(user_id) = event.recipient_id() {
        topics.extend(Topic::user(user_id).ok());
    }
    topics
}

/// Canonical topics granted by a subscription request.
pub fn topics_for_request(request: &SubscriptionRequest) -> BTreeSet<Topic> {
    let mut topics = BTreeSet::new();

    let raw = request.topic.iter().chain(request.topics.iter());
    for candidate in raw {
        if let Ok(topic) = Topic::parse(candidate) {
            topics.insert(topic);
        }
    }
    // Plain ids never expand to a wildcard.
    if let Some(project_id) = request.project_id.as_deref() {
        topics.extend(Topic::project(project_id).ok());
    }
    if let Some(user_id) = request.user_id.as_deref() {
        topics.extend(Topic::user(user_id).ok());
    }

    topics
}

/// Whether a subscriber holding `subscribed` should receive an event on
/// `event_topics`.
pub fn intersects(subscribed: &HashSet<Topic>, event_topics: &BTreeSet<Topic>) -> bool {
    event_topics.iter().any(|topic| {
        subscribed.contains(topic)
            || topic
                .scope()
                .is_some_and(|scope| subscribed.contains(&Topic::wildcard(scope)))
    })
}
