//! Local event bus.
//!
//! In-process publish/subscribe keyed by [`EventKind`]. Publishing never
//! blocks the caller: events are queued to a dedicated dispatcher task, which
//! invokes the listeners registered for the event's kind one after another in
//! registration order. Every listener therefore observes events in publish
//! order.
//!
//! Listeners run on the dispatcher task and must not block. A listener that
//! returns an error or panics is logged and skipped; the remaining listeners
//! still receive the event.

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::event::{Event, EventKind};

/// A bus listener. Errors are logged by the bus and never propagate.
pub type Listener = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Receives a copy of every event published (not re-injected) on a bus.
///
/// Implementations must return immediately; the broker bridge queues the
/// event for a background task.
pub trait EventMirror: Send + Sync {
    fn mirror(&self, event: &Event);
}

enum Command {
    Dispatch(Event),
    Flush(oneshot::Sender<()>),
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    by_kind: HashMap<EventKind, BTreeMap<u64, Listener>>,
}

impl Registry {
    fn insert(&mut self, kinds: &[EventKind], listener: Listener) -> Vec<(EventKind, u64)> {
        let id = self.next_id;
        self.next_id += 1;
        kinds
            .iter()
            .map(|kind| {
                self.by_kind
                    .entry(*kind)
                    .or_default()
                    .insert(id, Arc::clone(&listener));
                (*kind, id)
            })
            .collect()
    }

    fn remove(&mut self, entries: &[(EventKind, u64)]) {
        for (kind, id) in entries {
            if let Some(listeners) = self.by_kind.get_mut(kind) {
                listeners.remove(id);
                if listeners.is_empty() {
                    self.by_kind.remove(kind);
                }
            }
        }
    }

    fn snapshot(&self, kind: EventKind) -> Vec<(u64, Listener)> {
        self.by_kind
            .get(&kind)
            .map(|listeners| {
                listeners
                    .iter()
                    .map(|(id, listener)| (*id, Arc::clone(listener)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

type SharedRegistry = Arc<Mutex<Registry>>;

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    registry: SharedRegistry,
    /// Held weakly: the mirror usually owns a clone of this bus.
    mirror: RwLock<Option<Weak<dyn EventMirror>>>,
    tx: mpsc::UnboundedSender<Command>,
}

/// Single-process event bus. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct LocalEventBus {
    inner: Arc<Inner>,
}

impl LocalEventBus {
    /// Create a bus and spawn its dispatcher task.
    ///
    /// Must be called from within a Tokio runtime. The dispatcher stops once
    /// every clone of the bus has been dropped.
    pub fn new() -> Self {
        let registry = SharedRegistry::default();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_dispatcher(Arc::clone(&registry), rx));
        Self {
            inner: Arc::new(Inner {
                registry,
                mirror: RwLock::new(None),
                tx,
            }),
        }
    }

    fn mirror(&self) -> Option<Arc<dyn EventMirror>> {
        self.inner
            .mirror
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Publish an event to local listeners and to the mirror, if any.
    pub fn publish(&self, event: Event) {
        if let Some(mirror) = self.mirror() {
            mirror.mirror(&event);
        }
        self.publish_local(event);
    }

    /// Publish an event to local listeners only.
    pub fn publish_local(&self, event: Event) {
        let kind = event.kind();
        if self.inner.tx.send(Command::Dispatch(event)).is_err() {
            warn!(%kind, "Event dispatcher stopped, dropping event");
        }
    }

    /// Wait until every event published before this call has been dispatched.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.inner.tx.send(Command::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Install the mirror that receives every [`publish`](Self::publish).
    ///
    /// The bus does not keep the mirror alive; mirroring stops once the
    /// caller drops its last handle.
    pub fn set_mirror<M: EventMirror + 'static>(&self, mirror: &Arc<M>) {
        let mirror: Weak<dyn EventMirror> = Arc::<M>::downgrade(mirror);
        *self
            .inner
            .mirror
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(mirror);
    }

    /// Whether a live mirror is installed.
    pub fn is_mirrored(&self) -> bool {
        self.mirror().is_some()
    }

    /// Register a listener for one event kind.
    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_many(&[kind], listener)
    }

    /// Register one listener for several event kinds.
    pub fn subscribe_many<F>(&self, kinds: &[EventKind], listener: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let entries = lock(&self.inner.registry).insert(kinds, Arc::new(listener));
        debug!(kinds = kinds.len(), "Listener registered");
        Subscription {
            registry: Arc::downgrade(&self.inner.registry),
            entries,
            active: AtomicBool::new(true),
        }
    }

    /// Register a listener for every event kind.
    pub fn subscribe_all<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_many(&EventKind::ALL, listener)
    }

    /// Number of listeners currently registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        lock(&self.inner.registry)
            .by_kind
            .get(&kind)
            .map_or(0, BTreeMap::len)
    }
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by the `subscribe*` methods.
///
/// Dropping the handle unsubscribes.
#[must_use = "dropping a Subscription unsubscribes its listener"]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    entries: Vec<(EventKind, u64)>,
    active: AtomicBool,
}

impl Subscription {
    /// Deregister the listener. Calling this more than once is a no-op, and it
    /// is safe to call from inside any listener.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).remove(&self.entries);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

async fn run_dispatcher(registry: SharedRegistry, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Dispatch(event) => dispatch(&registry, &event),
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Event dispatcher stopped");
}

fn dispatch(registry: &Mutex<Registry>, event: &Event) {
    let kind = event.kind();
    let listeners = lock(registry).snapshot(kind);
    for (listener_id, listener) in listeners {
        match catch_unwind(AssertUnwindSafe(|| listener(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(listener_id, %kind, error = %e, "Event listener failed");
            }
            Err(_) => {
                error!(listener_id, %kind, "Event listener panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::tests::{notification, task_moved};

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&Event) -> anyhow::Result<()>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener = move |event: &Event| {
            if let crate::event::EventPayload::TaskMoved { task_id, .. } = &event.payload {
                sink.lock().unwrap().push(task_id.clone());
            } else {
                sink.lock().unwrap().push(event.kind().to_string());
            }
            Ok(())
        };
        (seen, listener)
    }

    #[tokio::test]
    async fn test_publish_does_not_run_listeners_inline() {
        let bus = LocalEventBus::new();
        let (seen, listener) = recorder();
        let _sub = bus.subscribe(EventKind::TaskMoved, listener);

        bus.publish(task_moved(Some("p1"), "t1"));
        assert!(seen.lock().unwrap().is_empty());

        bus.flush().await;
        assert_eq!(*seen.lock().unwrap(), vec!["t1"]);
    }

    #[tokio::test]
    async fn test_per_listener_fifo() {
        let bus = LocalEventBus::new();
        let (seen, listener) = recorder();
        let _sub = bus.subscribe(EventKind::TaskMoved, listener);

        for id in ["a", "b", "c", "d"] {
            bus.publish(task_moved(Some("p1"), id));
        }
        bus.flush().await;
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_only_listeners_for_kind_are_invoked() {
        let bus = LocalEventBus::new();
        let (moved, moved_listener) = recorder();
        let (notified, notified_listener) = recorder();
        let _a = bus.subscribe(EventKind::TaskMoved, moved_listener);
        let _b = bus.subscribe(EventKind::NotificationCreated, notified_listener);

        bus.publish(notification(Some("u1")));
        bus.flush().await;

        assert!(moved.lock().unwrap().is_empty());
        assert_eq!(*notified.lock().unwrap(), vec!["notification_created"]);
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_block_others() {
        let bus = LocalEventBus::new();
        let _failing = bus.subscribe(EventKind::TaskMoved, |_| anyhow::bail!("boom"));
        let _panicking = bus.subscribe(EventKind::TaskMoved, |_| panic!("listener bug"));
        let (seen, listener) = recorder();
        let _ok = bus.subscribe(EventKind::TaskMoved, listener);

        bus.publish(task_moved(Some("p1"), "t1"));
        bus.publish(task_moved(Some("p1"), "t2"));
        bus.flush().await;

        assert_eq!(*seen.lock().unwrap(), vec!["t1", "t2"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let bus = LocalEventBus::new();
        let (seen, listener) = recorder();
        let sub = bus.subscribe_all(listener);
        assert_eq!(bus.listener_count(EventKind::TaskMoved), 1);

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert_eq!(bus.listener_count(EventKind::TaskMoved), 0);

        bus.publish(task_moved(Some("p1"), "t1"));
        bus.flush().await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_listener_can_unsubscribe_itself() {
        let bus = LocalEventBus::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(Mutex::new(0));

        let own = Arc::clone(&slot);
        let counter = Arc::clone(&calls);
        let sub = bus.subscribe(EventKind::TaskMoved, move |_| {
            *counter.lock().unwrap() += 1;
            if let Some(sub) = own.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
            Ok(())
        });
        *slot.lock().unwrap() = Some(sub);

        bus.publish(task_moved(Some("p1"), "t1"));
        bus.publish(task_moved(Some("p1"), "t2"));
        bus.flush().await;

        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dropping_subscription_unsubscribes() {
        let bus = LocalEventBus::new();
        {
            let _sub = bus.subscribe(EventKind::TaskMoved, |_| Ok(()));
            assert_eq!(bus.listener_count(EventKind::TaskMoved), 1);
        }
        assert_eq!(bus.listener_count(EventKind::TaskMoved), 0);
    }

    struct CountingMirror(Mutex<usize>);

    impl EventMirror for CountingMirror {
        fn mirror(&self, _event: &Event) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[tokio::test]
    async fn test_mirror_sees_publish_but_not_publish_local() {
        let bus = LocalEventBus::new();
        let mirror = Arc::new(CountingMirror(Mutex::new(0)));
        bus.set_mirror(&mirror);
        assert!(bus.is_mirrored());

        bus.publish(task_moved(Some("p1"), "t1"));
        bus.publish_local(task_moved(Some("p1"), "t2"));
        bus.flush().await;

        assert_eq!(*mirror.0.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_bus_does_not_keep_mirror_alive() {
        let bus = LocalEventBus::new();
        let mirror = Arc::new(CountingMirror(Mutex::new(0)));
        bus.set_mirror(&mirror);

        let weak = Arc::downgrade(&mirror);
        drop(mirror);
        assert!(weak.upgrade().is_none());
        assert!(!bus.is_mirrored());

        // Publishing without a live mirror still reaches local listeners.
        let seen = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&seen);
        let _sub = bus.subscribe(EventKind::TaskMoved, move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });
        bus.publish(task_moved(Some("p1"), "t1"));
        bus.flush().await;
        assert_eq!(*seen.lock().unwrap(), 1);
    }
}
