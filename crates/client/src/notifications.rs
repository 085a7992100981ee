//! Notification store: the ordered set of toasts currently on screen.
//!
//! Entries are appended in arrival order and leave either when their
//! expiry timer fires or when someone calls `remove`. Renderers observe the
//! store through a `watch` snapshot or a `broadcast` stream of changes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use toolhub_protocol::{new_id, Severity};

const EVENT_CAPACITY: usize = 64;

/// A single toast. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: String,
    pub message: String,
    pub severity: Severity,
    /// `None` or `Some(0)` means the toast stays until dismissed.
    pub duration_ms: Option<u64>,
}

impl Notification {
    pub fn expires(&self) -> bool {
        self.duration_ms.is_some_and(|ms| ms > 0)
    }
}

/// Change feed for incremental renderers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Inserted(Notification),
    Removed { id: String },
}

pub type Snapshot = Arc<Vec<Notification>>;

#[derive(Default)]
struct StoreState {
    entries: Vec<Notification>,
    expiry: HashMap<String, JoinHandle<()>>,
}

struct Shared {
    state: Mutex<StoreState>,
    snapshot_tx: watch::Sender<Snapshot>,
    events_tx: broadcast::Sender<StoreEvent>,
}

/// Handle to the store (cheap to Clone).
#[derive(Clone)]
pub struct NotificationStore {
    shared: Arc<Shared>,
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationStore {
    pub fn new() -> Self {
        let (snapshot_tx, _) = watch::channel(Snapshot::default());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(StoreState::default()),
                snapshot_tx,
                events_tx,
            }),
        }
    }

    /// Append a toast and return its id.
    ///
    /// A positive `duration_ms` schedules automatic removal on the current
    /// Tokio runtime.
    pub fn insert(
        &self,
        message: impl Into<String>,
        severity: Severity,
        duration_ms: Option<u64>,
    ) -> String {
        let notification = Notification {
            id: new_id(),
            message: message.into(),
            severity,
            duration_ms,
        };
        let id = notification.id.clone();

        {
            // Events go out under the lock so an expiry can never be
            // observed before its insert.
            let mut state = self.lock();
            state.entries.push(notification.clone());
            if let Some(ms) = duration_ms.filter(|ms| *ms > 0) {
                let timer = self.spawn_expiry(id.clone(), Duration::from_millis(ms));
                state.expiry.insert(id.clone(), timer);
            }
            self.publish(&state);
            let _ = self.shared.events_tx.send(StoreEvent::Inserted(notification));
        }

        debug!(
            component = "notifications",
            event = "notification.inserted",
            notification_id = %id,
            severity = %severity,
            duration_ms = ?duration_ms,
        );
        id
    }

    /// Remove a toast. Returns `false` when `id` is not present.
    pub fn remove(&self, id: &str) -> bool {
        {
            let mut state = self.lock();
            let Some(index) = state.entries.iter().position(|n| n.id == id) else {
                return false;
            };
            state.entries.remove(index);
            if let Some(timer) = state.expiry.remove(id) {
                timer.abort();
            }
            self.publish(&state);
            let _ = self.shared.events_tx.send(StoreEvent::Removed { id: id.to_string() });
        }

        debug!(
            component = "notifications",
            event = "notification.removed",
            notification_id = %id,
        );
        true
    }

    /// Drop every toast and cancel all pending expiries.
    pub fn clear(&self) {
        let mut state = self.lock();
        for (_, timer) in state.expiry.drain() {
            timer.abort();
        }
        let removed: Vec<String> = state.entries.drain(..).map(|n| n.id).collect();
        self.publish(&state);
        for id in removed {
            let _ = self.shared.events_tx.send(StoreEvent::Removed { id });
        }
    }

    /// Current entries in arrival order.
    pub fn snapshot(&self) -> Vec<Notification> {
        self.lock().entries.clone()
    }

    pub fn get(&self, id: &str) -> Option<Notification> {
        self.lock().entries.iter().find(|n| n.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Watch the ordered set; the receiver always holds the latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    /// Stream individual inserts and removals.
    pub fn events(&self) -> broadcast::Receiver<StoreEvent> {
        self.shared.events_tx.subscribe()
    }

    fn spawn_expiry(&self, id: String, after: Duration) -> JoinHandle<()> {
        let shared = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(shared) = shared.upgrade() {
                NotificationStore { shared }.remove(&id);
            }
        })
    }

    fn publish(&self, state: &StoreState) {
        self.shared
            .snapshot_tx
            .send_replace(Arc::new(state.entries.clone()));
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
