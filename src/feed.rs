//! Live snapshot feeds.
//!
//! A feed pushes the complete, current list of tasks for a [`Scope`] to a
//! callback every time anything in that scope changes. Backend failures are
//! delivered as an empty list; consumers decide whether to trust it.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;

use crate::error::Result;
use crate::storage::TASKS_FILE;
use crate::task::{sort_by_created_desc, sort_for_display, Snapshot, Task, TaskStore};

const WATCH_DEBOUNCE_MS: u64 = 200;
const STOP_POLL_MS: u64 = 100;

/// Which tasks a subscription sees.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Scope {
    /// Every task of one course, in display order.
    Course(String),
    /// Every task whose member list contains the user, newest first.
    Member(String),
}

impl Scope {
    pub fn contains(&self, task: &Task) -> bool {
        match self {
            Scope::Course(course_id) => task.course_id == *course_id,
            Scope::Member(user) => task.is_visible_to(user),
        }
    }

    /// The scoped, ordered snapshot out of `tasks`.
    pub fn select(&self, tasks: &[Task]) -> Snapshot {
        let mut selected: Snapshot = tasks
            .iter()
            .filter(|task| self.contains(task))
            .cloned()
            .collect();
        match self {
            Scope::Course(_) => sort_for_display(&mut selected),
            Scope::Member(_) => sort_by_created_desc(&mut selected),
        }
        selected
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Course(id) => write!(f, "course:{id}"),
            Scope::Member(user) => write!(f, "member:{user}"),
        }
    }
}

pub type SnapshotCallback = Box<dyn Fn(Snapshot) + Send + Sync + 'static>;

/// Source of live snapshots.
pub trait SnapshotFeed: Send + Sync {
    fn subscribe(&self, scope: Scope, callback: SnapshotCallback) -> Result<FeedSubscription>;
}

/// Live subscription; delivery stops on `unsubscribe` or drop.
pub struct FeedSubscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl FeedSubscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for FeedSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSubscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

// =============================================================================
// In-memory feed
// =============================================================================

struct MemorySubscriber {
    id: u64,
    scope: Scope,
    callback: Arc<SnapshotCallback>,
}

#[derive(Default)]
struct MemoryFeedState {
    tasks: Vec<Task>,
    subscribers: Vec<MemorySubscriber>,
}

/// Feed driven by explicit `publish` calls.
#[derive(Clone, Default)]
pub struct MemoryFeed {
    state: Arc<Mutex<MemoryFeedState>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the backing task list and notify every subscriber.
    pub fn publish(&self, tasks: Vec<Task>) {
        let targets: Vec<(Arc<SnapshotCallback>, Snapshot)> = {
            let mut state = self.lock_state();
            state.tasks = tasks;
            state
                .subscribers
                .iter()
                .map(|sub| (Arc::clone(&sub.callback), sub.scope.select(&state.tasks)))
                .collect()
        };
        for (callback, snapshot) in targets {
            callback(snapshot);
        }
    }

    /// Simulate a backend failure: every subscriber gets an empty list.
    pub fn publish_error(&self) {
        let callbacks: Vec<Arc<SnapshotCallback>> = self
            .lock_state()
            .subscribers
            .iter()
            .map(|sub| Arc::clone(&sub.callback))
            .collect();
        for callback in callbacks {
            callback(Vec::new());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_state().subscribers.len()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MemoryFeedState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SnapshotFeed for MemoryFeed {
    fn subscribe(&self, scope: Scope, callback: SnapshotCallback) -> Result<FeedSubscription> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let callback = Arc::new(callback);
        let initial = {
            let mut state = self.lock_state();
            let initial = scope.select(&state.tasks);
            state.subscribers.push(MemorySubscriber {
                id,
                scope,
                callback: Arc::clone(&callback),
            });
            initial
        };
        callback(initial);

        let state = Arc::clone(&self.state);
        Ok(FeedSubscription::new(move || {
            let mut state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            state.subscribers.retain(|sub| sub.id != id);
        }))
    }
}

// =============================================================================
// File-backed feed
// =============================================================================

/// Feed that watches `.studysync/tasks.json` and re-reads it on change.
#[derive(Debug, Clone)]
pub struct StoreFeed {
    store: TaskStore,
    debounce: Duration,
}

impl StoreFeed {
    pub fn new(store: TaskStore) -> Self {
        Self {
            store,
            debounce: Duration::from_millis(WATCH_DEBOUNCE_MS),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    fn deliver(store: &TaskStore, scope: &Scope, callback: &SnapshotCallback) {
        match store.load() {
            Ok(doc) => callback(scope.select(&doc.tasks)),
            Err(err) => {
                tracing::warn!(%scope, error = %err, "task store unreadable, delivering empty snapshot");
                callback(Vec::new());
            }
        }
    }
}

fn touches_tasks_file(event: &notify::Event) -> bool {
    event.paths.is_empty()
        || event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(Path::new(TASKS_FILE).as_os_str()))
}

impl SnapshotFeed for StoreFeed {
    fn subscribe(&self, scope: Scope, callback: SnapshotCallback) -> Result<FeedSubscription> {
        self.store.storage().ensure_initialized()?;
        let state_dir = self.store.storage().state_dir();

        let (event_tx, event_rx) = mpsc::channel();
        let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res| {
            let _ = event_tx.send(res);
        })?;
        watcher.watch(&state_dir, RecursiveMode::NonRecursive)?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let store = self.store.clone();
        let debounce = self.debounce;

        thread::spawn(move || {
            // Owned here so the watch ends with the thread.
            let _watcher = watcher;
            Self::deliver(&store, &scope, &callback);

            let mut pending: Option<Instant> = None;
            while !stop_flag.load(Ordering::SeqCst) {
                let timeout = pending
                    .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                    .unwrap_or(Duration::from_millis(STOP_POLL_MS))
                    .min(Duration::from_millis(STOP_POLL_MS));
                match event_rx.recv_timeout(timeout) {
                    Ok(Ok(event)) => {
                        if touches_tasks_file(&event) {
                            pending = Some(Instant::now() + debounce);
                        }
                    }
                    Ok(Err(err)) => {
                        tracing::warn!(%scope, error = %err, "watch error, delivering empty snapshot");
                        callback(Vec::new());
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
                if pending.is_some_and(|deadline| Instant::now() >= deadline)
                    && !stop_flag.load(Ordering::SeqCst)
                {
                    pending = None;
                    Self::deliver(&store, &scope, &callback);
                }
            }
            tracing::debug!(%scope, "store feed stopped");
        });

        Ok(FeedSubscription::new(move || {
            stop.store(true, Ordering::SeqCst);
        }))
    }
}
