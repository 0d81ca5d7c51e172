//! Live reconciliation loop.
//!
//! Each attached subscription owns a [`SubscriptionContext`] holding the
//! last accepted snapshot. Snapshots arriving from the feed are queued and
//! processed one at a time by a single tokio task, so the diff for a
//! subscription always sees snapshots in arrival order.
//!
//! Per snapshot the [`Reconciler`] runs:
//!
//! 1. empty-snapshot confirmation (a lone empty list after a non-empty one
//!    is held until a second empty list confirms it);
//! 2. the diff against the previous snapshot;
//! 3. the suppression window for deadline events;
//! 4. dispatch to both channels, logging each outcome.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::config::EngineSettings;
use crate::diff::{DiffEngine, SemanticEvent};
use crate::directory::{Directory, DirectorySource};
use crate::dispatch::{DispatchReport, NotificationDispatcher};
use crate::error::Result;
use crate::feed::{FeedSubscription, Scope, SnapshotFeed};
use crate::suppression::Deduplicator;
use crate::task::{Snapshot, Task};

/// Per-subscription state.
#[derive(Debug, Clone)]
pub struct SubscriptionContext {
    scope: Scope,
    previous: Option<Snapshot>,
    unconfirmed_empty: bool,
}

/// What to do with an incoming snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Diff it against the previous snapshot.
    Accept,
    /// Empty list right after a non-empty one; wait for confirmation.
    Hold,
}

impl SubscriptionContext {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            previous: None,
            unconfirmed_empty: false,
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn previous(&self) -> Option<&[Task]> {
        self.previous.as_deref()
    }

    pub fn admit(&mut self, snapshot: &[Task]) -> Admission {
        if !snapshot.is_empty() {
            self.unconfirmed_empty = false;
            return Admission::Accept;
        }
        let had_tasks = self.previous.as_ref().is_some_and(|prev| !prev.is_empty());
        if had_tasks && !self.unconfirmed_empty {
            self.unconfirmed_empty = true;
            return Admission::Hold;
        }
        self.unconfirmed_empty = false;
        Admission::Accept
    }

    fn replace(&mut self, snapshot: Snapshot) {
        self.previous = Some(snapshot);
    }
}

/// Turns snapshots into delivered notifications for one viewer.
pub struct Reconciler {
    diff: DiffEngine,
    dedup: Deduplicator,
    dispatcher: NotificationDispatcher,
    directory: Arc<dyn DirectorySource>,
    settings: EngineSettings,
}

impl Reconciler {
    pub fn new(
        viewer: impl Into<String>,
        settings: EngineSettings,
        dedup: Deduplicator,
        dispatcher: NotificationDispatcher,
        directory: Arc<dyn DirectorySource>,
    ) -> Self {
        Self {
            diff: DiffEngine::new(viewer).with_deadline_window(settings.deadline_window),
            dedup,
            dispatcher,
            directory,
            settings,
        }
    }

    pub fn viewer(&self) -> &str {
        self.diff.viewer()
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    pub fn deduplicator(&self) -> &Deduplicator {
        &self.dedup
    }

    /// Handle one snapshot for `ctx` and return the delivery reports.
    pub fn process(
        &self,
        ctx: &mut SubscriptionContext,
        snapshot: Snapshot,
        now: DateTime<Utc>,
    ) -> Vec<DispatchReport> {
        tracing::debug!(scope = %ctx.scope, tasks = snapshot.len(), "snapshot received");
        if ctx.admit(&snapshot) == Admission::Hold {
            tracing::debug!(scope = %ctx.scope, "empty snapshot held until confirmed");
            return Vec::new();
        }

        let directory = self.directory.directory();
        let events = self.diff.diff(ctx.previous(), &snapshot, &directory, now);
        ctx.replace(snapshot);
        self.deliver(&ctx.scope, events, &directory, now)
    }

    /// Re-run the deadline check against the last accepted snapshot.
    pub fn reevaluate(&self, ctx: &SubscriptionContext, now: DateTime<Utc>) -> Vec<DispatchReport> {
        let Some(previous) = ctx.previous() else {
            return Vec::new();
        };
        let directory = self.directory.directory();
        let events = self.diff.deadlines(previous, now);
        self.deliver(&ctx.scope, events, &directory, now)
    }

    fn should_fire(&self, event: &SemanticEvent, now: DateTime<Utc>) -> bool {
        match event {
            // The diff only reports fresh transitions.
            SemanticEvent::Assigned(_) => true,
            SemanticEvent::Deadline(_) => self.dedup.should_fire(
                &event.suppression_key(),
                now,
                self.settings.suppression_interval,
            ),
        }
    }

    fn deliver(
        &self,
        scope: &Scope,
        events: Vec<SemanticEvent>,
        directory: &Directory,
        now: DateTime<Utc>,
    ) -> Vec<DispatchReport> {
        let mut reports = Vec::new();
        for event in events {
            let key = event.suppression_key();
            if !self.should_fire(&event, now) {
                tracing::debug!(%scope, key = %key, "suppressed");
                continue;
            }
            let (actor, course) = match &event {
                SemanticEvent::Assigned(assigned) => (
                    directory.actor_name(assigned.actor.as_deref()),
                    assigned.course_name.clone(),
                ),
                SemanticEvent::Deadline(deadline) => (
                    directory.actor_name(None),
                    directory.course_name(&deadline.course_id),
                ),
            };
            let report = self.dispatcher.dispatch(&event, &actor, &course);
            tracing::info!(
                %scope,
                key = %key,
                kind = event.kind(),
                in_app = %report.in_app,
                platform = %report.platform,
                "notification dispatched"
            );
            reports.push(report);
        }
        reports
    }

    /// Subscribe to `feed` for `scope` and process snapshots until the
    /// returned handle is dropped. Must be called inside a tokio runtime.
    pub fn attach(
        self: &Arc<Self>,
        feed: &dyn SnapshotFeed,
        scope: Scope,
    ) -> Result<SubscriptionHandle> {
        if self.settings.compact_on_start {
            self.dedup
                .compact(Utc::now(), self.settings.suppression_max_age);
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Snapshot>();
        let subscription = feed.subscribe(
            scope.clone(),
            Box::new(move |snapshot: Snapshot| {
                let _ = tx.send(snapshot);
            }),
        )?;

        let reconciler = Arc::clone(self);
        let mut ctx = SubscriptionContext::new(scope.clone());
        let mut ticker = self.settings.reevaluate_every.and_then(reevaluate_interval);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Some(snapshot) => {
                            reconciler.process(&mut ctx, snapshot, Utc::now());
                        }
                        None => break,
                    },
                    _ = next_tick(&mut ticker) => {
                        reconciler.reevaluate(&ctx, Utc::now());
                    }
                }
            }
            tracing::debug!(scope = %ctx.scope, "subscription ended");
        });

        tracing::debug!(%scope, viewer = self.viewer(), "subscription attached");
        Ok(SubscriptionHandle {
            scope,
            subscription: Some(subscription),
            task,
        })
    }
}

fn reevaluate_interval(every: chrono::Duration) -> Option<Interval> {
    let every = every.to_std().ok().filter(|every| !every.is_zero())?;
    let mut interval = tokio::time::interval_at(Instant::now() + every, every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Live attachment of a reconciler to a feed.
///
/// Dropping the handle stops the feed, aborts the processing task and
/// releases the held snapshot.
#[derive(Debug)]
pub struct SubscriptionHandle {
    scope: Scope,
    subscription: Option<FeedSubscription>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn unsubscribe(self) {
        drop(self);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.task.abort();
    }
}
