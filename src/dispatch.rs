//! Rendering and fan-out of notifications to the delivery channels.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::channels::{Permission, PlatformChannel, Toast, ToastBus, ToastLevel};
use crate::diff::{DeadlineBucket, DeadlineEvent, SemanticEvent};
use crate::task::Task;

pub const ASSIGNED_TITLE: &str = "New Task Assigned";
pub const DEADLINE_TITLE: &str = "Upcoming Deadline";
pub const UPDATED_TITLE: &str = "Task Updated";
pub const DELETED_TITLE: &str = "Task Deleted";

/// A notification ready for display on any channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedNotification {
    pub title: String,
    pub body: String,
    pub level: ToastLevel,
    /// Suppression key; platform notifications with the same tag replace
    /// each other.
    pub tag: String,
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("{count} {unit}")
    } else {
        format!("{count} {unit}s")
    }
}

fn title_or<'a>(title: &'a str, fallback: &'a str) -> &'a str {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        fallback
    } else {
        trimmed
    }
}

fn deadline_body(event: &DeadlineEvent) -> String {
    let title = title_or(&event.title, "Task");
    let remaining = match event.bucket {
        DeadlineBucket::FinalHour => plural(event.minutes_remaining.max(1), "minute"),
        DeadlineBucket::Hours(_) => plural(event.hours_remaining(), "hour"),
    };
    format!("\"{title}\" is due in {remaining}!")
}

/// Render the title, body and level for `event`.
pub fn render(event: &SemanticEvent, actor_name: &str, course_name: &str) -> RenderedNotification {
    let tag = event.suppression_key();
    match event {
        SemanticEvent::Assigned(assigned) => RenderedNotification {
            title: ASSIGNED_TITLE.to_string(),
            body: format!(
                "{actor_name} assigned you \"{}\" in {course_name}",
                title_or(&assigned.title, "New Task")
            ),
            level: ToastLevel::Info,
            tag,
        },
        SemanticEvent::Deadline(deadline) => RenderedNotification {
            title: DEADLINE_TITLE.to_string(),
            body: deadline_body(deadline),
            level: ToastLevel::Warning,
            tag,
        },
    }
}

/// A write made by this process, announced as it happens instead of being
/// discovered by diffing snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskChange {
    Updated {
        task_id: String,
        title: String,
        course_id: String,
        assignee: Option<String>,
        actor: String,
    },
    Deleted {
        task_id: String,
        title: String,
        course_id: String,
        actor: String,
    },
}

impl TaskChange {
    /// `task` as it reads after `actor` changed it.
    pub fn updated(task: &Task, actor: impl Into<String>) -> Self {
        TaskChange::Updated {
            task_id: task.id.clone(),
            title: task.title.clone(),
            course_id: task.course_id.clone(),
            assignee: task.assignee.clone(),
            actor: actor.into(),
        }
    }

    pub fn deleted(task: &Task, actor: impl Into<String>) -> Self {
        TaskChange::Deleted {
            task_id: task.id.clone(),
            title: task.title.clone(),
            course_id: task.course_id.clone(),
            actor: actor.into(),
        }
    }

    pub fn course_id(&self) -> &str {
        match self {
            TaskChange::Updated { course_id, .. } | TaskChange::Deleted { course_id, .. } => {
                course_id
            }
        }
    }

    pub fn actor(&self) -> &str {
        match self {
            TaskChange::Updated { actor, .. } | TaskChange::Deleted { actor, .. } => actor,
        }
    }

    /// Updates only reach someone else's task; a deletion is always shown.
    pub fn is_announced(&self) -> bool {
        match self {
            TaskChange::Updated {
                assignee, actor, ..
            } => assignee.as_deref().is_some_and(|assignee| assignee != actor),
            TaskChange::Deleted { .. } => true,
        }
    }

    pub fn tag(&self) -> String {
        match self {
            TaskChange::Updated { task_id, .. } => format!("task-updated-{task_id}"),
            TaskChange::Deleted { task_id, .. } => format!("task-deleted-{task_id}"),
        }
    }
}

/// Render the title, body and level for a direct write.
pub fn render_change(
    change: &TaskChange,
    actor_name: &str,
    course_name: &str,
) -> RenderedNotification {
    let tag = change.tag();
    match change {
        TaskChange::Updated { title, .. } => RenderedNotification {
            title: UPDATED_TITLE.to_string(),
            body: format!(
                "{actor_name} updated \"{}\" in {course_name}",
                title_or(title, "Task")
            ),
            level: ToastLevel::Info,
            tag,
        },
        TaskChange::Deleted { title, .. } => RenderedNotification {
            title: DELETED_TITLE.to_string(),
            body: format!(
                "{actor_name} deleted \"{}\" from {course_name}",
                title_or(title, "Task")
            ),
            level: ToastLevel::Warning,
            tag,
        },
    }
}

/// What happened on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChannelOutcome {
    Delivered,
    Skipped { reason: String },
    Failed { error: String },
}

impl ChannelOutcome {
    fn skipped(reason: impl Into<String>) -> Self {
        ChannelOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, ChannelOutcome::Delivered)
    }
}

impl fmt::Display for ChannelOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelOutcome::Delivered => write!(f, "delivered"),
            ChannelOutcome::Skipped { reason } => write!(f, "skipped ({reason})"),
            ChannelOutcome::Failed { error } => write!(f, "failed ({error})"),
        }
    }
}

/// Per-event delivery result across both channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub notification: RenderedNotification,
    pub in_app: ChannelOutcome,
    pub platform: ChannelOutcome,
}

/// Delivers rendered notifications to the in-app bus and the platform.
#[derive(Clone)]
pub struct NotificationDispatcher {
    toasts: ToastBus,
    platform: Arc<dyn PlatformChannel>,
}

impl NotificationDispatcher {
    pub fn new(toasts: ToastBus, platform: Arc<dyn PlatformChannel>) -> Self {
        Self { toasts, platform }
    }

    pub fn toasts(&self) -> &ToastBus {
        &self.toasts
    }

    pub fn platform(&self) -> &dyn PlatformChannel {
        self.platform.as_ref()
    }

    /// Ask the platform for permission if it has not been asked yet.
    pub fn prepare(&self) -> Permission {
        match self.platform.permission() {
            Permission::Default => self.platform.request_permission(),
            other => other,
        }
    }

    /// Deliver `event` on both channels. Never fails; each channel's
    /// outcome is reported independently.
    pub fn dispatch(
        &self,
        event: &SemanticEvent,
        actor_name: &str,
        course_name: &str,
    ) -> DispatchReport {
        self.deliver(render(event, actor_name, course_name))
    }

    /// Deliver a direct write on both channels, or `None` when the change
    /// is not announced (an update by the assignee, or of an unassigned
    /// task).
    pub fn announce(
        &self,
        change: &TaskChange,
        actor_name: &str,
        course_name: &str,
    ) -> Option<DispatchReport> {
        if !change.is_announced() {
            tracing::debug!(tag = %change.tag(), "change not announced");
            return None;
        }
        Some(self.deliver(render_change(change, actor_name, course_name)))
    }

    fn deliver(&self, notification: RenderedNotification) -> DispatchReport {
        let in_app = self.deliver_in_app(&notification);
        let platform = self.deliver_platform(&notification);
        DispatchReport {
            notification,
            in_app,
            platform,
        }
    }

    fn deliver_in_app(&self, notification: &RenderedNotification) -> ChannelOutcome {
        if notification.body.trim().is_empty() {
            return ChannelOutcome::skipped("empty message");
        }
        let toast = Toast::new(notification.body.clone(), notification.level);
        match self.toasts.publish(toast) {
            0 => ChannelOutcome::skipped("no subscribers"),
            _ => ChannelOutcome::Delivered,
        }
    }

    fn deliver_platform(&self, notification: &RenderedNotification) -> ChannelOutcome {
        let permission = self.platform.permission();
        if permission != Permission::Granted {
            return ChannelOutcome::skipped(format!("permission {permission}"));
        }
        match self
            .platform
            .show(&notification.title, &notification.body, &notification.tag)
        {
            Ok(()) => ChannelOutcome::Delivered,
            Err(err) => {
                tracing::warn!(tag = %notification.tag, error = %err, "platform notification failed");
                ChannelOutcome::Failed {
                    error: err.to_string(),
                }
            }
        }
    }
}
