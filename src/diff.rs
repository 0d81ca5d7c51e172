//! Snapshot diffing: turns two consecutive snapshots into semantic events.
//!
//! The engine is stateless. Whoever owns the subscription keeps the previous
//! snapshot and hands it back in on the next call.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::directory::Directory;
use crate::task::Task;

/// Coarse time-remaining interval for deadline alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "hours")]
pub enum DeadlineBucket {
    /// One hour or less remaining; rendered in minutes.
    FinalHour,
    /// More than one hour remaining, floored to whole hours.
    Hours(u32),
}

impl DeadlineBucket {
    pub fn from_remaining(remaining: Duration) -> Self {
        if remaining <= Duration::hours(1) {
            DeadlineBucket::FinalHour
        } else {
            let hours = u32::try_from(remaining.num_hours()).unwrap_or(u32::MAX);
            DeadlineBucket::Hours(hours)
        }
    }
}

impl fmt::Display for DeadlineBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadlineBucket::FinalHour => f.write_str("final"),
            DeadlineBucket::Hours(hours) => write!(f, "{hours}h"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignedEvent {
    pub task_id: String,
    pub title: String,
    pub assignee: String,
    /// User who made the change, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    pub course_id: String,
    pub course_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadlineEvent {
    pub task_id: String,
    pub title: String,
    pub due: DateTime<Utc>,
    pub minutes_remaining: i64,
    pub bucket: DeadlineBucket,
    pub course_id: String,
}

impl DeadlineEvent {
    /// Whole hours left, as shown in the hour-granularity message.
    pub fn hours_remaining(&self) -> i64 {
        self.minutes_remaining / 60
    }
}

/// A meaningful transition detected between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SemanticEvent {
    Assigned(AssignedEvent),
    Deadline(DeadlineEvent),
}

impl SemanticEvent {
    pub fn task_id(&self) -> &str {
        match self {
            SemanticEvent::Assigned(event) => &event.task_id,
            SemanticEvent::Deadline(event) => &event.task_id,
        }
    }

    pub fn course_id(&self) -> &str {
        match self {
            SemanticEvent::Assigned(event) => &event.course_id,
            SemanticEvent::Deadline(event) => &event.course_id,
        }
    }

    /// Identity of this notification instance for dedup and platform tags.
    pub fn suppression_key(&self) -> String {
        match self {
            SemanticEvent::Assigned(event) => format!("task-assigned-{}", event.task_id),
            SemanticEvent::Deadline(event) => {
                format!("deadline-{}-{}", event.task_id, event.bucket)
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SemanticEvent::Assigned(_) => "assigned",
            SemanticEvent::Deadline(_) => "deadline",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SemanticEvent::Assigned(_) => 0,
            SemanticEvent::Deadline(_) => 1,
        }
    }
}

/// Detects assignment and deadline transitions for one viewer.
#[derive(Debug, Clone)]
pub struct DiffEngine {
    viewer: String,
    deadline_window: Duration,
}

impl DiffEngine {
    pub fn new(viewer: impl Into<String>) -> Self {
        Self {
            viewer: viewer.into(),
            deadline_window: Duration::hours(24),
        }
    }

    pub fn with_deadline_window(mut self, window: Duration) -> Self {
        self.deadline_window = window;
        self
    }

    pub fn viewer(&self) -> &str {
        &self.viewer
    }

    /// All events for the `(previous, current)` pair, in a stable order.
    ///
    /// `previous == None` or an empty previous snapshot is a baseline: it
    /// yields deadline events but never assignment events.
    pub fn diff(
        &self,
        previous: Option<&[Task]>,
        current: &[Task],
        directory: &Directory,
        now: DateTime<Utc>,
    ) -> Vec<SemanticEvent> {
        let mut events = self.assignments(previous, current, directory);
        events.extend(self.deadlines(current, now));
        events.sort_by(|left, right| {
            left.rank()
                .cmp(&right.rank())
                .then_with(|| left.task_id().cmp(right.task_id()))
        });
        events
    }

    /// Tasks newly assigned to the viewer since `previous`.
    pub fn assignments(
        &self,
        previous: Option<&[Task]>,
        current: &[Task],
        directory: &Directory,
    ) -> Vec<SemanticEvent> {
        let previous = match previous {
            Some(previous) if !previous.is_empty() => previous,
            _ => return Vec::new(),
        };

        let before = index_by_id(previous);

        index_by_id(current)
            .into_values()
            .filter(|task| task.is_assigned_to(&self.viewer))
            .filter(|task| {
                before
                    .get(task.id.as_str())
                    .map_or(true, |prior| prior.assignee != task.assignee)
            })
            .map(|task| {
                SemanticEvent::Assigned(AssignedEvent {
                    task_id: task.id.clone(),
                    title: task.title.clone(),
                    assignee: self.viewer.clone(),
                    actor: task
                        .updated_by
                        .clone()
                        .or_else(|| Some(task.created_by.clone())),
                    course_id: task.course_id.clone(),
                    course_name: directory.course_name(&task.course_id),
                })
            })
            .collect()
    }

    /// Open tasks assigned to the viewer that fall due within the window.
    pub fn deadlines(&self, current: &[Task], now: DateTime<Utc>) -> Vec<SemanticEvent> {
        index_by_id(current)
            .into_values()
            .filter(|task| task.is_assigned_to(&self.viewer) && !task.is_completed())
            .filter_map(|task| {
                let due = task.due?;
                let remaining = due - now;
                if remaining <= Duration::zero() || remaining > self.deadline_window {
                    return None;
                }
                Some(SemanticEvent::Deadline(DeadlineEvent {
                    task_id: task.id.clone(),
                    title: task.title.clone(),
                    due,
                    minutes_remaining: remaining.num_minutes(),
                    bucket: DeadlineBucket::from_remaining(remaining),
                    course_id: task.course_id.clone(),
                }))
            })
            .collect()
    }
}

/// One task per id. A repeated id keeps the most recently updated copy,
/// with ties settled on content so position in the snapshot never matters.
fn index_by_id(tasks: &[Task]) -> BTreeMap<&str, &Task> {
    let mut index: BTreeMap<&str, &Task> = BTreeMap::new();
    for task in tasks {
        match index.get(task.id.as_str()) {
            Some(kept) => {
                tracing::debug!(task = %task.id, "duplicate id in snapshot");
                if revision(task) > revision(kept) {
                    index.insert(task.id.as_str(), task);
                }
            }
            None => {
                index.insert(task.id.as_str(), task);
            }
        }
    }
    index
}

fn revision(
    task: &Task,
) -> (
    DateTime<Utc>,
    Option<&str>,
    bool,
    Option<DateTime<Utc>>,
    &str,
    &str,
) {
    (
        task.updated_at,
        task.assignee.as_deref(),
        task.is_completed(),
        task.due,
        task.title.as_str(),
        task.course_id.as_str(),
    )
}
