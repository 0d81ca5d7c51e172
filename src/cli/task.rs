//! studysync task command implementations.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::channels::ToastBus;
use crate::cli::Context;
use crate::config::parse_duration;
use crate::directory::DirectorySource;
use crate::dispatch::{DispatchReport, NotificationDispatcher, TaskChange};
use crate::error::{Error, Result};
use crate::output::{emit_success, render_toast, Report};
use crate::reorder::{move_task, ReorderArbiter, ReorderOutcome};
use crate::task::{NewTask, Priority, Task, TaskStatus};

pub struct AddOptions {
    pub title: String,
    pub course: String,
    pub due: Option<String>,
    pub priority: String,
    pub assignee: Option<String>,
    pub description: Option<String>,
}

/// Parse an absolute RFC 3339 time or an offset from `now` like `90m`.
pub fn parse_due(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    parse_duration(raw)
        .map(|offset| now + offset)
        .map_err(|_| {
            Error::InvalidArgument(format!(
                "invalid due time '{raw}' (expected RFC 3339 or an offset like 90m, 2d)"
            ))
        })
}

fn describe(task: &Task) -> String {
    let mut line = format!("{}  [{}] {}", task.id, task.status, task.title);
    if let Some(assignee) = &task.assignee {
        line.push_str(&format!("  @{assignee}"));
    }
    if let Some(due) = task.due {
        line.push_str(&format!("  due {}", due.to_rfc3339()));
    }
    line
}

fn task_summary(report: &mut Report, task: &Task) {
    report.field("id", task.id.clone());
    report.field("course", task.course_id.clone());
    report.field("status", task.status.to_string());
    report.field("priority", task.priority.to_string());
    report.field(
        "assignee",
        task.assignee.clone().unwrap_or_else(|| "none".to_string()),
    );
    report.field(
        "due",
        task.due
            .map(|due| due.to_rfc3339())
            .unwrap_or_else(|| "none".to_string()),
    );
}

/// A written task plus the notification the write produced.
#[derive(Serialize)]
struct TaskWrite<'a> {
    #[serde(flatten)]
    task: &'a Task,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification: Option<DispatchReport>,
}

fn notifier(ctx: &Context) -> Result<(NotificationDispatcher, ToastBus)> {
    let config = ctx.config();
    let settings = config.settings()?;
    let bus = ToastBus::new(settings.toast_capacity);
    let dispatcher = NotificationDispatcher::new(bus.clone(), ctx.platform(&config, &settings)?);
    dispatcher.prepare();
    Ok((dispatcher, bus))
}

/// Announce a committed write on both channels. The write already
/// happened, so delivery problems are logged rather than returned.
fn announce(ctx: &Context, change: &TaskChange, report: &mut Report) -> Option<DispatchReport> {
    let (dispatcher, bus) = match notifier(ctx) {
        Ok(notifier) => notifier,
        Err(err) => {
            tracing::warn!(tag = %change.tag(), error = %err, "notification channels unavailable");
            return None;
        }
    };
    let mut shown = bus.subscribe();
    let directory = ctx.store().directory();
    let delivered = dispatcher.announce(
        change,
        &directory.actor_name(Some(change.actor())),
        &directory.course_name(change.course_id()),
    );
    while let Ok(toast) = shown.try_recv() {
        report.item(render_toast(&toast));
    }
    delivered
}

fn emit_write(
    ctx: &Context,
    command: &str,
    task: &Task,
    viewer: &str,
    mut report: Report,
) -> Result<()> {
    let notification = announce(ctx, &TaskChange::updated(task, viewer), &mut report);
    emit_success(
        ctx.output,
        command,
        &TaskWrite { task, notification },
        Some(&report),
    )
}

pub fn run_add(ctx: &Context, opts: AddOptions) -> Result<()> {
    let viewer = ctx.viewer()?;
    let now = Utc::now();
    let due = opts.due.as_deref().map(|raw| parse_due(raw, now)).transpose()?;
    let priority: Priority = opts.priority.parse()?;

    let task = ctx.store().create(
        NewTask {
            title: opts.title,
            description: opts.description,
            course_id: opts.course,
            due,
            priority,
            assignee: opts.assignee,
            created_by: viewer,
        },
        now,
    )?;

    let mut report = Report::new(format!("studysync task add: created {}", task.id));
    task_summary(&mut report, &task);
    if task.due.is_some_and(|due| due <= now) {
        report.warn("due time is in the past");
    }

    emit_success(ctx.output, "task add", &task, Some(&report))
}

pub fn run_assign(ctx: &Context, id: &str, assignee: Option<String>) -> Result<()> {
    let viewer = ctx.viewer()?;
    let task = ctx
        .store()
        .assign(id, assignee.as_deref(), &viewer, Utc::now())?;

    let header = match &task.assignee {
        Some(assignee) => format!("studysync task assign: {} -> {assignee}", task.id),
        None => format!("studysync task assign: {} unassigned", task.id),
    };
    let mut report = Report::new(header);
    task_summary(&mut report, &task);

    emit_write(ctx, "task assign", &task, &viewer, report)
}

pub fn run_due(ctx: &Context, id: &str, when: Option<String>) -> Result<()> {
    let viewer = ctx.viewer()?;
    let now = Utc::now();
    let due = when.as_deref().map(|raw| parse_due(raw, now)).transpose()?;
    let task = ctx.store().set_due(id, due, &viewer, now)?;

    let mut report = Report::new(format!("studysync task due: updated {}", task.id));
    task_summary(&mut report, &task);

    emit_write(ctx, "task due", &task, &viewer, report)
}

pub fn run_status(ctx: &Context, id: &str, status: TaskStatus) -> Result<()> {
    let viewer = ctx.viewer()?;
    let task = ctx.store().set_status(id, status, &viewer, Utc::now())?;
    let command = match status {
        TaskStatus::Completed => "task done",
        TaskStatus::Pending => "task reopen",
    };

    let mut report = Report::new(format!("studysync {command}: {} is {}", task.id, task.status));
    task_summary(&mut report, &task);

    emit_write(ctx, command, &task, &viewer, report)
}

pub fn run_delete(ctx: &Context, id: &str) -> Result<()> {
    let viewer = ctx.viewer()?;
    let task = ctx.store().delete(id)?;

    let mut report = Report::new(format!("studysync task delete: removed {}", task.id));
    report.field("title", task.title.clone());
    report.field("course", task.course_id.clone());
    let notification = announce(ctx, &TaskChange::deleted(&task, viewer), &mut report);

    emit_success(
        ctx.output,
        "task delete",
        &TaskWrite {
            task: &task,
            notification,
        },
        Some(&report),
    )
}

#[derive(Serialize)]
struct TaskList {
    scope: String,
    tasks: Vec<Task>,
}

pub fn run_list(ctx: &Context, course: Option<&str>) -> Result<()> {
    let store = ctx.store();
    let (scope, tasks) = match course {
        Some(course_id) => (format!("course:{course_id}"), store.course_tasks(course_id)?),
        None => {
            let viewer = ctx.viewer()?;
            (format!("member:{viewer}"), store.member_tasks(&viewer)?)
        }
    };

    let mut report = Report::new(format!(
        "studysync task list: {} task(s) in {scope}",
        tasks.len()
    ));
    for task in &tasks {
        report.item(describe(task));
    }

    emit_success(ctx.output, "task list", &TaskList { scope, tasks }, Some(&report))
}

fn emit_reorder(ctx: &Context, command: &str, outcome: &ReorderOutcome) -> Result<()> {
    let mut report = Report::new(format!(
        "studysync {command}: {} task(s) reordered",
        outcome.assignments.len()
    ));
    for assignment in &outcome.assignments {
        report.item(format!("{}  order {}", assignment.task_id, assignment.order));
    }
    emit_success(ctx.output, command, outcome, Some(&report))
}

pub fn run_reorder(ctx: &Context, ids: Vec<String>) -> Result<()> {
    let viewer = ctx.viewer()?;
    let outcome = ReorderArbiter::new(ctx.store(), viewer).reorder(&ids)?;
    emit_reorder(ctx, "task reorder", &outcome)
}

pub fn run_move(ctx: &Context, id: &str, over: &str) -> Result<()> {
    let viewer = ctx.viewer()?;
    let store = ctx.store();
    let doc = store.load()?;
    let course_id = doc
        .tasks
        .iter()
        .find(|task| task.id == id)
        .map(|task| task.course_id.clone())
        .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;

    let ids: Vec<String> = store
        .course_tasks(&course_id)?
        .into_iter()
        .map(|task| task.id)
        .collect();
    if !ids.iter().any(|task_id| task_id == over) {
        return Err(Error::InvalidArgument(format!(
            "task '{over}' is not in course {course_id}"
        )));
    }

    let outcome = match move_task(&ids, id, over) {
        Some(moved) => ReorderArbiter::new(store, viewer).reorder(&moved)?,
        None => ReorderOutcome {
            base: 0,
            assignments: Vec::new(),
        },
    };
    emit_reorder(ctx, "task move", &outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn due_accepts_rfc3339_and_offsets() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        assert_eq!(
            parse_due("2026-03-03T09:30:00Z", now).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 3, 9, 30, 0).unwrap()
        );
        assert_eq!(parse_due("90m", now).unwrap(), now + Duration::minutes(90));
        assert_eq!(parse_due("2d", now).unwrap(), now + Duration::days(2));
        assert!(matches!(
            parse_due("tomorrow", now),
            Err(Error::InvalidArgument(_))
        ));
    }
}
