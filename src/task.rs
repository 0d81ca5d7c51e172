//! Task records and the shared task document.
//!
//! Tasks, courses and user profiles live together in
//! `.studysync/tasks.json`. Every write goes through [`TaskStore`], which
//! holds the document lock for the whole read-modify-write so concurrent
//! processes never interleave partial updates.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::directory::{Course, Directory, DirectorySource, UserProfile};
use crate::error::{Error, Result};
use crate::storage::Storage;

const TASKS_SCHEMA_VERSION: &str = "studysync.tasks.v1";

fn default_schema_version() -> String {
    TASKS_SCHEMA_VERSION.to_string()
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(Error::InvalidArgument(format!(
                "invalid priority '{other}' (expected low|medium|high)"
            ))),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Completed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => f.write_str("pending"),
            TaskStatus::Completed => f.write_str("completed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    pub course_id: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Build a pending, unassigned task whose members contain its creator.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        course_id: impl Into<String>,
        created_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let created_by = created_by.into();
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            due: None,
            priority: Priority::default(),
            status: TaskStatus::default(),
            assignee: None,
            course_id: course_id.into(),
            members: vec![created_by.clone()],
            order: None,
            created_by,
            updated_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    pub fn with_due(mut self, due: DateTime<Utc>) -> Self {
        self.due = Some(due);
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = Some(order);
        self
    }

    /// Replace the member list, keeping the creator in it.
    pub fn with_members<I, S>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.members = members.into_iter().map(Into::into).collect();
        self.ensure_creator_member();
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    pub fn is_visible_to(&self, user: &str) -> bool {
        self.members.iter().any(|member| member == user)
    }

    pub fn is_assigned_to(&self, user: &str) -> bool {
        self.assignee.as_deref() == Some(user)
    }

    fn ensure_creator_member(&mut self) {
        let mut seen = HashSet::new();
        self.members.retain(|member| seen.insert(member.clone()));
        if !seen.contains(&self.created_by) {
            self.members.push(self.created_by.clone());
        }
    }

    fn touch(&mut self, actor: &str, now: DateTime<Utc>) {
        self.updated_by = Some(actor.to_string());
        self.updated_at = now;
    }
}

/// All tasks currently visible to a viewer, delivered as one unit.
pub type Snapshot = Vec<Task>;

/// Display order for a course list.
///
/// Tasks with an ordering key come first in ascending key order; tasks
/// without one follow, newest first. Equal keys fall back to newest first.
pub fn sort_for_display(tasks: &mut [Task]) {
    tasks.sort_by(display_cmp);
}

fn display_cmp(left: &Task, right: &Task) -> Ordering {
    match (left.order, right.order) {
        (Some(l), Some(r)) => l.cmp(&r),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| right.created_at.cmp(&left.created_at))
    .then_with(|| left.id.cmp(&right.id))
}

/// Newest first, used for the per-viewer feed.
pub fn sort_by_created_desc(tasks: &mut [Task]) {
    tasks.sort_by(|left, right| {
        right
            .created_at
            .cmp(&left.created_at)
            .then_with(|| left.id.cmp(&right.id))
    });
}

/// On-disk task document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDocument {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub courses: Vec<Course>,
    #[serde(default)]
    pub users: Vec<UserProfile>,
}

impl Default for TaskDocument {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            tasks: Vec::new(),
            courses: Vec::new(),
            users: Vec::new(),
        }
    }
}

impl TaskDocument {
    pub fn directory(&self) -> Directory {
        Directory::new(&self.courses, &self.users)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Result<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|task| task.id == task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))
    }

    fn course(&self, course_id: &str) -> Result<&Course> {
        self.courses
            .iter()
            .find(|course| course.id == course_id)
            .ok_or_else(|| Error::CourseNotFound(course_id.to_string()))
    }
}

/// Input for [`TaskStore::create`].
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub course_id: String,
    pub due: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub assignee: Option<String>,
    pub created_by: String,
}

#[derive(Debug, Clone)]
pub struct TaskStore {
    storage: Storage,
}

impl TaskStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Load the whole document; a missing file is an empty document.
    pub fn load(&self) -> Result<TaskDocument> {
        Ok(self
            .storage
            .read_json(&self.storage.tasks_file())?
            .unwrap_or_default())
    }

    /// Apply `mutate` to the document under the store lock and persist it.
    pub fn update<R, F>(&self, mutate: F) -> Result<R>
    where
        F: FnOnce(&mut TaskDocument) -> Result<R>,
    {
        self.storage.ensure_initialized()?;
        self.storage
            .update_json(&self.storage.tasks_file(), |doc: &mut TaskDocument| {
                let value = mutate(doc)?;
                Ok((true, value))
            })
    }

    pub fn create_course(
        &self,
        name: &str,
        description: Option<&str>,
        created_by: &str,
    ) -> Result<Course> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidArgument("course name cannot be empty".to_string()));
        }
        let course = Course {
            id: new_id("c"),
            name: name.to_string(),
            description: description.unwrap_or_default().trim().to_string(),
            created_by: created_by.to_string(),
            members: vec![created_by.to_string()],
        };
        self.update(|doc| {
            doc.courses.push(course.clone());
            Ok(course)
        })
    }

    /// Add `user` to a course and to every existing task of that course.
    pub fn add_course_member(&self, course_id: &str, user: &str) -> Result<Course> {
        self.update(|doc| {
            let course = doc
                .courses
                .iter_mut()
                .find(|course| course.id == course_id)
                .ok_or_else(|| Error::CourseNotFound(course_id.to_string()))?;
            if !course.is_member(user) {
                course.members.push(user.to_string());
            }
            let course = course.clone();
            for task in doc.tasks.iter_mut().filter(|task| task.course_id == course_id) {
                if !task.is_visible_to(user) {
                    task.members.push(user.to_string());
                }
            }
            Ok(course)
        })
    }

    pub fn upsert_user(&self, profile: UserProfile) -> Result<()> {
        self.update(|doc| {
            match doc.users.iter_mut().find(|user| user.id == profile.id) {
                Some(existing) => *existing = profile,
                None => doc.users.push(profile),
            }
            Ok(())
        })
    }

    pub fn create(&self, input: NewTask, now: DateTime<Utc>) -> Result<Task> {
        let title = input.title.trim();
        if title.is_empty() {
            return Err(Error::InvalidArgument("task title cannot be empty".to_string()));
        }
        self.update(|doc| {
            let members = doc.course(&input.course_id)?.members.clone();
            let mut task = Task::new(new_id("t"), title, &input.course_id, &input.created_by, now)
                .with_members(members);
            task.description = input.description.clone();
            task.due = input.due;
            task.priority = input.priority;
            task.assignee = input.assignee.clone();
            task.order = Some(now.timestamp_millis());
            doc.tasks.push(task.clone());
            Ok(task)
        })
    }

    pub fn assign(
        &self,
        task_id: &str,
        assignee: Option<&str>,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        self.update(|doc| {
            let task = doc.task_mut(task_id)?;
            task.assignee = assignee.map(str::to_string);
            task.touch(actor, now);
            Ok(task.clone())
        })
    }

    pub fn set_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        self.update(|doc| {
            let task = doc.task_mut(task_id)?;
            task.status = status;
            task.touch(actor, now);
            Ok(task.clone())
        })
    }

    pub fn set_due(
        &self,
        task_id: &str,
        due: Option<DateTime<Utc>>,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        self.update(|doc| {
            let task = doc.task_mut(task_id)?;
            task.due = due;
            task.touch(actor, now);
            Ok(task.clone())
        })
    }

    /// Remove a task and return it as it was.
    pub fn delete(&self, task_id: &str) -> Result<Task> {
        self.update(|doc| {
            let index = doc
                .tasks
                .iter()
                .position(|task| task.id == task_id)
                .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
            Ok(doc.tasks.remove(index))
        })
    }

    /// Tasks of one course in display order.
    pub fn course_tasks(&self, course_id: &str) -> Result<Snapshot> {
        let mut tasks: Snapshot = self
            .load()?
            .tasks
            .into_iter()
            .filter(|task| task.course_id == course_id)
            .collect();
        sort_for_display(&mut tasks);
        Ok(tasks)
    }

    /// Tasks visible to `user`, newest first.
    pub fn member_tasks(&self, user: &str) -> Result<Snapshot> {
        let mut tasks: Snapshot = self
            .load()?
            .tasks
            .into_iter()
            .filter(|task| task.is_visible_to(user))
            .collect();
        sort_by_created_desc(&mut tasks);
        Ok(tasks)
    }
}

impl DirectorySource for TaskStore {
    fn directory(&self) -> Directory {
        match self.load() {
            Ok(doc) => doc.directory(),
            Err(err) => {
                tracing::warn!(error = %err, "directory unavailable, using fallback names");
                Directory::default()
            }
        }
    }
}

fn new_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Ulid::new().to_string().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn store() -> (TempDir, TaskStore) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());
        storage.init().unwrap();
        (dir, TaskStore::new(storage))
    }

    #[test]
    fn new_task_includes_creator_in_members() {
        let task = Task::new("t1", "Essay", "c1", "u1", at(0)).with_members(["u2", "u3", "u2"]);
        assert_eq!(task.members, vec!["u2", "u3", "u1"]);
        assert!(task.is_visible_to("u1"));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, Priority::Medium);
    }

    #[test]
    fn display_sort_puts_unordered_last_newest_first() {
        let mut tasks = vec![
            Task::new("old", "a", "c", "u", at(0)),
            Task::new("k2", "b", "c", "u", at(1)).with_order(20),
            Task::new("new", "c", "c", "u", at(5)),
            Task::new("k1", "d", "c", "u", at(2)).with_order(10),
            Task::new("k1b", "e", "c", "u", at(3)).with_order(10),
        ];
        sort_for_display(&mut tasks);
        let ids: Vec<&str> = tasks.iter().map(|task| task.id.as_str()).collect();
        assert_eq!(ids, vec!["k1b", "k1", "k2", "new", "old"]);
    }

    #[test]
    fn priority_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn create_copies_course_members() {
        let (_dir, store) = store();
        let course = store.create_course("Physics", None, "u1").unwrap();
        store.add_course_member(&course.id, "u2").unwrap();

        let task = store
            .create(
                NewTask {
                    title: "Lab report".to_string(),
                    description: None,
                    course_id: course.id.clone(),
                    due: None,
                    priority: Priority::High,
                    assignee: Some("u2".to_string()),
                    created_by: "u1".to_string(),
                },
                at(0),
            )
            .unwrap();
        assert_eq!(task.members, vec!["u1", "u2"]);
        assert_eq!(task.order, Some(at(0).timestamp_millis()));

        store.add_course_member(&course.id, "u3").unwrap();
        let visible = store.member_tasks("u3").unwrap();
        assert_eq!(visible.len(), 1);
    }

    #[test]
    fn create_rejects_unknown_course_and_blank_title() {
        let (_dir, store) = store();
        let input = NewTask {
            title: "x".to_string(),
            description: None,
            course_id: "missing".to_string(),
            due: None,
            priority: Priority::Low,
            assignee: None,
            created_by: "u1".to_string(),
        };
        assert!(matches!(
            store.create(input.clone(), at(0)),
            Err(Error::CourseNotFound(_))
        ));
        let blank = NewTask {
            title: "  ".to_string(),
            ..input
        };
        assert!(matches!(
            store.create(blank, at(0)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn assign_and_complete_stamp_updater() {
        let (_dir, store) = store();
        let course = store.create_course("Chem", None, "u1").unwrap();
        let task = store
            .create(
                NewTask {
                    title: "Titration".to_string(),
                    description: None,
                    course_id: course.id,
                    due: None,
                    priority: Priority::Medium,
                    assignee: None,
                    created_by: "u1".to_string(),
                },
                at(0),
            )
            .unwrap();

        let assigned = store.assign(&task.id, Some("u2"), "u1", at(3)).unwrap();
        assert_eq!(assigned.assignee.as_deref(), Some("u2"));
        assert_eq!(assigned.updated_by.as_deref(), Some("u1"));
        assert_eq!(assigned.updated_at, at(3));

        let done = store
            .set_status(&task.id, TaskStatus::Completed, "u2", at(4))
            .unwrap();
        assert!(done.is_completed());

        assert!(matches!(
            store.assign("nope", None, "u1", at(5)),
            Err(Error::TaskNotFound(_))
        ));

        let removed = store.delete(&task.id).unwrap();
        assert_eq!(removed.title, "Titration");
        assert!(store.load().unwrap().tasks.is_empty());
        assert!(matches!(store.delete(&task.id), Err(Error::TaskNotFound(_))));
    }

    #[test]
    fn writes_require_init() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(Storage::new(dir.path()));
        assert!(matches!(
            store.create_course("x", None, "u1"),
            Err(Error::NotInitialized(_))
        ));
        assert!(store.load().unwrap().tasks.is_empty());
    }
}
