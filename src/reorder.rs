//! Manual task ordering.
//!
//! A reorder rewrites the ordering key of every task in the submitted list
//! as `base + index`, where `base` is the current wall-clock time in
//! milliseconds. Concurrent reorders are last-writer-wins: the later
//! `base` sorts after, and whichever write lands last defines the list.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::task::TaskStore;

/// Persists ordering keys for a batch of tasks.
pub trait TaskWriter {
    /// Set `order` on each listed task. Implementations validate every id
    /// before writing anything.
    fn write_orders(&self, orders: &[(String, i64)], actor: &str, now: DateTime<Utc>)
        -> Result<()>;
}

impl TaskWriter for TaskStore {
    fn write_orders(
        &self,
        orders: &[(String, i64)],
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.update(|doc| {
            for (task_id, _) in orders {
                doc.task_mut(task_id)?;
            }
            for (task_id, order) in orders {
                let task = doc.task_mut(task_id)?;
                task.order = Some(*order);
                task.updated_by = Some(actor.to_string());
                task.updated_at = now;
            }
            Ok(())
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderAssignment {
    pub task_id: String,
    pub order: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReorderOutcome {
    pub base: i64,
    pub assignments: Vec<OrderAssignment>,
}

pub struct ReorderArbiter<W> {
    writer: W,
    actor: String,
}

impl<W: TaskWriter> ReorderArbiter<W> {
    pub fn new(writer: W, actor: impl Into<String>) -> Self {
        Self {
            writer,
            actor: actor.into(),
        }
    }

    /// Persist `ordered_ids` in that order, based at the current time.
    pub fn reorder(&self, ordered_ids: &[String]) -> Result<ReorderOutcome> {
        let now = Utc::now();
        self.reorder_at(ordered_ids, now.timestamp_millis(), now)
    }

    pub fn reorder_at(
        &self,
        ordered_ids: &[String],
        base: i64,
        now: DateTime<Utc>,
    ) -> Result<ReorderOutcome> {
        let mut seen = HashSet::new();
        if let Some(duplicate) = ordered_ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(Error::InvalidArgument(format!(
                "task '{duplicate}' listed more than once"
            )));
        }

        let orders: Vec<(String, i64)> = ordered_ids
            .iter()
            .zip(base..)
            .map(|(id, order)| (id.clone(), order))
            .collect();
        if !orders.is_empty() {
            self.writer.write_orders(&orders, &self.actor, now)?;
        }
        tracing::debug!(count = orders.len(), base, "reordered tasks");

        Ok(ReorderOutcome {
            base,
            assignments: orders
                .into_iter()
                .map(|(task_id, order)| OrderAssignment { task_id, order })
                .collect(),
        })
    }
}

/// Move `active` to the position currently held by `over`.
///
/// Returns `None` when nothing moves: equal ids, or either id missing.
pub fn move_task(ids: &[String], active: &str, over: &str) -> Option<Vec<String>> {
    if active == over {
        return None;
    }
    let from = ids.iter().position(|id| id == active)?;
    let to = ids.iter().position(|id| id == over)?;
    let mut moved = ids.to_vec();
    let item = moved.remove(from);
    moved.insert(to, item);
    Some(moved)
}
