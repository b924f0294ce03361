// SPDX-License-Identifier: MIT
//! Task-comment bridge — maps task-scoped comments onto a synthetic
//! per-task channel and works out which stakeholders to notify directly.
//!
//! The bridge never blocks the comment broadcast on the task lookup: the
//! hub posts first, looks the task up afterwards, and skips only the
//! notification step when the lookup fails.

use crate::tasks::TaskSummary;

/// Namespace prefix for synthetic per-task channels.
const TASK_CHANNEL_PREFIX: &str = "task:";

/// Deterministic channel id for a task — the same task always maps to the
/// same channel regardless of caller.
pub fn task_channel_id(task_id: &str) -> String {
    format!("{TASK_CHANNEL_PREFIX}{task_id}")
}

/// The userIds owed a direct `task_comment_notification`: the task's
/// assignee and creator, minus the comment author, deduplicated (a task
/// whose assignee is also its creator yields one notification, not two).
pub fn stakeholders(task: &TaskSummary, author_id: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(2);
    for candidate in [&task.assigned_to_id, &task.created_by_id] {
        if let Some(user_id) = candidate {
            if user_id != author_id && !out.iter().any(|u| u == user_id) {
                out.push(user_id.clone());
            }
        }
    }
    out
}
