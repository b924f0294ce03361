// SPDX-License-Identifier: MIT
//! Task directory — the one external capability the collaboration core
//! consumes. Task records live in the hosting CRUD API's storage layer;
//! this module only resolves a task id to its stakeholders and title so
//! the task-comment bridge can notify them.

use async_trait::async_trait;
use serde::Deserialize;

/// The slice of a task record the bridge needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub title: String,
    #[serde(default)]
    pub assigned_to_id: Option<String>,
    #[serde(default)]
    pub created_by_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TaskLookupError {
    #[error("task not found: {0}")]
    NotFound(String),
    #[error("task lookup failed: {0}")]
    Upstream(String),
}

/// Resolves task ids against the hosting API.
///
/// The only suspension point in the collaboration core — callers must not
/// hold the hub lock across this await.
#[async_trait]
pub trait TaskDirectory: Send + Sync {
    async fn get_task(&self, task_id: &str) -> Result<TaskSummary, TaskLookupError>;
}

// ─── HTTP implementation ─────────────────────────────────────────────────────

/// Looks tasks up via `GET {base}/tasks/{id}` on the hosting CRUD API.
pub struct HttpTaskDirectory {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpTaskDirectory {
    pub fn new(base_url: &str, api_token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        }
    }
}

#[async_trait]
impl TaskDirectory for HttpTaskDirectory {
    async fn get_task(&self, task_id: &str) -> Result<TaskSummary, TaskLookupError> {
        let url = format!("{}/tasks/{}", self.base_url, task_id);
        let mut req = self.client.get(&url);
        if let Some(token) = &self.api_token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| TaskLookupError::Upstream(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(TaskLookupError::NotFound(task_id.to_string()));
        }
        if !resp.status().is_success() {
            return Err(TaskLookupError::Upstream(format!(
                "{} returned {}",
                url,
                resp.status()
            )));
        }

        resp.json::<TaskSummary>()
            .await
            .map_err(|e| TaskLookupError::Upstream(e.to_string()))
    }
}

// ─── In-memory fixture ───────────────────────────────────────────────────────

/// Fixed task table for tests and local development.
#[derive(Default)]
pub struct StaticTaskDirectory {
    tasks: std::collections::HashMap<String, TaskSummary>,
}

impl StaticTaskDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        mut self,
        task_id: &str,
        title: &str,
        assigned_to_id: Option<&str>,
        created_by_id: Option<&str>,
    ) -> Self {
        self.tasks.insert(
            task_id.to_string(),
            TaskSummary {
                title: title.to_string(),
                assigned_to_id: assigned_to_id.map(str::to_string),
                created_by_id: created_by_id.map(str::to_string),
            },
        );
        self
    }
}

#[async_trait]
impl TaskDirectory for StaticTaskDirectory {
    async fn get_task(&self, task_id: &str) -> Result<TaskSummary, TaskLookupError> {
        self.tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| TaskLookupError::NotFound(task_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_directory_round_trip() {
        let dir =
            StaticTaskDirectory::new().insert("t1", "Fix invoice totals", Some("u3"), Some("u4"));
        let task = dir.get_task("t1").await.unwrap();
        assert_eq!(task.title, "Fix invoice totals");
        assert_eq!(task.assigned_to_id.as_deref(), Some("u3"));
        assert!(matches!(
            dir.get_task("missing").await,
            Err(TaskLookupError::NotFound(_))
        ));
    }

    #[test]
    fn task_summary_parses_camel_case() {
        let task: TaskSummary = serde_json::from_str(
            r#"{"title":"Draft proposal","assignedToId":"u3","createdById":"u4"}"#,
        )
        .unwrap();
        assert_eq!(task.created_by_id.as_deref(), Some("u4"));
    }

    #[test]
    fn task_summary_tolerates_missing_stakeholders() {
        let task: TaskSummary = serde_json::from_str(r#"{"title":"Unassigned"}"#).unwrap();
        assert!(task.assigned_to_id.is_none());
        assert!(task.created_by_id.is_none());
    }
}
