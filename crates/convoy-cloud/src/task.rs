//! One-off task launching

use crate::error::{CloudError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Log stream prefix configured on task definitions
pub const TASK_LOG_STREAM_PREFIX: &str = "convoy-task";

/// Tasks a single launch call may start
pub const MAX_TASKS_PER_CALL: u32 = 10;

/// What to launch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub group: String,
    pub count: u32,
    /// Cluster to run in; `None` means the account's default cluster
    pub cluster: Option<String>,
    pub task_definition: String,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    /// Overrides the container command when non-empty
    pub command: Vec<String>,
    pub variables: BTreeMap<String, String>,
    pub log_group: String,
}

/// A launched task, owned by the runner until it stops
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub task_id: String,
    pub cluster: String,
    pub log_group: String,
    pub log_stream: String,
    pub launched_at: DateTime<Utc>,
}

impl TaskHandle {
    /// Stream name written by the `awslogs` driver: `{prefix}/{container}/{task id}`
    pub fn log_stream_for(container: &str, task_id: &str) -> String {
        format!("{}/{}/{}", TASK_LOG_STREAM_PREFIX, container, task_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Running,
    Stopped {
        exit_code: Option<i32>,
        reason: Option<String>,
    },
}

impl TaskState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, TaskState::Stopped { .. })
    }
}

/// Backend capability for running containers once
#[async_trait]
pub trait TaskLauncher: Send + Sync {
    async fn has_default_cluster(&self) -> Result<bool>;

    /// Upper bound on `spec.count` for one [`TaskLauncher::run_tasks`] call
    fn max_tasks_per_call(&self) -> u32 {
        MAX_TASKS_PER_CALL
    }

    /// Start exactly `spec.count` tasks
    ///
    /// On error nothing from this call may be left running.
    async fn run_tasks(&self, spec: &TaskSpec) -> Result<Vec<TaskHandle>>;

    /// Current state per task id
    async fn describe_tasks(&self, handles: &[TaskHandle]) -> Result<Vec<(String, TaskState)>>;

    async fn stop_tasks(&self, handles: &[TaskHandle]) -> Result<()>;
}

pub struct TaskRunner<L: ?Sized = dyn TaskLauncher> {
    launcher: Arc<L>,
}

impl<L> TaskRunner<L>
where
    L: TaskLauncher + ?Sized,
{
    pub fn new(launcher: Arc<L>) -> Self {
        Self { launcher }
    }

    pub fn launcher(&self) -> &Arc<L> {
        &self.launcher
    }

    /// Launch `spec.count` tasks in batches and return their handles
    ///
    /// If a batch fails, tasks started by earlier batches are stopped
    /// before the error is returned.
    pub async fn run(&self, spec: &TaskSpec) -> Result<Vec<TaskHandle>> {
        if spec.count == 0 {
            return Err(CloudError::precondition(
                format!("Task group '{}' asks for zero tasks", spec.group),
                "Pass a task count of at least 1",
            ));
        }
        if spec.cluster.is_none() && !self.launcher.has_default_cluster().await? {
            return Err(CloudError::precondition(
                "No default cluster is available to run the task in",
                "Create a default cluster, or run the task inside an environment with --env",
            ));
        }

        let per_call = self.launcher.max_tasks_per_call().max(1);
        let mut handles = Vec::with_capacity(spec.count as usize);
        let mut remaining = spec.count;
        while remaining > 0 {
            let batch = TaskSpec {
                count: remaining.min(per_call),
                ..spec.clone()
            };
            let started = match self.launcher.run_tasks(&batch).await {
                Ok(started) if started.is_empty() => Err(CloudError::BackendRejected {
                    stack: spec.group.clone(),
                    reason: "no tasks were started".to_string(),
                }),
                other => other,
            };
            match started {
                Ok(started) => {
                    remaining = remaining.saturating_sub(started.len() as u32);
                    handles.extend(started);
                }
                Err(e) => {
                    self.abandon(&spec.group, &handles).await;
                    return Err(e);
                }
            }
        }

        info!(group = %spec.group, count = handles.len(), "Tasks launched");
        Ok(handles)
    }

    async fn abandon(&self, group: &str, handles: &[TaskHandle]) {
        if handles.is_empty() {
            return;
        }
        warn!(group = %group, count = handles.len(), "Launch failed part way, stopping started tasks");
        if let Err(e) = self.launcher.stop_tasks(handles).await {
            let ids: Vec<&str> = handles.iter().map(|h| h.task_id.as_str()).collect();
            warn!(group = %group, tasks = %ids.join(","), error = %e, "Could not stop started tasks");
        }
    }

    /// True once every task has stopped
    pub async fn all_stopped(&self, handles: &[TaskHandle]) -> Result<bool> {
        let states = self.launcher.describe_tasks(handles).await?;
        Ok(handles.iter().all(|handle| {
            states
                .iter()
                .find(|(id, _)| *id == handle.task_id)
                .is_some_and(|(_, state)| state.is_stopped())
        }))
    }

    pub async fn stop(&self, handles: &[TaskHandle]) -> Result<()> {
        self.launcher.stop_tasks(handles).await
    }
}
