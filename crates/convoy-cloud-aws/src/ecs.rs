//! ECS one-off task launcher

use crate::awscli::{AwsCli, arn_name};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use convoy_cloud::{CloudError, Result, TaskHandle, TaskLauncher, TaskSpec, TaskState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// ECS accepts at most 10 tasks per run-task call
const RUN_TASK_BATCH: u32 = convoy_cloud::task::MAX_TASKS_PER_CALL;

#[derive(Debug, Clone)]
pub struct EcsTaskLauncher {
    cli: AwsCli,
}

impl EcsTaskLauncher {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli }
    }

    /// Subnets of the default VPC, used when a task names none
    async fn default_subnets(&self) -> Result<Vec<String>> {
        let output: DescribeSubnetsOutput = self
            .cli
            .run_json(&[
                "ec2",
                "describe-subnets",
                "--filters",
                "Name=default-for-az,Values=true",
            ])
            .await?;
        let subnets: Vec<String> = output.subnets.into_iter().map(|s| s.subnet_id).collect();
        if subnets.is_empty() {
            return Err(CloudError::precondition(
                "No default subnets found in this region",
                "Pass --subnets, or run the task inside an environment",
            ));
        }
        Ok(subnets)
    }
}

#[async_trait]
impl TaskLauncher for EcsTaskLauncher {
    fn max_tasks_per_call(&self) -> u32 {
        RUN_TASK_BATCH
    }

    async fn has_default_cluster(&self) -> Result<bool> {
        let output: DescribeClustersOutput = self.cli.run_json(&["ecs", "describe-clusters"]).await?;
        Ok(output.clusters.iter().any(|c| c.status == "ACTIVE"))
    }

    async fn run_tasks(&self, spec: &TaskSpec) -> Result<Vec<TaskHandle>> {
        let subnets = if spec.subnets.is_empty() {
            self.default_subnets().await?
        } else {
            spec.subnets.clone()
        };
        let network = serde_json::to_string(&NetworkConfiguration {
            awsvpc_configuration: AwsVpcConfiguration {
                subnets,
                security_groups: spec.security_groups.clone(),
                assign_public_ip: "ENABLED".to_string(),
            },
        })?;
        let overrides = serde_json::to_string(&TaskOverride::for_spec(spec))?;
        let cluster = spec.cluster.clone().unwrap_or_else(|| "default".to_string());

        let count = spec.count.min(RUN_TASK_BATCH).to_string();
        let output: RunTaskOutput = self
            .cli
            .run_json(&[
                "ecs",
                "run-task",
                "--cluster",
                &cluster,
                "--task-definition",
                &spec.task_definition,
                "--count",
                &count,
                "--launch-type",
                "FARGATE",
                "--started-by",
                "convoy",
                "--network-configuration",
                &network,
                "--overrides",
                &overrides,
            ])
            .await?;

        let handles: Vec<TaskHandle> = output.tasks.into_iter().map(|t| t.into_handle(spec)).collect();
        if let Some(failure) = output.failures.first() {
            let reason = format!(
                "run-task failed for {}: {}",
                failure.arn.as_deref().unwrap_or(&spec.task_definition),
                failure.reason.as_deref().unwrap_or("unknown reason")
            );
            // ECS may start part of the batch and still report failures
            if !handles.is_empty() {
                warn!(group = %spec.group, started = handles.len(), "Stopping tasks from a partly failed run-task");
                if let Err(e) = self.stop_tasks(&handles).await {
                    warn!(group = %spec.group, error = %e, "Could not stop partly launched tasks");
                }
            }
            return Err(CloudError::BackendRejected {
                stack: spec.group.clone(),
                reason,
            });
        }

        info!(group = %spec.group, count = handles.len(), "Started tasks");
        Ok(handles)
    }

    async fn describe_tasks(&self, handles: &[TaskHandle]) -> Result<Vec<(String, TaskState)>> {
        let mut by_cluster: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for handle in handles {
            by_cluster
                .entry(handle.cluster.as_str())
                .or_default()
                .push(handle.task_id.as_str());
        }

        let mut states = Vec::new();
        for (cluster, ids) in by_cluster {
            // describe-tasks takes at most 100 ids per call
            for chunk in ids.chunks(100) {
                let mut args = vec!["ecs", "describe-tasks", "--cluster", cluster, "--tasks"];
                args.extend(chunk.iter().copied());
                let output: DescribeTasksOutput = self.cli.run_json(&args).await?;
                for task in output.tasks {
                    let id = arn_name(&task.task_arn).to_string();
                    debug!(task = %id, status = %task.last_status, "Task status");
                    states.push((id, task.state()));
                }
            }
        }
        Ok(states)
    }

    async fn stop_tasks(&self, handles: &[TaskHandle]) -> Result<()> {
        for handle in handles {
            self.cli
                .run(&[
                    "ecs",
                    "stop-task",
                    "--cluster",
                    &handle.cluster,
                    "--task",
                    &handle.task_id,
                    "--reason",
                    "Stopped by convoy",
                ])
                .await?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NetworkConfiguration {
    awsvpc_configuration: AwsVpcConfiguration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AwsVpcConfiguration {
    subnets: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    security_groups: Vec<String>,
    assign_public_ip: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskOverride {
    container_overrides: Vec<ContainerOverride>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContainerOverride {
    name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    command: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    environment: Vec<KeyValue>,
}

#[derive(Debug, Serialize)]
struct KeyValue {
    name: String,
    value: String,
}

impl TaskOverride {
    fn for_spec(spec: &TaskSpec) -> Self {
        Self {
            container_overrides: vec![ContainerOverride {
                name: spec.group.clone(),
                command: spec.command.clone(),
                environment: spec
                    .variables
                    .iter()
                    .map(|(name, value)| KeyValue {
                        name: name.clone(),
                        value: value.clone(),
                    })
                    .collect(),
            }],
        }
    }
}

#[derive(Debug, Deserialize)]
struct DescribeClustersOutput {
    #[serde(default)]
    clusters: Vec<ClusterJson>,
}

#[derive(Debug, Deserialize)]
struct ClusterJson {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeSubnetsOutput {
    #[serde(default)]
    subnets: Vec<SubnetJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SubnetJson {
    subnet_id: String,
}

#[derive(Debug, Deserialize)]
struct RunTaskOutput {
    #[serde(default)]
    tasks: Vec<TaskJson>,
    #[serde(default)]
    failures: Vec<FailureJson>,
}

#[derive(Debug, Deserialize)]
struct FailureJson {
    arn: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescribeTasksOutput {
    #[serde(default)]
    tasks: Vec<TaskJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskJson {
    task_arn: String,
    cluster_arn: String,
    #[serde(default)]
    last_status: String,
    stopped_reason: Option<String>,
    created_at: Option<String>,
    #[serde(default)]
    containers: Vec<ContainerJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContainerJson {
    name: String,
    exit_code: Option<i32>,
}

impl TaskJson {
    fn state(&self) -> TaskState {
        match self.last_status.as_str() {
            "STOPPED" | "DELETED" => TaskState::Stopped {
                exit_code: self.containers.iter().find_map(|c| c.exit_code),
                reason: self.stopped_reason.clone(),
            },
            "RUNNING" | "DEACTIVATING" | "STOPPING" | "DEPROVISIONING" => TaskState::Running,
            _ => TaskState::Pending,
        }
    }

    fn into_handle(self, spec: &TaskSpec) -> TaskHandle {
        let task_id = arn_name(&self.task_arn).to_string();
        let container = self
            .containers
            .first()
            .map(|c| c.name.clone())
            .unwrap_or_else(|| spec.group.clone());
        let launched_at = self
            .created_at
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        TaskHandle {
            log_stream: TaskHandle::log_stream_for(&container, &task_id),
            task_id,
            cluster: arn_name(&self.cluster_arn).to_string(),
            log_group: spec.log_group.clone(),
            launched_at,
        }
    }
}
