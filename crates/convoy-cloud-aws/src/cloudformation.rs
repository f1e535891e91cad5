//! CloudFormation provisioning client

use crate::awscli::{AwsCli, parse_output};
use crate::error::AwsError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use convoy_cloud::{
    CloudError, RawStackEvent, Result, StackDescription, StackEventSource, StackReader,
    StackRequest, StackStatus, StackWriter,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

const CAPABILITIES: [&str; 3] = [
    "CAPABILITY_IAM",
    "CAPABILITY_NAMED_IAM",
    "CAPABILITY_AUTO_EXPAND",
];

const EVENT_PAGE_SIZE: &str = "100";

/// Stacks in one region
#[derive(Debug, Clone)]
pub struct CloudFormationClient {
    cli: AwsCli,
}

impl CloudFormationClient {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli }
    }

    async fn template_body(&self, name: &str) -> Result<String> {
        let output: TemplateOutput = self
            .cli
            .run_json(&[
                "cloudformation",
                "get-template",
                "--stack-name",
                name,
                "--template-stage",
                "Original",
            ])
            .await
            .map_err(|e| e.into_stack_error(name))?;
        Ok(output.body())
    }

    async fn write(&self, operation: &str, request: &StackRequest) -> Result<()> {
        let parameters = serde_json::to_string(
            &request
                .parameters
                .iter()
                .map(|(key, value)| Parameter {
                    parameter_key: key.clone(),
                    parameter_value: value.clone(),
                })
                .collect::<Vec<_>>(),
        )?;
        let tags = serde_json::to_string(
            &request
                .tags
                .iter()
                .map(|(key, value)| Tag {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect::<Vec<_>>(),
        )?;

        let mut args = vec![
            "cloudformation",
            operation,
            "--stack-name",
            request.name.as_str(),
            "--template-body",
            request.template.as_str(),
            "--parameters",
            parameters.as_str(),
            "--tags",
            tags.as_str(),
            "--capabilities",
        ];
        args.extend(CAPABILITIES);

        self.cli
            .run(&args)
            .await
            .map_err(|e| e.into_stack_error(&request.name))?;
        Ok(())
    }
}

#[async_trait]
impl StackReader for CloudFormationClient {
    async fn describe_stack(&self, name: &str) -> Result<Option<StackDescription>> {
        let output = match self
            .cli
            .run(&["cloudformation", "describe-stacks", "--stack-name", name])
            .await
        {
            Ok(output) => output,
            Err(AwsError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into_stack_error(name)),
        };
        let stacks: DescribeStacksOutput = parse_output(&output)?;
        let Some(stack) = stacks.stacks.into_iter().next() else {
            return Ok(None);
        };
        if stack.stack_status == StackStatus::DeleteComplete.as_str() {
            return Ok(None);
        }

        let template = match self.template_body(name).await {
            Ok(body) => body,
            // The stack was deleted between the two calls.
            Err(CloudError::StackNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(stack.into_description(template)?))
    }
}

#[async_trait]
impl StackWriter for CloudFormationClient {
    async fn create(&self, request: &StackRequest) -> Result<()> {
        info!(stack = %request.name, "cloudformation create-stack");
        self.write("create-stack", request).await
    }

    async fn update(&self, request: &StackRequest) -> Result<()> {
        info!(stack = %request.name, "cloudformation update-stack");
        self.write("update-stack", request).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        info!(stack = %name, "cloudformation delete-stack");
        self.cli
            .run(&["cloudformation", "delete-stack", "--stack-name", name])
            .await
            .map_err(|e| e.into_stack_error(name))?;
        Ok(())
    }
}

#[async_trait]
impl StackEventSource for CloudFormationClient {
    async fn describe_events(
        &self,
        name: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawStackEvent>> {
        let mut events = Vec::new();
        let mut token: Option<String> = None;

        // Pages arrive newest first; stop once a page reaches past `since`.
        loop {
            let mut args = vec![
                "cloudformation",
                "describe-stack-events",
                "--stack-name",
                name,
                "--max-items",
                EVENT_PAGE_SIZE,
            ];
            if let Some(token) = &token {
                args.push("--starting-token");
                args.push(token.as_str());
            }

            let output = match self.cli.run(&args).await {
                Ok(output) => output,
                Err(AwsError::NotFound(_)) => return Ok(Vec::new()),
                Err(e) => return Err(e.into_stack_error(name)),
            };
            let page: DescribeEventsOutput = parse_output(&output)?;

            let mut reached_since = false;
            for event in page.stack_events {
                let event = event.into_raw()?;
                if since.is_some_and(|s| event.timestamp < s) {
                    reached_since = true;
                    continue;
                }
                events.push(event);
            }

            match page.next_token {
                Some(next) if !reached_since => token = Some(next),
                _ => break,
            }
        }

        debug!(stack = %name, count = events.len(), "Fetched stack events");
        events.reverse();
        Ok(events)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Parameter {
    parameter_key: String,
    parameter_value: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Tag {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TemplateOutput {
    #[serde(default)]
    template_body: serde_json::Value,
}

impl TemplateOutput {
    /// YAML bodies come back as a string, JSON bodies as an object
    fn body(self) -> String {
        match self.template_body {
            serde_json::Value::String(body) => body,
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStacksOutput {
    #[serde(default)]
    stacks: Vec<StackJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StackJson {
    stack_name: String,
    stack_status: String,
    stack_status_reason: Option<String>,
    #[serde(default)]
    parameters: Vec<ParameterJson>,
    #[serde(default)]
    tags: Vec<Tag>,
    #[serde(default)]
    outputs: Vec<OutputJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParameterJson {
    parameter_key: String,
    #[serde(default)]
    parameter_value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OutputJson {
    output_key: String,
    output_value: String,
}

impl StackJson {
    fn into_description(self, template: String) -> Result<StackDescription> {
        let status = StackStatus::parse(&self.stack_status).ok_or_else(|| {
            CloudError::from(AwsError::UnexpectedOutput(format!(
                "unknown stack status {}",
                self.stack_status
            )))
        })?;
        Ok(StackDescription {
            name: self.stack_name,
            status,
            status_reason: self.stack_status_reason,
            template,
            parameters: self
                .parameters
                .into_iter()
                .map(|p| (p.parameter_key, p.parameter_value))
                .collect(),
            tags: self.tags.into_iter().map(|t| (t.key, t.value)).collect::<BTreeMap<_, _>>(),
            outputs: self
                .outputs
                .into_iter()
                .map(|o| (o.output_key, o.output_value))
                .collect(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeEventsOutput {
    #[serde(default)]
    stack_events: Vec<StackEventJson>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StackEventJson {
    event_id: String,
    stack_name: String,
    logical_resource_id: String,
    #[serde(default)]
    resource_type: String,
    resource_status: String,
    resource_status_reason: Option<String>,
    timestamp: String,
}

impl StackEventJson {
    fn into_raw(self) -> Result<RawStackEvent> {
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| {
                CloudError::from(AwsError::UnexpectedOutput(format!(
                    "bad event timestamp {}: {}",
                    self.timestamp, e
                )))
            })?
            .with_timezone(&Utc);
        Ok(RawStackEvent {
            event_id: self.event_id,
            stack_name: self.stack_name,
            logical_id: self.logical_resource_id,
            resource_type: self.resource_type,
            status: self.resource_status,
            reason: self.resource_status_reason,
            timestamp,
        })
    }
}
