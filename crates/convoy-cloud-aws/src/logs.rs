//! CloudWatch Logs store

use crate::awscli::AwsCli;
use crate::error::AwsError;
use async_trait::async_trait;
use convoy_cloud::{LogEvent, LogStore, Result};
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct CloudWatchLogs {
    cli: AwsCli,
}

impl CloudWatchLogs {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli }
    }
}

#[async_trait]
impl LogStore for CloudWatchLogs {
    async fn log_group_exists(&self, group: &str) -> Result<bool> {
        let output: DescribeLogGroupsOutput = self
            .cli
            .run_json(&["logs", "describe-log-groups", "--log-group-name-prefix", group])
            .await?;
        Ok(output.log_groups.iter().any(|g| g.log_group_name == group))
    }

    async fn stream_events(
        &self,
        group: &str,
        stream: &str,
        start: Option<i64>,
    ) -> Result<Vec<LogEvent>> {
        let start = start.map(|ms| ms.to_string());
        let mut args = vec![
            "logs",
            "get-log-events",
            "--log-group-name",
            group,
            "--log-stream-name",
            stream,
            "--start-from-head",
        ];
        if let Some(start) = &start {
            args.push("--start-time");
            args.push(start.as_str());
        }

        let output: GetLogEventsOutput = match self.cli.run_json(&args).await {
            Ok(output) => output,
            // Task streams appear once the container starts writing.
            Err(AwsError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(output
            .events
            .into_iter()
            .map(|e| LogEvent {
                stream: stream.to_string(),
                timestamp: e.timestamp,
                message: e.message,
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogGroupsOutput {
    #[serde(default)]
    log_groups: Vec<LogGroupJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogGroupJson {
    log_group_name: String,
}

#[derive(Debug, Deserialize)]
struct GetLogEventsOutput {
    #[serde(default)]
    events: Vec<LogEventJson>,
}

#[derive(Debug, Deserialize)]
struct LogEventJson {
    timestamp: i64,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::awscli::parse_output;

    #[test]
    fn test_parses_log_events() {
        let output: GetLogEventsOutput = parse_output(
            r#"{
                "events": [
                    {"timestamp": 1791970200250, "message": "Running migrations\n", "ingestionTime": 1791970200300},
                    {"timestamp": 1791970201000, "message": "Done", "ingestionTime": 1791970201050}
                ],
                "nextForwardToken": "f/3870",
                "nextBackwardToken": "b/3869"
            }"#,
        )
        .unwrap();
        assert_eq!(output.events.len(), 2);
        assert_eq!(output.events[0].timestamp, 1791970200250);
    }

    #[test]
    fn test_group_match_is_exact() {
        let output: DescribeLogGroupsOutput = parse_output(
            r#"{"logGroups": [{"logGroupName": "/convoy/tasks/db-migrate-old", "storedBytes": 0}]}"#,
        )
        .unwrap();
        assert!(!output.log_groups.iter().any(|g| g.log_group_name == "/convoy/tasks/db-migrate"));
    }
}
