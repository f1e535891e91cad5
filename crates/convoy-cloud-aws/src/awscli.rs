//! aws CLI wrapper
//!
//! Every command runs with `--output json` under a [`Session`]'s region,
//! profile and credentials.

use crate::error::{AwsError, Result};
use crate::session::Session;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::process::Stdio;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct AwsCli {
    session: Session,
}

impl AwsCli {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Same session, pinned to `region`
    pub fn in_region(&self, region: &str) -> Self {
        Self::new(self.session.in_region(region))
    }

    /// Check that aws is installed and the session resolves to an identity
    pub async fn check_auth(&self) -> Result<CallerIdentity> {
        self.run_json(&["sts", "get-caller-identity"])
            .await
            .map_err(|e| match e {
                AwsError::CommandFailed(msg) => AwsError::AuthenticationFailed(msg),
                other => other,
            })
    }

    /// Run an aws command and return stdout
    pub async fn run(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("aws");
        cmd.args(args);
        cmd.args(["--output", "json"]);
        cmd.args(self.session.args());
        if self.session.has_credentials() {
            cmd.env_remove("AWS_PROFILE");
        }
        cmd.envs(self.session.env());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!(
            region = ?self.session.region(),
            "Running: aws {}",
            args.iter()
                .take_while(|a| !a.starts_with("--"))
                .copied()
                .collect::<Vec<_>>()
                .join(" ")
        );

        let output = match cmd.output().await {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(AwsError::CliNotFound),
            Err(e) => return Err(e.into()),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AwsError::from_stderr(&stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Run an aws command and parse its JSON output
    ///
    /// Commands that print nothing parse as an empty object.
    pub async fn run_json<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T> {
        let output = self.run(args).await?;
        parse_output(&output)
    }
}

pub(crate) fn parse_output<T: DeserializeOwned>(output: &str) -> Result<T> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(serde_json::from_str("{}")?);
    }
    Ok(serde_json::from_str(trimmed)?)
}

/// Identity behind the current session
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
    pub user_id: String,
}

/// Last segment of an ARN (`.../name` or `...:name`)
pub(crate) fn arn_name(arn: &str) -> &str {
    arn.rsplit(['/', ':']).next().unwrap_or(arn)
}
