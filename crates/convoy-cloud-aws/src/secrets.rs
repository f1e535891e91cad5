//! Secrets Manager client

use crate::awscli::AwsCli;
use crate::error::AwsError;
use async_trait::async_trait;
use convoy_cloud::{CloudError, Result, services::SecretsManager};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SecretsManagerClient {
    cli: AwsCli,
}

impl SecretsManagerClient {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateSecretOutput {
    #[serde(rename = "ARN")]
    arn: String,
}

#[async_trait]
impl SecretsManager for SecretsManagerClient {
    async fn create_secret(&self, name: &str, value: &str) -> Result<String> {
        let output: CreateSecretOutput = self
            .cli
            .run_json(&[
                "secretsmanager",
                "create-secret",
                "--name",
                name,
                "--secret-string",
                value,
            ])
            .await
            .map_err(|e| match e {
                AwsError::AlreadyExists(_) => CloudError::RecordAlreadyExists(format!("secret {}", name)),
                other => other.into(),
            })?;
        Ok(output.arn)
    }

    async fn delete_secret(&self, name: &str) -> Result<()> {
        match self
            .cli
            .run(&[
                "secretsmanager",
                "delete-secret",
                "--secret-id",
                name,
                "--force-delete-without-recovery",
            ])
            .await
        {
            Ok(_) => Ok(()),
            Err(AwsError::NotFound(_)) => {
                debug!(secret = %name, "Secret already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::awscli::parse_output;

    #[test]
    fn test_parses_create_secret() {
        let output: CreateSecretOutput = parse_output(
            r#"{"ARN": "arn:aws:secretsmanager:us-west-2:123456789012:secret:my-app-db-a1b2c3", "Name": "my-app-db", "VersionId": "EXAMPLE1"}"#,
        )
        .unwrap();
        assert!(output.arn.ends_with("my-app-db-a1b2c3"));
    }
}
