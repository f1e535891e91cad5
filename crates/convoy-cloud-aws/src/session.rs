//! Credential and region context for aws CLI invocations
//!
//! A [`SessionProvider`] is built once by the caller and hands out
//! [`Session`] values. Sessions are plain data; nothing is cached across
//! providers.

use crate::awscli::AwsCli;
use crate::error::{AwsError, Result};
use serde::Deserialize;

/// Static or temporary credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    region: Option<String>,
    profile: Option<String>,
    credentials: Option<Credentials>,
}

impl Session {
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    /// Same credentials, different region
    pub fn in_region(&self, region: impl Into<String>) -> Self {
        Self {
            region: Some(region.into()),
            ..self.clone()
        }
    }

    /// Global flags for every command run under this session
    pub(crate) fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(region) = &self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        // Explicit credentials win over any profile.
        if self.credentials.is_none()
            && let Some(profile) = &self.profile
        {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }
        args
    }

    /// Environment variables carrying explicit credentials
    pub(crate) fn env(&self) -> Vec<(&'static str, String)> {
        let Some(creds) = &self.credentials else {
            return Vec::new();
        };
        let mut env = vec![
            ("AWS_ACCESS_KEY_ID", creds.access_key_id.clone()),
            ("AWS_SECRET_ACCESS_KEY", creds.secret_access_key.clone()),
        ];
        if let Some(token) = &creds.session_token {
            env.push(("AWS_SESSION_TOKEN", token.clone()));
        }
        env
    }

    pub(crate) fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleOutput {
    credentials: AssumedCredentials,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumedCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
}

/// Hands out sessions derived from a default profile and region
#[derive(Debug, Clone, Default)]
pub struct SessionProvider {
    profile: Option<String>,
    region: Option<String>,
}

impl SessionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    /// Session for the default credential chain
    pub fn default_session(&self) -> Session {
        Session {
            region: self.region.clone(),
            profile: self.profile.clone(),
            credentials: None,
        }
    }

    pub fn default_session_with_region(&self, region: impl Into<String>) -> Session {
        self.default_session().in_region(region)
    }

    pub fn from_profile(&self, profile: impl Into<String>) -> Session {
        Session {
            region: self.region.clone(),
            profile: Some(profile.into()),
            credentials: None,
        }
    }

    pub fn from_static(&self, credentials: Credentials) -> Session {
        Session {
            region: self.region.clone(),
            profile: None,
            credentials: Some(credentials),
        }
    }

    /// Assume `role_arn` from the default session and return a session using
    /// the temporary credentials in `region`
    pub async fn from_role(&self, role_arn: &str, region: &str) -> Result<Session> {
        let cli = AwsCli::new(self.default_session());
        let output: AssumeRoleOutput = cli
            .run_json(&[
                "sts",
                "assume-role",
                "--role-arn",
                role_arn,
                "--role-session-name",
                &role_session_name(),
            ])
            .await
            .map_err(|e| match e {
                AwsError::CommandFailed(msg) | AwsError::Validation(msg) => {
                    AwsError::AuthenticationFailed(format!("cannot assume {}: {}", role_arn, msg))
                }
                other => other,
            })?;
        tracing::debug!(role = %role_arn, region = %region, "Assumed role");

        Ok(Session {
            region: Some(region.to_string()),
            profile: None,
            credentials: Some(Credentials {
                access_key_id: output.credentials.access_key_id,
                secret_access_key: output.credentials.secret_access_key,
                session_token: Some(output.credentials.session_token),
            }),
        })
    }
}

fn role_session_name() -> String {
    format!("convoy-{}", chrono::Utc::now().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_credentials_override_profile() {
        let provider = SessionProvider::new()
            .with_profile(Some("dev".to_string()))
            .with_region(Some("us-west-2".to_string()));

        let session = provider.default_session();
        assert_eq!(session.args(), vec!["--region", "us-west-2", "--profile", "dev"]);
        assert!(session.env().is_empty());

        let session = provider.from_static(Credentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: None,
        });
        assert_eq!(session.args(), vec!["--region", "us-west-2"]);
        assert_eq!(session.env().len(), 2);
        let debug = format!("{:?}", session);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("\"secret\""));
    }

    #[test]
    fn test_in_region_keeps_profile() {
        let session = SessionProvider::new().from_profile("prod").in_region("eu-west-1");
        assert_eq!(session.region(), Some("eu-west-1"));
        assert_eq!(session.profile(), Some("prod"));
    }

    #[test]
    fn test_parses_assume_role_output() {
        let output: AssumeRoleOutput = serde_json::from_str(
            r#"{
                "Credentials": {
                    "AccessKeyId": "ASIAEXAMPLE",
                    "SecretAccessKey": "wJalr",
                    "SessionToken": "FwoGZX",
                    "Expiration": "2026-10-14T12:00:00+00:00"
                },
                "AssumedRoleUser": { "Arn": "arn:aws:sts::123456789012:assumed-role/env-manager/convoy" }
            }"#,
        )
        .unwrap();
        assert_eq!(output.credentials.access_key_id, "ASIAEXAMPLE");
    }
}
