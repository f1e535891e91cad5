//! AWS backend for Convoy
//!
//! Implements the convoy-cloud capability traits by driving the `aws` CLI:
//! CloudFormation for stacks, ECS for one-off tasks, CloudWatch Logs for
//! task output, plus the S3, ECR, Secrets Manager and CodePipeline
//! collaborators.
//!
//! # Requirements
//!
//! - AWS CLI v2 must be installed
//! - Credentials come from the session (profile, static keys or an
//!   assumed role) or the CLI's default chain
//!
//! # Example
//!
//! ```ignore
//! use convoy_cloud_aws::{AwsBackend, SessionProvider};
//!
//! let session = SessionProvider::new().default_session_with_region("us-west-2");
//! let backend = AwsBackend::new(session);
//! backend.check_auth().await?;
//!
//! let engine = backend.engine("us-west-2");
//! ```

pub mod awscli;
pub mod cloudformation;
pub mod codepipeline;
pub mod ecr;
pub mod ecs;
pub mod error;
pub mod logs;
pub mod provider;
pub mod s3;
pub mod secrets;
pub mod session;

pub use awscli::{AwsCli, CallerIdentity};
pub use cloudformation::CloudFormationClient;
pub use codepipeline::CodePipelineClient;
pub use ecr::EcrImages;
pub use ecs::EcsTaskLauncher;
pub use error::{AwsError, Result};
pub use logs::CloudWatchLogs;
pub use provider::AwsBackend;
pub use s3::S3Buckets;
pub use secrets::SecretsManagerClient;
pub use session::{Credentials, Session, SessionProvider};
