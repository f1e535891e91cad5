//! AWS backend wiring
//!
//! [`AwsBackend`] turns one session into the engine, facades and
//! collaborators the rest of Convoy consumes.

use crate::awscli::{AwsCli, CallerIdentity};
use crate::cloudformation::CloudFormationClient;
use crate::codepipeline::CodePipelineClient;
use crate::ecr::EcrImages;
use crate::ecs::EcsTaskLauncher;
use crate::error::Result;
use crate::logs::CloudWatchLogs;
use crate::s3::S3Buckets;
use crate::secrets::SecretsManagerClient;
use crate::session::Session;
use convoy_cloud::{ConvergenceEngine, PollConfig, ProvisioningClient, Stacks};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AwsBackend {
    cli: AwsCli,
    poll: PollConfig,
}

impl AwsBackend {
    pub fn new(session: Session) -> Self {
        Self {
            cli: AwsCli::new(session),
            poll: PollConfig::default(),
        }
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn region(&self) -> Option<&str> {
        self.cli.session().region()
    }

    pub async fn check_auth(&self) -> Result<CallerIdentity> {
        self.cli.check_auth().await
    }

    /// Convergence engine for stacks in `region`
    pub fn engine(&self, region: &str) -> ConvergenceEngine {
        let client: Arc<dyn ProvisioningClient> =
            Arc::new(CloudFormationClient::new(self.cli.in_region(region)));
        ConvergenceEngine::new(client).with_poll_config(self.poll.clone())
    }

    /// Engines for `home` plus every extra region
    pub fn stacks(&self, home: &str, regions: &[String]) -> Stacks {
        let mut stacks = Stacks::new(home, self.engine(home));
        for region in regions.iter().filter(|r| r.as_str() != home) {
            stacks = stacks.with_region(region.clone(), self.engine(region));
        }
        stacks
    }

    pub fn task_launcher(&self) -> Arc<EcsTaskLauncher> {
        Arc::new(EcsTaskLauncher::new(self.cli.clone()))
    }

    pub fn logs(&self) -> Arc<CloudWatchLogs> {
        Arc::new(CloudWatchLogs::new(self.cli.clone()))
    }

    pub fn buckets(&self) -> Arc<S3Buckets> {
        Arc::new(S3Buckets::new(self.cli.clone()))
    }

    pub fn images(&self) -> Arc<EcrImages> {
        Arc::new(EcrImages::new(self.cli.clone()))
    }

    pub fn secrets(&self) -> Arc<SecretsManagerClient> {
        Arc::new(SecretsManagerClient::new(self.cli.clone()))
    }

    pub fn pipelines(&self) -> Arc<CodePipelineClient> {
        Arc::new(CodePipelineClient::new(self.cli.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionProvider;

    #[test]
    fn test_stacks_skip_duplicate_home_region() {
        let backend = AwsBackend::new(SessionProvider::new().default_session_with_region("us-west-2"));
        let stacks = backend.stacks(
            "us-west-2",
            &["us-west-2".to_string(), "eu-west-1".to_string()],
        );
        assert_eq!(stacks.regions(), vec!["us-west-2", "eu-west-1"]);
    }
}
