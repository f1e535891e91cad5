//! Collaborator capabilities consumed by the facades

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Registry credentials used to push images
#[derive(Debug, Clone)]
pub struct RegistryLogin {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default)]
pub struct BuildArgs {
    pub dockerfile: String,
    pub context: String,
    pub image_tag: String,
    pub args: BTreeMap<String, String>,
}

/// A container repository that images are pushed to
#[async_trait]
pub trait RepositoryService: Send + Sync {
    fn uri(&self) -> String;

    /// Returns the pushed image digest
    async fn build_and_push(&self, login: &RegistryLogin, args: &BuildArgs) -> Result<String>;
}

#[async_trait]
pub trait SecretsManager: Send + Sync {
    /// Returns the secret's ARN
    async fn create_secret(&self, name: &str, value: &str) -> Result<String>;

    async fn delete_secret(&self, name: &str) -> Result<()>;
}

/// CI/CD pipeline as reported by the pipeline service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    pub region: String,
    /// Stage names in execution order
    pub stages: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

#[async_trait]
pub trait PipelineGetter: Send + Sync {
    /// `None` when no such pipeline exists
    async fn get_pipeline(&self, name: &str) -> Result<Option<Pipeline>>;

    async fn list_pipeline_names_by_tags(&self, tags: &BTreeMap<String, String>) -> Result<Vec<String>>;
}

/// Storage buckets that block stack deletion while they hold objects
#[async_trait]
pub trait BucketInspector: Send + Sync {
    async fn is_bucket_empty(&self, bucket: &str) -> Result<bool>;

    async fn empty_bucket(&self, bucket: &str) -> Result<()>;
}

#[async_trait]
pub trait ImageRemover: Send + Sync {
    /// Delete every image in the repository
    async fn clear_repository(&self, repo: &str) -> Result<()>;
}
