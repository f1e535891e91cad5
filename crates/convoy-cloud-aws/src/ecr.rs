//! ECR image cleanup

use crate::awscli::AwsCli;
use crate::error::AwsError;
use async_trait::async_trait;
use convoy_cloud::{Result, services::ImageRemover};
use serde::{Deserialize, Serialize};
use tracing::info;

/// batch-delete-image accepts at most 100 ids per call
const DELETE_BATCH: usize = 100;

#[derive(Debug, Clone)]
pub struct EcrImages {
    cli: AwsCli,
}

impl EcrImages {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli }
    }
}

#[async_trait]
impl ImageRemover for EcrImages {
    async fn clear_repository(&self, repo: &str) -> Result<()> {
        let listing: ListImagesOutput = match self
            .cli
            .run_json(&["ecr", "list-images", "--repository-name", repo])
            .await
        {
            Ok(listing) => listing,
            Err(AwsError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for chunk in listing.image_ids.chunks(DELETE_BATCH) {
            let ids = serde_json::to_string(chunk)?;
            self.cli
                .run(&[
                    "ecr",
                    "batch-delete-image",
                    "--repository-name",
                    repo,
                    "--image-ids",
                    &ids,
                ])
                .await?;
        }
        if !listing.image_ids.is_empty() {
            info!(repository = %repo, images = listing.image_ids.len(), "Cleared repository");
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListImagesOutput {
    #[serde(default)]
    image_ids: Vec<ImageId>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageId {
    image_digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image_tag: Option<String>,
}
