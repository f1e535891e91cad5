//! S3 bucket inspection

use crate::awscli::AwsCli;
use crate::error::AwsError;
use async_trait::async_trait;
use convoy_cloud::{Result, services::BucketInspector};
use serde::{Deserialize, Serialize};
use tracing::info;

/// delete-objects accepts at most 1000 keys per call
const DELETE_BATCH: usize = 1000;

#[derive(Debug, Clone)]
pub struct S3Buckets {
    cli: AwsCli,
}

impl S3Buckets {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli }
    }

    async fn list_versions(&self, bucket: &str, max_items: usize) -> Result<Option<VersionListing>> {
        let max_items = max_items.to_string();
        match self
            .cli
            .run_json(&[
                "s3api",
                "list-object-versions",
                "--bucket",
                bucket,
                "--max-items",
                &max_items,
            ])
            .await
        {
            Ok(listing) => Ok(Some(listing)),
            Err(AwsError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl BucketInspector for S3Buckets {
    async fn is_bucket_empty(&self, bucket: &str) -> Result<bool> {
        Ok(self
            .list_versions(bucket, 1)
            .await?
            .is_none_or(|listing| listing.is_empty()))
    }

    /// Delete every object version and delete marker in the bucket
    async fn empty_bucket(&self, bucket: &str) -> Result<()> {
        let mut deleted = 0;
        loop {
            let Some(listing) = self.list_versions(bucket, DELETE_BATCH).await? else {
                return Ok(());
            };
            let objects = listing.into_identifiers();
            if objects.is_empty() {
                break;
            }
            deleted += objects.len();
            let delete = serde_json::to_string(&DeleteRequest {
                objects,
                quiet: true,
            })?;
            self.cli
                .run(&["s3api", "delete-objects", "--bucket", bucket, "--delete", &delete])
                .await?;
        }
        info!(bucket = %bucket, objects = deleted, "Emptied bucket");
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VersionListing {
    #[serde(default)]
    versions: Vec<VersionJson>,
    #[serde(default)]
    delete_markers: Vec<VersionJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VersionJson {
    key: String,
    version_id: Option<String>,
}

impl VersionListing {
    fn is_empty(&self) -> bool {
        self.versions.is_empty() && self.delete_markers.is_empty()
    }

    fn into_identifiers(self) -> Vec<ObjectIdentifier> {
        self.versions
            .into_iter()
            .chain(self.delete_markers)
            .take(DELETE_BATCH)
            .map(|v| ObjectIdentifier {
                key: v.key,
                version_id: v.version_id.filter(|id| id != "null"),
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct DeleteRequest {
    objects: Vec<ObjectIdentifier>,
    quiet: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ObjectIdentifier {
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    version_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::awscli::parse_output;

    #[test]
    fn test_unversioned_objects_drop_null_version() {
        let listing: VersionListing = parse_output(
            r#"{
                "Versions": [
                    {"Key": "manifest.yml", "VersionId": "null", "IsLatest": true},
                    {"Key": "build.zip", "VersionId": "3HL4kqtJlcpXroDTDmJ", "IsLatest": true}
                ],
                "DeleteMarkers": [
                    {"Key": "old.zip", "VersionId": "Xn8yKc", "IsLatest": true}
                ]
            }"#,
        )
        .unwrap();
        assert!(!listing.is_empty());

        let request = serde_json::to_value(DeleteRequest {
            objects: listing.into_identifiers(),
            quiet: true,
        })
        .unwrap();
        assert_eq!(request["Objects"].as_array().unwrap().len(), 3);
        assert!(request["Objects"][0].get("VersionId").is_none());
        assert_eq!(request["Objects"][2]["VersionId"], "Xn8yKc");
    }

    #[test]
    fn test_empty_output_is_empty_bucket() {
        let listing: VersionListing = parse_output("").unwrap();
        assert!(listing.is_empty());
    }
}
