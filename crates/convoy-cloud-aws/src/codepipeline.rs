//! CodePipeline lookups

use crate::awscli::{AwsCli, arn_name};
use crate::error::AwsError;
use async_trait::async_trait;
use convoy_cloud::{
    Result,
    services::{Pipeline, PipelineGetter},
};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct CodePipelineClient {
    cli: AwsCli,
}

impl CodePipelineClient {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli }
    }

    async fn tags(&self, arn: &str) -> Result<BTreeMap<String, String>> {
        let output: ListTagsOutput = self
            .cli
            .run_json(&["codepipeline", "list-tags-for-resource", "--resource-arn", arn])
            .await?;
        Ok(output.tags.into_iter().map(|t| (t.key, t.value)).collect())
    }
}

#[async_trait]
impl PipelineGetter for CodePipelineClient {
    async fn get_pipeline(&self, name: &str) -> Result<Option<Pipeline>> {
        let output: GetPipelineOutput = match self
            .cli
            .run_json(&["codepipeline", "get-pipeline", "--name", name])
            .await
        {
            Ok(output) => output,
            Err(AwsError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let tags = match &output.metadata {
            Some(meta) => self.tags(&meta.pipeline_arn).await?,
            None => BTreeMap::new(),
        };
        Ok(Some(Pipeline {
            name: output.pipeline.name,
            region: self.cli.session().region().unwrap_or_default().to_string(),
            stages: output.pipeline.stages.into_iter().map(|s| s.name).collect(),
            tags,
        }))
    }

    async fn list_pipeline_names_by_tags(&self, tags: &BTreeMap<String, String>) -> Result<Vec<String>> {
        let filters: Vec<String> = tags
            .iter()
            .map(|(key, value)| format!("Key={},Values={}", key, value))
            .collect();
        let mut args = vec![
            "resourcegroupstaggingapi",
            "get-resources",
            "--resource-type-filters",
            "codepipeline:pipeline",
        ];
        if !filters.is_empty() {
            args.push("--tag-filters");
            args.extend(filters.iter().map(String::as_str));
        }

        let output: GetResourcesOutput = self.cli.run_json(&args).await?;
        let mut names: Vec<String> = output
            .resource_tag_mapping_list
            .iter()
            .map(|r| arn_name(&r.resource_arn).to_string())
            .collect();
        names.sort();
        Ok(names)
    }
}

#[derive(Debug, Deserialize)]
struct GetPipelineOutput {
    pipeline: PipelineJson,
    metadata: Option<MetadataJson>,
}

#[derive(Debug, Deserialize)]
struct PipelineJson {
    name: String,
    #[serde(default)]
    stages: Vec<StageJson>,
}

#[derive(Debug, Deserialize)]
struct StageJson {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataJson {
    pipeline_arn: String,
}

#[derive(Debug, Deserialize)]
struct ListTagsOutput {
    #[serde(default)]
    tags: Vec<TagJson>,
}

#[derive(Debug, Deserialize)]
struct TagJson {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetResourcesOutput {
    #[serde(default)]
    resource_tag_mapping_list: Vec<ResourceJson>,
}

#[derive(Debug, Deserialize)]
struct ResourceJson {
    #[serde(rename = "ResourceARN")]
    resource_arn: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::awscli::parse_output;

    #[test]
    fn test_parses_pipeline_stages_in_order() {
        let output: GetPipelineOutput = parse_output(
            r#"{
                "pipeline": {
                    "name": "pipeline-my-app-main",
                    "roleArn": "arn:aws:iam::123456789012:role/pipeline",
                    "stages": [
                        {"name": "Source", "actions": []},
                        {"name": "Build", "actions": []},
                        {"name": "DeployTo-test", "actions": []},
                        {"name": "DeployTo-prod", "actions": []}
                    ],
                    "version": 3
                },
                "metadata": {
                    "pipelineArn": "arn:aws:codepipeline:us-west-2:123456789012:pipeline-my-app-main",
                    "created": "2026-10-01T10:00:00+00:00"
                }
            }"#,
        )
        .unwrap();

        let stages: Vec<&str> = output.pipeline.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(stages, vec!["Source", "Build", "DeployTo-test", "DeployTo-prod"]);
        assert!(output.metadata.unwrap().pipeline_arn.ends_with(":pipeline-my-app-main"));
    }

    #[test]
    fn test_parses_tagged_resources() {
        let output: GetResourcesOutput = parse_output(
            r#"{"ResourceTagMappingList": [
                {"ResourceARN": "arn:aws:codepipeline:us-west-2:123456789012:pipeline-my-app-main", "Tags": []}
            ]}"#,
        )
        .unwrap();
        assert_eq!(arn_name(&output.resource_tag_mapping_list[0].resource_arn), "pipeline-my-app-main");
    }
}
