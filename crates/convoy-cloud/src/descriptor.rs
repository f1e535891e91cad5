//! Stack descriptors for each resource tier
//!
//! Each descriptor knows its stack name, template, parameters and tags.
//! Rendering is pure; nothing here talks to a backend.

use crate::error::Result;
use crate::stack::{StackDescriptor, StackKind};
use crate::templates;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

pub const APP_TAG: &str = "convoy-application";
pub const ENV_TAG: &str = "convoy-environment";
pub const SERVICE_TAG: &str = "convoy-service";
pub const PIPELINE_TAG: &str = "convoy-pipeline";
pub const TASK_TAG: &str = "convoy-task";

/// Prefix of the pipeline stage that deploys into an environment
pub const DEPLOY_STAGE_PREFIX: &str = "DeployTo-";

/// Bumped whenever the regional template changes shape
pub const APP_REGIONAL_VERSION: &str = "v1.0";

/// Account-level application resources
#[derive(Debug, Clone, Serialize)]
pub struct AppStack {
    pub app: String,
    pub account_id: String,
    pub domain: Option<String>,
    /// Environment accounts allowed to manage records in the app's hosted zone
    pub dns_delegated_accounts: BTreeSet<String>,
}

impl AppStack {
    pub fn new(app: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            account_id: account_id.into(),
            domain: None,
            dns_delegated_accounts: BTreeSet::new(),
        }
    }

    pub fn stack_name_for(app: &str) -> String {
        format!("{}-infrastructure-roles", app)
    }
}

impl StackDescriptor for AppStack {
    fn kind(&self) -> StackKind {
        StackKind::Application
    }

    fn stack_name(&self) -> String {
        Self::stack_name_for(&self.app)
    }

    fn template(&self) -> Result<String> {
        templates::render(templates::APP_TEMPLATE, self)
    }

    fn parameters(&self) -> Vec<(String, String)> {
        let mut accounts: BTreeSet<&str> =
            self.dns_delegated_accounts.iter().map(String::as_str).collect();
        accounts.insert(self.account_id.as_str());
        vec![
            ("AppName".to_string(), self.app.clone()),
            (
                "AppDNSDelegatedAccounts".to_string(),
                accounts.into_iter().collect::<Vec<_>>().join(","),
            ),
        ]
    }

    fn tags(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(APP_TAG.to_string(), self.app.clone())])
    }
}

/// Per-region application resources shared by every environment in that region
#[derive(Debug, Clone, Serialize)]
pub struct AppRegionalStack {
    pub app: String,
    pub region: String,
    pub services: BTreeSet<String>,
    pub accounts: BTreeSet<String>,
    /// Artifact bucket and key for pipelines deploying into this region
    pub pipeline: bool,
    pub version: String,
}

impl AppRegionalStack {
    pub fn new(app: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            region: region.into(),
            services: BTreeSet::new(),
            accounts: BTreeSet::new(),
            pipeline: false,
            version: APP_REGIONAL_VERSION.to_string(),
        }
    }

    pub fn stack_name_for(app: &str, region: &str) -> String {
        format!("{}-infrastructure-{}", app, region)
    }

    /// Rebuild the descriptor from a deployed stack's parameters
    pub fn from_parameters(app: &str, region: &str, parameters: &[(String, String)]) -> Self {
        let mut stack = Self::new(app, region);
        for (key, value) in parameters {
            let items = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            match key.as_str() {
                "Services" => stack.services = items.collect(),
                "Accounts" => stack.accounts = items.collect(),
                "PipelineResources" => stack.pipeline = value == "true",
                _ => {}
            }
        }
        stack
    }
}

impl StackDescriptor for AppRegionalStack {
    fn kind(&self) -> StackKind {
        StackKind::Application
    }

    fn stack_name(&self) -> String {
        Self::stack_name_for(&self.app, &self.region)
    }

    fn template(&self) -> Result<String> {
        templates::render(templates::APP_REGIONAL_TEMPLATE, self)
    }

    fn parameters(&self) -> Vec<(String, String)> {
        vec![
            ("AppName".to_string(), self.app.clone()),
            ("Accounts".to_string(), join(&self.accounts)),
            ("Services".to_string(), join(&self.services)),
            ("PipelineResources".to_string(), self.pipeline.to_string()),
        ]
    }

    fn tags(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(APP_TAG.to_string(), self.app.clone())])
    }
}

/// Network, cluster and roles for one environment
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentStack {
    pub app: String,
    pub env: String,
    pub prod: bool,
    pub tools_account_principal: String,
    pub vpc_cidr: String,
    pub public_subnets: Vec<String>,
    pub private_subnets: Vec<String>,
    /// Existing VPC to deploy into instead of creating one
    pub imported_vpc: Option<String>,
    /// Subnets of `imported_vpc` that tasks and services run in
    pub imported_subnets: Vec<String>,
}

impl EnvironmentStack {
    pub fn new(
        app: impl Into<String>,
        env: impl Into<String>,
        tools_account_principal: impl Into<String>,
    ) -> Self {
        Self {
            app: app.into(),
            env: env.into(),
            prod: false,
            tools_account_principal: tools_account_principal.into(),
            vpc_cidr: "10.0.0.0/16".to_string(),
            public_subnets: vec!["10.0.0.0/24".to_string(), "10.0.1.0/24".to_string()],
            private_subnets: vec!["10.0.2.0/24".to_string(), "10.0.3.0/24".to_string()],
            imported_vpc: None,
            imported_subnets: Vec::new(),
        }
    }

    pub fn stack_name_for(app: &str, env: &str) -> String {
        format!("{}-{}", app, env)
    }
}

impl StackDescriptor for EnvironmentStack {
    fn kind(&self) -> StackKind {
        StackKind::Environment
    }

    fn stack_name(&self) -> String {
        Self::stack_name_for(&self.app, &self.env)
    }

    fn template(&self) -> Result<String> {
        templates::render(templates::ENVIRONMENT_TEMPLATE, self)
    }

    fn parameters(&self) -> Vec<(String, String)> {
        vec![
            ("AppName".to_string(), self.app.clone()),
            ("EnvironmentName".to_string(), self.env.clone()),
            (
                "ToolsAccountPrincipalARN".to_string(),
                self.tools_account_principal.clone(),
            ),
        ]
    }

    fn tags(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (APP_TAG.to_string(), self.app.clone()),
            (ENV_TAG.to_string(), self.env.clone()),
        ])
    }
}

/// A long-running service in one environment
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStack {
    pub app: String,
    pub env: String,
    pub name: String,
    pub image: String,
    pub port: u16,
    pub cpu: u32,
    pub memory: u32,
    pub count: u32,
    pub variables: BTreeMap<String, String>,
    /// Environment variable name → secret ARN
    pub secrets: BTreeMap<String, String>,
}

impl ServiceStack {
    pub fn new(
        app: impl Into<String>,
        env: impl Into<String>,
        name: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            app: app.into(),
            env: env.into(),
            name: name.into(),
            image: image.into(),
            port: 80,
            cpu: 256,
            memory: 512,
            count: 1,
            variables: BTreeMap::new(),
            secrets: BTreeMap::new(),
        }
    }

    pub fn stack_name_for(app: &str, env: &str, service: &str) -> String {
        format!("{}-{}-{}", app, env, service)
    }
}

impl StackDescriptor for ServiceStack {
    fn kind(&self) -> StackKind {
        StackKind::Service
    }

    fn stack_name(&self) -> String {
        Self::stack_name_for(&self.app, &self.env, &self.name)
    }

    fn template(&self) -> Result<String> {
        templates::render(templates::SERVICE_TEMPLATE, self)
    }

    fn parameters(&self) -> Vec<(String, String)> {
        vec![
            ("AppName".to_string(), self.app.clone()),
            ("EnvName".to_string(), self.env.clone()),
            ("WorkloadName".to_string(), self.name.clone()),
            ("ContainerImage".to_string(), self.image.clone()),
            ("ContainerPort".to_string(), self.port.to_string()),
            ("TaskCPU".to_string(), self.cpu.to_string()),
            ("TaskMemory".to_string(), self.memory.to_string()),
            ("TaskCount".to_string(), self.count.to_string()),
        ]
    }

    fn tags(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (APP_TAG.to_string(), self.app.clone()),
            (ENV_TAG.to_string(), self.env.clone()),
            (SERVICE_TAG.to_string(), self.name.clone()),
        ])
    }
}

/// One promotion stage of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStage {
    pub env: String,
    pub region: String,
    pub requires_approval: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStack {
    pub app: String,
    pub name: String,
    pub source_provider: String,
    pub source_repository: String,
    pub source_branch: String,
    pub stages: Vec<PipelineStage>,
    /// Region → artifact bucket provisioned by the regional app stack
    pub artifact_buckets: BTreeMap<String, String>,
}

impl PipelineStack {
    pub fn stack_name_for(app: &str, name: &str) -> String {
        if name.starts_with("pipeline-") {
            name.to_string()
        } else {
            format!("pipeline-{}-{}", app, name)
        }
    }

    /// Distinct regions the pipeline deploys into, in stage order
    pub fn regions(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.stages
            .iter()
            .filter(|s| seen.insert(s.region.clone()))
            .map(|s| s.region.clone())
            .collect()
    }
}

impl StackDescriptor for PipelineStack {
    fn kind(&self) -> StackKind {
        StackKind::Pipeline
    }

    fn stack_name(&self) -> String {
        Self::stack_name_for(&self.app, &self.name)
    }

    fn template(&self) -> Result<String> {
        templates::render(templates::PIPELINE_TEMPLATE, self)
    }

    fn parameters(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn tags(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (APP_TAG.to_string(), self.app.clone()),
            (PIPELINE_TAG.to_string(), self.name.clone()),
        ])
    }
}

/// Resources for a group of one-off tasks
#[derive(Debug, Clone, Serialize)]
pub struct TaskStack {
    pub group: String,
    pub image: Option<String>,
    pub cpu: u32,
    pub memory: u32,
    pub command: Vec<String>,
    pub variables: BTreeMap<String, String>,
    /// Application and environment the task runs next to, if any
    pub app: Option<String>,
    pub env: Option<String>,
}

impl TaskStack {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            image: None,
            cpu: 256,
            memory: 512,
            command: Vec::new(),
            variables: BTreeMap::new(),
            app: None,
            env: None,
        }
    }

    pub fn stack_name_for(group: &str) -> String {
        format!("task-{}", group)
    }

    pub fn log_group_for(group: &str) -> String {
        format!("/convoy/tasks/{}", group)
    }
}

impl StackDescriptor for TaskStack {
    fn kind(&self) -> StackKind {
        StackKind::Task
    }

    fn stack_name(&self) -> String {
        Self::stack_name_for(&self.group)
    }

    fn template(&self) -> Result<String> {
        templates::render(templates::TASK_TEMPLATE, self)
    }

    fn parameters(&self) -> Vec<(String, String)> {
        vec![
            ("TaskCPU".to_string(), self.cpu.to_string()),
            ("TaskMemory".to_string(), self.memory.to_string()),
            (
                "ContainerImage".to_string(),
                self.image.clone().unwrap_or_default(),
            ),
        ]
    }

    fn tags(&self) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::from([(TASK_TAG.to_string(), self.group.clone())]);
        if let Some(app) = &self.app {
            tags.insert(APP_TAG.to_string(), app.clone());
        }
        if let Some(env) = &self.env {
            tags.insert(ENV_TAG.to_string(), env.clone());
        }
        tags
    }
}

fn join(items: &BTreeSet<String>) -> String {
    items.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}
