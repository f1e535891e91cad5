//! Resource lifecycle facades
//!
//! Each deployer pairs the convergence engine with one family of stack
//! descriptors. Single-stack operations return a [`Convergence`] so the
//! caller can stream its events; multi-stack operations build a
//! [`DeploymentPlan`] and return the orchestrator's [`PlanReport`].

use crate::descriptor::{
    AppRegionalStack, AppStack, DEPLOY_STAGE_PREFIX, EnvironmentStack, PipelineStack, ServiceStack,
    TaskStack,
};
use crate::engine::{Convergence, ConvergenceEngine};
use crate::error::{CloudError, Result};
use crate::event::{ResourceEvent, StackStatus};
use crate::orchestrator::{
    DeploymentPlan, Orchestrator, PlanEvent, PlanReport, PlanStep, StepOutcome, StepResult,
};
use crate::provider::{StackDescription, StackReader};
use crate::services::{BucketInspector, ImageRemover, PipelineGetter};
use crate::stack::{StackDescriptor, StackKind, StackTarget};
use crate::store::ConfigStore;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Engines per region plus an optional plan observer, shared by all facades
#[derive(Clone)]
pub struct Stacks {
    region: String,
    engine: ConvergenceEngine,
    regional: BTreeMap<String, ConvergenceEngine>,
    observer: Option<mpsc::UnboundedSender<PlanEvent>>,
}

impl Stacks {
    pub fn new(region: impl Into<String>, engine: ConvergenceEngine) -> Self {
        Self {
            region: region.into(),
            engine,
            regional: BTreeMap::new(),
            observer: None,
        }
    }

    /// Bind an engine for another region
    pub fn with_region(mut self, region: impl Into<String>, engine: ConvergenceEngine) -> Self {
        self.regional.insert(region.into(), engine);
        self
    }

    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<PlanEvent>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Home region
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Every region with an engine, home region first
    pub fn regions(&self) -> Vec<String> {
        std::iter::once(self.region.clone())
            .chain(self.regional.keys().filter(|r| **r != self.region).cloned())
            .collect()
    }

    pub fn engine_for(&self, region: &str) -> &ConvergenceEngine {
        self.regional.get(region).unwrap_or(&self.engine)
    }

    pub fn orchestrator(&self) -> Orchestrator {
        let mut orchestrator = Orchestrator::new(self.engine.clone());
        for (region, engine) in &self.regional {
            orchestrator = orchestrator.with_regional_engine(region.clone(), engine.clone());
        }
        if let Some(observer) = &self.observer {
            orchestrator = orchestrator.with_observer(observer.clone());
        }
        orchestrator
    }

    pub async fn describe(&self, region: &str, name: &str) -> Result<Option<StackDescription>> {
        self.engine_for(region).client().describe_stack(name).await
    }

    pub async fn exists(&self, region: &str, name: &str) -> Result<bool> {
        self.engine_for(region).client().exists(name).await
    }

    pub async fn converge(&self, descriptor: &impl StackDescriptor, region: &str) -> Result<Convergence> {
        let request = descriptor.to_request(region)?;
        self.engine_for(region).converge(request).await
    }

    pub async fn delete(&self, kind: StackKind, name: &str, region: &str) -> Result<Convergence> {
        self.engine_for(region)
            .delete(&StackTarget::new(kind, name, region))
            .await
    }
}

/// Output keys that name storage buckets
fn bucket_outputs(outputs: &BTreeMap<String, String>) -> Vec<&str> {
    outputs
        .iter()
        .filter(|(key, _)| key.ends_with("BucketName") || key.ends_with("Bucket"))
        .map(|(_, value)| value.as_str())
        .collect()
}

/// Check that `buckets` are empty, emptying them first when allowed
async fn clear_buckets(
    inspector: &dyn BucketInspector,
    buckets: &[&str],
    owner: &str,
    empty: bool,
) -> Result<()> {
    for bucket in buckets {
        if inspector.is_bucket_empty(bucket).await? {
            continue;
        }
        if !empty {
            return Err(CloudError::precondition(
                format!("Bucket {} in {} is not empty", bucket, owner),
                "Empty the bucket, or re-run with --empty-buckets to delete its objects",
            ));
        }
        info!(bucket = %bucket, "Emptying bucket before delete");
        inspector.empty_bucket(bucket).await?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployedEnvironment {
    pub app: String,
    pub name: String,
    pub region: String,
    pub status: StackStatus,
    pub outputs: BTreeMap<String, String>,
}

impl DeployedEnvironment {
    pub fn cluster_id(&self) -> Option<&str> {
        self.outputs.get("ClusterId").map(String::as_str)
    }

    /// Subnets that tasks in this environment are placed in
    pub fn subnets(&self) -> Vec<String> {
        split_output(&self.outputs, "PublicSubnets")
    }

    pub fn security_groups(&self) -> Vec<String> {
        split_output(&self.outputs, "EnvironmentSecurityGroup")
    }

    pub fn execution_role_arn(&self) -> Option<&str> {
        self.outputs.get("ExecutionRoleARN").map(String::as_str)
    }

    pub fn buckets(&self) -> Vec<&str> {
        bucket_outputs(&self.outputs)
    }
}

fn split_output(outputs: &BTreeMap<String, String>, key: &str) -> Vec<String> {
    outputs
        .get(key)
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub struct EnvironmentDeployer {
    stacks: Stacks,
    buckets: Option<Arc<dyn BucketInspector>>,
}

impl EnvironmentDeployer {
    pub fn new(stacks: Stacks) -> Self {
        Self {
            stacks,
            buckets: None,
        }
    }

    pub fn with_buckets(mut self, buckets: Arc<dyn BucketInspector>) -> Self {
        self.buckets = Some(buckets);
        self
    }

    pub async fn deploy_environment(&self, env: &EnvironmentStack, region: &str) -> Result<Convergence> {
        self.stacks.converge(env, region).await
    }

    /// Deploy and feed resource events to `observer` until the stack settles
    pub async fn stream_environment_creation(
        &self,
        env: &EnvironmentStack,
        region: &str,
        observer: impl FnMut(&ResourceEvent),
    ) -> Result<BTreeMap<String, String>> {
        let convergence = self.deploy_environment(env, region).await?;
        let stack = convergence.stack.clone();
        convergence.wait_with(observer).await.into_result(&stack)
    }

    pub async fn get_environment(&self, app: &str, env: &str, region: &str) -> Result<Option<DeployedEnvironment>> {
        let name = EnvironmentStack::stack_name_for(app, env);
        Ok(self
            .stacks
            .describe(region, &name)
            .await?
            .map(|stack| DeployedEnvironment {
                app: app.to_string(),
                name: env.to_string(),
                region: region.to_string(),
                status: stack.status,
                outputs: stack.outputs,
            }))
    }

    /// Delete the environment stack
    ///
    /// Non-empty buckets fail the delete with a precondition error unless
    /// `empty_buckets` is set.
    pub async fn delete_environment(
        &self,
        app: &str,
        env: &str,
        region: &str,
        empty_buckets: bool,
    ) -> Result<Convergence> {
        if let Some(inspector) = &self.buckets
            && let Some(deployed) = self.get_environment(app, env, region).await?
        {
            let owner = format!("environment {}", env);
            clear_buckets(inspector.as_ref(), &deployed.buckets(), &owner, empty_buckets).await?;
        }
        let name = EnvironmentStack::stack_name_for(app, env);
        self.stacks.delete(StackKind::Environment, &name, region).await
    }
}

/// What a regional application stack provides
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppRegionalResources {
    pub region: String,
    pub stack_name: String,
    pub services: BTreeSet<String>,
    pub accounts: BTreeSet<String>,
    /// Service name → image repository
    pub repositories: BTreeMap<String, String>,
    pub kms_key_arn: Option<String>,
    pub pipeline_bucket: Option<String>,
    pub version: Option<String>,
}

impl AppRegionalResources {
    fn from_stack(app: &str, region: &str, stack: &StackDescription) -> Self {
        let regional = AppRegionalStack::from_parameters(app, region, &stack.parameters);
        let repositories = regional
            .services
            .iter()
            .filter_map(|service| {
                stack
                    .outputs
                    .get(&format!("ECRRepo{}", service.replace('-', "")))
                    .map(|repo| (service.clone(), repo.clone()))
            })
            .collect();
        Self {
            region: region.to_string(),
            stack_name: stack.name.clone(),
            services: regional.services,
            accounts: regional.accounts,
            repositories,
            kms_key_arn: stack.outputs.get("KMSKeyARN").cloned(),
            pipeline_bucket: stack.outputs.get("PipelineBucket").cloned(),
            version: stack.outputs.get("TemplateVersion").cloned(),
        }
    }
}

fn regional_step_id(region: &str) -> String {
    format!("app-resources-{}", region)
}

pub struct AppDeployer {
    stacks: Stacks,
    buckets: Option<Arc<dyn BucketInspector>>,
    images: Option<Arc<dyn ImageRemover>>,
}

impl AppDeployer {
    pub fn new(stacks: Stacks) -> Self {
        Self {
            stacks,
            buckets: None,
            images: None,
        }
    }

    pub fn with_buckets(mut self, buckets: Arc<dyn BucketInspector>) -> Self {
        self.buckets = Some(buckets);
        self
    }

    pub fn with_images(mut self, images: Arc<dyn ImageRemover>) -> Self {
        self.images = Some(images);
        self
    }

    pub fn stacks(&self) -> &Stacks {
        &self.stacks
    }

    async fn regional_stack(&self, app: &str, region: &str) -> Result<Option<AppRegionalStack>> {
        let name = AppRegionalStack::stack_name_for(app, region);
        Ok(self
            .stacks
            .describe(region, &name)
            .await?
            .map(|stack| AppRegionalStack::from_parameters(app, region, &stack.parameters)))
    }

    /// Deployed regional stacks across every known region
    async fn regional_stacks(&self, app: &str) -> Result<Vec<AppRegionalStack>> {
        let mut stacks = Vec::new();
        for region in self.stacks.regions() {
            if let Some(stack) = self.regional_stack(app, &region).await? {
                stacks.push(stack);
            }
        }
        Ok(stacks)
    }

    async fn run(&self, plan: DeploymentPlan) -> Result<PlanReport> {
        self.stacks.orchestrator().deploy(plan).await
    }

    /// Account roles first, then the home region's shared resources
    pub async fn deploy_app(&self, app: &AppStack) -> Result<PlanReport> {
        let region = self.stacks.region().to_string();
        let mut regional = self
            .regional_stack(&app.app, &region)
            .await?
            .unwrap_or_else(|| AppRegionalStack::new(&app.app, &region));
        regional.accounts.insert(app.account_id.clone());

        let plan = DeploymentPlan::new()
            .with_step(PlanStep::converge("app-roles", app.to_request(&region)?))
            .with_step(
                PlanStep::converge(regional_step_id(&region), regional.to_request(&region)?)
                    .after("app-roles"),
            );
        self.run(plan).await
    }

    /// Add an image repository for `service` in every region the app uses
    pub async fn add_service_to_app(&self, app: &str, service: &str) -> Result<PlanReport> {
        let regional = self.regional_stacks(app).await?;
        if regional.is_empty() {
            return Err(Self::not_deployed(app));
        }

        let mut plan = DeploymentPlan::new();
        for mut stack in regional {
            if stack.services.insert(service.to_string()) {
                plan.push(PlanStep::converge(
                    regional_step_id(&stack.region),
                    stack.to_request(&stack.region)?,
                ));
            }
        }
        self.run(plan).await
    }

    pub async fn remove_service_from_app(&self, app: &str, service: &str) -> Result<PlanReport> {
        let mut plan = DeploymentPlan::new();
        for mut stack in self.regional_stacks(app).await? {
            if !stack.services.remove(service) {
                continue;
            }
            if let Some(images) = &self.images {
                images.clear_repository(&format!("{}/{}", app, service)).await?;
            }
            plan.push(PlanStep::converge(
                regional_step_id(&stack.region),
                stack.to_request(&stack.region)?,
            ));
        }
        self.run(plan).await
    }

    /// Make room for an environment in `account` and `region`
    ///
    /// The regional stack is created when the region is new to the app,
    /// carrying over the home region's services. Apps with a domain also
    /// delegate DNS to the account.
    pub async fn add_env_to_app(&self, app: &AppStack, account: &str, region: &str) -> Result<PlanReport> {
        let home = self.regional_stack(&app.app, self.stacks.region()).await?;
        let mut regional = match self.regional_stack(&app.app, region).await? {
            Some(stack) => stack,
            None => {
                let mut stack = AppRegionalStack::new(&app.app, region);
                if let Some(home) = &home {
                    stack.services = home.services.clone();
                }
                stack
            }
        };
        regional.accounts.insert(account.to_string());

        let mut plan = DeploymentPlan::new().with_step(PlanStep::converge(
            regional_step_id(region),
            regional.to_request(region)?,
        ));
        if app.domain.is_some() {
            let delegated = self.delegated_app(app, account).await?;
            plan.push(PlanStep::converge(
                "app-roles",
                delegated.to_request(self.stacks.region())?,
            ));
        }
        self.run(plan).await
    }

    /// Provision pipeline artifact storage in each of `regions`
    pub async fn add_pipeline_resources_to_app(&self, app: &str, regions: &[String]) -> Result<PlanReport> {
        let mut plan = DeploymentPlan::new();
        for region in regions {
            let mut stack = self
                .regional_stack(app, region)
                .await?
                .ok_or_else(|| Self::not_deployed(app))?;
            stack.pipeline = true;
            plan.push(PlanStep::converge(regional_step_id(region), stack.to_request(region)?));
        }
        self.run(plan).await
    }

    /// Allow `account` to manage records in the app's hosted zone
    pub async fn delegate_dns_permissions(&self, app: &AppStack, account: &str) -> Result<Convergence> {
        let delegated = self.delegated_app(app, account).await?;
        self.stacks.converge(&delegated, self.stacks.region()).await
    }

    async fn delegated_app(&self, app: &AppStack, account: &str) -> Result<AppStack> {
        let mut delegated = app.clone();
        let name = AppStack::stack_name_for(&app.app);
        if let Some(stack) = self.stacks.describe(self.stacks.region(), &name).await?
            && let Some(existing) = stack.parameter("AppDNSDelegatedAccounts")
        {
            delegated.dns_delegated_accounts.extend(
                existing
                    .split(',')
                    .map(str::trim)
                    .filter(|a| !a.is_empty() && *a != app.account_id)
                    .map(str::to_string),
            );
        }
        delegated.dns_delegated_accounts.insert(account.to_string());
        Ok(delegated)
    }

    /// Delete regional stacks in parallel, then the account roles
    ///
    /// Pipeline buckets are emptied and image repositories cleared first,
    /// since the backend refuses to delete either while they hold data.
    pub async fn delete_app(&self, app: &str) -> Result<PlanReport> {
        let resources = self.get_regional_app_resources(app).await?;
        let mut plan = DeploymentPlan::new();
        let mut roles = PlanStep::delete(
            "app-roles",
            StackTarget::new(
                StackKind::Application,
                AppStack::stack_name_for(app),
                self.stacks.region(),
            ),
        );

        for res in &resources {
            if let (Some(inspector), Some(bucket)) = (&self.buckets, &res.pipeline_bucket) {
                let owner = format!("application {}", app);
                clear_buckets(inspector.as_ref(), &[bucket.as_str()], &owner, true).await?;
            }
            if let Some(images) = &self.images {
                for service in &res.services {
                    images.clear_repository(&format!("{}/{}", app, service)).await?;
                }
            }
            let id = regional_step_id(&res.region);
            plan.push(PlanStep::delete(
                &id,
                StackTarget::new(StackKind::Application, res.stack_name.clone(), res.region.clone()),
            ));
            roles = roles.after(id);
        }
        plan.push(roles);
        self.run(plan).await
    }

    pub async fn get_app_resources_by_region(&self, app: &str, region: &str) -> Result<Option<AppRegionalResources>> {
        let name = AppRegionalStack::stack_name_for(app, region);
        Ok(self
            .stacks
            .describe(region, &name)
            .await?
            .map(|stack| AppRegionalResources::from_stack(app, region, &stack)))
    }

    pub async fn get_regional_app_resources(&self, app: &str) -> Result<Vec<AppRegionalResources>> {
        let mut resources = Vec::new();
        for region in self.stacks.regions() {
            if let Some(res) = self.get_app_resources_by_region(app, &region).await? {
                resources.push(res);
            }
        }
        Ok(resources)
    }

    fn not_deployed(app: &str) -> CloudError {
        CloudError::precondition(
            format!("Application '{}' has no deployed regional resources", app),
            "Run `convoy app init` first",
        )
    }
}

pub struct ServiceDeployer {
    stacks: Stacks,
}

impl ServiceDeployer {
    pub fn new(stacks: Stacks) -> Self {
        Self { stacks }
    }

    /// Deploy a service into an already-deployed environment
    pub async fn deploy_service(&self, service: &ServiceStack, region: &str) -> Result<Convergence> {
        let env_stack = EnvironmentStack::stack_name_for(&service.app, &service.env);
        if !self.stacks.exists(region, &env_stack).await? {
            return Err(CloudError::precondition(
                format!("Environment '{}' is not deployed", service.env),
                format!("Run `convoy env init --name {}` first", service.env),
            ));
        }
        self.stacks.converge(service, region).await
    }

    /// Delete `service` from every environment in `envs` (name, region)
    /// that has it deployed
    pub async fn delete_service(&self, app: &str, service: &str, envs: &[(String, String)]) -> Result<PlanReport> {
        let mut plan = DeploymentPlan::new();
        for (env, region) in envs {
            let name = ServiceStack::stack_name_for(app, env, service);
            if self.stacks.exists(region, &name).await? {
                plan.push(PlanStep::delete(
                    format!("svc-{}", env),
                    StackTarget::new(StackKind::Service, name, region.clone()),
                ));
            } else {
                debug!(service = %service, env = %env, "Service not deployed; skipping");
            }
        }
        self.stacks.orchestrator().deploy(plan).await
    }
}

/// Deployment lookups joining store records with stack existence
pub struct DeployedLister {
    stacks: Stacks,
    store: Arc<dyn ConfigStore>,
}

impl DeployedLister {
    pub fn new(stacks: Stacks, store: Arc<dyn ConfigStore>) -> Self {
        Self { stacks, store }
    }

    pub async fn is_service_deployed(&self, app: &str, env: &str, service: &str) -> Result<bool> {
        let record = self.store.get_environment(app, env).await?;
        let name = ServiceStack::stack_name_for(app, env, service);
        self.stacks.exists(&record.region, &name).await
    }

    pub async fn list_environments_deployed_to(&self, app: &str, service: &str) -> Result<Vec<String>> {
        let mut deployed = Vec::new();
        for env in self.store.list_environments(app).await? {
            let name = ServiceStack::stack_name_for(app, &env.name, service);
            if self.stacks.exists(&env.region, &name).await? {
                deployed.push(env.name);
            }
        }
        Ok(deployed)
    }

    pub async fn list_deployed_services(&self, app: &str, env: &str) -> Result<Vec<String>> {
        let record = self.store.get_environment(app, env).await?;
        let mut deployed = Vec::new();
        for service in self.store.list_services(app).await? {
            let name = ServiceStack::stack_name_for(app, env, &service.name);
            if self.stacks.exists(&record.region, &name).await? {
                deployed.push(service.name);
            }
        }
        Ok(deployed)
    }
}

/// Drives the create-vs-update decision for pipelines
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineState {
    pub exists: bool,
    /// Environment names in promotion order
    pub stages: Vec<String>,
    /// Version of the regional resources the pipeline builds on
    pub resource_version: Option<String>,
}

pub struct PipelineDeployer {
    apps: AppDeployer,
    pipelines: Option<Arc<dyn PipelineGetter>>,
}

impl PipelineDeployer {
    pub fn new(apps: AppDeployer) -> Self {
        Self {
            apps,
            pipelines: None,
        }
    }

    pub fn with_pipeline_getter(mut self, pipelines: Arc<dyn PipelineGetter>) -> Self {
        self.pipelines = Some(pipelines);
        self
    }

    fn stacks(&self) -> &Stacks {
        self.apps.stacks()
    }

    pub async fn pipeline_state(&self, app: &str, name: &str) -> Result<PipelineState> {
        let region = self.stacks().region().to_string();
        let stack_name = PipelineStack::stack_name_for(app, name);
        let resource_version = self
            .apps
            .get_app_resources_by_region(app, &region)
            .await?
            .and_then(|res| res.version);

        let Some(stack) = self.stacks().describe(&region, &stack_name).await? else {
            return Ok(PipelineState {
                exists: false,
                stages: Vec::new(),
                resource_version,
            });
        };

        let pipeline_name = stack
            .outputs
            .get("PipelineName")
            .cloned()
            .unwrap_or_else(|| stack_name.clone());
        let reported = match &self.pipelines {
            Some(getter) => getter.get_pipeline(&pipeline_name).await?,
            None => None,
        };
        let stages = match reported {
            Some(pipeline) => pipeline
                .stages
                .iter()
                .filter_map(|stage| stage.strip_prefix(DEPLOY_STAGE_PREFIX))
                .map(str::to_string)
                .collect(),
            None => stack
                .outputs
                .get("PipelineStages")
                .map(|s| {
                    s.split(',')
                        .filter(|stage| !stage.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        };

        Ok(PipelineState {
            exists: true,
            stages,
            resource_version,
        })
    }

    pub async fn pipeline_exists(&self, app: &str, name: &str) -> Result<bool> {
        let stack_name = PipelineStack::stack_name_for(app, name);
        self.stacks().exists(self.stacks().region(), &stack_name).await
    }

    pub async fn create_pipeline(&self, pipeline: &PipelineStack) -> Result<Convergence> {
        if self.pipeline_exists(&pipeline.app, &pipeline.name).await? {
            return Err(CloudError::precondition(
                format!("Pipeline '{}' already exists", pipeline.name),
                "Run `convoy pipeline deploy` to update it",
            ));
        }
        self.stacks().converge(pipeline, self.stacks().region()).await
    }

    pub async fn update_pipeline(&self, pipeline: &PipelineStack) -> Result<Convergence> {
        if !self.pipeline_exists(&pipeline.app, &pipeline.name).await? {
            return Err(CloudError::StackNotFound(pipeline.stack_name()));
        }
        self.stacks().converge(pipeline, self.stacks().region()).await
    }

    /// Register artifact storage in every stage region, then converge the
    /// pipeline stack against the resulting buckets
    pub async fn deploy_pipeline(&self, pipeline: &PipelineStack) -> Result<PlanReport> {
        let home = self.stacks().region().to_string();
        let mut regions = pipeline.regions();
        if regions.is_empty() {
            regions.push(home.clone());
        }

        let mut report = self
            .apps
            .add_pipeline_resources_to_app(&pipeline.app, &regions)
            .await?;
        let target = StackTarget::new(StackKind::Pipeline, pipeline.stack_name(), home.as_str());
        let blocked = report.failures().next().map(|failed| failed.step.clone());
        if let Some(blocked_by) = blocked {
            report.results.push(StepResult {
                step: "pipeline".to_string(),
                target,
                outcome: StepOutcome::Skipped { blocked_by },
            });
            return Ok(report);
        }

        let mut desired = pipeline.clone();
        for region in &regions {
            let bucket = self
                .apps
                .get_app_resources_by_region(&pipeline.app, region)
                .await?
                .and_then(|res| res.pipeline_bucket)
                .ok_or_else(|| {
                    CloudError::precondition(
                        format!("No pipeline artifact bucket in region {}", region),
                        "Re-run `convoy app init` to repair the application's regional resources",
                    )
                })?;
            desired.artifact_buckets.insert(region.clone(), bucket);
        }

        let state = self.pipeline_state(&desired.app, &desired.name).await?;
        if state.exists {
            info!(pipeline = %desired.name, stages = ?state.stages, "Pipeline exists; checking for changes");
        } else {
            info!(pipeline = %desired.name, "Creating pipeline");
        }

        let plan = DeploymentPlan::new().with_step(PlanStep::converge("pipeline", desired.to_request(&home)?));
        let pipeline_report = self.stacks().orchestrator().deploy(plan).await?;
        report.results.extend(pipeline_report.results);
        Ok(report)
    }

    pub async fn delete_pipeline(&self, app: &str, name: &str) -> Result<Convergence> {
        let stack_name = PipelineStack::stack_name_for(app, name);
        self.stacks()
            .delete(StackKind::Pipeline, &stack_name, self.stacks().region())
            .await
    }
}

/// What a deployed task stack provides
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskResources {
    pub repository: Option<String>,
    pub log_group: String,
    pub task_definition: Option<String>,
}

pub struct TaskDeployer {
    stacks: Stacks,
}

impl TaskDeployer {
    pub fn new(stacks: Stacks) -> Self {
        Self { stacks }
    }

    pub async fn deploy_task(&self, task: &TaskStack) -> Result<Convergence> {
        self.stacks.converge(task, self.stacks.region()).await
    }

    pub async fn task_resources(&self, group: &str) -> Result<Option<TaskResources>> {
        let name = TaskStack::stack_name_for(group);
        Ok(self
            .stacks
            .describe(self.stacks.region(), &name)
            .await?
            .map(|stack| TaskResources {
                repository: stack.outputs.get("ECRRepo").cloned(),
                log_group: stack
                    .outputs
                    .get("LogGroupName")
                    .cloned()
                    .unwrap_or_else(|| TaskStack::log_group_for(group)),
                task_definition: stack.outputs.get("TaskDefinitionArn").cloned(),
            }))
    }
}
