use crate::action::{self, ActionCommand, run_action};
use crate::context::{Context, GlobalArgs};
use crate::utils;
use async_trait::async_trait;
use colored::Colorize;
use convoy_cloud::descriptor::{PipelineStack, PipelineStage};
use convoy_cloud::store::EnvironmentStore;
use convoy_cloud::{AppDeployer, PipelineDeployer, Stacks};
use std::collections::BTreeMap;

pub struct DeployOptions {
    pub name: String,
    pub app: Option<String>,
    pub repository: String,
    pub branch: String,
    pub provider: String,
    pub stages: Vec<String>,
}

struct DeployPipeline {
    ctx: Context,
    opts: DeployOptions,
    pipeline: Option<PipelineStack>,
}

fn pipeline_deployer(ctx: &Context, stacks: Stacks) -> PipelineDeployer {
    PipelineDeployer::new(AppDeployer::new(stacks)).with_pipeline_getter(ctx.backend.pipelines())
}

#[async_trait]
impl ActionCommand for DeployPipeline {
    async fn validate(&self) -> anyhow::Result<()> {
        action::validate_name("pipeline", &self.opts.name)?;
        if !self.opts.repository.contains('/') {
            anyhow::bail!(
                "Invalid repository '{}': expected owner/name",
                self.opts.repository
            );
        }
        let mut seen = std::collections::BTreeSet::new();
        if let Some(dup) = self.opts.stages.iter().find(|s| !seen.insert(s.as_str())) {
            anyhow::bail!("Environment '{}' is listed twice in --stage", dup);
        }
        Ok(())
    }

    async fn ask(&mut self) -> anyhow::Result<()> {
        let app = self.ctx.app_name(self.opts.app.take()).await?;
        let envs = self.ctx.store.list_environments(&app).await?;
        if envs.is_empty() {
            anyhow::bail!(
                "Application '{}' has no environments\n\nHint:\n  • Run `convoy env init` first",
                app
            );
        }

        let stages = if self.opts.stages.is_empty() {
            envs.iter()
                .map(|env| PipelineStage {
                    env: env.name.clone(),
                    region: env.region.clone(),
                    requires_approval: env.prod,
                })
                .collect()
        } else {
            let mut stages = Vec::new();
            for name in &self.opts.stages {
                let env = self.ctx.store.get_environment(&app, name).await?;
                stages.push(PipelineStage {
                    env: env.name,
                    region: env.region,
                    requires_approval: env.prod,
                });
            }
            stages
        };

        self.pipeline = Some(PipelineStack {
            app: app.clone(),
            name: self.opts.name.clone(),
            source_provider: self.opts.provider.clone(),
            source_repository: self.opts.repository.clone(),
            source_branch: self.opts.branch.clone(),
            stages,
            artifact_buckets: BTreeMap::new(),
        });
        self.opts.app = Some(app);
        Ok(())
    }

    async fn execute(&mut self) -> anyhow::Result<()> {
        let pipeline = self
            .pipeline
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Pipeline could not be resolved"))?;
        println!(
            "Deploying pipeline {} for {} ({} stages)",
            pipeline.name.cyan(),
            pipeline.app.cyan(),
            pipeline.stages.len()
        );

        let (observer, printer) = utils::plan_printer();
        let stacks = self.ctx.stacks(&pipeline.regions()).with_observer(observer);
        let deployer = pipeline_deployer(&self.ctx, stacks);
        let report = deployer.deploy_pipeline(&pipeline).await?;
        drop(deployer);
        printer.await?;
        utils::print_report(&report)?;

        println!(
            "{}",
            format!("✓ Pipeline {} deployed", pipeline.name).green().bold()
        );
        Ok(())
    }

    fn recommended_actions(&self) -> Vec<String> {
        vec![format!("convoy pipeline status --name {}", self.opts.name)]
    }
}

pub async fn deploy(global: &GlobalArgs, opts: DeployOptions) -> anyhow::Result<()> {
    let ctx = Context::load(global)?;
    run_action(&mut DeployPipeline {
        ctx,
        opts,
        pipeline: None,
    })
    .await
}

struct DeletePipeline {
    ctx: Context,
    name: String,
    app: Option<String>,
    yes: bool,
}

#[async_trait]
impl ActionCommand for DeletePipeline {
    async fn validate(&self) -> anyhow::Result<()> {
        action::validate_name("pipeline", &self.name)
    }

    async fn ask(&mut self) -> anyhow::Result<()> {
        self.app = Some(self.ctx.app_name(self.app.take()).await?);
        action::require_confirmation(self.yes, &format!("pipeline {}", self.name))
    }

    async fn execute(&mut self) -> anyhow::Result<()> {
        let app = self
            .app
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Application could not be resolved"))?;
        let deployer = pipeline_deployer(&self.ctx, self.ctx.stacks(&[]));
        let convergence = deployer.delete_pipeline(&app, &self.name).await?;
        utils::watch(convergence).await?;
        println!("{}", format!("✓ Pipeline {} deleted", self.name).green().bold());
        Ok(())
    }
}

pub async fn delete(
    global: &GlobalArgs,
    name: String,
    app: Option<String>,
    yes: bool,
) -> anyhow::Result<()> {
    let ctx = Context::load(global)?;
    run_action(&mut DeletePipeline {
        ctx,
        name,
        app,
        yes,
    })
    .await
}

pub async fn status(global: &GlobalArgs, name: String, app: Option<String>) -> anyhow::Result<()> {
    let ctx = Context::load(global)?;
    let app = ctx.app_name(app).await?;
    let deployer = pipeline_deployer(&ctx, ctx.stacks(&[]));
    let state = deployer.pipeline_state(&app, &name).await?;

    println!("Pipeline: {}", PipelineStack::stack_name_for(&app, &name).cyan());
    if !state.exists {
        println!("  {}", "not deployed".yellow());
        return Ok(());
    }
    println!("  Stages:");
    for stage in &state.stages {
        println!("    - {}", stage.cyan());
    }
    println!(
        "  Resource version: {}",
        state.resource_version.as_deref().unwrap_or("(unknown)")
    );
    Ok(())
}
