use crate::action::{self, ActionCommand, run_action};
use crate::context::{Context, GlobalArgs};
use crate::utils;
use async_trait::async_trait;
use colored::Colorize;
use convoy_cloud::descriptor::ServiceStack;
use convoy_cloud::store::{Environment, EnvironmentStore, Service, ServiceStore};
use convoy_cloud::{AppDeployer, CloudError, ServiceDeployer};
use std::collections::BTreeMap;

/// このコマンドでデプロイしたサービスに記録するワークロード種別
const SERVICE_KIND: &str = "Load Balanced Web Service";

pub struct DeployOptions {
    pub name: String,
    pub env: String,
    pub app: Option<String>,
    pub image: String,
    pub port: u16,
    pub cpu: u32,
    pub memory: u32,
    pub count: u32,
    pub variables: Vec<String>,
}

struct DeploySvc {
    ctx: Context,
    opts: DeployOptions,
    variables: BTreeMap<String, String>,
    env: Option<Environment>,
}

/// Fargateで有効なCPU/メモリの組み合わせ
fn valid_task_size(cpu: u32, memory: u32) -> bool {
    match cpu {
        256 => matches!(memory, 512 | 1024 | 2048),
        512 => (1024..=4096).contains(&memory) && memory % 1024 == 0,
        1024 => (2048..=8192).contains(&memory) && memory % 1024 == 0,
        2048 => (4096..=16384).contains(&memory) && memory % 1024 == 0,
        4096 => (8192..=30720).contains(&memory) && memory % 1024 == 0,
        _ => false,
    }
}

#[async_trait]
impl ActionCommand for DeploySvc {
    async fn validate(&self) -> anyhow::Result<()> {
        action::validate_name("service", &self.opts.name)?;
        action::validate_name("environment", &self.opts.env)?;
        if self.opts.image.trim().is_empty() {
            anyhow::bail!("--image must not be empty");
        }
        if !valid_task_size(self.opts.cpu, self.opts.memory) {
            anyhow::bail!(
                "Unsupported task size: {} CPU units with {} MiB",
                self.opts.cpu,
                self.opts.memory
            );
        }
        if self.opts.count == 0 {
            anyhow::bail!("--count must be at least 1");
        }
        Ok(())
    }

    async fn ask(&mut self) -> anyhow::Result<()> {
        let app = self.ctx.app_name(self.opts.app.take()).await?;
        self.env = Some(self.ctx.store.get_environment(&app, &self.opts.env).await?);
        self.variables = action::parse_variables(&self.opts.variables)?;
        self.opts.app = Some(app);
        Ok(())
    }

    async fn execute(&mut self) -> anyhow::Result<()> {
        let env = self
            .env
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Environment could not be resolved"))?;
        let app = env.app.clone();
        let name = self.opts.name.clone();

        // 新規サービスは先にイメージリポジトリが必要
        match self.ctx.store.get_service(&app, &name).await {
            Ok(_) => {}
            Err(CloudError::RecordNotFound(_)) => {
                println!("Registering service {}", name.cyan());
                let (observer, printer) = utils::plan_printer();
                let apps = AppDeployer::new(self.ctx.app_stacks(&app).await?.with_observer(observer));
                let report = apps.add_service_to_app(&app, &name).await?;
                drop(apps);
                printer.await?;
                utils::print_report(&report)?;
                self.ctx
                    .store
                    .create_service(&Service::new(&app, &name, SERVICE_KIND))
                    .await?;
            }
            Err(e) => return Err(e.into()),
        }

        let mut stack = ServiceStack::new(&app, &env.name, &name, &self.opts.image);
        stack.port = self.opts.port;
        stack.cpu = self.opts.cpu;
        stack.memory = self.opts.memory;
        stack.count = self.opts.count;
        stack.variables = self.variables.clone();

        println!(
            "Deploying {} to {} ({})",
            name.cyan(),
            env.name.cyan(),
            env.region
        );
        let deployer = ServiceDeployer::new(self.ctx.stacks(std::slice::from_ref(&env.region)));
        let convergence = deployer.deploy_service(&stack, &env.region).await?;
        let outputs = utils::watch(convergence).await?;
        utils::print_outputs(&outputs);
        println!("{}", format!("✓ Service {} deployed", name).green().bold());
        Ok(())
    }
}

pub async fn deploy(global: &GlobalArgs, opts: DeployOptions) -> anyhow::Result<()> {
    let ctx = Context::load(global)?;
    run_action(&mut DeploySvc {
        ctx,
        opts,
        variables: BTreeMap::new(),
        env: None,
    })
    .await
}

struct DeleteSvc {
    ctx: Context,
    name: String,
    app: Option<String>,
    env: Option<String>,
    yes: bool,
}

#[async_trait]
impl ActionCommand for DeleteSvc {
    async fn validate(&self) -> anyhow::Result<()> {
        action::validate_name("service", &self.name)?;
        if let Some(env) = &self.env {
            action::validate_name("environment", env)?;
        }
        Ok(())
    }

    async fn ask(&mut self) -> anyhow::Result<()> {
        let app = self.ctx.app_name(self.app.take()).await?;
        self.ctx.store.get_service(&app, &self.name).await?;
        if let Some(env) = &self.env {
            self.ctx.store.get_environment(&app, env).await?;
        }
        action::require_confirmation(self.yes, &format!("service {}", self.name))?;
        self.app = Some(app);
        Ok(())
    }

    async fn execute(&mut self) -> anyhow::Result<()> {
        let app = self
            .app
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Application could not be resolved"))?;
        let envs: Vec<(String, String)> = self
            .ctx
            .store
            .list_environments(&app)
            .await?
            .into_iter()
            .filter(|env| self.env.as_ref().is_none_or(|only| *only == env.name))
            .map(|env| (env.name, env.region))
            .collect();
        let stacks = self.ctx.app_stacks(&app).await?;

        let deployer = ServiceDeployer::new(stacks.clone());
        let report = deployer.delete_service(&app, &self.name, &envs).await?;
        utils::print_report(&report)?;

        // イメージリポジトリはどの環境でもサービスが動いていない場合のみ削除
        if self.env.is_none() {
            let (observer, printer) = utils::plan_printer();
            let apps = AppDeployer::new(stacks.with_observer(observer))
                .with_images(self.ctx.backend.images());
            let report = apps.remove_service_from_app(&app, &self.name).await?;
            drop(apps);
            printer.await?;
            utils::print_report(&report)?;
            self.ctx.store.delete_service(&app, &self.name).await?;
        }

        println!("{}", format!("✓ Service {} deleted", self.name).green().bold());
        Ok(())
    }
}

pub async fn delete(
    global: &GlobalArgs,
    name: String,
    app: Option<String>,
    env: Option<String>,
    yes: bool,
) -> anyhow::Result<()> {
    let ctx = Context::load(global)?;
    run_action(&mut DeleteSvc {
        ctx,
        name,
        app,
        env,
        yes,
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_task_sizes() {
        assert!(valid_task_size(256, 512));
        assert!(valid_task_size(1024, 4096));
        assert!(!valid_task_size(256, 4096));
        assert!(!valid_task_size(300, 512));
        assert!(!valid_task_size(512, 1536));
    }
}
