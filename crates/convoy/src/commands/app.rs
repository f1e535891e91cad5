use crate::action::{self, ActionCommand, run_action};
use crate::context::{Context, GlobalArgs};
use crate::utils;
use async_trait::async_trait;
use colored::Colorize;
use convoy_cloud::descriptor::AppStack;
use convoy_cloud::store::{Application, ApplicationStore, EnvironmentStore, ServiceStore};
use convoy_cloud::{AppDeployer, CloudError, EnvironmentDeployer, ServiceDeployer};

struct InitApp {
    ctx: Context,
    name: String,
    domain: Option<String>,
    account: Option<String>,
}

#[async_trait]
impl ActionCommand for InitApp {
    async fn validate(&self) -> anyhow::Result<()> {
        action::validate_name("application", &self.name)?;
        if let Some(domain) = &self.domain
            && (!domain.contains('.') || domain.starts_with('.') || domain.ends_with('.'))
        {
            anyhow::bail!("Invalid domain '{}'", domain);
        }
        Ok(())
    }

    async fn ask(&mut self) -> anyhow::Result<()> {
        if let Ok(existing) = self.ctx.store.get_application(&self.name).await {
            self.account = Some(existing.account_id);
            if self.domain.is_none() {
                self.domain = existing.domain;
            }
            return Ok(());
        }
        let identity = self.ctx.backend.check_auth().await?;
        tracing::debug!(arn = %identity.arn, "Resolved caller identity");
        self.account = Some(identity.account);
        Ok(())
    }

    async fn execute(&mut self) -> anyhow::Result<()> {
        let account = self
            .account
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Account could not be resolved"))?;
        println!(
            "Creating application {} in {} ({})",
            self.name.cyan(),
            self.ctx.region().cyan(),
            self.ctx.root.display()
        );

        let mut stack = AppStack::new(&self.name, &account);
        stack.domain = self.domain.clone();

        let (observer, printer) = utils::plan_printer();
        let deployer = AppDeployer::new(self.ctx.stacks(&[]).with_observer(observer));
        let report = deployer.deploy_app(&stack).await?;
        drop(deployer);
        printer.await?;
        utils::print_report(&report)?;

        let mut record = Application::new(&self.name, &account);
        if let Some(domain) = &self.domain {
            record = record.with_domain(domain);
        }
        match self.ctx.store.create_application(&record).await {
            Ok(()) | Err(CloudError::RecordAlreadyExists(_)) => {}
            Err(e) => return Err(e.into()),
        }

        println!("{}", format!("✓ Application {} is ready", self.name).green().bold());
        Ok(())
    }

    fn recommended_actions(&self) -> Vec<String> {
        vec!["convoy env init --name test".to_string()]
    }
}

pub async fn init(global: &GlobalArgs, name: String, domain: Option<String>) -> anyhow::Result<()> {
    let ctx = Context::load_or_current(global)?;
    run_action(&mut InitApp {
        ctx,
        name,
        domain,
        account: None,
    })
    .await
}

struct DeleteApp {
    ctx: Context,
    name: Option<String>,
    yes: bool,
}

#[async_trait]
impl ActionCommand for DeleteApp {
    async fn validate(&self) -> anyhow::Result<()> {
        if let Some(name) = &self.name {
            action::validate_name("application", name)?;
        }
        Ok(())
    }

    async fn ask(&mut self) -> anyhow::Result<()> {
        let name = self.ctx.app_name(self.name.take()).await?;
        self.ctx.store.get_application(&name).await?;
        action::require_confirmation(self.yes, &format!("application {}", name))?;
        self.name = Some(name);
        Ok(())
    }

    async fn execute(&mut self) -> anyhow::Result<()> {
        let app = self
            .name
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Application name could not be resolved"))?;
        let envs = self.ctx.store.list_environments(&app).await?;
        let env_regions: Vec<(String, String)> = envs
            .iter()
            .map(|env| (env.name.clone(), env.region.clone()))
            .collect();
        let stacks = self.ctx.app_stacks(&app).await?;

        // サービス、環境、アプリケーション本体の順に削除
        let services = ServiceDeployer::new(stacks.clone());
        for svc in self.ctx.store.list_services(&app).await? {
            println!("Deleting service {}", svc.name.cyan());
            let report = services.delete_service(&app, &svc.name, &env_regions).await?;
            utils::print_report(&report)?;
        }

        let environments = EnvironmentDeployer::new(stacks.clone()).with_buckets(self.ctx.backend.buckets());
        for env in &envs {
            println!("Deleting environment {}", env.name.cyan());
            let convergence = environments
                .delete_environment(&app, &env.name, &env.region, true)
                .await?;
            utils::watch(convergence).await?;
        }

        println!("Deleting application {}", app.cyan());
        let (observer, printer) = utils::plan_printer();
        let deployer = AppDeployer::new(stacks.with_observer(observer))
            .with_buckets(self.ctx.backend.buckets())
            .with_images(self.ctx.backend.images());
        let report = deployer.delete_app(&app).await?;
        drop(deployer);
        printer.await?;
        utils::print_report(&report)?;

        self.ctx.store.delete_application(&app).await?;
        println!("{}", format!("✓ Application {} deleted", app).green().bold());
        Ok(())
    }
}

pub async fn delete(global: &GlobalArgs, name: Option<String>, yes: bool) -> anyhow::Result<()> {
    let ctx = Context::load(global)?;
    run_action(&mut DeleteApp { ctx, name, yes }).await
}
