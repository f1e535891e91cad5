use crate::action::{self, ActionCommand, run_action};
use crate::context::{Context, GlobalArgs};
use crate::utils;
use async_trait::async_trait;
use colored::Colorize;
use convoy_cloud::descriptor::{AppStack, EnvironmentStack};
use convoy_cloud::store::{ApplicationStore, Environment, EnvironmentStore};
use convoy_cloud::{AppDeployer, CloudError, DeployedLister, EnvironmentDeployer};

pub struct InitOptions {
    pub name: String,
    pub app: Option<String>,
    pub account: Option<String>,
    pub prod: bool,
    pub import_vpc: Option<String>,
    pub import_subnets: Vec<String>,
}

struct InitEnv {
    ctx: Context,
    opts: InitOptions,
    app: String,
    app_account: String,
    domain: Option<String>,
}

#[async_trait]
impl ActionCommand for InitEnv {
    async fn validate(&self) -> anyhow::Result<()> {
        action::validate_name("environment", &self.opts.name)?;
        if let Some(account) = &self.opts.account
            && (account.len() != 12 || !account.chars().all(|c| c.is_ascii_digit()))
        {
            anyhow::bail!("Invalid account id '{}': expected 12 digits", account);
        }
        if let Some(vpc) = &self.opts.import_vpc
            && !vpc.starts_with("vpc-")
        {
            anyhow::bail!("Invalid VPC id '{}'", vpc);
        }
        if let Some(subnet) = self.opts.import_subnets.iter().find(|s| !s.starts_with("subnet-")) {
            anyhow::bail!("Invalid subnet id '{}'", subnet);
        }
        if self.opts.import_vpc.is_some() && self.opts.import_subnets.is_empty() {
            anyhow::bail!("--import-vpc needs --import-subnets");
        }
        Ok(())
    }

    async fn ask(&mut self) -> anyhow::Result<()> {
        self.app = self.ctx.app_name(self.opts.app.take()).await?;
        let record = self.ctx.store.get_application(&self.app).await?;
        if let Ok(existing) = self.ctx.store.get_environment(&self.app, &self.opts.name).await {
            return Err(CloudError::precondition(
                format!(
                    "Environment '{}' already exists in {}",
                    existing.name, existing.region
                ),
                format!("Delete it with `convoy env delete --name {}` first", existing.name),
            )
            .into());
        }
        self.app_account = record.account_id;
        self.domain = record.domain;
        if self.opts.account.is_none() {
            self.opts.account = Some(self.ctx.backend.check_auth().await?.account);
        }
        Ok(())
    }

    async fn execute(&mut self) -> anyhow::Result<()> {
        let env_name = self.opts.name.clone();
        let account = self
            .opts
            .account
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Account could not be resolved"))?;
        let region = self.ctx.region().to_string();
        println!(
            "Creating environment {} for {} in {}",
            env_name.cyan(),
            self.app.cyan(),
            region.cyan()
        );

        let mut app_stack = AppStack::new(&self.app, &self.app_account);
        app_stack.domain = self.domain.clone();
        let (observer, printer) = utils::plan_printer();
        let apps = AppDeployer::new(self.ctx.stacks(&[]).with_observer(observer));
        let report = apps.add_env_to_app(&app_stack, &account, &region).await?;
        drop(apps);
        printer.await?;
        utils::print_report(&report)?;

        let mut env = EnvironmentStack::new(
            &self.app,
            &env_name,
            format!("arn:aws:iam::{}:root", self.app_account),
        );
        env.prod = self.opts.prod;
        env.imported_vpc = self.opts.import_vpc.clone();
        env.imported_subnets = self.opts.import_subnets.clone();

        let deployer = EnvironmentDeployer::new(self.ctx.stacks(&[]));
        let convergence = deployer.deploy_environment(&env, &region).await?;
        let outputs = utils::watch(convergence).await?;
        utils::print_outputs(&outputs);

        let mut record = Environment::new(&self.app, &env_name, &region, &account);
        record.prod = self.opts.prod;
        self.ctx.store.create_environment(&record).await?;
        println!("{}", format!("✓ Environment {} is ready", env_name).green().bold());
        Ok(())
    }

    fn recommended_actions(&self) -> Vec<String> {
        vec![format!(
            "convoy svc deploy --name <service> --env {} --image <image>",
            self.opts.name
        )]
    }
}

pub async fn init(global: &GlobalArgs, opts: InitOptions) -> anyhow::Result<()> {
    let ctx = Context::load(global)?;
    run_action(&mut InitEnv {
        ctx,
        opts,
        app: String::new(),
        app_account: String::new(),
        domain: None,
    })
    .await
}

struct DeleteEnv {
    ctx: Context,
    name: String,
    app: Option<String>,
    empty_buckets: bool,
    yes: bool,
    record: Option<Environment>,
}

#[async_trait]
impl ActionCommand for DeleteEnv {
    async fn validate(&self) -> anyhow::Result<()> {
        action::validate_name("environment", &self.name)
    }

    async fn ask(&mut self) -> anyhow::Result<()> {
        let app = self.ctx.app_name(self.app.take()).await?;
        let record = self.ctx.store.get_environment(&app, &self.name).await?;
        action::require_confirmation(self.yes, &format!("environment {}", self.name))?;
        self.app = Some(app);
        self.record = Some(record);
        Ok(())
    }

    async fn execute(&mut self) -> anyhow::Result<()> {
        let record = self
            .record
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Environment could not be resolved"))?;
        let stacks = self.ctx.stacks(std::slice::from_ref(&record.region));

        let lister = DeployedLister::new(stacks.clone(), self.ctx.store.clone());
        let deployed = lister.list_deployed_services(&record.app, &record.name).await?;
        if !deployed.is_empty() {
            return Err(CloudError::precondition(
                format!(
                    "Environment '{}' still runs services: {}",
                    record.name,
                    deployed.join(", ")
                ),
                "Delete them with `convoy svc delete --name <service>` first",
            )
            .into());
        }

        let deployer = EnvironmentDeployer::new(stacks).with_buckets(self.ctx.backend.buckets());
        let convergence = deployer
            .delete_environment(&record.app, &record.name, &record.region, self.empty_buckets)
            .await?;
        utils::watch(convergence).await?;

        self.ctx
            .store
            .delete_environment(&record.app, &record.name)
            .await?;
        println!("{}", format!("✓ Environment {} deleted", record.name).green().bold());
        Ok(())
    }
}

pub async fn delete(
    global: &GlobalArgs,
    name: String,
    app: Option<String>,
    empty_buckets: bool,
    yes: bool,
) -> anyhow::Result<()> {
    let ctx = Context::load(global)?;
    run_action(&mut DeleteEnv {
        ctx,
        name,
        app,
        empty_buckets,
        yes,
        record: None,
    })
    .await
}
