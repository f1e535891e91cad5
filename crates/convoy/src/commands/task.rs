use crate::action::{self, ActionCommand, run_action};
use crate::context::{self, Context, GlobalArgs};
use crate::utils;
use async_trait::async_trait;
use colored::Colorize;
use convoy_cloud::descriptor::TaskStack;
use convoy_cloud::{
    EnvironmentDeployer, LogStore, LogTailer, TaskDeployer, TaskHandle, TaskLauncher, TaskRunner,
    TaskSpec, TaskState,
};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct RunOptions {
    pub group: String,
    pub image: Option<String>,
    pub count: u32,
    pub cpu: u32,
    pub memory: u32,
    pub command: Option<String>,
    pub variables: Vec<String>,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub app: Option<String>,
    pub env: Option<String>,
    pub follow: bool,
}

struct RunTask {
    ctx: Context,
    opts: RunOptions,
    variables: BTreeMap<String, String>,
    cluster: Option<String>,
    handles: Vec<TaskHandle>,
}

#[async_trait]
impl ActionCommand for RunTask {
    async fn validate(&self) -> anyhow::Result<()> {
        action::validate_name("task group", &self.opts.group)?;
        if self.opts.count == 0 {
            anyhow::bail!("--count must be at least 1");
        }
        if let Some(command) = &self.opts.command
            && command.trim().is_empty()
        {
            anyhow::bail!("--command must not be empty");
        }
        Ok(())
    }

    async fn ask(&mut self) -> anyhow::Result<()> {
        self.variables = action::parse_variables(&self.opts.variables)?;
        let Some(env) = &self.opts.env else {
            return Ok(());
        };

        let app = self.ctx.app_name(self.opts.app.take()).await?;
        let deployer = EnvironmentDeployer::new(self.ctx.stacks(&[]));
        let deployed = deployer
            .get_environment(&app, env, self.ctx.region())
            .await?
            .ok_or_else(|| anyhow::anyhow!("Environment '{}' is not deployed", env))?;
        self.cluster = deployed.cluster_id().map(str::to_string);
        if self.opts.subnets.is_empty() {
            self.opts.subnets = deployed.subnets();
        }
        if self.opts.security_groups.is_empty() {
            self.opts.security_groups = deployed.security_groups();
        }
        self.opts.app = Some(app);
        Ok(())
    }

    async fn execute(&mut self) -> anyhow::Result<()> {
        let group = self.opts.group.clone();
        let mut stack = TaskStack::new(&group);
        stack.image = self.opts.image.clone();
        stack.cpu = self.opts.cpu;
        stack.memory = self.opts.memory;
        stack.command = self
            .opts
            .command
            .as_deref()
            .map(|c| c.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        stack.variables = self.variables.clone();
        stack.app = self.opts.app.clone();
        stack.env = self.opts.env.clone();

        println!("Preparing task group {}", group.cyan());
        let deployer = TaskDeployer::new(self.ctx.stacks(&[]));
        let convergence = deployer.deploy_task(&stack).await?;
        utils::watch(convergence).await?;

        let resources = deployer
            .task_resources(&group)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Task group '{}' has no resources", group))?;
        let task_definition = resources.task_definition.ok_or_else(|| {
            anyhow::anyhow!("Task group '{}' has no task definition", group)
        })?;

        let spec = TaskSpec {
            group: group.clone(),
            count: self.opts.count,
            cluster: self.cluster.clone(),
            task_definition,
            subnets: self.opts.subnets.clone(),
            security_groups: self.opts.security_groups.clone(),
            command: stack.command.clone(),
            variables: stack.variables.clone(),
            log_group: resources.log_group,
        };

        let launcher: Arc<dyn TaskLauncher> = self.ctx.backend.task_launcher();
        let runner = TaskRunner::new(launcher.clone());
        self.handles = runner.run(&spec).await?;
        for handle in &self.handles {
            println!("  {} task {}", "▶".green(), handle.task_id.cyan());
        }

        if !self.opts.follow {
            return Ok(());
        }

        println!();
        let store: Arc<dyn LogStore> = self.ctx.backend.logs();
        let mut tailer = LogTailer::for_tasks(store, launcher.clone(), self.handles.clone())
            .with_poll_interval(self.ctx.settings.log_poll_interval())
            .with_retry(context::poll_config(&self.ctx.settings).retry);
        let cancel = utils::cancel_on_ctrl_c();
        tailer
            .write_events_until_stopped(utils::print_log_line, cancel.clone())
            .await?;

        if cancel.is_cancelled() {
            println!("{}", "Stopped following; tasks keep running".yellow());
            return Ok(());
        }
        report_exit_codes(launcher.as_ref(), &self.handles).await
    }

    fn recommended_actions(&self) -> Vec<String> {
        if self.opts.follow || self.handles.is_empty() {
            return Vec::new();
        }
        let ids: Vec<String> = self
            .handles
            .iter()
            .map(|h| format!("--task-id {}", h.task_id))
            .collect();
        vec![format!(
            "convoy logs --group {} {} --follow",
            self.opts.group,
            ids.join(" ")
        )]
    }
}

async fn report_exit_codes(launcher: &dyn TaskLauncher, handles: &[TaskHandle]) -> anyhow::Result<()> {
    let mut failed = Vec::new();
    for (task_id, state) in launcher.describe_tasks(handles).await? {
        if let TaskState::Stopped { exit_code, reason } = state {
            match exit_code {
                Some(0) => println!("  {} task {} exited 0", "✓".green(), task_id),
                code => {
                    let code = code.map_or_else(|| "?".to_string(), |c| c.to_string());
                    println!(
                        "  {} task {} exited {}{}",
                        "✗".red(),
                        task_id,
                        code,
                        reason.map(|r| format!(" ({})", r)).unwrap_or_default()
                    );
                    failed.push(task_id);
                }
            }
        }
    }
    if !failed.is_empty() {
        anyhow::bail!("{} task(s) failed: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}

pub async fn run(global: &GlobalArgs, opts: RunOptions) -> anyhow::Result<()> {
    let ctx = Context::load_or_current(global)?;
    run_action(&mut RunTask {
        ctx,
        opts,
        variables: BTreeMap::new(),
        cluster: None,
        handles: Vec::new(),
    })
    .await
}
