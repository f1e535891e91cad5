use crate::progress::StackProgress;
use colored::Colorize;
use convoy_cloud::{
    ActionType, Convergence, LogLine, PlanEvent, PlanReport, ResourceEvent, ResourceStatus,
    StepOutcome,
};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub fn action_verb(action: ActionType) -> &'static str {
    match action {
        ActionType::Create => "Creating",
        ActionType::Update => "Updating",
        ActionType::Delete => "Deleting",
        ActionType::Replace => "Recreating",
        ActionType::NoOp => "Checking",
    }
}

pub fn format_resource_event(event: &ResourceEvent) -> String {
    let status = match event.status {
        ResourceStatus::InProgress => event.status.to_string().yellow(),
        ResourceStatus::Complete => event.status.to_string().green(),
        ResourceStatus::Failed => event.status.to_string().red().bold(),
        ResourceStatus::RollbackInProgress | ResourceStatus::RollbackComplete => {
            event.status.to_string().magenta()
        }
    };
    let mut line = format!(
        "  {} {} {}",
        event.logical_id.cyan(),
        format!("[{}]", event.resource_type).dimmed(),
        status
    );
    if let Some(reason) = &event.reason {
        line.push_str(&format!(": {}", reason));
    }
    line
}

/// スタック操作を端末に流し、その出力を返す
pub async fn watch(convergence: Convergence) -> anyhow::Result<BTreeMap<String, String>> {
    let stack = convergence.stack.clone();
    if convergence.action == ActionType::NoOp {
        println!("  {} {} (no changes)", "✓".green(), stack.cyan());
        return Ok(convergence.outcome().await.into_result(&stack)?);
    }

    let progress = StackProgress::new(&stack, convergence.action);
    let outcome = convergence.wait_with(|event| progress.event(event)).await;
    match outcome.into_result(&stack) {
        Ok(outputs) => {
            progress.finish_success();
            Ok(outputs)
        }
        Err(e) => {
            progress.finish_error(&e.to_string());
            Err(e.into())
        }
    }
}

/// 全送信側がdropされるまでプランの進捗を表示するチャネル
pub fn plan_printer() -> (mpsc::UnboundedSender<PlanEvent>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                PlanEvent::Started { step, action } => {
                    println!("{} {}", action_verb(action).blue(), step.bold());
                }
                PlanEvent::Resource { step, event } => {
                    println!("{} {}", format!("[{}]", step).dimmed(), format_resource_event(&event));
                }
                PlanEvent::Finished { step, success } => {
                    if success {
                        println!("{} {}", "✓".green(), step);
                    } else {
                        println!("{} {}", "✗".red(), step);
                    }
                }
            }
        }
    });
    (tx, handle)
}

/// 各ステップの結果を表示。失敗があればコマンドのエラーにする
pub fn print_report(report: &PlanReport) -> anyhow::Result<()> {
    if report.results.is_empty() {
        println!("{}", "Nothing to do".dimmed());
        return Ok(());
    }

    println!();
    for result in &report.results {
        match &result.outcome {
            StepOutcome::Succeeded { action, .. } => {
                println!("  {} {} ({})", "✓".green(), result.target, action);
            }
            StepOutcome::Failed { reason } => {
                println!("  {} {}: {}", "✗".red(), result.target, reason.red());
            }
            StepOutcome::Skipped { blocked_by } => {
                println!(
                    "  {} {} (skipped, blocked by {})",
                    "-".yellow(),
                    result.target,
                    blocked_by
                );
            }
        }
    }

    if !report.is_success() {
        let failed: Vec<&str> = report.failures().map(|r| r.step.as_str()).collect();
        anyhow::bail!("Deployment did not complete: {}", failed.join(", "));
    }
    Ok(())
}

pub fn print_outputs(outputs: &BTreeMap<String, String>) {
    if outputs.is_empty() {
        return;
    }
    println!("{}", "Outputs:".bold());
    for (key, value) in outputs {
        println!("  {}: {}", key, value.cyan());
    }
}

pub fn print_log_line(line: &LogLine) {
    let time = line
        .time()
        .map(|t| t.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_default();
    println!(
        "{} {} {}",
        line.short_stream().cyan(),
        time.dimmed(),
        line.message.trim_end()
    );
}

/// 最初のCtrl-Cでキャンセルされるトークン
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("Interrupted, stopping log tail");
            cancel.cancel();
        }
    });
    token
}
