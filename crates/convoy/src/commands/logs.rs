use crate::context::{self, Context, GlobalArgs};
use crate::utils;
use colored::Colorize;
use convoy_cloud::descriptor::TaskStack;
use convoy_cloud::{LogStore, LogTailer, TaskHandle};
use std::sync::Arc;

pub async fn handle(
    global: &GlobalArgs,
    group: String,
    task_ids: Vec<String>,
    since_minutes: Option<u32>,
    follow: bool,
) -> anyhow::Result<()> {
    let ctx = Context::load_or_current(global)?;
    let log_group = TaskStack::log_group_for(&group);
    let streams: Vec<String> = task_ids
        .iter()
        .map(|id| TaskHandle::log_stream_for(&group, id))
        .collect();

    println!("Log group: {}", log_group.cyan());
    let store: Arc<dyn LogStore> = ctx.backend.logs();
    let mut tailer = LogTailer::new(store, log_group, &streams)
        .with_poll_interval(ctx.settings.log_poll_interval())
        .with_retry(context::poll_config(&ctx.settings).retry);
    if let Some(minutes) = since_minutes {
        tailer = tailer.since(chrono::Utc::now() - chrono::Duration::minutes(i64::from(minutes)));
    }

    if follow {
        let cancel = utils::cancel_on_ctrl_c();
        tailer
            .write_events_until_stopped(utils::print_log_line, cancel)
            .await?;
    } else {
        for line in tailer.fetch_once().await? {
            utils::print_log_line(&line);
        }
    }

    for stream in tailer.degraded_streams() {
        eprintln!(
            "{}",
            format!("⚠ Gave up on stream {} after repeated failures", stream).yellow()
        );
    }
    Ok(())
}

