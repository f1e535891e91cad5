use convoy_cloud::{ActionType, ResourceEvent};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::utils;

/// スタック操作1件分のスピナー。リソースイベントはその上に出力
pub struct StackProgress {
    progress_bar: ProgressBar,
    stack: String,
}

impl StackProgress {
    pub fn new(stack: &str, action: ActionType) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_message(format!("{} {}...", utils::action_verb(action), stack));

        Self {
            progress_bar: pb,
            stack: stack.to_string(),
        }
    }

    pub fn event(&self, event: &ResourceEvent) {
        self.progress_bar.println(utils::format_resource_event(event));
        self.progress_bar
            .set_message(format!("{}: {}", self.stack, event.logical_id));
    }

    pub fn finish_success(&self) {
        self.progress_bar
            .finish_with_message(format!("{} ✓", self.stack));
    }

    pub fn finish_error(&self, error: &str) {
        self.progress_bar
            .finish_with_message(format!("{} failed: {}", self.stack, error));
    }
}
