//! Desired-vs-current comparison for stacks

use crate::provider::StackDescription;
use crate::stack::StackRequest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What the engine decided to do with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new stack
    Create,
    /// Update an existing stack
    Update,
    /// Delete a stack
    Delete,
    /// Delete a half-created stack, then create it again
    Replace,
    /// No changes needed
    NoOp,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::Replace => write!(f, "replace"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// A single changed key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueChange {
    pub key: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

/// Differences between a deployed stack and a request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub template_changed: bool,
    pub parameters: Vec<ValueChange>,
    pub tags: Vec<ValueChange>,
}

impl ChangeSet {
    /// Compare a request with the stack's current description
    ///
    /// Parameters and tags are compared as maps: reordering alone is not a change.
    pub fn between(current: &StackDescription, desired: &StackRequest) -> Self {
        let current_params = current.parameter_map();
        let desired_params = desired.parameter_map();
        let current_tags = &current.tags;
        let desired_tags = &desired.tags;

        Self {
            template_changed: normalize(&current.template) != normalize(&desired.template),
            parameters: diff_maps(&current_params, &desired_params),
            tags: diff_maps(current_tags, desired_tags),
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.template_changed && self.parameters.is_empty() && self.tags.is_empty()
    }
}

impl std::fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "no changes");
        }
        let mut parts = Vec::new();
        if self.template_changed {
            parts.push("template changed".to_string());
        }
        if !self.parameters.is_empty() {
            let keys: Vec<&str> = self.parameters.iter().map(|c| c.key.as_str()).collect();
            parts.push(format!("parameters: {}", keys.join(", ")));
        }
        if !self.tags.is_empty() {
            let keys: Vec<&str> = self.tags.iter().map(|c| c.key.as_str()).collect();
            parts.push(format!("tags: {}", keys.join(", ")));
        }
        write!(f, "{}", parts.join("; "))
    }
}

// Trailing whitespace differences are not template changes.
fn normalize(template: &str) -> String {
    template
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn diff_maps(
    current: &std::collections::BTreeMap<String, String>,
    desired: &std::collections::BTreeMap<String, String>,
) -> Vec<ValueChange> {
    let keys: BTreeSet<&String> = current.keys().chain(desired.keys()).collect();
    keys.into_iter()
        .filter_map(|key| {
            let old = current.get(key);
            let new = desired.get(key);
            (old != new).then(|| ValueChange {
                key: key.clone(),
                old: old.cloned(),
                new: new.cloned(),
            })
        })
        .collect()
}
