//! Stack and resource events
//!
//! Backends report raw, string-typed events. [`EventCollator`] turns them
//! into the typed [`ResourceEvent`] stream: deduplicated by event id and
//! non-decreasing in time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Whole-stack status as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StackStatus {
    CreateInProgress,
    CreateComplete,
    CreateFailed,
    RollbackInProgress,
    RollbackComplete,
    RollbackFailed,
    UpdateInProgress,
    UpdateComplete,
    UpdateFailed,
    UpdateRollbackInProgress,
    UpdateRollbackComplete,
    UpdateRollbackFailed,
    DeleteInProgress,
    DeleteComplete,
    DeleteFailed,
    ReviewInProgress,
}

impl StackStatus {
    /// Parse a backend status string such as `CREATE_COMPLETE`
    pub fn parse(raw: &str) -> Option<Self> {
        let status = match raw {
            "CREATE_IN_PROGRESS" => StackStatus::CreateInProgress,
            "CREATE_COMPLETE" => StackStatus::CreateComplete,
            "CREATE_FAILED" => StackStatus::CreateFailed,
            "ROLLBACK_IN_PROGRESS" => StackStatus::RollbackInProgress,
            "ROLLBACK_COMPLETE" => StackStatus::RollbackComplete,
            "ROLLBACK_FAILED" => StackStatus::RollbackFailed,
            "UPDATE_IN_PROGRESS" | "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS" => {
                StackStatus::UpdateInProgress
            }
            "UPDATE_COMPLETE" => StackStatus::UpdateComplete,
            "UPDATE_FAILED" => StackStatus::UpdateFailed,
            "UPDATE_ROLLBACK_IN_PROGRESS" | "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS" => {
                StackStatus::UpdateRollbackInProgress
            }
            "UPDATE_ROLLBACK_COMPLETE" => StackStatus::UpdateRollbackComplete,
            "UPDATE_ROLLBACK_FAILED" => StackStatus::UpdateRollbackFailed,
            "DELETE_IN_PROGRESS" => StackStatus::DeleteInProgress,
            "DELETE_COMPLETE" => StackStatus::DeleteComplete,
            "DELETE_FAILED" => StackStatus::DeleteFailed,
            "REVIEW_IN_PROGRESS" => StackStatus::ReviewInProgress,
            _ => return None,
        };
        Some(status)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StackStatus::CreateInProgress => "CREATE_IN_PROGRESS",
            StackStatus::CreateComplete => "CREATE_COMPLETE",
            StackStatus::CreateFailed => "CREATE_FAILED",
            StackStatus::RollbackInProgress => "ROLLBACK_IN_PROGRESS",
            StackStatus::RollbackComplete => "ROLLBACK_COMPLETE",
            StackStatus::RollbackFailed => "ROLLBACK_FAILED",
            StackStatus::UpdateInProgress => "UPDATE_IN_PROGRESS",
            StackStatus::UpdateComplete => "UPDATE_COMPLETE",
            StackStatus::UpdateFailed => "UPDATE_FAILED",
            StackStatus::UpdateRollbackInProgress => "UPDATE_ROLLBACK_IN_PROGRESS",
            StackStatus::UpdateRollbackComplete => "UPDATE_ROLLBACK_COMPLETE",
            StackStatus::UpdateRollbackFailed => "UPDATE_ROLLBACK_FAILED",
            StackStatus::DeleteInProgress => "DELETE_IN_PROGRESS",
            StackStatus::DeleteComplete => "DELETE_COMPLETE",
            StackStatus::DeleteFailed => "DELETE_FAILED",
            StackStatus::ReviewInProgress => "REVIEW_IN_PROGRESS",
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            StackStatus::CreateInProgress
                | StackStatus::RollbackInProgress
                | StackStatus::UpdateInProgress
                | StackStatus::UpdateRollbackInProgress
                | StackStatus::DeleteInProgress
                | StackStatus::ReviewInProgress
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_in_progress()
    }

    /// `*_COMPLETE` states that mean the requested change landed
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            StackStatus::CreateComplete | StackStatus::UpdateComplete | StackStatus::DeleteComplete
        )
    }

    pub fn is_rolled_back(&self) -> bool {
        matches!(
            self,
            StackStatus::RollbackComplete | StackStatus::UpdateRollbackComplete
        )
    }

    /// A stack left behind by a failed create; it can only be deleted
    pub fn requires_replacement(&self) -> bool {
        matches!(
            self,
            StackStatus::RollbackComplete | StackStatus::CreateFailed | StackStatus::RollbackFailed
        )
    }
}

impl std::fmt::Display for StackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single resource inside a stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    InProgress,
    Complete,
    Failed,
    RollbackInProgress,
    RollbackComplete,
}

impl ResourceStatus {
    /// Classify a raw resource status such as `CREATE_IN_PROGRESS`
    ///
    /// While the stack is rolling back, resource deletions are the rollback
    /// itself and are reported as rollback progress.
    pub fn classify(raw: &str, rolling_back: bool) -> Self {
        if raw.ends_with("_FAILED") {
            return ResourceStatus::Failed;
        }
        let rollback = raw.contains("ROLLBACK") || (rolling_back && raw.starts_with("DELETE_"));
        let in_progress = raw.ends_with("_IN_PROGRESS");
        match (rollback, in_progress) {
            (true, true) => ResourceStatus::RollbackInProgress,
            (true, false) => ResourceStatus::RollbackComplete,
            (false, true) => ResourceStatus::InProgress,
            (false, false) => ResourceStatus::Complete,
        }
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::InProgress => write!(f, "in progress"),
            ResourceStatus::Complete => write!(f, "complete"),
            ResourceStatus::Failed => write!(f, "failed"),
            ResourceStatus::RollbackInProgress => write!(f, "rolling back"),
            ResourceStatus::RollbackComplete => write!(f, "rolled back"),
        }
    }
}

/// An event exactly as the backend reported it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawStackEvent {
    pub event_id: String,
    pub stack_name: String,
    pub logical_id: String,
    pub resource_type: String,
    pub status: String,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RawStackEvent {
    /// Events about the stack itself rather than one of its resources
    pub fn is_stack_event(&self) -> bool {
        self.logical_id == self.stack_name
    }
}

/// Typed resource event published to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEvent {
    pub logical_id: String,
    pub resource_type: String,
    pub status: ResourceStatus,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl std::fmt::Display for ResourceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}] {}", self.logical_id, self.resource_type, self.status)?;
        if let Some(reason) = &self.reason {
            write!(f, ": {}", reason)?;
        }
        Ok(())
    }
}

/// How far behind the watermark each fetch reaches, so events the backend
/// surfaces late (paging, clock skew between resources) are still picked up
pub const EVENT_LOOKBACK_SECS: i64 = 5;

/// Turns batches of raw events into the published event sequence
///
/// `event_id` is the only thing that suppresses an event. An event older
/// than one already published is still delivered, stamped at the
/// watermark so the stream stays non-decreasing.
#[derive(Debug)]
pub struct EventCollator {
    stack_name: String,
    seen_ids: HashSet<String>,
    last_seen: HashMap<String, DateTime<Utc>>,
    watermark: Option<DateTime<Utc>>,
    rolling_back: bool,
    root_cause: Option<(DateTime<Utc>, ResourceEvent)>,
    stack_reason: Option<String>,
}

impl EventCollator {
    pub fn new(stack_name: impl Into<String>) -> Self {
        Self {
            stack_name: stack_name.into(),
            seen_ids: HashSet::new(),
            last_seen: HashMap::new(),
            watermark: None,
            rolling_back: false,
            root_cause: None,
            stack_reason: None,
        }
    }

    /// Mark pre-existing history as seen so an update only reports its own events
    pub fn prime(&mut self, history: &[RawStackEvent]) {
        for event in history {
            self.seen_ids.insert(event.event_id.clone());
            self.advance_watermark(event.timestamp);
        }
    }

    /// Newest timestamp published so far
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark
    }

    /// Lower bound (inclusive) for the next fetch
    pub fn since(&self) -> Option<DateTime<Utc>> {
        self.watermark
            .map(|w| w - chrono::Duration::seconds(EVENT_LOOKBACK_SECS))
    }

    /// Earliest failed resource event seen so far
    pub fn root_cause(&self) -> Option<&ResourceEvent> {
        self.root_cause.as_ref().map(|(_, event)| event)
    }

    /// Latest reason reported on the stack itself
    pub fn stack_reason(&self) -> Option<&str> {
        self.stack_reason.as_deref()
    }

    fn advance_watermark(&mut self, ts: DateTime<Utc>) {
        if self.watermark.is_none_or(|w| ts > w) {
            self.watermark = Some(ts);
        }
    }

    /// Ingest one fetched batch and return the events to publish
    pub fn ingest(&mut self, mut batch: Vec<RawStackEvent>) -> Vec<ResourceEvent> {
        // Stable: equal timestamps keep backend order.
        batch.sort_by_key(|e| e.timestamp);

        let mut out: Vec<ResourceEvent> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for raw in batch {
            if !self.seen_ids.insert(raw.event_id.clone()) {
                continue;
            }
            let occurred_at = raw.timestamp;
            let published_at = match self.watermark {
                Some(w) if occurred_at < w => {
                    tracing::debug!(
                        stack = %self.stack_name,
                        event_id = %raw.event_id,
                        "Late event, publishing at the watermark"
                    );
                    w
                }
                _ => occurred_at,
            };
            self.advance_watermark(published_at);

            if raw.is_stack_event() {
                if raw.status.contains("ROLLBACK") {
                    self.rolling_back = true;
                }
                if raw.reason.is_some() {
                    self.stack_reason = raw.reason.clone();
                }
                continue;
            }

            let event = ResourceEvent {
                status: ResourceStatus::classify(&raw.status, self.rolling_back),
                logical_id: raw.logical_id,
                resource_type: raw.resource_type,
                reason: raw.reason,
                timestamp: published_at,
            };

            if event.status == ResourceStatus::Failed
                && self.root_cause.as_ref().is_none_or(|(at, _)| occurred_at < *at)
            {
                self.root_cause = Some((occurred_at, event.clone()));
            }

            // A resource's newer status already went out; an older one would
            // make it look like it went backwards.
            if self
                .last_seen
                .get(&event.logical_id)
                .is_some_and(|last| occurred_at < *last)
            {
                continue;
            }
            self.last_seen.insert(event.logical_id.clone(), occurred_at);

            match index.get(&event.logical_id) {
                Some(&i) => out[i] = event,
                None => {
                    index.insert(event.logical_id.clone(), out.len());
                    out.push(event);
                }
            }
        }

        out.sort_by_key(|e| e.timestamp);
        out
    }
}
