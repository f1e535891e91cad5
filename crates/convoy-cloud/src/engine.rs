//! Convergence engine
//!
//! Drives a stack from a submitted [`StackRequest`] to a terminal state.
//! Every operation yields a [`Convergence`]: a stream of typed resource
//! events plus exactly one [`ConvergenceOutcome`].
//!
//! ```text
//!   describe ──► absent ─────────────► create ─┐
//!            ├─► in progress ────────► Conflict │
//!            ├─► failed create ──► delete+create┤
//!            └─► stable ─► diff ─┬─► update ────┤
//!                                └─► no-op      ▼
//!                                   poll status + events ─► outcome
//! ```
//!
//! The one-operation-per-stack rule is enforced against backend state, not
//! a local lock: other processes may drive the same stack.

use crate::diff::{ActionType, ChangeSet};
use crate::error::{CloudError, Result};
use crate::event::{EventCollator, ResourceEvent, StackStatus};
use crate::provider::{PollConfig, ProvisioningClient, RetryConfig, StackDescription};
use crate::stack::{StackRequest, StackTarget};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Why a stack ended in failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The stack reached a failed state without rolling back
    Failed,
    /// The stack rolled back to its previous state
    RolledBack,
    /// A delete was blocked by a resource that still holds data
    DeleteBlocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    /// Root-cause resource, when one reported a failure
    pub logical_id: Option<String>,
    pub resource_type: Option<String>,
    pub reason: String,
    pub rolled_back: bool,
    pub kind: FailureKind,
}

/// Terminal result of a convergence operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceOutcome {
    Success { outputs: BTreeMap<String, String> },
    Failure(FailureDetail),
}

impl ConvergenceOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ConvergenceOutcome::Success { .. })
    }

    pub fn outputs(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            ConvergenceOutcome::Success { outputs } => Some(outputs),
            ConvergenceOutcome::Failure(_) => None,
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        ConvergenceOutcome::Failure(FailureDetail {
            logical_id: None,
            resource_type: None,
            reason: reason.into(),
            rolled_back: false,
            kind: FailureKind::Failed,
        })
    }

    /// Convert into a `Result`, surfacing blocked deletes as preconditions
    pub fn into_result(self, stack: &str) -> Result<BTreeMap<String, String>> {
        match self {
            ConvergenceOutcome::Success { outputs } => Ok(outputs),
            ConvergenceOutcome::Failure(detail) if detail.kind == FailureKind::DeleteBlocked => {
                let resource = detail.logical_id.unwrap_or_else(|| stack.to_string());
                Err(CloudError::precondition(
                    format!(
                        "Cannot delete stack '{}': {} is not empty ({})",
                        stack, resource, detail.reason
                    ),
                    format!("Empty {} and run the delete again", resource),
                ))
            }
            ConvergenceOutcome::Failure(detail) => Err(CloudError::ConvergenceFailed {
                stack: stack.to_string(),
                logical_id: detail.logical_id.unwrap_or_else(|| stack.to_string()),
                reason: detail.reason,
                rolled_back: detail.rolled_back,
            }),
        }
    }
}

/// A running (or already finished) convergence operation
///
/// Dropping the event receiver only detaches the local observer; the
/// backend operation keeps running.
#[derive(Debug)]
pub struct Convergence {
    pub stack: String,
    pub action: ActionType,
    pub events: mpsc::UnboundedReceiver<ResourceEvent>,
    outcome: oneshot::Receiver<ConvergenceOutcome>,
}

impl Convergence {
    fn finished(stack: String, action: ActionType, outcome: ConvergenceOutcome) -> Self {
        let (_, events) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let _ = outcome_tx.send(outcome);
        Self {
            stack,
            action,
            events,
            outcome: outcome_rx,
        }
    }

    /// Wait for the outcome, discarding events
    pub async fn outcome(self) -> ConvergenceOutcome {
        self.wait_with(|_| {}).await
    }

    /// Feed every event to `observer`, then return the outcome
    pub async fn wait_with(mut self, mut observer: impl FnMut(&ResourceEvent)) -> ConvergenceOutcome {
        while let Some(event) = self.events.recv().await {
            observer(&event);
        }
        self.outcome
            .await
            .unwrap_or_else(|_| ConvergenceOutcome::failed("convergence task stopped unexpectedly"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Create,
    Update,
    Delete,
}

/// Drives stack operations against a provisioning client
pub struct ConvergenceEngine<C: ?Sized = dyn ProvisioningClient> {
    client: Arc<C>,
    poll: PollConfig,
}

impl<C: ?Sized> Clone for ConvergenceEngine<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            poll: self.poll.clone(),
        }
    }
}

impl<C> ConvergenceEngine<C>
where
    C: ProvisioningClient + ?Sized + 'static,
{
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            poll: PollConfig::default(),
        }
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Drive `request` toward its desired state
    ///
    /// Fails fast with [`CloudError::Conflict`] when the stack is already
    /// mid-operation, and returns an already-finished [`Convergence`] with
    /// [`ActionType::NoOp`] when nothing differs.
    pub async fn converge(&self, request: StackRequest) -> Result<Convergence> {
        let current = self.client.describe_stack(&request.name).await?;

        match current {
            None => self.start(request, Operation::Create, None).await,
            Some(stack) if stack.status.is_in_progress() => Err(CloudError::Conflict {
                stack: stack.name,
                status: stack.status.to_string(),
            }),
            Some(stack) if stack.status.requires_replacement() => {
                info!(
                    stack = %request.name,
                    status = %stack.status,
                    "Stack is left over from a failed create; replacing it"
                );
                self.start_replace(request).await
            }
            Some(stack) => {
                let changes = ChangeSet::between(&stack, &request);
                if changes.is_empty() {
                    info!(stack = %request.name, "Stack is up to date");
                    return Ok(Convergence::finished(
                        request.name,
                        ActionType::NoOp,
                        ConvergenceOutcome::Success {
                            outputs: stack.outputs,
                        },
                    ));
                }
                debug!(stack = %request.name, changes = %changes, "Stack differs from request");
                let history = self.client.describe_events(&request.name, None).await?;
                let mut collator = EventCollator::new(&request.name);
                collator.prime(&history);
                self.start(request, Operation::Update, Some(collator)).await
            }
        }
    }

    /// Delete the stack for `target`
    ///
    /// Deleting an absent stack succeeds immediately.
    pub async fn delete(&self, target: &StackTarget) -> Result<Convergence> {
        let name = target.name.clone();
        let current = self.client.describe_stack(&name).await?;

        let stack = match current {
            None => {
                info!(stack = %name, "Stack does not exist; nothing to delete");
                return Ok(Convergence::finished(
                    name,
                    ActionType::NoOp,
                    ConvergenceOutcome::Success {
                        outputs: BTreeMap::new(),
                    },
                ));
            }
            Some(stack) => stack,
        };
        if stack.status.is_in_progress() {
            return Err(CloudError::Conflict {
                stack: stack.name,
                status: stack.status.to_string(),
            });
        }

        let history = self.client.describe_events(&name, None).await?;
        let mut collator = EventCollator::new(&name);
        collator.prime(&history);

        info!(stack = %name, "Deleting stack");
        self.client.delete(&name).await?;

        let (tx, events) = mpsc::unbounded_channel();
        let (outcome_tx, outcome) = oneshot::channel();
        let client = Arc::clone(&self.client);
        let poll = self.poll.clone();
        let stack_name = name.clone();
        tokio::spawn(async move {
            let result = watch(&*client, &poll, &stack_name, Operation::Delete, collator, &tx).await;
            let _ = outcome_tx.send(result);
        });

        Ok(Convergence {
            stack: name,
            action: ActionType::Delete,
            events,
            outcome,
        })
    }

    /// Converge and wait, feeding events to `observer`
    pub async fn converge_and_wait(
        &self,
        request: StackRequest,
        observer: impl FnMut(&ResourceEvent),
    ) -> Result<ConvergenceOutcome> {
        Ok(self.converge(request).await?.wait_with(observer).await)
    }

    /// Delete and wait, feeding events to `observer`
    pub async fn delete_and_wait(
        &self,
        target: &StackTarget,
        observer: impl FnMut(&ResourceEvent),
    ) -> Result<ConvergenceOutcome> {
        Ok(self.delete(target).await?.wait_with(observer).await)
    }

    async fn start(
        &self,
        request: StackRequest,
        operation: Operation,
        collator: Option<EventCollator>,
    ) -> Result<Convergence> {
        let name = request.name.clone();
        let action = match operation {
            Operation::Create => {
                info!(stack = %name, kind = %request.kind, "Creating stack");
                self.client.create(&request).await?;
                ActionType::Create
            }
            Operation::Update => {
                info!(stack = %name, kind = %request.kind, "Updating stack");
                match self.client.update(&request).await {
                    Ok(()) => ActionType::Update,
                    Err(CloudError::NoChanges(_)) => {
                        info!(stack = %name, "Backend reported no changes");
                        let outputs = self.client.get_outputs(&name).await?;
                        return Ok(Convergence::finished(
                            name,
                            ActionType::NoOp,
                            ConvergenceOutcome::Success { outputs },
                        ));
                    }
                    Err(e) => return Err(e),
                }
            }
            Operation::Delete => unreachable!("deletes go through ConvergenceEngine::delete"),
        };
        let collator = collator.unwrap_or_else(|| EventCollator::new(&name));

        let (tx, events) = mpsc::unbounded_channel();
        let (outcome_tx, outcome) = oneshot::channel();
        let client = Arc::clone(&self.client);
        let poll = self.poll.clone();
        let stack_name = name.clone();
        tokio::spawn(async move {
            let result = watch(&*client, &poll, &stack_name, operation, collator, &tx).await;
            let _ = outcome_tx.send(result);
        });

        Ok(Convergence {
            stack: name,
            action,
            events,
            outcome,
        })
    }

    async fn start_replace(&self, request: StackRequest) -> Result<Convergence> {
        let name = request.name.clone();
        let history = self.client.describe_events(&name, None).await?;
        let mut collator = EventCollator::new(&name);
        collator.prime(&history);
        self.client.delete(&name).await?;

        let (tx, events) = mpsc::unbounded_channel();
        let (outcome_tx, outcome) = oneshot::channel();
        let client = Arc::clone(&self.client);
        let poll = self.poll.clone();
        tokio::spawn(async move {
            let deleted = watch(&*client, &poll, &request.name, Operation::Delete, collator, &tx).await;
            let result = if deleted.is_success() {
                match client.create(&request).await {
                    Ok(()) => {
                        let collator = EventCollator::new(&request.name);
                        watch(&*client, &poll, &request.name, Operation::Create, collator, &tx).await
                    }
                    Err(e) => ConvergenceOutcome::failed(e.to_string()),
                }
            } else {
                deleted
            };
            let _ = outcome_tx.send(result);
        });

        Ok(Convergence {
            stack: name,
            action: ActionType::Replace,
            events,
            outcome,
        })
    }
}

/// Poll until the stack reaches a terminal state for `operation`
async fn watch<C>(
    client: &C,
    poll: &PollConfig,
    stack: &str,
    operation: Operation,
    mut collator: EventCollator,
    tx: &mpsc::UnboundedSender<ResourceEvent>,
) -> ConvergenceOutcome
where
    C: ProvisioningClient + ?Sized,
{
    loop {
        tokio::time::sleep(poll.interval).await;

        // Status first, then events: a terminal status implies every event
        // leading up to it is already visible.
        let status = match with_retry(&poll.retry, stack, || client.describe_stack(stack)).await {
            Ok(status) => status,
            Err(e) => return ConvergenceOutcome::failed(format!("failed to describe stack: {}", e)),
        };
        let since = collator.since();
        let batch = match with_retry(&poll.retry, stack, || client.describe_events(stack, since)).await {
            Ok(batch) => batch,
            Err(e) => return ConvergenceOutcome::failed(format!("failed to fetch stack events: {}", e)),
        };

        for event in collator.ingest(batch) {
            debug!(stack = %stack, event = %event, "Resource event");
            // A closed receiver means the observer detached.
            let _ = tx.send(event);
        }

        if let Some(outcome) = evaluate(operation, status.as_ref(), &collator) {
            match &outcome {
                ConvergenceOutcome::Success { .. } => info!(stack = %stack, "Stack converged"),
                ConvergenceOutcome::Failure(detail) => {
                    warn!(stack = %stack, reason = %detail.reason, "Stack failed to converge")
                }
            }
            return outcome;
        }
    }
}

fn evaluate(
    operation: Operation,
    status: Option<&StackDescription>,
    collator: &EventCollator,
) -> Option<ConvergenceOutcome> {
    let Some(stack) = status else {
        return Some(match operation {
            Operation::Delete => ConvergenceOutcome::Success {
                outputs: BTreeMap::new(),
            },
            _ => ConvergenceOutcome::failed("stack disappeared while converging"),
        });
    };

    if stack.status.is_in_progress() {
        return None;
    }

    let succeeded = match operation {
        Operation::Create => stack.status == StackStatus::CreateComplete,
        Operation::Update => stack.status == StackStatus::UpdateComplete,
        Operation::Delete => stack.status == StackStatus::DeleteComplete,
    };
    if succeeded {
        let outputs = match operation {
            Operation::Delete => BTreeMap::new(),
            _ => stack.outputs.clone(),
        };
        return Some(ConvergenceOutcome::Success { outputs });
    }

    Some(ConvergenceOutcome::Failure(failure_detail(
        stack,
        operation,
        collator,
    )))
}

fn failure_detail(
    stack: &StackDescription,
    operation: Operation,
    collator: &EventCollator,
) -> FailureDetail {
    let root = collator.root_cause();
    let reason = root
        .and_then(|e| e.reason.clone())
        .or_else(|| collator.stack_reason().map(str::to_string))
        .or_else(|| stack.status_reason.clone())
        .unwrap_or_else(|| format!("stack ended in {}", stack.status));

    let rolled_back = stack.status.is_rolled_back();
    let kind = if operation == Operation::Delete && is_non_empty_resource(&reason) {
        FailureKind::DeleteBlocked
    } else if rolled_back {
        FailureKind::RolledBack
    } else {
        FailureKind::Failed
    };

    FailureDetail {
        logical_id: root.map(|e| e.logical_id.clone()),
        resource_type: root.map(|e| e.resource_type.clone()),
        reason,
        rolled_back,
        kind,
    }
}

fn is_non_empty_resource(reason: &str) -> bool {
    let reason = reason.to_ascii_lowercase();
    reason.contains("not empty") || reason.contains("bucketnotempty")
}

/// Run `f`, retrying retryable errors with backoff
pub(crate) async fn with_retry<T, F, Fut>(retry: &RetryConfig, what: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                let delay = retry.delay_for_attempt(attempt);
                warn!(target_name = %what, attempt = attempt + 1, error = %e, "Retrying after transient error");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_blocked_maps_to_precondition() {
        let outcome = ConvergenceOutcome::Failure(FailureDetail {
            logical_id: Some("ArtifactBucket".to_string()),
            resource_type: Some("AWS::S3::Bucket".to_string()),
            reason: "The bucket you tried to delete is not empty".to_string(),
            rolled_back: false,
            kind: FailureKind::DeleteBlocked,
        });

        match outcome.into_result("app-test") {
            Err(CloudError::Precondition { message, remediation }) => {
                assert!(message.contains("ArtifactBucket"));
                assert!(remediation.contains("Empty ArtifactBucket"));
            }
            other => panic!("expected precondition, got {:?}", other),
        }
    }

    #[test]
    fn test_rolled_back_maps_to_convergence_failed() {
        let outcome = ConvergenceOutcome::Failure(FailureDetail {
            logical_id: Some("Cluster".to_string()),
            resource_type: None,
            reason: "limit".to_string(),
            rolled_back: true,
            kind: FailureKind::RolledBack,
        });
        assert!(matches!(
            outcome.into_result("app-test"),
            Err(CloudError::ConvergenceFailed { rolled_back: true, .. })
        ));
    }

    #[test]
    fn test_non_empty_detection() {
        assert!(is_non_empty_resource("The bucket you tried to delete is not empty"));
        assert!(is_non_empty_resource("BucketNotEmpty"));
        assert!(!is_non_empty_resource("Access denied"));
    }

    use std::time::Duration;

    fn no_wait(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    #[tokio::test]
    async fn test_with_retry_makes_exactly_max_attempts_tries() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result: Result<()> = with_retry(&no_wait(3), "stack", || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(CloudError::Transient("Rate exceeded".into())) }
        })
        .await;

        assert!(matches!(result, Err(CloudError::Transient(_))));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_does_not_repeat_permanent_errors() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result: Result<()> = with_retry(&no_wait(5), "stack", || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(CloudError::CommandFailed("AccessDenied".into())) }
        })
        .await;

        assert!(matches!(result, Err(CloudError::CommandFailed(_))));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
