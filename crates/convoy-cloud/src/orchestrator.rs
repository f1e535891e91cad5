//! Dependency orchestrator
//!
//! Runs a [`DeploymentPlan`]: steps whose prerequisites all succeeded run
//! concurrently; a failed step skips everything that transitively depends
//! on it while unrelated branches carry on.

use crate::diff::ActionType;
use crate::engine::{ConvergenceEngine, ConvergenceOutcome};
use crate::error::{CloudError, Result};
use crate::event::ResourceEvent;
use crate::provider::ProvisioningClient;
use crate::stack::{StackRequest, StackTarget};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// What a step does
#[derive(Debug, Clone)]
pub enum StepOperation {
    Converge(StackRequest),
    Delete(StackTarget),
}

impl StepOperation {
    pub fn target(&self) -> StackTarget {
        match self {
            StepOperation::Converge(request) => request.target(),
            StepOperation::Delete(target) => target.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanStep {
    pub id: String,
    pub operation: StepOperation,
    pub depends_on: Vec<String>,
}

impl PlanStep {
    pub fn converge(id: impl Into<String>, request: StackRequest) -> Self {
        Self {
            id: id.into(),
            operation: StepOperation::Converge(request),
            depends_on: Vec::new(),
        }
    }

    pub fn delete(id: impl Into<String>, target: StackTarget) -> Self {
        Self {
            id: id.into(),
            operation: StepOperation::Delete(target),
            depends_on: Vec::new(),
        }
    }

    /// Run only after `step` succeeded
    pub fn after(mut self, step: impl Into<String>) -> Self {
        self.depends_on.push(step.into());
        self
    }
}

/// Ordered steps with declared dependencies
#[derive(Debug, Clone, Default)]
pub struct DeploymentPlan {
    steps: Vec<PlanStep>,
}

impl DeploymentPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step(mut self, step: PlanStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn push(&mut self, step: PlanStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Reject duplicate ids, unknown dependencies and cycles
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for step in &self.steps {
            if !ids.insert(step.id.as_str()) {
                return Err(CloudError::InvalidPlan(format!("duplicate step '{}'", step.id)));
            }
        }
        for step in &self.steps {
            for dep in &step.depends_on {
                if dep == &step.id {
                    return Err(CloudError::InvalidPlan(format!(
                        "step '{}' depends on itself",
                        step.id
                    )));
                }
                if !ids.contains(dep.as_str()) {
                    return Err(CloudError::InvalidPlan(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.id, dep
                    )));
                }
            }
        }

        // Kahn's algorithm: every step must become ready eventually.
        let mut remaining: HashMap<&str, usize> = self
            .steps
            .iter()
            .map(|s| (s.id.as_str(), s.depends_on.len()))
            .collect();
        let dependents = self.dependents();
        let mut queue: VecDeque<&str> = remaining
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(n) = remaining.get_mut(dependent.as_str()) {
                    *n -= 1;
                    if *n == 0 {
                        queue.push_back(dependent.as_str());
                    }
                }
            }
        }
        if visited != self.steps.len() {
            return Err(CloudError::InvalidPlan(
                "dependency cycle between steps".to_string(),
            ));
        }
        Ok(())
    }

    fn dependents(&self) -> HashMap<&str, Vec<String>> {
        let mut map: HashMap<&str, Vec<String>> = HashMap::new();
        for step in &self.steps {
            for dep in &step.depends_on {
                map.entry(dep.as_str()).or_default().push(step.id.clone());
            }
        }
        map
    }
}

/// Result of one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded {
        action: ActionType,
        outputs: BTreeMap<String, String>,
    },
    Failed {
        reason: String,
    },
    /// Never started because a prerequisite failed
    Skipped {
        blocked_by: String,
    },
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Succeeded { .. })
    }
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub step: String,
    pub target: StackTarget,
    pub outcome: StepOutcome,
}

/// Consolidated result of a plan, in plan order
#[derive(Debug, Clone, Default)]
pub struct PlanReport {
    pub results: Vec<StepResult>,
}

impl PlanReport {
    /// False if any step failed or was skipped
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| r.outcome.is_success())
    }

    pub fn get(&self, step: &str) -> Option<&StepOutcome> {
        self.results
            .iter()
            .find(|r| r.step == step)
            .map(|r| &r.outcome)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepResult> {
        self.results.iter().filter(|r| !r.outcome.is_success())
    }
}

/// Progress notifications emitted while a plan runs
#[derive(Debug, Clone)]
pub enum PlanEvent {
    Started { step: String, action: ActionType },
    Resource { step: String, event: ResourceEvent },
    Finished { step: String, success: bool },
}

pub struct Orchestrator<C: ?Sized = dyn ProvisioningClient> {
    engine: ConvergenceEngine<C>,
    /// Engines bound to other regions, picked by each step's target region
    regional: HashMap<String, ConvergenceEngine<C>>,
    observer: Option<mpsc::UnboundedSender<PlanEvent>>,
}

impl<C> Orchestrator<C>
where
    C: ProvisioningClient + ?Sized + 'static,
{
    pub fn new(engine: ConvergenceEngine<C>) -> Self {
        Self {
            engine,
            regional: HashMap::new(),
            observer: None,
        }
    }

    pub fn with_regional_engine(mut self, region: impl Into<String>, engine: ConvergenceEngine<C>) -> Self {
        self.regional.insert(region.into(), engine);
        self
    }

    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<PlanEvent>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn engine(&self) -> &ConvergenceEngine<C> {
        &self.engine
    }

    /// Engine for `region`, falling back to the default engine
    pub fn engine_for(&self, region: &str) -> &ConvergenceEngine<C> {
        self.regional.get(region).unwrap_or(&self.engine)
    }

    /// Run every step of `plan`, honouring dependencies
    pub async fn deploy(&self, plan: DeploymentPlan) -> Result<PlanReport> {
        plan.validate()?;

        let dependents = plan.dependents();
        let mut remaining: HashMap<String, usize> = plan
            .steps
            .iter()
            .map(|s| (s.id.clone(), s.depends_on.len()))
            .collect();
        let mut pending: HashMap<String, PlanStep> = plan
            .steps
            .iter()
            .map(|s| (s.id.clone(), s.clone()))
            .collect();
        let mut outcomes: HashMap<String, StepOutcome> = HashMap::new();
        let mut ready: VecDeque<String> = plan
            .steps
            .iter()
            .filter(|s| s.depends_on.is_empty())
            .map(|s| s.id.clone())
            .collect();

        let mut running = JoinSet::new();
        let mut task_steps = HashMap::new();

        loop {
            while let Some(id) = ready.pop_front() {
                let Some(step) = pending.remove(&id) else {
                    continue;
                };
                debug!(step = %id, "Starting step");
                let engine = self.engine_for(&step.operation.target().region).clone();
                let observer = self.observer.clone();
                let handle = running.spawn(async move {
                    let outcome = run_step(&engine, &step, observer.as_ref()).await;
                    (step.id, outcome)
                });
                task_steps.insert(handle.id(), id);
            }

            let Some(joined) = running.join_next().await else {
                break;
            };
            let (id, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    let id = task_steps.get(&e.id()).cloned().unwrap_or_default();
                    (
                        id,
                        StepOutcome::Failed {
                            reason: format!("step task aborted: {}", e),
                        },
                    )
                }
            };

            if let Some(observer) = &self.observer {
                let _ = observer.send(PlanEvent::Finished {
                    step: id.clone(),
                    success: outcome.is_success(),
                });
            }

            if outcome.is_success() {
                for dependent in dependents.get(id.as_str()).into_iter().flatten() {
                    if let Some(n) = remaining.get_mut(dependent) {
                        *n -= 1;
                        if *n == 0 && pending.contains_key(dependent) {
                            ready.push_back(dependent.clone());
                        }
                    }
                }
            } else {
                warn!(step = %id, "Step failed; skipping its dependents");
                skip_dependents(&id, &dependents, &mut pending, &mut outcomes);
            }
            outcomes.insert(id, outcome);
        }

        let results = plan
            .steps
            .iter()
            .map(|step| StepResult {
                step: step.id.clone(),
                target: step.operation.target(),
                outcome: outcomes.remove(&step.id).unwrap_or(StepOutcome::Failed {
                    reason: "step never ran".to_string(),
                }),
            })
            .collect();
        let report = PlanReport { results };
        info!(
            steps = report.results.len(),
            success = report.is_success(),
            "Deployment plan finished"
        );
        Ok(report)
    }
}

fn skip_dependents(
    failed: &str,
    dependents: &HashMap<&str, Vec<String>>,
    pending: &mut HashMap<String, PlanStep>,
    outcomes: &mut HashMap<String, StepOutcome>,
) {
    let mut queue: VecDeque<&str> = VecDeque::from([failed]);
    while let Some(id) = queue.pop_front() {
        for dependent in dependents.get(id).into_iter().flatten() {
            if pending.remove(dependent).is_some() {
                outcomes.insert(
                    dependent.clone(),
                    StepOutcome::Skipped {
                        blocked_by: failed.to_string(),
                    },
                );
                queue.push_back(dependent.as_str());
            }
        }
    }
}

async fn run_step<C>(
    engine: &ConvergenceEngine<C>,
    step: &PlanStep,
    observer: Option<&mpsc::UnboundedSender<PlanEvent>>,
) -> StepOutcome
where
    C: ProvisioningClient + ?Sized + 'static,
{
    let started = match &step.operation {
        StepOperation::Converge(request) => engine.converge(request.clone()).await,
        StepOperation::Delete(target) => engine.delete(target).await,
    };
    let convergence = match started {
        Ok(convergence) => convergence,
        Err(e) => {
            return StepOutcome::Failed {
                reason: e.to_string(),
            };
        }
    };

    let action = convergence.action;
    if let Some(observer) = observer {
        let _ = observer.send(PlanEvent::Started {
            step: step.id.clone(),
            action,
        });
    }
    let outcome = convergence
        .wait_with(|event| {
            if let Some(observer) = observer {
                let _ = observer.send(PlanEvent::Resource {
                    step: step.id.clone(),
                    event: event.clone(),
                });
            }
        })
        .await;

    match outcome {
        ConvergenceOutcome::Success { outputs } => StepOutcome::Succeeded { action, outputs },
        ConvergenceOutcome::Failure(detail) => StepOutcome::Failed {
            reason: match detail.logical_id {
                Some(id) => format!("{}: {}", id, detail.reason),
                None => detail.reason,
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::StackKind;

    fn request(name: &str) -> StackRequest {
        StackRequest::new(StackKind::Environment, name, "us-west-2", "Resources: {}")
    }

    #[test]
    fn test_validate_accepts_dag() {
        let plan = DeploymentPlan::new()
            .with_step(PlanStep::converge("app", request("app")))
            .with_step(PlanStep::converge("env", request("env")).after("app"))
            .with_step(PlanStep::converge("svc", request("svc")).after("env"));
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_dependency() {
        let plan = DeploymentPlan::new()
            .with_step(PlanStep::converge("svc", request("svc")).after("env"));
        assert!(matches!(plan.validate(), Err(CloudError::InvalidPlan(_))));
    }

    #[test]
    fn test_validate_rejects_cycle() {
        let plan = DeploymentPlan::new()
            .with_step(PlanStep::converge("a", request("a")).after("b"))
            .with_step(PlanStep::converge("b", request("b")).after("a"));
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let plan = DeploymentPlan::new()
            .with_step(PlanStep::converge("a", request("a")))
            .with_step(PlanStep::converge("a", request("a2")));
        assert!(plan.validate().is_err());
    }
}
