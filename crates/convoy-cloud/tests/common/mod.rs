//! In-memory provisioning backend for integration tests
//!
//! Mutations script a sequence of stack events. Each `describe_events`
//! call releases at most [`EVENTS_PER_POLL`] of them, and the stack only
//! reaches its terminal status once the script has drained.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use convoy_cloud::{
    CloudError, PollConfig, RawStackEvent, Result, RetryConfig, StackDescription,
    StackEventSource, StackReader, StackRequest, StackStatus, StackWriter,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

pub const EVENTS_PER_POLL: usize = 2;

/// Fast polling for tests
pub fn fast_poll() -> PollConfig {
    PollConfig {
        interval: std::time::Duration::from_millis(5),
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(5),
            backoff_multiplier: 2.0,
        },
    }
}

/// Error a describe call fails with
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Throttled,
    Denied,
}

impl Fault {
    fn error(self) -> CloudError {
        match self {
            Fault::Throttled => CloudError::Transient("Rate exceeded".to_string()),
            Fault::Denied => CloudError::CommandFailed("AccessDenied: not authorized".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
struct Injected {
    logical_id: String,
    reason: String,
}

struct Terminal {
    event: RawStackEvent,
    status: StackStatus,
    remove: bool,
}

struct FakeStack {
    description: StackDescription,
    events: Vec<RawStackEvent>,
    pending: VecDeque<RawStackEvent>,
    terminal: Option<Terminal>,
    outputs_on_success: BTreeMap<String, String>,
}

#[derive(Default)]
struct State {
    stacks: HashMap<String, FakeStack>,
    resources: HashMap<String, Vec<(String, String)>>,
    outputs: HashMap<String, BTreeMap<String, String>>,
    fail_create: HashMap<String, Injected>,
    fail_update: HashMap<String, Injected>,
    block_delete: HashMap<String, Injected>,
    held: HashSet<String>,
    stack_faults: VecDeque<Fault>,
    event_faults: VecDeque<Fault>,
    no_updates: HashSet<String>,
    create_calls: Vec<String>,
    update_calls: Vec<String>,
    delete_calls: Vec<String>,
    ticks: i64,
    next_id: u64,
}

impl State {
    fn now(&mut self) -> DateTime<Utc> {
        self.ticks += 1;
        base_time() + Duration::seconds(self.ticks)
    }

    fn event(&mut self, stack: &str, logical_id: &str, resource_type: &str, status: &str, reason: Option<&str>) -> RawStackEvent {
        self.next_id += 1;
        RawStackEvent {
            event_id: format!("{}-{}", stack, self.next_id),
            stack_name: stack.to_string(),
            logical_id: logical_id.to_string(),
            resource_type: resource_type.to_string(),
            status: status.to_string(),
            reason: reason.map(str::to_string),
            // Assigned again when released
            timestamp: base_time(),
        }
    }

    fn resources_for(&self, stack: &str) -> Vec<(String, String)> {
        self.resources.get(stack).cloned().unwrap_or_else(|| {
            vec![(
                "Resource".to_string(),
                "AWS::CloudFormation::WaitConditionHandle".to_string(),
            )]
        })
    }

    /// Script `{verb}_IN_PROGRESS` for every resource, then `{verb}_COMPLETE`,
    /// or a failure of `injected` followed by a rollback
    fn script(&mut self, stack: &str, verb: &str, injected: Option<Injected>) -> (Vec<RawStackEvent>, Terminal) {
        let resources = self.resources_for(stack);
        let stack_type = "AWS::CloudFormation::Stack";
        let mut events = vec![self.event(stack, stack, stack_type, &format!("{}_IN_PROGRESS", verb), None)];
        for (id, ty) in &resources {
            events.push(self.event(stack, id, ty, &format!("{}_IN_PROGRESS", verb), None));
        }

        let terminal = match injected {
            None => {
                for (id, ty) in &resources {
                    events.push(self.event(stack, id, ty, &format!("{}_COMPLETE", verb), None));
                }
                let status = match verb {
                    "CREATE" => StackStatus::CreateComplete,
                    "UPDATE" => StackStatus::UpdateComplete,
                    _ => StackStatus::DeleteComplete,
                };
                Terminal {
                    event: self.event(stack, stack, stack_type, status.as_str(), None),
                    status,
                    remove: verb == "DELETE",
                }
            }
            Some(injected) if verb == "DELETE" => {
                for (id, ty) in &resources {
                    if *id == injected.logical_id {
                        events.push(self.event(stack, id, ty, "DELETE_FAILED", Some(&injected.reason)));
                    } else {
                        events.push(self.event(stack, id, ty, "DELETE_COMPLETE", None));
                    }
                }
                Terminal {
                    event: self.event(
                        stack,
                        stack,
                        stack_type,
                        "DELETE_FAILED",
                        Some("The following resource(s) failed to delete"),
                    ),
                    status: StackStatus::DeleteFailed,
                    remove: false,
                }
            }
            Some(injected) => {
                let failed_type = resources
                    .iter()
                    .find(|(id, _)| *id == injected.logical_id)
                    .map(|(_, ty)| ty.clone())
                    .unwrap_or_else(|| "AWS::CloudFormation::WaitConditionHandle".to_string());
                events.push(self.event(
                    stack,
                    &injected.logical_id,
                    &failed_type,
                    &format!("{}_FAILED", verb),
                    Some(&injected.reason),
                ));
                let (rollback, done) = if verb == "CREATE" {
                    ("ROLLBACK_IN_PROGRESS", StackStatus::RollbackComplete)
                } else {
                    ("UPDATE_ROLLBACK_IN_PROGRESS", StackStatus::UpdateRollbackComplete)
                };
                events.push(self.event(
                    stack,
                    stack,
                    stack_type,
                    rollback,
                    Some("The following resource(s) failed"),
                ));
                for (id, ty) in &resources {
                    if *id != injected.logical_id {
                        // A later, unrelated failure that rollback reports
                        events.push(self.event(stack, id, ty, "DELETE_FAILED", Some("Resource creation cancelled")));
                    }
                }
                Terminal {
                    event: self.event(stack, stack, stack_type, done.as_str(), None),
                    status: done,
                    remove: false,
                }
            }
        };
        (events, terminal)
    }
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<State>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resources (logical id, type) created by the stack's template
    pub fn declare_resources(&self, stack: &str, resources: &[(&str, &str)]) {
        self.state.lock().unwrap().resources.insert(
            stack.to_string(),
            resources
                .iter()
                .map(|(id, ty)| (id.to_string(), ty.to_string()))
                .collect(),
        );
    }

    /// Outputs the stack reports after a successful create or update
    pub fn set_outputs(&self, stack: &str, outputs: &[(&str, &str)]) {
        self.state.lock().unwrap().outputs.insert(
            stack.to_string(),
            outputs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
    }

    pub fn fail_next_create(&self, stack: &str, logical_id: &str, reason: &str) {
        self.state.lock().unwrap().fail_create.insert(
            stack.to_string(),
            Injected {
                logical_id: logical_id.to_string(),
                reason: reason.to_string(),
            },
        );
    }

    pub fn fail_next_update(&self, stack: &str, logical_id: &str, reason: &str) {
        self.state.lock().unwrap().fail_update.insert(
            stack.to_string(),
            Injected {
                logical_id: logical_id.to_string(),
                reason: reason.to_string(),
            },
        );
    }

    pub fn block_delete(&self, stack: &str, logical_id: &str, reason: &str) {
        self.state.lock().unwrap().block_delete.insert(
            stack.to_string(),
            Injected {
                logical_id: logical_id.to_string(),
                reason: reason.to_string(),
            },
        );
    }

    /// Fail the next `times` describe_stack calls
    pub fn fail_describe_stack(&self, times: usize, fault: Fault) {
        self.state.lock().unwrap().stack_faults.extend(std::iter::repeat_n(fault, times));
    }

    /// Fail the next `times` describe_events calls
    pub fn fail_describe_events(&self, times: usize, fault: Fault) {
        self.state.lock().unwrap().event_faults.extend(std::iter::repeat_n(fault, times));
    }

    /// Injected describe failures not yet consumed
    pub fn pending_faults(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.stack_faults.len() + state.event_faults.len()
    }

    /// Answer the next update with "no updates are to be performed"
    pub fn report_no_updates(&self, stack: &str) {
        self.state.lock().unwrap().no_updates.insert(stack.to_string());
    }

    /// Keep the stack in progress until [`FakeBackend::release`]
    pub fn hold(&self, stack: &str) {
        self.state.lock().unwrap().held.insert(stack.to_string());
    }

    pub fn release(&self, stack: &str) {
        self.state.lock().unwrap().held.remove(stack);
    }

    /// Insert an already-deployed stack
    pub fn seed(&self, request: &StackRequest, status: StackStatus, outputs: &[(&str, &str)]) {
        let mut state = self.state.lock().unwrap();
        let outputs: BTreeMap<String, String> = outputs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut history = state.event(&request.name, &request.name, "AWS::CloudFormation::Stack", status.as_str(), None);
        history.timestamp = state.now();
        state.stacks.insert(
            request.name.clone(),
            FakeStack {
                description: StackDescription {
                    name: request.name.clone(),
                    status,
                    status_reason: None,
                    template: request.template.clone(),
                    parameters: request.parameters.clone(),
                    tags: request.tags.clone(),
                    outputs: outputs.clone(),
                },
                events: vec![history],
                pending: VecDeque::new(),
                terminal: None,
                outputs_on_success: outputs,
            },
        );
    }

    pub fn status(&self, stack: &str) -> Option<StackStatus> {
        self.state
            .lock()
            .unwrap()
            .stacks
            .get(stack)
            .map(|s| s.description.status)
    }

    pub fn create_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().create_calls.clone()
    }

    pub fn update_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().update_calls.clone()
    }

    pub fn delete_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().delete_calls.clone()
    }

    pub fn mutation_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.create_calls.len() + state.update_calls.len() + state.delete_calls.len()
    }
}

#[async_trait]
impl StackReader for FakeBackend {
    async fn describe_stack(&self, name: &str) -> Result<Option<StackDescription>> {
        let mut state = self.state.lock().unwrap();
        if let Some(fault) = state.stack_faults.pop_front() {
            return Err(fault.error());
        }
        Ok(state.stacks.get(name).map(|s| s.description.clone()))
    }
}

/// The real backend refuses parameters the template does not declare
fn reject_undeclared(request: &StackRequest) -> Result<()> {
    let undeclared = request.undeclared_parameters()?;
    if undeclared.is_empty() {
        return Ok(());
    }
    Err(CloudError::BackendRejected {
        stack: request.name.clone(),
        reason: format!("Parameters: [{}] do not exist in the template", undeclared.join(", ")),
    })
}

#[async_trait]
impl StackWriter for FakeBackend {
    async fn create(&self, request: &StackRequest) -> Result<()> {
        reject_undeclared(request)?;
        let mut state = self.state.lock().unwrap();
        if state.stacks.contains_key(&request.name) {
            return Err(CloudError::BackendRejected {
                stack: request.name.clone(),
                reason: format!("Stack [{}] already exists", request.name),
            });
        }
        state.create_calls.push(request.name.clone());

        let injected = state.fail_create.remove(&request.name);
        let (events, terminal) = state.script(&request.name, "CREATE", injected);
        let outputs = state.outputs.get(&request.name).cloned().unwrap_or_default();
        state.stacks.insert(
            request.name.clone(),
            FakeStack {
                description: StackDescription {
                    name: request.name.clone(),
                    status: StackStatus::CreateInProgress,
                    status_reason: None,
                    template: request.template.clone(),
                    parameters: request.parameters.clone(),
                    tags: request.tags.clone(),
                    outputs: BTreeMap::new(),
                },
                events: Vec::new(),
                pending: events.into(),
                terminal: Some(terminal),
                outputs_on_success: outputs,
            },
        );
        Ok(())
    }

    async fn update(&self, request: &StackRequest) -> Result<()> {
        reject_undeclared(request)?;
        let mut state = self.state.lock().unwrap();
        let Some(current) = state.stacks.get(&request.name) else {
            return Err(CloudError::StackNotFound(request.name.clone()));
        };
        if current.description.status.is_in_progress() {
            return Err(CloudError::BackendRejected {
                stack: request.name.clone(),
                reason: "stack is in an in-progress state and can not be updated".to_string(),
            });
        }
        state.update_calls.push(request.name.clone());
        if state.no_updates.remove(&request.name) {
            return Err(CloudError::NoChanges(request.name.clone()));
        }

        let injected = state.fail_update.remove(&request.name);
        let (events, terminal) = state.script(&request.name, "UPDATE", injected);
        let outputs = state.outputs.get(&request.name).cloned();
        if let Some(stack) = state.stacks.get_mut(&request.name) {
            stack.description.status = StackStatus::UpdateInProgress;
            stack.description.template = request.template.clone();
            stack.description.parameters = request.parameters.clone();
            stack.description.tags = request.tags.clone();
            if let Some(outputs) = outputs {
                stack.outputs_on_success = outputs;
            }
            stack.pending = events.into();
            stack.terminal = Some(terminal);
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.stacks.contains_key(name) {
            return Ok(());
        }
        state.delete_calls.push(name.to_string());

        let injected = state.block_delete.remove(name);
        let (events, terminal) = state.script(name, "DELETE", injected);
        if let Some(stack) = state.stacks.get_mut(name) {
            stack.description.status = StackStatus::DeleteInProgress;
            stack.pending = events.into();
            stack.terminal = Some(terminal);
        }
        Ok(())
    }
}

#[async_trait]
impl StackEventSource for FakeBackend {
    async fn describe_events(
        &self,
        name: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawStackEvent>> {
        let mut state = self.state.lock().unwrap();
        if let Some(fault) = state.event_faults.pop_front() {
            return Err(fault.error());
        }
        let held = state.held.contains(name);

        let mut released = Vec::new();
        if let Some(stack) = state.stacks.get_mut(name) {
            for _ in 0..EVENTS_PER_POLL {
                match stack.pending.pop_front() {
                    Some(event) => released.push(event),
                    None => break,
                }
            }
        }
        for event in released.iter_mut() {
            event.timestamp = state.now();
        }

        let finished = state
            .stacks
            .get(name)
            .is_some_and(|s| s.pending.is_empty() && s.terminal.is_some() && !held);
        let mut terminal = None;
        if finished && released.len() < EVENTS_PER_POLL {
            terminal = state.stacks.get_mut(name).and_then(|s| s.terminal.take());
        }
        if let Some(terminal) = &mut terminal {
            terminal.event.timestamp = state.now();
        }

        let Some(stack) = state.stacks.get_mut(name) else {
            return Ok(Vec::new());
        };
        stack.events.extend(released);

        let mut remove = false;
        if let Some(terminal) = terminal {
            stack.events.push(terminal.event);
            stack.description.status = terminal.status;
            if terminal.status.is_success() {
                stack.description.outputs = stack.outputs_on_success.clone();
            }
            remove = terminal.remove;
        }

        let visible: Vec<RawStackEvent> = stack
            .events
            .iter()
            .filter(|e| since.is_none_or(|s| e.timestamp >= s))
            .cloned()
            .collect();
        if remove {
            state.stacks.remove(name);
        }
        Ok(visible)
    }
}

/// Engine over `backend` with fast polling
pub fn engine(backend: &std::sync::Arc<FakeBackend>) -> convoy_cloud::ConvergenceEngine {
    let client: std::sync::Arc<dyn convoy_cloud::ProvisioningClient> = backend.clone();
    convoy_cloud::ConvergenceEngine::new(client).with_poll_config(fast_poll())
}
