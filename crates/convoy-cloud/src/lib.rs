//! Convoy Cloud
//!
//! Stack convergence engine, dependency orchestration and task log tailing
//! for Convoy. Backends plug in through the narrow traits in [`provider`],
//! [`task`], [`logs`] and [`services`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   Convoy CLI                     │
//! │        (app / env / svc / pipeline / task)       │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                convoy-cloud                      │
//! │  ┌──────────────┐  ┌──────────────────────────┐ │
//! │  │   Facades    │─►│ Descriptors + templates  │ │
//! │  └──────┬───────┘  └──────────────────────────┘ │
//! │  ┌──────▼───────┐  ┌──────────────┐             │
//! │  │ Orchestrator │─►│    Engine    │             │
//! │  └──────────────┘  └──────┬───────┘             │
//! │  ┌──────────────┐         │                     │
//! │  │ TaskRunner / │         │                     │
//! │  │  LogTailer   │         │                     │
//! │  └──────┬───────┘         │                     │
//! └─────────┼─────────────────┼─────────────────────┘
//!           │                 │
//! ┌─────────▼─────────────────▼─────────────────────┐
//! │      convoy-cloud-aws (or a test double)         │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod deploy;
pub mod descriptor;
pub mod diff;
pub mod engine;
pub mod error;
pub mod event;
pub mod logs;
pub mod orchestrator;
pub mod provider;
pub mod services;
pub mod stack;
pub mod store;
pub mod task;
pub mod templates;

// Re-exports
pub use deploy::{
    AppDeployer, AppRegionalResources, DeployedEnvironment, DeployedLister, EnvironmentDeployer,
    PipelineDeployer, PipelineState, ServiceDeployer, Stacks, TaskDeployer, TaskResources,
};
pub use diff::{ActionType, ChangeSet};
pub use engine::{
    Convergence, ConvergenceEngine, ConvergenceOutcome, FailureDetail, FailureKind,
};
pub use error::{CloudError, Result};
pub use event::{RawStackEvent, ResourceEvent, ResourceStatus, StackStatus};
pub use logs::{LogCursor, LogEvent, LogLine, LogStore, LogTailer, TailNotice};
pub use orchestrator::{
    DeploymentPlan, Orchestrator, PlanEvent, PlanReport, PlanStep, StepOutcome, StepResult,
};
pub use provider::{
    PollConfig, ProvisioningClient, RetryConfig, StackDescription, StackEventSource, StackReader,
    StackWriter,
};
pub use stack::{StackDescriptor, StackKind, StackRequest, StackTarget};
pub use store::{ConfigStore, FileStore};
pub use task::{TaskHandle, TaskLauncher, TaskRunner, TaskSpec, TaskState};
