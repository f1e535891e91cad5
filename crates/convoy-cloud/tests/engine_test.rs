mod common;

use common::{FakeBackend, Fault, engine};
use convoy_cloud::descriptor::EnvironmentStack;
use convoy_cloud::{
    ActionType, CloudError, ConvergenceOutcome, FailureKind, ResourceEvent, ResourceStatus,
    StackDescriptor, StackKind, StackStatus, StackTarget,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const REGION: &str = "us-west-2";
const ENV_STACK: &str = "my-app-test";

fn env_request() -> convoy_cloud::StackRequest {
    EnvironmentStack::new("my-app", "test", "arn:aws:iam::123456789012:root")
        .to_request(REGION)
        .unwrap()
}

fn declare_env(backend: &FakeBackend) {
    backend.declare_resources(
        ENV_STACK,
        &[
            ("VPC", "AWS::EC2::VPC"),
            ("PublicSubnet1", "AWS::EC2::Subnet"),
            ("Cluster", "AWS::ECS::Cluster"),
        ],
    );
    backend.set_outputs(
        ENV_STACK,
        &[("ClusterId", "my-app-test-Cluster-abc"), ("VpcId", "vpc-0123")],
    );
}

#[tokio::test]
async fn test_new_environment_streams_events_and_returns_cluster() {
    let backend = Arc::new(FakeBackend::new());
    declare_env(&backend);

    let convergence = engine(&backend).converge(env_request()).await.unwrap();
    assert_eq!(convergence.action, ActionType::Create);

    let mut events: Vec<ResourceEvent> = Vec::new();
    let outcome = convergence.wait_with(|e| events.push(e.clone())).await;

    let in_progress: HashSet<&str> = events
        .iter()
        .filter(|e| e.status == ResourceStatus::InProgress)
        .map(|e| e.logical_id.as_str())
        .collect();
    assert_eq!(in_progress, HashSet::from(["VPC", "PublicSubnet1", "Cluster"]));

    let outputs = outcome.outputs().expect("environment should converge");
    assert!(!outputs.is_empty());
    assert_eq!(outputs["ClusterId"], "my-app-test-Cluster-abc");
    assert_eq!(backend.status(ENV_STACK), Some(StackStatus::CreateComplete));
}

#[tokio::test]
async fn test_events_are_monotonic_and_end_in_final_status() {
    let backend = Arc::new(FakeBackend::new());
    declare_env(&backend);

    let mut events = Vec::new();
    engine(&backend)
        .converge_and_wait(env_request(), |e| events.push(e.clone()))
        .await
        .unwrap();

    assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    let mut last: HashMap<&str, ResourceStatus> = HashMap::new();
    for event in &events {
        last.insert(&event.logical_id, event.status);
    }
    assert_eq!(last.len(), 3);
    assert!(last.values().all(|s| *s == ResourceStatus::Complete));
}

#[tokio::test]
async fn test_converge_twice_is_idempotent() {
    let backend = Arc::new(FakeBackend::new());
    declare_env(&backend);
    let engine = engine(&backend);

    let first = engine
        .converge_and_wait(env_request(), |_| {})
        .await
        .unwrap();
    let second = engine.converge(env_request()).await.unwrap();
    assert_eq!(second.action, ActionType::NoOp);
    let second = second.outcome().await;

    assert!(first.is_success());
    assert_eq!(first, second);
    assert_eq!(backend.create_calls().len(), 1);
    assert!(backend.update_calls().is_empty());
}

#[tokio::test]
async fn test_changed_parameters_issue_update() {
    let backend = Arc::new(FakeBackend::new());
    backend.seed(&env_request(), StackStatus::CreateComplete, &[("ClusterId", "c-1")]);
    backend.set_outputs(ENV_STACK, &[("ClusterId", "c-1"), ("VpcId", "vpc-2")]);

    let request = env_request().with_parameter("ToolsAccountPrincipalARN", "arn:aws:iam::999999999999:root");
    let convergence = engine(&backend).converge(request).await.unwrap();
    assert_eq!(convergence.action, ActionType::Update);

    let outcome = convergence.outcome().await;
    assert_eq!(outcome.outputs().unwrap()["VpcId"], "vpc-2");
    assert_eq!(backend.update_calls(), vec![ENV_STACK.to_string()]);
}

#[tokio::test]
async fn test_second_request_while_in_flight_conflicts() {
    let backend = Arc::new(FakeBackend::new());
    declare_env(&backend);
    backend.hold(ENV_STACK);
    let engine = engine(&backend);

    let first = engine.converge(env_request()).await.unwrap();

    let err = engine.converge(env_request()).await.unwrap_err();
    assert!(matches!(err, CloudError::Conflict { .. }));
    let err = engine
        .delete(&StackTarget::new(StackKind::Environment, ENV_STACK, REGION))
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::Conflict { .. }));

    backend.release(ENV_STACK);
    let outcome = first.outcome().await;
    assert!(outcome.is_success());
    assert_eq!(backend.create_calls().len(), 1);
    assert!(backend.delete_calls().is_empty());
}

#[tokio::test]
async fn test_rollback_reports_first_failed_resource() {
    let backend = Arc::new(FakeBackend::new());
    declare_env(&backend);
    backend.fail_next_create(ENV_STACK, "PublicSubnet1", "The CIDR '10.0.0.0/24' conflicts with another subnet");

    let outcome = engine(&backend)
        .converge_and_wait(env_request(), |_| {})
        .await
        .unwrap();

    let ConvergenceOutcome::Failure(detail) = outcome.clone() else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert_eq!(detail.logical_id.as_deref(), Some("PublicSubnet1"));
    assert!(detail.reason.contains("conflicts with another subnet"));
    assert!(detail.rolled_back);
    assert_eq!(detail.kind, FailureKind::RolledBack);

    let err = outcome.into_result(ENV_STACK).unwrap_err();
    assert!(matches!(
        err,
        CloudError::ConvergenceFailed { ref logical_id, rolled_back: true, .. } if logical_id == "PublicSubnet1"
    ));
}

#[tokio::test]
async fn test_stack_left_by_failed_create_is_replaced() {
    let backend = Arc::new(FakeBackend::new());
    declare_env(&backend);
    backend.seed(&env_request(), StackStatus::RollbackComplete, &[]);

    let convergence = engine(&backend).converge(env_request()).await.unwrap();
    assert_eq!(convergence.action, ActionType::Replace);

    let outcome = convergence.outcome().await;
    assert!(outcome.is_success());
    assert_eq!(backend.delete_calls().len(), 1);
    assert_eq!(backend.create_calls().len(), 1);
    assert_eq!(backend.status(ENV_STACK), Some(StackStatus::CreateComplete));
}

#[tokio::test]
async fn test_delete_absent_stack_is_noop() {
    let backend = Arc::new(FakeBackend::new());

    let convergence = engine(&backend)
        .delete(&StackTarget::new(StackKind::Environment, ENV_STACK, REGION))
        .await
        .unwrap();
    assert_eq!(convergence.action, ActionType::NoOp);
    assert!(convergence.outcome().await.is_success());
    assert!(backend.delete_calls().is_empty());
}

#[tokio::test]
async fn test_delete_removes_stack() {
    let backend = Arc::new(FakeBackend::new());
    declare_env(&backend);
    backend.seed(&env_request(), StackStatus::CreateComplete, &[("ClusterId", "c-1")]);

    let outcome = engine(&backend)
        .delete_and_wait(
            &StackTarget::new(StackKind::Environment, ENV_STACK, REGION),
            |_| {},
        )
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(backend.status(ENV_STACK), None);
}

#[tokio::test]
async fn test_delete_blocked_by_non_empty_bucket() {
    let backend = Arc::new(FakeBackend::new());
    backend.declare_resources(
        ENV_STACK,
        &[
            ("EnvironmentBucket", "AWS::S3::Bucket"),
            ("Cluster", "AWS::ECS::Cluster"),
        ],
    );
    backend.seed(&env_request(), StackStatus::CreateComplete, &[]);
    backend.block_delete(
        ENV_STACK,
        "EnvironmentBucket",
        "The bucket you tried to delete is not empty",
    );

    let outcome = engine(&backend)
        .delete_and_wait(
            &StackTarget::new(StackKind::Environment, ENV_STACK, REGION),
            |_| {},
        )
        .await
        .unwrap();

    let ConvergenceOutcome::Failure(detail) = &outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert_eq!(detail.kind, FailureKind::DeleteBlocked);
    assert_eq!(detail.logical_id.as_deref(), Some("EnvironmentBucket"));

    match outcome.into_result(ENV_STACK) {
        Err(CloudError::Precondition { message, .. }) => {
            assert!(message.contains("EnvironmentBucket"));
        }
        other => panic!("expected precondition, got {:?}", other),
    }
    assert_eq!(backend.status(ENV_STACK), Some(StackStatus::DeleteFailed));
}

#[tokio::test]
async fn test_throttled_polls_recover_without_losing_events() {
    let backend = Arc::new(FakeBackend::new());
    declare_env(&backend);
    let convergence = engine(&backend).converge(env_request()).await.unwrap();

    backend.fail_describe_stack(2, Fault::Throttled);
    backend.fail_describe_events(2, Fault::Throttled);

    let mut events = Vec::new();
    let outcome = convergence.wait_with(|e| events.push(e.clone())).await;
    assert!(outcome.is_success(), "{:?}", outcome);
    assert_eq!(backend.pending_faults(), 0);

    let mut seen: HashMap<(String, ResourceStatus), usize> = HashMap::new();
    for event in &events {
        *seen.entry((event.logical_id.clone(), event.status)).or_default() += 1;
    }
    assert_eq!(seen.len(), 6);
    assert!(seen.values().all(|count| *count == 1), "{:?}", seen);
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_convergence() {
    let backend = Arc::new(FakeBackend::new());
    declare_env(&backend);
    let convergence = engine(&backend).converge(env_request()).await.unwrap();

    // fast_poll allows three tries per call
    backend.fail_describe_stack(3, Fault::Throttled);

    let outcome = convergence.outcome().await;
    let ConvergenceOutcome::Failure(detail) = &outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert!(detail.reason.contains("failed to describe stack"), "{}", detail.reason);
    assert_eq!(backend.pending_faults(), 0);
}

#[tokio::test]
async fn test_permanent_poll_error_is_not_retried() {
    let backend = Arc::new(FakeBackend::new());
    declare_env(&backend);
    let convergence = engine(&backend).converge(env_request()).await.unwrap();

    backend.fail_describe_events(2, Fault::Denied);

    let outcome = convergence.outcome().await;
    let ConvergenceOutcome::Failure(detail) = &outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert!(detail.reason.contains("failed to fetch stack events"), "{}", detail.reason);
    assert!(detail.reason.contains("AccessDenied"));
    assert_eq!(backend.pending_faults(), 1);
}

#[tokio::test]
async fn test_backend_no_changes_is_noop() {
    let backend = Arc::new(FakeBackend::new());
    backend.seed(&env_request(), StackStatus::CreateComplete, &[("ClusterId", "c-1")]);
    backend.report_no_updates(ENV_STACK);

    let request = env_request().with_parameter("ToolsAccountPrincipalARN", "arn:aws:iam::999999999999:root");
    let convergence = engine(&backend).converge(request).await.unwrap();
    assert_eq!(convergence.action, ActionType::NoOp);

    let outcome = convergence.outcome().await;
    assert_eq!(outcome.outputs().unwrap()["ClusterId"], "c-1");
    assert_eq!(backend.update_calls(), vec![ENV_STACK.to_string()]);
    assert_eq!(backend.status(ENV_STACK), Some(StackStatus::CreateComplete));
}

#[tokio::test]
async fn test_backend_rejects_undeclared_parameter() {
    let backend = Arc::new(FakeBackend::new());
    let request = env_request().with_parameter("Services", "api");

    let err = engine(&backend).converge(request).await.unwrap_err();
    assert!(matches!(err, CloudError::BackendRejected { ref reason, .. } if reason.contains("Services")));
    assert!(backend.create_calls().is_empty());
}
