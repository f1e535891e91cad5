use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use convoy_cloud::logs::LogEventsOutput;
use convoy_cloud::{
    CloudError, LogEvent, LogStore, LogTailer, Result, RetryConfig, TailNotice, TaskHandle,
    TaskLauncher, TaskSpec, TaskState,
};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const GROUP: &str = "/convoy/tasks/db-migrate";

struct FakeLogs {
    group_exists: bool,
    streams: Mutex<HashMap<String, Vec<LogEvent>>>,
    failing: HashSet<String>,
    denied: HashSet<String>,
}

impl FakeLogs {
    fn new(streams: &[(&str, &[i64])]) -> Self {
        let streams = streams
            .iter()
            .map(|(id, stamps)| {
                let events = stamps.iter().map(|ts| event(id, *ts, "line")).collect();
                (id.to_string(), events)
            })
            .collect();
        Self {
            group_exists: true,
            streams: Mutex::new(streams),
            failing: HashSet::new(),
            denied: HashSet::new(),
        }
    }

    fn failing(mut self, stream: &str) -> Self {
        self.failing.insert(stream.to_string());
        self.streams.lock().unwrap().entry(stream.to_string()).or_default();
        self
    }

    fn denied(mut self, stream: &str) -> Self {
        self.denied.insert(stream.to_string());
        self.streams.lock().unwrap().entry(stream.to_string()).or_default();
        self
    }

    fn push(&self, stream: &str, ts: i64, message: &str) {
        self.streams
            .lock()
            .unwrap()
            .entry(stream.to_string())
            .or_default()
            .push(event(stream, ts, message));
    }
}

fn event(stream: &str, ts: i64, message: &str) -> LogEvent {
    LogEvent {
        stream: stream.to_string(),
        timestamp: ts,
        message: message.to_string(),
    }
}

#[async_trait]
impl LogStore for FakeLogs {
    async fn log_group_exists(&self, _group: &str) -> Result<bool> {
        Ok(self.group_exists)
    }

    async fn stream_events(&self, _group: &str, stream: &str, start: Option<i64>) -> Result<Vec<LogEvent>> {
        if self.failing.contains(stream) {
            return Err(CloudError::Transient("Rate exceeded".to_string()));
        }
        if self.denied.contains(stream) {
            return Err(CloudError::CommandFailed("AccessDeniedException".to_string()));
        }
        let start = start.unwrap_or(i64::MIN);
        Ok(self
            .streams
            .lock()
            .unwrap()
            .get(stream)
            .map(|events| events.iter().filter(|e| e.timestamp >= start).cloned().collect())
            .unwrap_or_default())
    }
}

fn quick_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        backoff_multiplier: 1.0,
    }
}

#[tokio::test]
async fn test_streams_merge_chronologically() {
    let store = Arc::new(FakeLogs::new(&[("a", &[1, 3, 5]), ("b", &[2, 4, 6])]));
    let mut tailer = LogTailer::new(store, GROUP, ["a", "b"]);

    let lines = tailer.fetch_once().await.unwrap();
    let stamps: Vec<i64> = lines.iter().map(|l| l.timestamp).collect();
    assert_eq!(stamps, vec![1, 2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn test_exact_tie_goes_to_lower_stream_id() {
    let store = Arc::new(FakeLogs::new(&[("b", &[7]), ("a", &[7])]));
    let mut tailer = LogTailer::new(store, GROUP, ["b", "a"]);

    let lines = tailer.fetch_once().await.unwrap();
    let streams: Vec<&str> = lines.iter().map(|l| l.stream.as_str()).collect();
    assert_eq!(streams, vec!["a", "b"]);
}

#[tokio::test]
async fn test_refetch_delivers_only_new_events() {
    let store = Arc::new(FakeLogs::new(&[("a", &[1, 3, 5]), ("b", &[2, 4, 6])]));
    let mut tailer = LogTailer::new(Arc::clone(&store), GROUP, ["a", "b"]);
    tailer.fetch_once().await.unwrap();

    store.push("b", 6, "same millisecond, new line");
    store.push("a", 7, "later");
    let batch = tailer.poll().await.unwrap();

    let got: Vec<(i64, &str)> = batch
        .lines
        .iter()
        .map(|l| (l.timestamp, l.message.as_str()))
        .collect();
    assert_eq!(got, vec![(6, "same millisecond, new line"), (7, "later")]);
    assert_eq!(tailer.cursor("a").unwrap().last_event_timestamp, Some(7));

    assert!(tailer.poll().await.unwrap().lines.is_empty());
}

#[tokio::test]
async fn test_failing_stream_degrades_while_others_continue() {
    let store = Arc::new(FakeLogs::new(&[("good", &[1, 2])]).failing("bad"));
    let mut tailer = LogTailer::new(Arc::clone(&store), GROUP, ["bad", "good"]).with_retry(quick_retry(2));

    let first = tailer.poll().await.unwrap();
    assert_eq!(first.lines.len(), 2);
    assert!(matches!(&first.notices[..], [TailNotice::Retrying { stream, attempt: 1, .. }] if stream == "bad"));

    let second = tailer.poll().await.unwrap();
    assert!(matches!(&second.notices[..], [TailNotice::Degraded { stream, .. }] if stream == "bad"));
    assert_eq!(tailer.degraded_streams(), vec!["bad"]);

    store.push("good", 3, "still tailing");
    let third = tailer.poll().await.unwrap();
    assert_eq!(third.lines.len(), 1);
    assert!(third.notices.is_empty());
}

#[tokio::test]
async fn test_permanent_stream_error_degrades_without_retrying() {
    let store = Arc::new(FakeLogs::new(&[("good", &[1])]).denied("bad"));
    let mut tailer = LogTailer::new(store, GROUP, ["bad", "good"]).with_retry(quick_retry(5));

    let first = tailer.poll().await.unwrap();
    assert_eq!(first.lines.len(), 1);
    assert!(matches!(&first.notices[..], [TailNotice::Degraded { stream, .. }] if stream == "bad"));
    assert_eq!(tailer.degraded_streams(), vec!["bad"]);
}

#[tokio::test]
async fn test_all_streams_degraded_is_fatal() {
    let store = Arc::new(FakeLogs::new(&[]).failing("a").failing("b"));
    let mut tailer = LogTailer::new(store, GROUP, ["a", "b"]).with_retry(quick_retry(2));

    assert!(tailer.poll().await.is_ok());
    let err = tailer.poll().await.unwrap_err();
    assert!(matches!(err, CloudError::Degraded(_)));
}

#[tokio::test]
async fn test_missing_log_group_is_precondition() {
    let mut store = FakeLogs::new(&[("a", &[1])]);
    store.group_exists = false;
    let mut tailer = LogTailer::new(Arc::new(store), GROUP, ["a"]);

    let err = tailer.fetch_once().await.unwrap_err();
    assert!(matches!(err, CloudError::Precondition { .. }));
}

#[tokio::test]
async fn test_follow_stops_on_cancel() {
    let store = Arc::new(FakeLogs::new(&[("a", &[1, 2])]));
    let mut tailer = LogTailer::new(Arc::clone(&store), GROUP, ["a"])
        .with_poll_interval(Duration::from_millis(5));

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    let writer = Arc::clone(&store);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        writer.push("a", 3, "written while following");
        tokio::time::sleep(Duration::from_millis(40)).await;
        stopper.cancel();
    });

    let mut lines = Vec::new();
    tailer
        .write_events_until_stopped(|line| lines.push(line.clone()), cancel)
        .await
        .unwrap();

    let stamps: Vec<i64> = lines.iter().map(|l| l.timestamp).collect();
    assert_eq!(stamps, vec![1, 2, 3]);
}

struct StopsAfter {
    calls: AtomicUsize,
    running_for: usize,
}

#[async_trait]
impl TaskLauncher for StopsAfter {
    async fn has_default_cluster(&self) -> Result<bool> {
        Ok(true)
    }

    async fn run_tasks(&self, _spec: &TaskSpec) -> Result<Vec<TaskHandle>> {
        Ok(Vec::new())
    }

    async fn describe_tasks(&self, handles: &[TaskHandle]) -> Result<Vec<(String, TaskState)>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let state = if call < self.running_for {
            TaskState::Running
        } else {
            TaskState::Stopped {
                exit_code: Some(0),
                reason: Some("Essential container in task exited".to_string()),
            }
        };
        Ok(handles.iter().map(|h| (h.task_id.clone(), state.clone())).collect())
    }

    async fn stop_tasks(&self, _handles: &[TaskHandle]) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_task_watch_ends_tail_after_final_drain() {
    let stream = TaskHandle::log_stream_for("db-migrate", "abc123");
    let store = Arc::new(FakeLogs::new(&[(stream.as_str(), &[10, 20])]));
    let launcher = Arc::new(StopsAfter {
        calls: AtomicUsize::new(0),
        running_for: 2,
    });
    let handles = vec![TaskHandle {
        task_id: "abc123".to_string(),
        cluster: "default".to_string(),
        log_group: GROUP.to_string(),
        log_stream: stream.clone(),
        launched_at: Utc.timestamp_millis_opt(0).unwrap(),
    }];

    let mut tailer = LogTailer::for_tasks(Arc::clone(&store), launcher, handles)
        .with_poll_interval(Duration::from_millis(5));
    store.push(&stream, 30, "migration finished");

    let mut lines = Vec::new();
    tailer
        .write_events_until_stopped(|line| lines.push(line.clone()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(lines.len(), 3);
    assert_eq!(lines[2].message, "migration finished");
    assert_eq!(lines[2].short_stream(), "abc123");
}

#[tokio::test]
async fn test_task_log_events_returns_strictly_newer_events() {
    let store = FakeLogs::new(&[("a", &[1, 2, 3]), ("b", &[5])]);
    let last = HashMap::from([("a".to_string(), 2), ("b".to_string(), 5)]);

    let LogEventsOutput {
        events,
        last_event_times,
    } = store.task_log_events(GROUP, &last).await.unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].timestamp, 3);
    assert_eq!(last_event_times["a"], 3);
    assert_eq!(last_event_times["b"], 5);
}
