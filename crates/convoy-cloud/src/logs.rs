//! Log tailing across task streams
//!
//! A [`LogTailer`] owns one [`LogCursor`] per stream. Each poll fetches
//! every live stream from its cursor (inclusive), drops events the cursor
//! already delivered, and merges the rest by `(timestamp, stream id)`.

use crate::error::{CloudError, Result};
use crate::provider::RetryConfig;
use crate::task::{TaskHandle, TaskLauncher, TaskRunner};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A raw event as returned by the log store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub stream: String,
    /// Milliseconds since the epoch
    pub timestamp: i64,
    pub message: String,
}

/// Output of [`LogStore::task_log_events`]
#[derive(Debug, Clone, Default)]
pub struct LogEventsOutput {
    pub events: Vec<LogEvent>,
    /// Latest timestamp seen per stream
    pub last_event_times: HashMap<String, i64>,
}

#[async_trait]
pub trait LogStore: Send + Sync {
    async fn log_group_exists(&self, group: &str) -> Result<bool>;

    /// Events of one stream at or after `start`, in stream order
    async fn stream_events(
        &self,
        group: &str,
        stream: &str,
        start: Option<i64>,
    ) -> Result<Vec<LogEvent>>;

    /// Events strictly newer than each stream's last seen timestamp
    async fn task_log_events(
        &self,
        group: &str,
        last_event_times: &HashMap<String, i64>,
    ) -> Result<LogEventsOutput> {
        let mut output = LogEventsOutput {
            events: Vec::new(),
            last_event_times: last_event_times.clone(),
        };
        for (stream, last) in last_event_times {
            let events = self.stream_events(group, stream, Some(last + 1)).await?;
            if let Some(newest) = events.iter().map(|e| e.timestamp).max() {
                output.last_event_times.insert(stream.clone(), newest);
            }
            output.events.extend(events);
        }
        output
            .events
            .sort_by(|a, b| (a.timestamp, &a.stream).cmp(&(b.timestamp, &b.stream)));
        Ok(output)
    }
}

/// Read position within one stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogCursor {
    pub stream_id: String,
    pub last_event_timestamp: Option<i64>,
    /// Events already delivered that carry `last_event_timestamp`
    pub delivered_at_last: usize,
}

impl LogCursor {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            last_event_timestamp: None,
            delivered_at_last: 0,
        }
    }

    /// Keep only undelivered events and move the cursor past them.
    ///
    /// `events` must come from a fetch starting at `last_event_timestamp`.
    pub fn advance(&mut self, events: Vec<LogEvent>) -> Vec<LogEvent> {
        let mut skip = self.delivered_at_last;
        let mut fresh = Vec::with_capacity(events.len());
        for event in events {
            match self.last_event_timestamp {
                Some(last) if event.timestamp < last => continue,
                Some(last) if event.timestamp == last && skip > 0 => {
                    skip -= 1;
                    continue;
                }
                _ => fresh.push(event),
            }
        }

        for event in &fresh {
            match self.last_event_timestamp {
                Some(last) if event.timestamp == last => self.delivered_at_last += 1,
                Some(last) if event.timestamp < last => {}
                _ => {
                    self.last_event_timestamp = Some(event.timestamp);
                    self.delivered_at_last = 1;
                }
            }
        }
        fresh
    }
}

/// One merged line handed to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub stream: String,
    pub timestamp: i64,
    pub message: String,
}

impl LogLine {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }

    /// Short stream label: the last path segment (task id for task streams)
    pub fn short_stream(&self) -> &str {
        self.stream.rsplit('/').next().unwrap_or(&self.stream)
    }
}

impl From<LogEvent> for LogLine {
    fn from(event: LogEvent) -> Self {
        Self {
            stream: event.stream,
            timestamp: event.timestamp,
            message: event.message,
        }
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.time() {
            Some(time) => write!(
                f,
                "{} {} {}",
                self.short_stream(),
                time.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                self.message.trim_end()
            ),
            None => write!(f, "{} {}", self.short_stream(), self.message.trim_end()),
        }
    }
}

/// Stream health changes reported alongside lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailNotice {
    Retrying {
        stream: String,
        attempt: u32,
        error: String,
    },
    Degraded {
        stream: String,
        error: String,
    },
}

#[derive(Debug, Default)]
pub struct TailBatch {
    pub lines: Vec<LogLine>,
    pub notices: Vec<TailNotice>,
}

struct StreamState {
    cursor: LogCursor,
    failures: u32,
    retry_at: Option<Instant>,
    degraded: bool,
}

impl StreamState {
    fn new(stream_id: &str) -> Self {
        Self {
            cursor: LogCursor::new(stream_id),
            failures: 0,
            retry_at: None,
            degraded: false,
        }
    }
}

struct TaskWatch {
    runner: TaskRunner,
    handles: Vec<TaskHandle>,
}

pub struct LogTailer<S: ?Sized = dyn LogStore> {
    store: Arc<S>,
    group: String,
    streams: BTreeMap<String, StreamState>,
    start: Option<i64>,
    retry: RetryConfig,
    interval: Duration,
    watch: Option<TaskWatch>,
}

impl<S> LogTailer<S>
where
    S: LogStore + ?Sized,
{
    pub fn new<I, T>(store: Arc<S>, group: impl Into<String>, streams: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        Self {
            store,
            group: group.into(),
            streams: streams
                .into_iter()
                .map(|s| (s.as_ref().to_string(), StreamState::new(s.as_ref())))
                .collect(),
            start: None,
            retry: RetryConfig::default(),
            interval: Duration::from_secs(1),
            watch: None,
        }
    }

    /// Tail the streams of launched tasks and stop once they all exit
    pub fn for_tasks(store: Arc<S>, launcher: Arc<dyn TaskLauncher>, handles: Vec<TaskHandle>) -> Self {
        let group = handles
            .first()
            .map(|h| h.log_group.clone())
            .unwrap_or_default();
        let start = handles.iter().map(|h| h.launched_at.timestamp_millis()).min();
        let mut tailer = Self::new(store, group, handles.iter().map(|h| h.log_stream.as_str()));
        tailer.start = start;
        tailer.watch = Some(TaskWatch {
            runner: TaskRunner::new(launcher),
            handles,
        });
        tailer
    }

    /// Ignore events older than `since`
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.start = Some(since.timestamp_millis());
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn cursor(&self, stream: &str) -> Option<&LogCursor> {
        self.streams.get(stream).map(|s| &s.cursor)
    }

    pub fn degraded_streams(&self) -> Vec<&str> {
        self.streams
            .iter()
            .filter(|(_, s)| s.degraded)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// One fetch cycle over every live stream
    pub async fn poll(&mut self) -> Result<TailBatch> {
        let mut batch = TailBatch::default();
        let now = Instant::now();

        for (stream_id, state) in self.streams.iter_mut() {
            if state.degraded || state.retry_at.is_some_and(|at| at > now) {
                continue;
            }
            let start = state.cursor.last_event_timestamp.or(self.start);
            match self.store.stream_events(&self.group, stream_id, start).await {
                Ok(events) => {
                    state.failures = 0;
                    state.retry_at = None;
                    let fresh = state.cursor.advance(events);
                    debug!(stream = %stream_id, count = fresh.len(), "Fetched log events");
                    batch.lines.extend(fresh.into_iter().map(LogLine::from));
                }
                Err(e) => {
                    state.failures += 1;
                    if !e.is_retryable() || state.failures >= self.retry.max_attempts {
                        state.degraded = true;
                        warn!(stream = %stream_id, attempts = state.failures, error = %e, "Log stream degraded");
                        batch.notices.push(TailNotice::Degraded {
                            stream: stream_id.clone(),
                            error: e.to_string(),
                        });
                    } else {
                        let delay = self.retry.delay_for_attempt(state.failures - 1);
                        warn!(stream = %stream_id, attempt = state.failures, error = %e, "Log fetch failed, retrying in {:?}", delay);
                        state.retry_at = Some(now + delay);
                        batch.notices.push(TailNotice::Retrying {
                            stream: stream_id.clone(),
                            attempt: state.failures,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        if !self.streams.is_empty() && self.streams.values().all(|s| s.degraded) {
            return Err(CloudError::Degraded(format!(
                "every log stream in {} failed",
                self.group
            )));
        }

        merge(&mut batch.lines);
        Ok(batch)
    }

    /// Single pass for non-follow mode
    pub async fn fetch_once(&mut self) -> Result<Vec<LogLine>> {
        self.ensure_group().await?;
        Ok(self.poll().await?.lines)
    }

    /// Tail until cancelled, until watched tasks stop and drain, or until a
    /// fatal error
    pub async fn write_events_until_stopped<F>(
        &mut self,
        mut sink: F,
        cancel: CancellationToken,
    ) -> Result<()>
    where
        F: FnMut(&LogLine) + Send,
    {
        self.ensure_group().await?;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let stopped = self.tasks_stopped().await;
            let batch = self.poll().await?;
            batch.lines.iter().for_each(&mut sink);

            // Status is read before the fetch so the batch above covers
            // everything written before the tasks stopped.
            if stopped {
                debug!(group = %self.group, "All tasks stopped, tail finished");
                return Ok(());
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    async fn ensure_group(&self) -> Result<()> {
        if self.store.log_group_exists(&self.group).await? {
            Ok(())
        } else {
            Err(CloudError::precondition(
                format!("Log group {} does not exist", self.group),
                "Check that the service or task has been deployed",
            ))
        }
    }

    async fn tasks_stopped(&self) -> bool {
        let Some(watch) = &self.watch else {
            return false;
        };
        match watch.runner.all_stopped(&watch.handles).await {
            Ok(stopped) => stopped,
            Err(e) => {
                warn!(error = %e, "Failed to describe tasks");
                false
            }
        }
    }
}

/// Chronological merge; exact ties go to the smaller stream id
pub fn merge(lines: &mut [LogLine]) {
    lines.sort_by(|a, b| (a.timestamp, &a.stream).cmp(&(b.timestamp, &b.stream)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(stream: &str, ts: i64) -> LogEvent {
        LogEvent {
            stream: stream.to_string(),
            timestamp: ts,
            message: format!("{}@{}", stream, ts),
        }
    }

    #[test]
    fn test_merge_interleaves_streams() {
        let mut lines: Vec<LogLine> = [1, 3, 5]
            .into_iter()
            .map(|ts| event("a", ts))
            .chain([2, 4, 6].into_iter().map(|ts| event("b", ts)))
            .map(LogLine::from)
            .collect();
        merge(&mut lines);

        let order: Vec<i64> = lines.iter().map(|l| l.timestamp).collect();
        assert_eq!(order, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_merge_tie_prefers_lower_stream() {
        let mut lines = vec![LogLine::from(event("b", 7)), LogLine::from(event("a", 7))];
        merge(&mut lines);
        assert_eq!(lines[0].stream, "a");
        assert_eq!(lines[1].stream, "b");
    }

    #[test]
    fn test_cursor_skips_delivered_events_at_same_timestamp() {
        let mut cursor = LogCursor::new("a");
        let first = cursor.advance(vec![event("a", 1), event("a", 2), event("a", 2)]);
        assert_eq!(first.len(), 3);
        assert_eq!(cursor.last_event_timestamp, Some(2));
        assert_eq!(cursor.delivered_at_last, 2);

        // Re-fetch from ts=2 returns the two seen events plus a new one at 2.
        let second = cursor.advance(vec![event("a", 2), event("a", 2), event("a", 2), event("a", 3)]);
        assert_eq!(second.iter().map(|e| e.timestamp).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(cursor.last_event_timestamp, Some(3));
        assert_eq!(cursor.delivered_at_last, 1);
    }

    #[test]
    fn test_cursor_never_rewinds() {
        let mut cursor = LogCursor::new("a");
        cursor.advance(vec![event("a", 10)]);
        let stale = cursor.advance(vec![event("a", 5), event("a", 10)]);
        assert!(stale.is_empty());
        assert_eq!(cursor.last_event_timestamp, Some(10));
    }

    #[test]
    fn test_log_line_display_uses_task_id() {
        let line = LogLine::from(LogEvent {
            stream: "convoy-task/db-migrate/abc123".to_string(),
            timestamp: 0,
            message: "done\n".to_string(),
        });
        assert_eq!(line.to_string(), "abc123 1970-01-01T00:00:00.000Z done");
    }
}
