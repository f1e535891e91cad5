//! Provisioning client contract
//!
//! The engine only talks to a backend through these narrow capability
//! traits. A backend implements all three and gets [`ProvisioningClient`]
//! for free; components that only read state ask for [`StackReader`].

use crate::error::Result;
use crate::event::{RawStackEvent, StackStatus};
use crate::stack::StackRequest;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Current backend view of a stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDescription {
    pub name: String,
    pub status: StackStatus,
    pub status_reason: Option<String>,
    pub template: String,
    pub parameters: Vec<(String, String)>,
    pub tags: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
}

impl StackDescription {
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn parameter_map(&self) -> BTreeMap<String, String> {
        self.parameters.iter().cloned().collect()
    }
}

/// Read access to stacks
#[async_trait]
pub trait StackReader: Send + Sync {
    /// Returns `None` when the stack does not exist
    async fn describe_stack(&self, name: &str) -> Result<Option<StackDescription>>;

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.describe_stack(name).await?.is_some())
    }

    async fn get_outputs(&self, name: &str) -> Result<BTreeMap<String, String>> {
        Ok(self
            .describe_stack(name)
            .await?
            .map(|stack| stack.outputs)
            .unwrap_or_default())
    }
}

/// Mutating stack operations; each returns once the backend accepted the call
#[async_trait]
pub trait StackWriter: Send + Sync {
    async fn create(&self, request: &StackRequest) -> Result<()>;

    async fn update(&self, request: &StackRequest) -> Result<()>;

    async fn delete(&self, name: &str) -> Result<()>;
}

/// Change events for a stack
#[async_trait]
pub trait StackEventSource: Send + Sync {
    /// Events at or after `since` (all events when `None`), in backend order
    async fn describe_events(
        &self,
        name: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawStackEvent>>;
}

/// Everything the convergence engine needs from a backend
pub trait ProvisioningClient: StackReader + StackWriter + StackEventSource {}

impl<T> ProvisioningClient for T where T: StackReader + StackWriter + StackEventSource {}

/// Retry configuration for polling operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total tries per call, counting the first one
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based), capped at `max_delay`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

/// Polling cadence for long-running operations
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub retry: RetryConfig,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            retry: RetryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10000),
            backoff_multiplier: 2.0,
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(4000));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(8000));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(10000)); // capped at max
    }
}
