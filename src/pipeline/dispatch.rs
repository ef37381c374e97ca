//! Notification dispatch with per-item failure isolation.
//!
//! Each message is retried on its own schedule. A message that exhausts its
//! retries is reported and given up on; it never blocks the others, and it
//! is not carried into later cycles.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::error::AppError;
use crate::models::{Identity, NotifierConfig};
use crate::services::{Message, NotificationSink};

use super::retry::RetryPolicy;

/// Outcome of delivering one batch of messages.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Messages the sink accepted
    pub delivered: Vec<Identity>,
    /// Messages that exhausted their retries
    pub failed: Vec<AppError>,
}

impl DispatchReport {
    /// Total messages attempted.
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Delivers messages to a sink with bounded retries and concurrency.
pub struct Dispatcher {
    sink: Arc<dyn NotificationSink>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    max_concurrent: usize,
}

impl Dispatcher {
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        retry: RetryPolicy,
        attempt_timeout: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            sink,
            retry,
            attempt_timeout,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn from_config(sink: Arc<dyn NotificationSink>, config: &NotifierConfig) -> Self {
        Self::new(
            sink,
            RetryPolicy::from(&config.retry),
            config.timeout(),
            config.max_concurrent,
        )
    }

    /// Deliver every message, waiting for all of them to resolve.
    pub async fn dispatch(&self, messages: Vec<Message>) -> DispatchReport {
        let mut report = DispatchReport::default();
        if messages.is_empty() {
            return report;
        }

        log::info!(
            "Dispatching {} notification(s) via {}",
            messages.len(),
            self.sink.name()
        );

        let mut results = stream::iter(messages)
            .map(|message| async move {
                let result = self.deliver(&message).await;
                (message.identity, result)
            })
            .buffered(self.max_concurrent);

        while let Some((identity, result)) = results.next().await {
            match result {
                Ok(()) => report.delivered.push(identity),
                Err(error) => {
                    log::error!("{}", error);
                    report.failed.push(error);
                }
            }
        }
        report
    }

    /// Deliver one message, retrying per policy.
    async fn deliver(&self, message: &Message) -> Result<(), AppError> {
        let operation = format!("Notify {}", message.identity);
        let (result, attempts) = self
            .retry
            .run(&operation, self.attempt_timeout, || self.sink.send(message))
            .await;

        result.map_err(|e| AppError::notification(message.identity.as_str(), attempts, e))
    }
}
