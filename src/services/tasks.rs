//! Task-tracking integration for human-visible order and stock
//! notifications. Failures are logged and never propagate into the
//! fulfillment pipeline.

use crate::errors::ServiceError;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{instrument, warn};

/// One tracker entry to be created.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerEntry {
    pub title: String,
    pub details: String,
}

#[async_trait]
pub trait TaskTracker: Send + Sync {
    async fn create_entry(&self, entry: &TrackerEntry) -> Result<(), ServiceError>;
}

/// Creates an entry, logging instead of failing when the tracker is down.
pub async fn create_entry_best_effort(tracker: &dyn TaskTracker, entry: &TrackerEntry) {
    if let Err(err) = tracker.create_entry(entry).await {
        warn!(error = %err, title = %entry.title, "task tracker entry failed");
    }
}

/// HTTP implementation posting entries to the configured tracker webhook.
pub struct HttpTaskTracker {
    client: reqwest::Client,
    url: String,
}

impl HttpTaskTracker {
    pub fn new(url: String, timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("tracker client init: {}", e)))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl TaskTracker for HttpTaskTracker {
    #[instrument(skip(self, entry), fields(title = %entry.title))]
    async fn create_entry(&self, entry: &TrackerEntry) -> Result<(), ServiceError> {
        self.client
            .post(&self.url)
            .json(entry)
            .send()
            .await
            .map_err(|e| ServiceError::InternalError(format!("tracker post failed: {}", e)))?
            .error_for_status()
            .map_err(|e| ServiceError::InternalError(format!("tracker rejected entry: {}", e)))?;
        Ok(())
    }
}

/// No-op tracker for deployments without the integration.
#[derive(Default)]
pub struct NoopTaskTracker;

#[async_trait]
impl TaskTracker for NoopTaskTracker {
    async fn create_entry(&self, _entry: &TrackerEntry) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// Test double recording created entries.
#[derive(Default)]
pub struct RecordingTaskTracker {
    pub entries: Mutex<Vec<TrackerEntry>>,
}

impl RecordingTaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl TaskTracker for RecordingTaskTracker {
    async fn create_entry(&self, entry: &TrackerEntry) -> Result<(), ServiceError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.clone());
        Ok(())
    }
}
