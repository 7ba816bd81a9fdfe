//! Best-effort delivery of submitted incidents to the remote store.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::capabilities::{execute_with_deadline, HttpError, HttpRequest, HttpTransport, ValidatedUrl};
use crate::model::IncidentRecord;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote sync is not configured")]
    Disabled,

    #[error("remote request failed: {0}")]
    Transport(#[from] HttpError),

    #[error("remote store rejected incident with status {status}: {body_preview}")]
    Rejected { status: u16, body_preview: String },
}

#[derive(Debug, Default)]
struct SyncMetrics {
    attempted: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncMetricsSnapshot {
    pub attempted: u64,
    pub delivered: u64,
    pub failed: u64,
    pub skipped: u64,
}

pub struct SubmissionSync {
    transport: Arc<dyn HttpTransport>,
    endpoint: Option<ValidatedUrl>,
    timeout: Duration,
    metrics: SyncMetrics,
}

impl SubmissionSync {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        endpoint: Option<ValidatedUrl>,
        timeout: Duration,
    ) -> Self {
        if endpoint.is_none() {
            info!("no submission endpoint configured; incidents stay local");
        }
        Self {
            transport,
            endpoint,
            timeout,
            metrics: SyncMetrics::default(),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Sends one record. Never fails: errors are logged and counted.
    #[instrument(skip_all, fields(incident_id = %record.id()))]
    pub async fn send(&self, record: &IncidentRecord) {
        match self.deliver(record).await {
            Ok(()) => {
                self.metrics.delivered.fetch_add(1, Ordering::Relaxed);
                info!("incident delivered to remote store");
            }
            Err(SyncError::Disabled) => {
                self.metrics.skipped.fetch_add(1, Ordering::Relaxed);
                debug!("remote sync disabled; skipped");
            }
            Err(e) => {
                self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "remote sync failed; local copy remains authoritative");
            }
        }
    }

    async fn deliver(&self, record: &IncidentRecord) -> Result<(), SyncError> {
        let endpoint = self.endpoint.clone().ok_or(SyncError::Disabled)?;
        self.metrics.attempted.fetch_add(1, Ordering::Relaxed);

        let request = HttpRequest::post(endpoint)
            .with_json(record)?
            .with_timeout(self.timeout)?;
        let response = execute_with_deadline(self.transport.as_ref(), request).await?;

        if !response.is_success() {
            return Err(SyncError::Rejected {
                status: response.status(),
                body_preview: response.body_preview(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn metrics(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            attempted: self.metrics.attempted.load(Ordering::Relaxed),
            delivered: self.metrics.delivered.load(Ordering::Relaxed),
            failed: self.metrics.failed.load(Ordering::Relaxed),
            skipped: self.metrics.skipped.load(Ordering::Relaxed),
        }
    }
}
