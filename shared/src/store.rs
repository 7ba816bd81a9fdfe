//! The local incident feed: authoritative, most recent first, persisted
//! as one JSON array on every mutation.

use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::capabilities::{KeyValueStore, KvError, KvKey};
use crate::model::{IncidentId, IncidentRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("durable storage failed: {0}")]
    Kv(#[from] KvError),

    #[error("failed to serialize incidents: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub struct IncidentStore {
    kv: Arc<dyn KeyValueStore>,
    key: KvKey,
    records: RwLock<VecDeque<IncidentRecord>>,
}

impl IncidentStore {
    /// Loads the durable slot once. Missing or unreadable JSON yields an
    /// empty feed; a storage I/O failure is returned.
    #[instrument(skip(kv))]
    pub async fn open(kv: Arc<dyn KeyValueStore>, slot: &str) -> Result<Self, StoreError> {
        let key = KvKey::incidents(slot)?;
        let records = match kv.get(&key).await? {
            None => VecDeque::new(),
            Some(bytes) => match serde_json::from_slice::<VecDeque<IncidentRecord>>(&bytes) {
                Ok(records) => records,
                Err(e) => {
                    warn!(error = %e, "stored incidents are unreadable; starting with an empty feed");
                    VecDeque::new()
                }
            },
        };
        info!(count = records.len(), "incident store opened");

        Ok(Self {
            kv,
            key,
            records: RwLock::new(records),
        })
    }

    /// Prepends and persists. On a failed write the in-memory feed is
    /// rolled back so memory and disk agree.
    #[instrument(skip_all, fields(incident_id = %record.id()))]
    pub async fn append(&self, record: IncidentRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records.push_front(record);

        if let Err(e) = self.persist(&records).await {
            records.pop_front();
            warn!(error = %e, "failed to persist incident");
            return Err(e);
        }
        info!(count = records.len(), "incident stored");
        Ok(())
    }

    /// Snapshot of the feed, most recent first.
    pub async fn all(&self) -> Vec<IncidentRecord> {
        self.records.read().await.iter().cloned().collect()
    }

    pub async fn get(&self, id: IncidentId) -> Option<IncidentRecord> {
        self.records
            .read()
            .await
            .iter()
            .find(|record| record.id() == id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Empties the durable slot, then memory. If the write fails nothing
    /// changes.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        self.persist(&VecDeque::new()).await?;
        records.clear();
        info!("incident store cleared");
        Ok(())
    }

    async fn persist(&self, records: &VecDeque<IncidentRecord>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(records)?;
        self.kv.set(&self.key, bytes).await?;
        Ok(())
    }
}
