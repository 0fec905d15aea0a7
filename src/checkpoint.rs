//! Human hand-off: checkpoint records, their store, and the polling broker.

use crate::error::StoreError;
use crate::types::{
    CheckpointData, CheckpointId, CheckpointRecord, CheckpointResponse, CheckpointStatus,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Persistence for checkpoint records. The broker only ever creates records
/// and reads them back; `respond` belongs to the human side.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn create(&self, record: CheckpointRecord) -> Result<(), StoreError>;

    async fn get(&self, id: &CheckpointId) -> Result<Option<CheckpointRecord>, StoreError>;

    /// Move a record from `waiting` to `responded`.
    async fn respond(
        &self,
        id: &CheckpointId,
        response: CheckpointResponse,
    ) -> Result<CheckpointRecord, StoreError>;
}

/// Told about every new checkpoint so a human can be alerted.
pub trait CheckpointNotifier: Send + Sync {
    fn checkpoint_created(&self, record: &CheckpointRecord);
}

impl<F> CheckpointNotifier for F
where
    F: Fn(&CheckpointRecord) + Send + Sync,
{
    fn checkpoint_created(&self, record: &CheckpointRecord) {
        self(record)
    }
}

#[derive(Default)]
pub struct MemoryCheckpointStore {
    records: RwLock<HashMap<CheckpointId, CheckpointRecord>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records still waiting for a human, oldest first.
    pub async fn waiting(&self) -> Vec<CheckpointRecord> {
        let records = self.records.read().await;
        let mut waiting: Vec<CheckpointRecord> = records
            .values()
            .filter(|r| r.status == CheckpointStatus::Waiting)
            .cloned()
            .collect();
        waiting.sort_by_key(|r| r.created_at);
        waiting
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn create(&self, record: CheckpointRecord) -> Result<(), StoreError> {
        self.records.write().await.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &CheckpointId) -> Result<Option<CheckpointRecord>, StoreError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn respond(
        &self,
        id: &CheckpointId,
        response: CheckpointResponse,
    ) -> Result<CheckpointRecord, StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if record.status == CheckpointStatus::Responded {
            return Err(StoreError::AlreadyResponded(id.to_string()));
        }
        record.status = CheckpointStatus::Responded;
        record.response = Some(response);
        record.responded_at = Some(Utc::now());
        Ok(record.clone())
    }
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Creates a waiting record, notifies, then polls until a human responds.
///
/// No response within `timeout`, or cancellation, yields `continue: false`:
/// silence is never read as approval.
pub struct CheckpointBroker {
    store: Arc<dyn CheckpointStore>,
    notifier: Arc<dyn CheckpointNotifier>,
    config: BrokerConfig,
}

impl CheckpointBroker {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        notifier: Arc<dyn CheckpointNotifier>,
        config: BrokerConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    pub async fn request(
        &self,
        data: CheckpointData,
        cancel: &CancellationToken,
    ) -> CheckpointResponse {
        let record = CheckpointRecord::waiting(data);
        let id = record.id.clone();
        let kind = record.data.kind;

        if let Err(e) = self.store.create(record.clone()).await {
            warn!(checkpoint = %id, "Could not persist checkpoint: {}", e);
            return CheckpointResponse::cancel();
        }
        info!(checkpoint = %id, %kind, "Checkpoint waiting for response");
        self.notifier.checkpoint_created(&record);

        let deadline = Instant::now() + self.config.timeout;
        loop {
            match self.store.get(&id).await {
                Ok(Some(record)) if record.status == CheckpointStatus::Responded => {
                    let response = record.response.unwrap_or_else(CheckpointResponse::cancel);
                    info!(checkpoint = %id, proceed = response.proceed, "Checkpoint responded");
                    return response;
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    warn!(checkpoint = %id, "Checkpoint record disappeared");
                    return CheckpointResponse::cancel();
                }
                Err(e) => debug!(checkpoint = %id, "Poll failed, retrying: {}", e),
            }

            if Instant::now() >= deadline {
                warn!(checkpoint = %id, timeout = ?self.config.timeout, "Checkpoint timed out");
                return CheckpointResponse::cancel();
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(checkpoint = %id, "Checkpoint wait cancelled");
                    return CheckpointResponse::cancel();
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }
}
