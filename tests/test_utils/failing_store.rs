//! Execution store that loses reply bookkeeping.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use followup::error::{FollowUpError, Result};
use followup::models::execution::ListExecutionsQuery;
use followup::models::stats::ExecutionSummary;
use followup::models::{DeliveryStatus, Execution, MessageLog};
use followup::repositories::{ExecutionStore, InMemoryStore, Stores};
use std::sync::Arc;
use uuid::Uuid;

/// Delegates to an [`InMemoryStore`] except for `record_response`, which
/// always fails.
#[allow(dead_code)]
pub struct ReplyFailingStore {
    inner: Arc<InMemoryStore>,
}

#[allow(dead_code)]
impl ReplyFailingStore {
    pub fn stores() -> Stores {
        let inner = Arc::new(InMemoryStore::new());
        Stores {
            sequences: inner.clone(),
            executions: Arc::new(Self {
                inner: inner.clone(),
            }),
            conversations: inner,
        }
    }
}

#[async_trait]
impl ExecutionStore for ReplyFailingStore {
    async fn create_execution(&self, execution: &Execution) -> Result<()> {
        self.inner.create_execution(execution).await
    }

    async fn find_execution(&self, id: Uuid) -> Result<Option<Execution>> {
        self.inner.find_execution(id).await
    }

    async fn list_executions(&self, query: &ListExecutionsQuery) -> Result<Vec<Execution>> {
        self.inner.list_executions(query).await
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<Execution>> {
        self.inner.claim_due(now, limit, lease).await
    }

    async fn release_claim(&self, id: Uuid) -> Result<()> {
        self.inner.release_claim(id).await
    }

    async fn save_execution(&self, execution: &Execution) -> Result<bool> {
        self.inner.save_execution(execution).await
    }

    async fn active_for_conversation(&self, conversation_id: &str) -> Result<Vec<Execution>> {
        self.inner.active_for_conversation(conversation_id).await
    }

    async fn count_for_contact(&self, sequence_id: Uuid, phone: &str) -> Result<i64> {
        self.inner.count_for_contact(sequence_id, phone).await
    }

    async fn has_live_execution(&self, sequence_id: Uuid, phone: &str) -> Result<bool> {
        self.inner.has_live_execution(sequence_id, phone).await
    }

    async fn append_log(&self, log: &MessageLog) -> Result<()> {
        self.inner.append_log(log).await
    }

    async fn list_logs(&self, execution_id: Uuid) -> Result<Vec<MessageLog>> {
        self.inner.list_logs(execution_id).await
    }

    async fn find_log(&self, execution_id: Uuid, step_order: i32) -> Result<Option<MessageLog>> {
        self.inner.find_log(execution_id, step_order).await
    }

    async fn update_delivery_status(
        &self,
        execution_id: Uuid,
        step_order: i32,
        status: DeliveryStatus,
    ) -> Result<bool> {
        self.inner
            .update_delivery_status(execution_id, step_order, status)
            .await
    }

    async fn record_response(
        &self,
        _execution_id: Uuid,
        _at: DateTime<Utc>,
        _text: Option<&str>,
    ) -> Result<()> {
        Err(FollowUpError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn summarize(&self, sequence_id: Uuid) -> Result<ExecutionSummary> {
        self.inner.summarize(sequence_id).await
    }
}
