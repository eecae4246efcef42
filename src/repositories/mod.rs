pub mod conversation_repository;
pub mod execution_repository;
pub mod memory;
pub mod sequence_repository;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::models::execution::ListExecutionsQuery;
use crate::models::stats::ExecutionSummary;
use crate::models::{
    ConversationLink, DeliveryStatus, Execution, MessageLog, Sequence, SequenceStep,
};

pub use conversation_repository::ConversationRepository;
pub use execution_repository::ExecutionRepository;
pub use memory::InMemoryStore;
pub use sequence_repository::SequenceRepository;

#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// Sequence and steps are written atomically.
    async fn create_sequence(&self, sequence: &Sequence, steps: &[SequenceStep]) -> Result<()>;

    async fn find_sequence(&self, id: Uuid) -> Result<Option<Sequence>>;

    async fn list_sequences(&self, organization_id: Uuid) -> Result<Vec<Sequence>>;

    /// When `steps` is given it replaces every existing step. Returns `false`
    /// if the sequence does not exist.
    async fn update_sequence(
        &self,
        sequence: &Sequence,
        steps: Option<&[SequenceStep]>,
    ) -> Result<bool>;

    async fn delete_sequence(&self, id: Uuid) -> Result<bool>;

    async fn list_steps(&self, sequence_id: Uuid) -> Result<Vec<SequenceStep>>;

    async fn find_step(&self, sequence_id: Uuid, step_order: i32) -> Result<Option<SequenceStep>>;

    async fn increment_executions(&self, id: Uuid) -> Result<()>;

    async fn increment_conversions(&self, id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create_execution(&self, execution: &Execution) -> Result<()>;

    async fn find_execution(&self, id: Uuid) -> Result<Option<Execution>>;

    async fn list_executions(&self, query: &ListExecutionsQuery) -> Result<Vec<Execution>>;

    /// Atomically claims up to `limit` active executions due at `now` that
    /// no other sweep holds, leasing them for `lease`.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<Execution>>;

    async fn release_claim(&self, id: Uuid) -> Result<()>;

    /// Writes the execution if the stored revision still matches
    /// `execution.revision`, bumping it and releasing any claim. Returns
    /// `false` on a concurrent modification.
    async fn save_execution(&self, execution: &Execution) -> Result<bool>;

    async fn active_for_conversation(&self, conversation_id: &str) -> Result<Vec<Execution>>;

    async fn count_for_contact(&self, sequence_id: Uuid, phone: &str) -> Result<i64>;

    async fn has_live_execution(&self, sequence_id: Uuid, phone: &str) -> Result<bool>;

    async fn append_log(&self, log: &MessageLog) -> Result<()>;

    async fn list_logs(&self, execution_id: Uuid) -> Result<Vec<MessageLog>>;

    async fn find_log(&self, execution_id: Uuid, step_order: i32) -> Result<Option<MessageLog>>;

    /// Updates the latest log of a step from a transport delivery receipt.
    /// Returns `false` when the step has no log.
    async fn update_delivery_status(
        &self,
        execution_id: Uuid,
        step_order: i32,
        status: DeliveryStatus,
    ) -> Result<bool>;

    /// Flags the most recent log of an execution as answered.
    async fn record_response(
        &self,
        execution_id: Uuid,
        at: DateTime<Utc>,
        text: Option<&str>,
    ) -> Result<()>;

    async fn summarize(&self, sequence_id: Uuid) -> Result<ExecutionSummary>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn upsert_link(&self, link: &ConversationLink) -> Result<()>;

    async fn find_link(&self, conversation_id: &str) -> Result<Option<ConversationLink>>;

    async fn mark_responded(&self, conversation_id: &str, at: DateTime<Utc>) -> Result<bool>;

    async fn idle_links(
        &self,
        organization_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ConversationLink>>;
}

#[derive(Clone)]
pub struct Stores {
    pub sequences: Arc<dyn SequenceStore>,
    pub executions: Arc<dyn ExecutionStore>,
    pub conversations: Arc<dyn ConversationStore>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            sequences: Arc::new(SequenceRepository::new(pool.clone())),
            executions: Arc::new(ExecutionRepository::new(pool.clone())),
            conversations: Arc::new(ConversationRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            sequences: store.clone(),
            executions: store.clone(),
            conversations: store,
        }
    }
}
