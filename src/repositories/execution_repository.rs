use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::ExecutionStore;
use crate::error::{FollowUpError, Result};
use crate::models::execution::ListExecutionsQuery;
use crate::models::stats::ExecutionSummary;
use crate::models::{DeliveryStatus, Execution, ExecutionStatus, MessageLog};

pub struct ExecutionRepository {
    pool: PgPool,
}

impl ExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionStore for ExecutionRepository {
    async fn create_execution(&self, execution: &Execution) -> Result<()> {
        sqlx::query(
            "INSERT INTO followup_executions (id, sequence_id, organization_id, contact_phone, contact_name, conversation_id, status, current_step, next_scheduled_at, conversation_context, trigger_data, started_at, completed_at, last_message_sent_at, converted, total_messages_sent, failed_attempts, revision)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)"
        )
        .bind(execution.id)
        .bind(execution.sequence_id)
        .bind(execution.organization_id)
        .bind(&execution.contact_phone)
        .bind(&execution.contact_name)
        .bind(&execution.conversation_id)
        .bind(execution.status)
        .bind(execution.current_step)
        .bind(execution.next_scheduled_at)
        .bind(&execution.conversation_context)
        .bind(&execution.trigger_data)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.last_message_sent_at)
        .bind(execution.converted)
        .bind(execution.total_messages_sent)
        .bind(execution.failed_attempts)
        .bind(execution.revision)
        .execute(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db)
                if db.is_unique_violation()
                    && db.constraint() == Some("idx_followup_executions_one_live") =>
            {
                FollowUpError::InvalidState(format!(
                    "{} already has a running execution of sequence {}",
                    execution.contact_phone, execution.sequence_id
                ))
            }
            other => FollowUpError::from(other),
        })?;

        Ok(())
    }

    async fn find_execution(&self, id: Uuid) -> Result<Option<Execution>> {
        let execution = sqlx::query_as::<_, Execution>("SELECT * FROM followup_executions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(execution)
    }

    async fn list_executions(&self, query: &ListExecutionsQuery) -> Result<Vec<Execution>> {
        let executions = sqlx::query_as::<_, Execution>(
            "SELECT * FROM followup_executions
             WHERE ($1::uuid IS NULL OR organization_id = $1)
               AND ($2::uuid IS NULL OR sequence_id = $2)
               AND ($3::followup_execution_status IS NULL OR status = $3)
             ORDER BY started_at DESC
             LIMIT $4"
        )
        .bind(query.organization_id)
        .bind(query.sequence_id)
        .bind(query.status)
        .bind(query.limit.unwrap_or(100))
        .fetch_all(&self.pool)
        .await?;

        Ok(executions)
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<Execution>> {
        // SKIP LOCKED keeps overlapping sweeps off each other's rows; the
        // lease keeps them off rows another sweep is still dispatching.
        let executions = sqlx::query_as::<_, Execution>(
            r#"
            WITH due AS (
                SELECT id
                FROM followup_executions
                WHERE status = 'active'
                  AND next_scheduled_at <= $1
                  AND (claimed_until IS NULL OR claimed_until < $1)
                ORDER BY next_scheduled_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE followup_executions e
            SET claimed_until = $3
            FROM due
            WHERE e.id = due.id
            RETURNING e.*
            "#,
        )
        .bind(now)
        .bind(limit)
        .bind(now + lease)
        .fetch_all(&self.pool)
        .await?;

        Ok(executions)
    }

    async fn release_claim(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE followup_executions SET claimed_until = NULL WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn save_execution(&self, execution: &Execution) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE followup_executions SET status = $1, current_step = $2, next_scheduled_at = $3, completed_at = $4, last_message_sent_at = $5, converted = $6, total_messages_sent = $7, failed_attempts = $8, revision = revision + 1, claimed_until = NULL
             WHERE id = $9 AND revision = $10"
        )
        .bind(execution.status)
        .bind(execution.current_step)
        .bind(execution.next_scheduled_at)
        .bind(execution.completed_at)
        .bind(execution.last_message_sent_at)
        .bind(execution.converted)
        .bind(execution.total_messages_sent)
        .bind(execution.failed_attempts)
        .bind(execution.id)
        .bind(execution.revision)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn active_for_conversation(&self, conversation_id: &str) -> Result<Vec<Execution>> {
        let executions = sqlx::query_as::<_, Execution>(
            "SELECT * FROM followup_executions WHERE conversation_id = $1 AND status = $2"
        )
        .bind(conversation_id)
        .bind(ExecutionStatus::Active)
        .fetch_all(&self.pool)
        .await?;

        Ok(executions)
    }

    async fn count_for_contact(&self, sequence_id: Uuid, phone: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM followup_executions WHERE sequence_id = $1 AND contact_phone = $2"
        )
        .bind(sequence_id)
        .bind(phone)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn has_live_execution(&self, sequence_id: Uuid, phone: &str) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM followup_executions WHERE sequence_id = $1 AND contact_phone = $2 AND status IN ('active', 'paused'))"
        )
        .bind(sequence_id)
        .bind(phone)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn append_log(&self, log: &MessageLog) -> Result<()> {
        sqlx::query(
            "INSERT INTO followup_message_logs (id, execution_id, step_order, sent_at, message_sent, delivery_status, contact_responded, response_received_at, response_text, transport_message_id, error_message)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        )
        .bind(log.id)
        .bind(log.execution_id)
        .bind(log.step_order)
        .bind(log.sent_at)
        .bind(&log.message_sent)
        .bind(log.delivery_status)
        .bind(log.contact_responded)
        .bind(log.response_received_at)
        .bind(&log.response_text)
        .bind(&log.transport_message_id)
        .bind(&log.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_logs(&self, execution_id: Uuid) -> Result<Vec<MessageLog>> {
        let logs = sqlx::query_as::<_, MessageLog>(
            "SELECT * FROM followup_message_logs WHERE execution_id = $1 ORDER BY step_order ASC, sent_at ASC"
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(logs)
    }

    async fn find_log(&self, execution_id: Uuid, step_order: i32) -> Result<Option<MessageLog>> {
        let log = sqlx::query_as::<_, MessageLog>(
            "SELECT * FROM followup_message_logs WHERE execution_id = $1 AND step_order = $2 ORDER BY sent_at DESC LIMIT 1"
        )
        .bind(execution_id)
        .bind(step_order)
        .fetch_optional(&self.pool)
        .await?;

        Ok(log)
    }

    async fn update_delivery_status(
        &self,
        execution_id: Uuid,
        step_order: i32,
        status: DeliveryStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE followup_message_logs
            SET delivery_status = $3
            WHERE id = (
                SELECT id FROM followup_message_logs
                WHERE execution_id = $1 AND step_order = $2
                ORDER BY sent_at DESC
                LIMIT 1
            )
            "#,
        )
        .bind(execution_id)
        .bind(step_order)
        .bind(status)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_response(
        &self,
        execution_id: Uuid,
        at: DateTime<Utc>,
        text: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE followup_message_logs
            SET contact_responded = TRUE, response_received_at = $2, response_text = $3
            WHERE id = (
                SELECT id FROM followup_message_logs
                WHERE execution_id = $1
                ORDER BY step_order DESC, sent_at DESC
                LIMIT 1
            )
            "#,
        )
        .bind(execution_id)
        .bind(at)
        .bind(text)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn summarize(&self, sequence_id: Uuid) -> Result<ExecutionSummary> {
        let row: (i64, i64, i64, i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'active'),
                COUNT(*) FILTER (WHERE status = 'paused'),
                COUNT(*) FILTER (WHERE status = 'completed'),
                COUNT(*) FILTER (WHERE status = 'abandoned'),
                COUNT(*) FILTER (WHERE status = 'cancelled'),
                COUNT(*) FILTER (WHERE converted),
                COALESCE(SUM(current_step) FILTER (WHERE converted), 0)::BIGINT,
                COALESCE(SUM(total_messages_sent), 0)::BIGINT
            FROM followup_executions
            WHERE sequence_id = $1
            "#,
        )
        .bind(sequence_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(ExecutionSummary {
            active: row.0,
            paused: row.1,
            completed: row.2,
            abandoned: row.3,
            cancelled: row.4,
            converted: row.5,
            converted_steps_total: row.6,
            messages_sent: row.7,
        })
    }
}
