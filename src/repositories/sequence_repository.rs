use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::SequenceStore;
use crate::error::Result;
use crate::models::{Sequence, SequenceStep};

pub struct SequenceRepository {
    pool: PgPool,
}

impl SequenceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_steps(
        tx: &mut Transaction<'_, Postgres>,
        steps: &[SequenceStep],
    ) -> Result<()> {
        for step in steps {
            sqlx::query(
                "INSERT INTO followup_steps (id, sequence_id, step_order, delay_amount, delay_unit, message_template, send_conditions, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
            )
            .bind(step.id)
            .bind(step.sequence_id)
            .bind(step.step_order)
            .bind(step.delay_amount)
            .bind(step.delay_unit)
            .bind(&step.message_template)
            .bind(serde_json::to_value(&step.send_conditions)?)
            .bind(step.created_at)
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl SequenceStore for SequenceRepository {
    async fn create_sequence(&self, sequence: &Sequence, steps: &[SequenceStep]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO followup_sequences (id, organization_id, name, description, enabled, trigger_type, trigger_config, strategy, conditions, total_executions, successful_conversions, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        )
        .bind(sequence.id)
        .bind(sequence.organization_id)
        .bind(&sequence.name)
        .bind(&sequence.description)
        .bind(sequence.enabled)
        .bind(sequence.trigger.trigger_type())
        .bind(sequence.trigger.payload()?)
        .bind(sequence.strategy.as_str())
        .bind(serde_json::to_value(&sequence.conditions)?)
        .bind(sequence.total_executions)
        .bind(sequence.successful_conversions)
        .bind(sequence.created_at)
        .bind(sequence.updated_at)
        .execute(&mut *tx)
        .await?;

        // Dropping the transaction on error rolls the sequence back with it.
        Self::insert_steps(&mut tx, steps).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_sequence(&self, id: Uuid) -> Result<Option<Sequence>> {
        let sequence = sqlx::query_as::<_, Sequence>("SELECT * FROM followup_sequences WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(sequence)
    }

    async fn list_sequences(&self, organization_id: Uuid) -> Result<Vec<Sequence>> {
        let sequences = sqlx::query_as::<_, Sequence>(
            "SELECT * FROM followup_sequences WHERE organization_id = $1 ORDER BY created_at DESC"
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(sequences)
    }

    async fn update_sequence(
        &self,
        sequence: &Sequence,
        steps: Option<&[SequenceStep]>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE followup_sequences SET name = $1, description = $2, enabled = $3, trigger_type = $4, trigger_config = $5, strategy = $6, conditions = $7, updated_at = $8 WHERE id = $9"
        )
        .bind(&sequence.name)
        .bind(&sequence.description)
        .bind(sequence.enabled)
        .bind(sequence.trigger.trigger_type())
        .bind(sequence.trigger.payload()?)
        .bind(sequence.strategy.as_str())
        .bind(serde_json::to_value(&sequence.conditions)?)
        .bind(sequence.updated_at)
        .bind(sequence.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        if let Some(steps) = steps {
            sqlx::query("DELETE FROM followup_steps WHERE sequence_id = $1")
                .bind(sequence.id)
                .execute(&mut *tx)
                .await?;
            Self::insert_steps(&mut tx, steps).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn delete_sequence(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM followup_sequences WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_steps(&self, sequence_id: Uuid) -> Result<Vec<SequenceStep>> {
        let steps = sqlx::query_as::<_, SequenceStep>(
            "SELECT * FROM followup_steps WHERE sequence_id = $1 ORDER BY step_order ASC"
        )
        .bind(sequence_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(steps)
    }

    async fn find_step(&self, sequence_id: Uuid, step_order: i32) -> Result<Option<SequenceStep>> {
        let step = sqlx::query_as::<_, SequenceStep>(
            "SELECT * FROM followup_steps WHERE sequence_id = $1 AND step_order = $2"
        )
        .bind(sequence_id)
        .bind(step_order)
        .fetch_optional(&self.pool)
        .await?;

        Ok(step)
    }

    async fn increment_executions(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE followup_sequences SET total_executions = total_executions + 1 WHERE id = $1"
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn increment_conversions(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE followup_sequences SET successful_conversions = successful_conversions + 1 WHERE id = $1"
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
