use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::ConversationStore;
use crate::error::Result;
use crate::models::ConversationLink;

pub struct ConversationRepository {
    pool: PgPool,
}

impl ConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationStore for ConversationRepository {
    async fn upsert_link(&self, link: &ConversationLink) -> Result<()> {
        sqlx::query(
            "INSERT INTO followup_conversation_links (conversation_id, organization_id, inbox_id, account_id, contact_phone, contact_name, awaiting_response, last_outbound_at, last_inbound_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (conversation_id) DO UPDATE SET
                organization_id = EXCLUDED.organization_id,
                inbox_id = EXCLUDED.inbox_id,
                account_id = EXCLUDED.account_id,
                contact_phone = EXCLUDED.contact_phone,
                contact_name = EXCLUDED.contact_name,
                awaiting_response = EXCLUDED.awaiting_response,
                last_outbound_at = EXCLUDED.last_outbound_at,
                updated_at = EXCLUDED.updated_at"
        )
        .bind(&link.conversation_id)
        .bind(link.organization_id)
        .bind(&link.inbox_id)
        .bind(&link.account_id)
        .bind(&link.contact_phone)
        .bind(&link.contact_name)
        .bind(link.awaiting_response)
        .bind(link.last_outbound_at)
        .bind(link.last_inbound_at)
        .bind(link.created_at)
        .bind(link.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_link(&self, conversation_id: &str) -> Result<Option<ConversationLink>> {
        let link = sqlx::query_as::<_, ConversationLink>(
            "SELECT * FROM followup_conversation_links WHERE conversation_id = $1"
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(link)
    }

    async fn mark_responded(&self, conversation_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE followup_conversation_links SET awaiting_response = FALSE, last_inbound_at = $1, updated_at = $1 WHERE conversation_id = $2"
        )
        .bind(at)
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn idle_links(
        &self,
        organization_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ConversationLink>> {
        let links = sqlx::query_as::<_, ConversationLink>(
            "SELECT * FROM followup_conversation_links
             WHERE organization_id = $1 AND awaiting_response = TRUE AND last_outbound_at <= $2
             ORDER BY last_outbound_at ASC"
        )
        .bind(organization_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(links)
    }
}
