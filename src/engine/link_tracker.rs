use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::engine::ExecutionStateMachine;
use crate::error::{FollowUpError, Result};
use crate::models::conversation::TrackConversation;
use crate::models::{ConversationLink, Execution};

/// Ties WhatsApp conversations to follow-up executions: records outbound
/// activity and stops sequences when the contact writes back.
pub struct ConversationLinkTracker {
    machine: Arc<ExecutionStateMachine>,
}

impl ConversationLinkTracker {
    pub fn new(machine: Arc<ExecutionStateMachine>) -> Self {
        Self { machine }
    }

    pub async fn track_for_follow_up(
        &self,
        request: TrackConversation,
        now: DateTime<Utc>,
    ) -> Result<ConversationLink> {
        if request.conversation_id.trim().is_empty() {
            return Err(FollowUpError::Validation(
                "conversation_id cannot be empty".to_string(),
            ));
        }
        if request.contact.phone.trim().is_empty() {
            return Err(FollowUpError::Validation(
                "contact phone cannot be empty".to_string(),
            ));
        }

        let conversations = &self.machine.stores().conversations;
        let created_at = conversations
            .find_link(&request.conversation_id)
            .await?
            .map(|existing| existing.created_at)
            .unwrap_or(now);

        let link = ConversationLink {
            conversation_id: request.conversation_id,
            organization_id: request.organization_id,
            inbox_id: request.inbox_id,
            account_id: request.account_id,
            contact_phone: request.contact.phone,
            contact_name: request.contact.name,
            awaiting_response: true,
            last_outbound_at: now,
            last_inbound_at: None,
            created_at,
            updated_at: now,
        };

        conversations.upsert_link(&link).await?;
        info!("Tracking conversation {} for follow-up", link.conversation_id);

        Ok(link)
    }

    /// Cancels every active execution bound to the conversation and returns
    /// the ones this call cancelled. Paused executions are left alone.
    pub async fn cancel_on_response(
        &self,
        conversation_id: &str,
        text: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Execution>> {
        let stores = self.machine.stores();
        stores
            .conversations
            .mark_responded(conversation_id, now)
            .await?;

        let active = stores
            .executions
            .active_for_conversation(conversation_id)
            .await?;

        let mut cancelled = Vec::with_capacity(active.len());
        for execution in active {
            match self.machine.cancel_execution(execution.id, now).await {
                Ok((execution, true)) => {
                    if let Err(err) = stores
                        .executions
                        .record_response(execution.id, now, text)
                        .await
                    {
                        error!(
                            execution_id = %execution.id,
                            "Cancelled on response but failed to record the reply: {}", err
                        );
                    }
                    cancelled.push(execution);
                }
                Ok((_, false)) => {}
                Err(err) => {
                    error!(
                        execution_id = %execution.id,
                        "Failed to cancel execution on response: {}", err
                    );
                }
            }
        }

        if !cancelled.is_empty() {
            info!(
                "Contact replied in conversation {}, cancelled {} execution(s)",
                conversation_id,
                cancelled.len()
            );
        }

        Ok(cancelled)
    }

    pub async fn idle_conversations(
        &self,
        organization_id: Uuid,
        idle_for: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConversationLink>> {
        if idle_for < Duration::zero() {
            return Err(FollowUpError::Validation(
                "idle window cannot be negative".to_string(),
            ));
        }

        let cutoff = now.checked_sub_signed(idle_for).ok_or_else(|| {
            FollowUpError::Validation("idle window is out of range".to_string())
        })?;

        self.machine
            .stores()
            .conversations
            .idle_links(organization_id, cutoff)
            .await
    }
}
