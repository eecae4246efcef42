use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A conversation that has seen outbound traffic and may later qualify for a
/// no-response follow-up.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ConversationLink {
    pub conversation_id: String,
    pub organization_id: Uuid,

    pub inbox_id: Option<String>,
    pub account_id: Option<String>,

    pub contact_phone: String,
    pub contact_name: Option<String>,

    pub awaiting_response: bool,

    pub last_outbound_at: DateTime<Utc>,
    pub last_inbound_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct TrackConversation {
    pub organization_id: Uuid,
    pub conversation_id: String,
    pub inbox_id: Option<String>,
    pub account_id: Option<String>,
    pub contact: super::ContactRef,
}

#[derive(Debug, Default, Deserialize)]
pub struct InboundMessage {
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IdleConversationsQuery {
    pub organization_id: Uuid,

    #[serde(default = "default_idle_minutes")]
    pub idle_minutes: i64,
}

fn default_idle_minutes() -> i64 {
    60
}
