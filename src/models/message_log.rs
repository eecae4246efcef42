use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MessageLog {
    pub id: Uuid,
    pub execution_id: Uuid,

    pub step_order: i32,

    pub sent_at: DateTime<Utc>,

    pub message_sent: String,

    pub delivery_status: DeliveryStatus,

    pub contact_responded: bool,
    pub response_received_at: Option<DateTime<Utc>>,
    pub response_text: Option<String>,

    pub transport_message_id: Option<String>,

    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "followup_delivery_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageLog {
    pub fn sent(
        execution_id: Uuid,
        step_order: i32,
        message: String,
        transport_message_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            step_order,
            sent_at: now,
            message_sent: message,
            delivery_status: DeliveryStatus::Sent,
            contact_responded: false,
            response_received_at: None,
            response_text: None,
            transport_message_id,
            error_message: None,
        }
    }

    pub fn failed(
        execution_id: Uuid,
        step_order: i32,
        message: String,
        error: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            delivery_status: DeliveryStatus::Failed,
            error_message: Some(error),
            ..Self::sent(execution_id, step_order, message, None, now)
        }
    }
}
