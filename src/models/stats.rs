use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raw per-sequence aggregates as read from the execution table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionSummary {
    pub active: i64,
    pub paused: i64,
    pub completed: i64,
    pub abandoned: i64,
    pub cancelled: i64,
    pub converted: i64,
    pub converted_steps_total: i64,
    pub messages_sent: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatusBreakdown {
    pub active: i64,
    pub paused: i64,
    pub completed: i64,
    pub abandoned: i64,
    pub cancelled: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SequenceStats {
    pub sequence_id: Uuid,
    pub total_executions: i64,
    pub successful_conversions: i64,
    pub conversion_rate: f64,
    pub average_steps_to_conversion: Option<f64>,
    pub total_messages_sent: i64,
    pub by_status: StatusBreakdown,
}
