use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{FollowUpError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Execution {
    pub id: Uuid,
    pub sequence_id: Uuid,
    pub organization_id: Uuid,

    pub contact_phone: String,
    pub contact_name: Option<String>,

    pub conversation_id: Option<String>,

    pub status: ExecutionStatus,

    pub current_step: i32,

    pub next_scheduled_at: Option<DateTime<Utc>>,

    pub conversation_context: serde_json::Value,

    pub trigger_data: serde_json::Value,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_message_sent_at: Option<DateTime<Utc>>,

    pub converted: bool,
    pub total_messages_sent: i32,

    pub failed_attempts: i32,

    /// Optimistic-lock counter, bumped by the store on every write.
    pub revision: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "followup_execution_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Active,
    Paused,
    Completed,
    Abandoned,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContactRef {
    pub phone: String,

    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StartExecution {
    pub sequence_id: Uuid,
    pub contact: ContactRef,

    #[serde(default = "empty_object")]
    pub context: serde_json::Value,

    #[serde(default = "empty_object")]
    pub trigger_data: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Debug, Default, Deserialize)]
pub struct ListExecutionsQuery {
    pub organization_id: Option<Uuid>,
    pub sequence_id: Option<Uuid>,
    pub status: Option<ExecutionStatus>,
    pub limit: Option<i64>,
}

/// Outcome of one `advance` call, reported back to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Sent { step_order: i32 },
    Completed { step_order: i32 },
    Skipped { step_order: i32 },
    Abandoned,
    Deferred,
    DispatchFailed { step_order: i32 },
    Superseded,
}

/// Transition functions. Every status change goes through one of these so the
/// terminal-state rule lives in a single place.
impl Execution {
    pub fn new(
        sequence_id: Uuid,
        organization_id: Uuid,
        contact: ContactRef,
        context: serde_json::Value,
        trigger_data: serde_json::Value,
        first_step_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let conversation_id = conversation_ref(&trigger_data).or_else(|| conversation_ref(&context));

        Self {
            id: Uuid::new_v4(),
            sequence_id,
            organization_id,
            contact_phone: contact.phone,
            contact_name: contact.name,
            conversation_id,
            status: ExecutionStatus::Active,
            current_step: 0,
            next_scheduled_at: Some(first_step_at),
            conversation_context: context,
            trigger_data,
            started_at: now,
            completed_at: None,
            last_message_sent_at: None,
            converted: false,
            total_messages_sent: 0,
            failed_attempts: 0,
            revision: 0,
        }
    }

    pub fn contact(&self) -> ContactRef {
        ContactRef {
            phone: self.contact_phone.clone(),
            name: self.contact_name.clone(),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ExecutionStatus::Active
            && self.next_scheduled_at.is_some_and(|at| at <= now)
    }

    pub fn next_step_order(&self) -> i32 {
        self.current_step + 1
    }

    fn ensure_active(&self, operation: &str) -> Result<()> {
        if self.status != ExecutionStatus::Active {
            return Err(FollowUpError::InvalidState(format!(
                "cannot {} execution {} in status {}",
                operation,
                self.id,
                self.status.as_str()
            )));
        }
        Ok(())
    }

    fn finish(&mut self, status: ExecutionStatus, now: DateTime<Utc>) {
        self.status = status;
        self.next_scheduled_at = None;
        self.completed_at = Some(now);
    }

    /// A step went out and another one follows.
    pub fn record_sent(
        &mut self,
        step_order: i32,
        next_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_active("advance")?;
        self.current_step = self.current_step.max(step_order);
        self.total_messages_sent += 1;
        self.last_message_sent_at = Some(now);
        self.failed_attempts = 0;
        self.next_scheduled_at = Some(next_at);
        Ok(())
    }

    /// The last defined step went out.
    pub fn record_final_sent(&mut self, step_order: i32, now: DateTime<Utc>) -> Result<()> {
        self.ensure_active("complete")?;
        self.current_step = self.current_step.max(step_order);
        self.total_messages_sent += 1;
        self.last_message_sent_at = Some(now);
        self.failed_attempts = 0;
        self.finish(ExecutionStatus::Completed, now);
        Ok(())
    }

    /// A step was passed over without sending. `next_at` is `None` when it
    /// was the last step.
    pub fn record_skipped(
        &mut self,
        step_order: i32,
        next_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_active("skip a step of")?;
        self.current_step = self.current_step.max(step_order);
        self.failed_attempts = 0;
        match next_at {
            Some(at) => self.next_scheduled_at = Some(at),
            None => self.finish(ExecutionStatus::Completed, now),
        }
        Ok(())
    }

    /// Dispatch failed. The step stays pending; `retry_at` only moves the
    /// schedule when a backoff policy is in effect.
    pub fn record_failure(&mut self, retry_at: Option<DateTime<Utc>>) -> Result<()> {
        self.ensure_active("record a failure on")?;
        self.failed_attempts += 1;
        if let Some(at) = retry_at {
            self.next_scheduled_at = Some(at);
        }
        Ok(())
    }

    pub fn defer(&mut self, until: DateTime<Utc>) -> Result<()> {
        self.ensure_active("defer")?;
        self.next_scheduled_at = Some(until);
        Ok(())
    }

    /// No step exists at the next order. `current_step` is left as is.
    pub fn abandon(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure_active("abandon")?;
        self.finish(ExecutionStatus::Abandoned, now);
        Ok(())
    }

    /// Returns `false` when the execution was already terminal.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.finish(ExecutionStatus::Cancelled, now);
        true
    }

    pub fn mark_converted(&mut self, now: DateTime<Utc>) {
        self.converted = true;
        self.finish(ExecutionStatus::Completed, now);
    }

    pub fn pause(&mut self) -> Result<()> {
        self.ensure_active("pause")?;
        self.status = ExecutionStatus::Paused;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if self.status != ExecutionStatus::Paused {
            return Err(FollowUpError::InvalidState(format!(
                "cannot resume execution {} in status {}",
                self.id,
                self.status.as_str()
            )));
        }
        self.status = ExecutionStatus::Active;
        Ok(())
    }
}

fn conversation_ref(value: &serde_json::Value) -> Option<String> {
    match value.get("conversation_id")? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn execution(now: DateTime<Utc>) -> Execution {
        Execution::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            ContactRef {
                phone: "+549111".to_string(),
                name: Some("Ana".to_string()),
            },
            json!({"nombre": "Ana"}),
            json!({"conversation_id": 4521}),
            now + Duration::hours(1),
            now,
        )
    }

    #[test]
    fn test_new_execution() {
        let now = Utc::now();
        let exec = execution(now);

        assert_eq!(exec.status, ExecutionStatus::Active);
        assert_eq!(exec.current_step, 0);
        assert_eq!(exec.next_scheduled_at, Some(now + Duration::hours(1)));
        assert_eq!(exec.conversation_id.as_deref(), Some("4521"));
        assert!(!exec.is_due(now));
        assert!(exec.is_due(now + Duration::hours(1)));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let now = Utc::now();
        let mut exec = execution(now);

        assert!(exec.cancel(now));
        assert_eq!(exec.status, ExecutionStatus::Cancelled);
        assert_eq!(exec.next_scheduled_at, None);

        let later = now + Duration::minutes(5);
        assert!(!exec.cancel(later));
        assert_eq!(exec.completed_at, Some(now));
    }

    #[test]
    fn test_terminal_states_refuse_progress() {
        let now = Utc::now();
        let mut exec = execution(now);
        exec.abandon(now).unwrap();

        assert!(exec.record_sent(1, now, now).is_err());
        assert!(exec.record_failure(None).is_err());
        assert!(exec.pause().is_err());
        assert_eq!(exec.status, ExecutionStatus::Abandoned);
        assert_eq!(exec.current_step, 0);
    }

    #[test]
    fn test_converted_from_any_status() {
        let now = Utc::now();
        let mut exec = execution(now);
        exec.cancel(now);
        exec.mark_converted(now);

        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert!(exec.converted);
        assert_eq!(exec.next_scheduled_at, None);
    }

    #[test]
    fn test_pause_and_resume_keep_schedule() {
        let now = Utc::now();
        let mut exec = execution(now);
        let scheduled = exec.next_scheduled_at;

        exec.pause().unwrap();
        assert_eq!(exec.status, ExecutionStatus::Paused);
        assert!(!exec.is_due(now + Duration::days(1)));
        assert!(exec.pause().is_err());

        exec.resume().unwrap();
        assert_eq!(exec.status, ExecutionStatus::Active);
        assert_eq!(exec.next_scheduled_at, scheduled);
    }

    #[test]
    fn test_failure_keeps_step_pending() {
        let now = Utc::now();
        let mut exec = execution(now);
        let scheduled = exec.next_scheduled_at;

        exec.record_failure(None).unwrap();
        exec.record_failure(None).unwrap();

        assert_eq!(exec.failed_attempts, 2);
        assert_eq!(exec.current_step, 0);
        assert_eq!(exec.next_scheduled_at, scheduled);
    }
}
