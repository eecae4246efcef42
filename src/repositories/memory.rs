use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{ConversationStore, ExecutionStore, SequenceStore};
use crate::error::{FollowUpError, Result};
use crate::models::execution::ListExecutionsQuery;
use crate::models::stats::ExecutionSummary;
use crate::models::{
    ConversationLink, DeliveryStatus, Execution, ExecutionStatus, MessageLog, Sequence, SequenceStep,
};

#[derive(Default)]
struct State {
    sequences: HashMap<Uuid, Sequence>,
    steps: HashMap<Uuid, Vec<SequenceStep>>,
    executions: HashMap<Uuid, Execution>,
    claims: HashMap<Uuid, DateTime<Utc>>,
    logs: HashMap<Uuid, Vec<MessageLog>>,
    links: HashMap<String, ConversationLink>,
}

/// Process-local store used when no database is configured and by the test
/// suite. A single mutex makes every operation atomic, claims included.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SequenceStore for InMemoryStore {
    async fn create_sequence(&self, sequence: &Sequence, steps: &[SequenceStep]) -> Result<()> {
        let mut state = self.state();
        state.sequences.insert(sequence.id, sequence.clone());
        state.steps.insert(sequence.id, steps.to_vec());
        Ok(())
    }

    async fn find_sequence(&self, id: Uuid) -> Result<Option<Sequence>> {
        Ok(self.state().sequences.get(&id).cloned())
    }

    async fn list_sequences(&self, organization_id: Uuid) -> Result<Vec<Sequence>> {
        let mut sequences: Vec<Sequence> = self
            .state()
            .sequences
            .values()
            .filter(|s| s.organization_id == organization_id)
            .cloned()
            .collect();
        sequences.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sequences)
    }

    async fn update_sequence(
        &self,
        sequence: &Sequence,
        steps: Option<&[SequenceStep]>,
    ) -> Result<bool> {
        let mut state = self.state();
        let Some(stored) = state.sequences.get_mut(&sequence.id) else {
            return Ok(false);
        };

        // Counters are owned by the increment operations.
        let (executions, conversions) = (stored.total_executions, stored.successful_conversions);
        *stored = sequence.clone();
        stored.total_executions = executions;
        stored.successful_conversions = conversions;

        if let Some(steps) = steps {
            state.steps.insert(sequence.id, steps.to_vec());
        }
        Ok(true)
    }

    async fn delete_sequence(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state();
        state.steps.remove(&id);
        Ok(state.sequences.remove(&id).is_some())
    }

    async fn list_steps(&self, sequence_id: Uuid) -> Result<Vec<SequenceStep>> {
        let mut steps = self
            .state()
            .steps
            .get(&sequence_id)
            .cloned()
            .unwrap_or_default();
        steps.sort_by_key(|s| s.step_order);
        Ok(steps)
    }

    async fn find_step(&self, sequence_id: Uuid, step_order: i32) -> Result<Option<SequenceStep>> {
        Ok(self
            .state()
            .steps
            .get(&sequence_id)
            .and_then(|steps| steps.iter().find(|s| s.step_order == step_order))
            .cloned())
    }

    async fn increment_executions(&self, id: Uuid) -> Result<()> {
        if let Some(sequence) = self.state().sequences.get_mut(&id) {
            sequence.total_executions += 1;
        }
        Ok(())
    }

    async fn increment_conversions(&self, id: Uuid) -> Result<()> {
        if let Some(sequence) = self.state().sequences.get_mut(&id) {
            sequence.successful_conversions += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn create_execution(&self, execution: &Execution) -> Result<()> {
        let mut state = self.state();
        let duplicate = !execution.status.is_terminal()
            && state.executions.values().any(|e| {
                e.sequence_id == execution.sequence_id
                    && e.contact_phone == execution.contact_phone
                    && !e.status.is_terminal()
            });
        if duplicate {
            return Err(FollowUpError::InvalidState(format!(
                "{} already has a running execution of sequence {}",
                execution.contact_phone, execution.sequence_id
            )));
        }
        state.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn find_execution(&self, id: Uuid) -> Result<Option<Execution>> {
        Ok(self.state().executions.get(&id).cloned())
    }

    async fn list_executions(&self, query: &ListExecutionsQuery) -> Result<Vec<Execution>> {
        let mut executions: Vec<Execution> = self
            .state()
            .executions
            .values()
            .filter(|e| query.organization_id.map_or(true, |id| e.organization_id == id))
            .filter(|e| query.sequence_id.map_or(true, |id| e.sequence_id == id))
            .filter(|e| query.status.map_or(true, |status| e.status == status))
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        executions.truncate(query.limit.unwrap_or(100).max(0) as usize);
        Ok(executions)
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<Execution>> {
        let mut state = self.state();
        let State {
            executions, claims, ..
        } = &mut *state;

        let mut due: Vec<&Execution> = executions
            .values()
            .filter(|e| e.is_due(now))
            .filter(|e| claims.get(&e.id).map_or(true, |until| *until < now))
            .collect();
        due.sort_by_key(|e| e.next_scheduled_at);
        due.truncate(limit.max(0) as usize);

        let claimed: Vec<Execution> = due.into_iter().cloned().collect();
        for execution in &claimed {
            claims.insert(execution.id, now + lease);
        }
        Ok(claimed)
    }

    async fn release_claim(&self, id: Uuid) -> Result<()> {
        self.state().claims.remove(&id);
        Ok(())
    }

    async fn save_execution(&self, execution: &Execution) -> Result<bool> {
        let mut state = self.state();
        let Some(stored) = state.executions.get_mut(&execution.id) else {
            return Ok(false);
        };
        if stored.revision != execution.revision {
            return Ok(false);
        }

        *stored = execution.clone();
        stored.revision += 1;
        state.claims.remove(&execution.id);
        Ok(true)
    }

    async fn active_for_conversation(&self, conversation_id: &str) -> Result<Vec<Execution>> {
        Ok(self
            .state()
            .executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Active)
            .filter(|e| e.conversation_id.as_deref() == Some(conversation_id))
            .cloned()
            .collect())
    }

    async fn count_for_contact(&self, sequence_id: Uuid, phone: &str) -> Result<i64> {
        Ok(self
            .state()
            .executions
            .values()
            .filter(|e| e.sequence_id == sequence_id && e.contact_phone == phone)
            .count() as i64)
    }

    async fn has_live_execution(&self, sequence_id: Uuid, phone: &str) -> Result<bool> {
        Ok(self.state().executions.values().any(|e| {
            e.sequence_id == sequence_id && e.contact_phone == phone && !e.status.is_terminal()
        }))
    }

    async fn append_log(&self, log: &MessageLog) -> Result<()> {
        self.state()
            .logs
            .entry(log.execution_id)
            .or_default()
            .push(log.clone());
        Ok(())
    }

    async fn list_logs(&self, execution_id: Uuid) -> Result<Vec<MessageLog>> {
        let mut logs = self
            .state()
            .logs
            .get(&execution_id)
            .cloned()
            .unwrap_or_default();
        logs.sort_by(|a, b| (a.step_order, a.sent_at).cmp(&(b.step_order, b.sent_at)));
        Ok(logs)
    }

    async fn find_log(&self, execution_id: Uuid, step_order: i32) -> Result<Option<MessageLog>> {
        Ok(self.state().logs.get(&execution_id).and_then(|logs| {
            logs.iter()
                .filter(|l| l.step_order == step_order)
                .max_by_key(|l| l.sent_at)
                .cloned()
        }))
    }

    async fn update_delivery_status(
        &self,
        execution_id: Uuid,
        step_order: i32,
        status: DeliveryStatus,
    ) -> Result<bool> {
        let mut state = self.state();
        let latest = state.logs.get_mut(&execution_id).and_then(|logs| {
            logs.iter_mut()
                .filter(|l| l.step_order == step_order)
                .max_by_key(|l| l.sent_at)
        });

        match latest {
            Some(log) => {
                log.delivery_status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_response(
        &self,
        execution_id: Uuid,
        at: DateTime<Utc>,
        text: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state();
        let latest = state
            .logs
            .get_mut(&execution_id)
            .and_then(|logs| logs.iter_mut().max_by_key(|l| (l.step_order, l.sent_at)));

        if let Some(log) = latest {
            log.contact_responded = true;
            log.response_received_at = Some(at);
            log.response_text = text.map(str::to_string);
        }
        Ok(())
    }

    async fn summarize(&self, sequence_id: Uuid) -> Result<ExecutionSummary> {
        let state = self.state();
        let mut summary = ExecutionSummary::default();

        for execution in state.executions.values().filter(|e| e.sequence_id == sequence_id) {
            match execution.status {
                ExecutionStatus::Active => summary.active += 1,
                ExecutionStatus::Paused => summary.paused += 1,
                ExecutionStatus::Completed => summary.completed += 1,
                ExecutionStatus::Abandoned => summary.abandoned += 1,
                ExecutionStatus::Cancelled => summary.cancelled += 1,
            }
            if execution.converted {
                summary.converted += 1;
                summary.converted_steps_total += execution.current_step as i64;
            }
            summary.messages_sent += execution.total_messages_sent as i64;
        }
        Ok(summary)
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn upsert_link(&self, link: &ConversationLink) -> Result<()> {
        let mut state = self.state();
        match state.links.get_mut(&link.conversation_id) {
            Some(existing) => {
                let created_at = existing.created_at;
                *existing = link.clone();
                existing.created_at = created_at;
            }
            None => {
                state.links.insert(link.conversation_id.clone(), link.clone());
            }
        }
        Ok(())
    }

    async fn find_link(&self, conversation_id: &str) -> Result<Option<ConversationLink>> {
        Ok(self.state().links.get(conversation_id).cloned())
    }

    async fn mark_responded(&self, conversation_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state();
        let Some(link) = state.links.get_mut(conversation_id) else {
            return Ok(false);
        };
        link.awaiting_response = false;
        link.last_inbound_at = Some(at);
        link.updated_at = at;
        Ok(true)
    }

    async fn idle_links(
        &self,
        organization_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ConversationLink>> {
        let mut links: Vec<ConversationLink> = self
            .state()
            .links
            .values()
            .filter(|l| l.organization_id == organization_id)
            .filter(|l| l.awaiting_response && l.last_outbound_at <= cutoff)
            .cloned()
            .collect();
        links.sort_by_key(|l| l.last_outbound_at);
        Ok(links)
    }
}
