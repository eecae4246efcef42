use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::template::TemplateRenderer;
use crate::error::{FollowUpError, Result};
use crate::models::{
    AdvanceOutcome, DeliveryStatus, Execution, ExecutionStatus, MessageLog, Sequence,
    SequenceStep, StartExecution,
};
use crate::repositories::Stores;
use crate::services::MessageDispatcher;

/// Optimistic writes retried before giving up on an administrative transition.
const WRITE_ATTEMPTS: usize = 3;

/// Owns every execution lifecycle change: start, step advancement, and the
/// administrative transitions. Writes are revision-checked, so a transition
/// computed from a stale read is never persisted.
pub struct ExecutionStateMachine {
    stores: Stores,
    dispatcher: Arc<dyn MessageDispatcher>,
    config: EngineConfig,
}

impl ExecutionStateMachine {
    pub fn new(stores: Stores, dispatcher: Arc<dyn MessageDispatcher>, config: EngineConfig) -> Self {
        Self {
            stores,
            dispatcher,
            config,
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub async fn start_execution(
        &self,
        request: StartExecution,
        now: DateTime<Utc>,
    ) -> Result<Execution> {
        let sequence = self
            .stores
            .sequences
            .find_sequence(request.sequence_id)
            .await?
            .ok_or_else(|| FollowUpError::not_found("Sequence", request.sequence_id))?;

        if !sequence.enabled {
            return Err(FollowUpError::InvalidState(format!(
                "sequence '{}' is disabled",
                sequence.name
            )));
        }

        if request.contact.phone.trim().is_empty() {
            return Err(FollowUpError::Validation(
                "contact phone cannot be empty".to_string(),
            ));
        }

        self.check_start_conditions(&sequence, &request).await?;

        let first_step = self
            .stores
            .sequences
            .find_step(sequence.id, 1)
            .await?
            .ok_or_else(|| FollowUpError::not_found("Step", format!("{}#1", sequence.id)))?;

        let context = match request.context {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        let execution = Execution::new(
            sequence.id,
            sequence.organization_id,
            request.contact,
            context,
            request.trigger_data,
            first_step.scheduled_from(now)?,
            now,
        );

        self.stores.executions.create_execution(&execution).await?;
        self.stores.sequences.increment_executions(sequence.id).await?;

        info!(
            execution_id = %execution.id,
            "Started sequence '{}' for {}, first step at {:?}",
            sequence.name, execution.contact_phone, execution.next_scheduled_at
        );

        Ok(execution)
    }

    async fn check_start_conditions(
        &self,
        sequence: &Sequence,
        request: &StartExecution,
    ) -> Result<()> {
        let conditions = &sequence.conditions;
        let phone = request.contact.phone.as_str();

        if self
            .stores
            .executions
            .has_live_execution(sequence.id, phone)
            .await?
        {
            return Err(FollowUpError::InvalidState(format!(
                "{} already has a running execution of '{}'",
                phone, sequence.name
            )));
        }

        if let Some(text) = trigger_text(&request.trigger_data) {
            if let Some(keyword) = conditions.excluded_keyword_in(text) {
                return Err(FollowUpError::InvalidState(format!(
                    "trigger message contains excluded keyword '{}'",
                    keyword
                )));
            }
        }

        if let Some(min) = conditions.min_prior_messages {
            let seen = request
                .trigger_data
                .get("message_count")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            if seen < min {
                return Err(FollowUpError::InvalidState(format!(
                    "conversation has {} messages, sequence requires {}",
                    seen, min
                )));
            }
        }

        if let Some(max) = conditions.max_follow_ups_per_contact {
            let previous = self
                .stores
                .executions
                .count_for_contact(sequence.id, phone)
                .await?;
            if previous >= max {
                return Err(FollowUpError::InvalidState(format!(
                    "{} already received {} follow-ups from '{}'",
                    phone, previous, sequence.name
                )));
            }
        }

        Ok(())
    }

    /// Processes the next pending step of a due execution. Dispatch failures
    /// are recorded and reported as an outcome, not as an error.
    pub async fn advance(&self, execution: Execution, now: DateTime<Utc>) -> Result<AdvanceOutcome> {
        let mut execution = execution;
        if execution.status != ExecutionStatus::Active {
            return Ok(AdvanceOutcome::Superseded);
        }

        let step_order = execution.next_step_order();
        let sequence = self
            .stores
            .sequences
            .find_sequence(execution.sequence_id)
            .await?;

        let Some(step) = self
            .stores
            .sequences
            .find_step(execution.sequence_id, step_order)
            .await?
        else {
            execution.abandon(now)?;
            if !self.persist(&mut execution).await? {
                return Ok(AdvanceOutcome::Superseded);
            }
            info!(execution_id = %execution.id, "No step {}, execution abandoned", step_order);
            return Ok(AdvanceOutcome::Abandoned);
        };

        let deferral = match self.deferral(sequence.as_ref(), &step, &execution, now) {
            Ok(deferral) => deferral,
            Err(err) => return self.abandon_unschedulable(execution, step_order, err, now).await,
        };
        if let Some(opening) = deferral {
            execution.defer(opening)?;
            if !self.persist(&mut execution).await? {
                return Ok(AdvanceOutcome::Superseded);
            }
            debug!(execution_id = %execution.id, "Step {} deferred to {}", step_order, opening);
            return Ok(AdvanceOutcome::Deferred);
        }

        // Scheduled before sending; a step whose successor cannot be scheduled is never sent.
        let following = self.following_step(&execution, step_order).await?;
        let next_at = match following.map(|next| next.scheduled_from(now)).transpose() {
            Ok(next_at) => next_at,
            Err(err) => return self.abandon_unschedulable(execution, step_order, err, now).await,
        };

        if self.should_skip(&step, &execution).await? {
            execution.record_skipped(step_order, next_at, now)?;
            if !self.persist(&mut execution).await? {
                return Ok(AdvanceOutcome::Superseded);
            }
            info!(execution_id = %execution.id, "Step {} skipped, previous message unread", step_order);
            return Ok(AdvanceOutcome::Skipped { step_order });
        }

        let message = TemplateRenderer::render(&step.message_template, &execution.conversation_context);

        match self.dispatch(&execution, &message).await {
            Ok(external_message_id) => {
                let log = MessageLog::sent(execution.id, step_order, message, external_message_id, now);
                self.stores.executions.append_log(&log).await?;

                let outcome = match next_at {
                    Some(at) => {
                        execution.record_sent(step_order, at, now)?;
                        AdvanceOutcome::Sent { step_order }
                    }
                    None => {
                        execution.record_final_sent(step_order, now)?;
                        AdvanceOutcome::Completed { step_order }
                    }
                };

                if !self.persist(&mut execution).await? {
                    warn!(
                        execution_id = %execution.id,
                        "Step {} was sent but the execution changed meanwhile; keeping the newer state",
                        step_order
                    );
                    return Ok(AdvanceOutcome::Superseded);
                }

                info!(execution_id = %execution.id, "Sent step {} to {}", step_order, execution.contact_phone);
                Ok(outcome)
            }
            Err(err) => {
                let error_message = err.to_string();
                let log = MessageLog::failed(execution.id, step_order, message, error_message.clone(), now);
                self.stores.executions.append_log(&log).await?;

                let attempt = execution.failed_attempts + 1;
                execution.record_failure(self.config.retry.retry_at(now, attempt))?;

                let exhausted = step
                    .max_attempts()
                    .is_some_and(|max| execution.failed_attempts >= max);
                if exhausted {
                    execution.abandon(now)?;
                }

                if !self.persist(&mut execution).await? {
                    return Ok(AdvanceOutcome::Superseded);
                }

                if exhausted {
                    warn!(
                        execution_id = %execution.id,
                        "Step {} failed {} times, execution abandoned: {}",
                        step_order, execution.failed_attempts, error_message
                    );
                    return Ok(AdvanceOutcome::Abandoned);
                }

                warn!(
                    execution_id = %execution.id,
                    "Step {} dispatch failed (attempt {}): {}",
                    step_order, execution.failed_attempts, error_message
                );
                Ok(AdvanceOutcome::DispatchFailed { step_order })
            }
        }
    }

    async fn dispatch(&self, execution: &Execution, message: &str) -> Result<Option<String>> {
        let contact = execution.contact();
        let limit = self.config.dispatch_timeout;

        match timeout(limit, self.dispatcher.send(&contact, message)).await {
            Ok(Ok(receipt)) => Ok(receipt.external_message_id),
            Ok(Err(FollowUpError::Dispatch(reason))) => Err(FollowUpError::Dispatch(reason)),
            Ok(Err(other)) => Err(FollowUpError::Dispatch(other.to_string())),
            Err(_) => Err(FollowUpError::Dispatch(format!(
                "transport did not answer within {:?}",
                limit
            ))),
        }
    }

    /// Earliest time the step may go out, when that is later than `now`.
    fn deferral(
        &self,
        sequence: Option<&Sequence>,
        step: &SequenceStep,
        execution: &Execution,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let mut earliest = now;

        if let Some(minutes) = step
            .send_conditions
            .as_ref()
            .and_then(|c| c.min_minutes_since_start)
        {
            let allowed = Duration::try_minutes(minutes)
                .and_then(|wait| execution.started_at.checked_add_signed(wait))
                .ok_or_else(|| {
                    FollowUpError::Validation(format!(
                        "Step {} min_minutes_since_start of {} is out of range",
                        step.step_order, minutes
                    ))
                })?;
            earliest = earliest.max(allowed);
        }

        if let Some(hours) = sequence.and_then(|s| s.conditions.business_hours.as_ref()) {
            earliest = hours.next_open(earliest);
        }

        Ok((earliest > now).then_some(earliest))
    }

    async fn abandon_unschedulable(
        &self,
        mut execution: Execution,
        step_order: i32,
        err: FollowUpError,
        now: DateTime<Utc>,
    ) -> Result<AdvanceOutcome> {
        execution.abandon(now)?;
        if !self.persist(&mut execution).await? {
            return Ok(AdvanceOutcome::Superseded);
        }
        warn!(
            execution_id = %execution.id,
            "Step {} cannot be scheduled, execution abandoned: {}",
            step_order, err
        );
        Ok(AdvanceOutcome::Abandoned)
    }

    async fn should_skip(&self, step: &SequenceStep, execution: &Execution) -> Result<bool> {
        let requires_read = step
            .send_conditions
            .as_ref()
            .is_some_and(|c| c.require_previous_read);
        if !requires_read || step.step_order <= 1 {
            return Ok(false);
        }

        let previous = self
            .stores
            .executions
            .find_log(execution.id, step.step_order - 1)
            .await?;

        Ok(!previous.is_some_and(|log| log.delivery_status == DeliveryStatus::Read))
    }

    async fn following_step(
        &self,
        execution: &Execution,
        step_order: i32,
    ) -> Result<Option<SequenceStep>> {
        self.stores
            .sequences
            .find_step(execution.sequence_id, step_order + 1)
            .await
    }

    async fn persist(&self, execution: &mut Execution) -> Result<bool> {
        let saved = self.stores.executions.save_execution(execution).await?;
        if saved {
            execution.revision += 1;
        }
        Ok(saved)
    }

    /// Re-reads the execution and applies `apply` until the write lands.
    /// `apply` returns `false` when there is nothing to change.
    async fn transition<F>(&self, id: Uuid, apply: F) -> Result<(Execution, bool)>
    where
        F: Fn(&mut Execution) -> Result<bool> + Send + Sync,
    {
        for _ in 0..WRITE_ATTEMPTS {
            let mut execution = self.get_execution(id).await?;
            if !apply(&mut execution)? {
                return Ok((execution, false));
            }
            if self.persist(&mut execution).await? {
                return Ok((execution, true));
            }
            debug!(execution_id = %id, "Concurrent update, retrying transition");
        }

        Err(FollowUpError::InvalidState(format!(
            "execution {} is being modified concurrently",
            id
        )))
    }

    /// Cancels a non-terminal execution. On a terminal one this is a no-op
    /// that returns the execution unchanged.
    pub async fn cancel(&self, id: Uuid, now: DateTime<Utc>) -> Result<Execution> {
        self.cancel_execution(id, now).await.map(|(execution, _)| execution)
    }

    pub(crate) async fn cancel_execution(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(Execution, bool)> {
        let (execution, changed) = self.transition(id, |e| Ok(e.cancel(now))).await?;
        if changed {
            info!(execution_id = %id, "Execution cancelled");
        } else {
            debug!(execution_id = %id, "Cancel ignored, execution already {}", execution.status.as_str());
        }
        Ok((execution, changed))
    }

    pub async fn mark_converted(&self, id: Uuid, now: DateTime<Utc>) -> Result<Execution> {
        let (execution, _) = self
            .transition(id, |e| {
                e.mark_converted(now);
                Ok(true)
            })
            .await?;

        self.stores
            .sequences
            .increment_conversions(execution.sequence_id)
            .await?;

        info!(execution_id = %id, "Execution marked as converted");
        Ok(execution)
    }

    pub async fn pause(&self, id: Uuid) -> Result<Execution> {
        let (execution, _) = self.transition(id, |e| e.pause().map(|_| true)).await?;
        info!(execution_id = %id, "Execution paused");
        Ok(execution)
    }

    pub async fn resume(&self, id: Uuid) -> Result<Execution> {
        let (execution, _) = self.transition(id, |e| e.resume().map(|_| true)).await?;
        info!(execution_id = %id, "Execution resumed");
        Ok(execution)
    }

    pub async fn get_execution(&self, id: Uuid) -> Result<Execution> {
        self.stores
            .executions
            .find_execution(id)
            .await?
            .ok_or_else(|| FollowUpError::not_found("Execution", id))
    }

    pub async fn update_delivery_status(
        &self,
        id: Uuid,
        step_order: i32,
        status: DeliveryStatus,
    ) -> Result<()> {
        let updated = self
            .stores
            .executions
            .update_delivery_status(id, step_order, status)
            .await?;
        if !updated {
            return Err(FollowUpError::not_found("MessageLog", format!("{}#{}", id, step_order)));
        }
        debug!(execution_id = %id, "Step {} delivery status is now {:?}", step_order, status);
        Ok(())
    }

    pub async fn message_logs(&self, id: Uuid) -> Result<Vec<MessageLog>> {
        self.get_execution(id).await?;
        self.stores.executions.list_logs(id).await
    }
}

/// The inbound text that fired the trigger, if the trigger source sent one.
fn trigger_text(trigger_data: &Value) -> Option<&str> {
    ["message", "text", "last_message"]
        .iter()
        .find_map(|key| trigger_data.get(*key).and_then(Value::as_str))
}
