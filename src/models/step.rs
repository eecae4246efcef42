use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{FollowUpError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SequenceStep {
    pub id: Uuid,
    pub sequence_id: Uuid,

    pub step_order: i32,

    pub delay_amount: i64,
    pub delay_unit: DelayUnit,

    pub message_template: String,

    #[sqlx(json)]
    pub send_conditions: Option<SendConditions>,

    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "followup_delay_unit", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DelayUnit {
    Minutes,
    Hours,
    Days,
}

/// Longest wait a step delay or a `min_minutes_since_start` guard may ask for.
pub const MAX_STEP_DELAY_DAYS: i64 = 365;

impl DelayUnit {
    /// `None` when the amount does not fit in a `Duration`.
    pub fn duration(&self, amount: i64) -> Option<Duration> {
        match self {
            Self::Minutes => Duration::try_minutes(amount),
            Self::Hours => Duration::try_hours(amount),
            Self::Days => Duration::try_days(amount),
        }
    }
}

/// Per-step guards evaluated by the state machine right before sending.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SendConditions {
    /// Skip this step unless the previous step's message was read.
    #[serde(default)]
    pub require_previous_read: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_minutes_since_start: Option<i64>,

    /// Failed dispatches tolerated before the execution is abandoned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateStep {
    #[serde(default)]
    pub step_order: Option<i32>,

    pub delay_amount: i64,
    pub delay_unit: DelayUnit,

    pub message_template: String,

    #[serde(default)]
    pub send_conditions: Option<SendConditions>,
}

impl SequenceStep {
    pub fn delay(&self) -> Result<Duration> {
        self.delay_unit.duration(self.delay_amount).ok_or_else(|| {
            FollowUpError::Validation(format!(
                "Step {} delay of {} {:?} is out of range",
                self.step_order, self.delay_amount, self.delay_unit
            ))
        })
    }

    pub fn scheduled_from(&self, reference: DateTime<Utc>) -> Result<DateTime<Utc>> {
        reference.checked_add_signed(self.delay()?).ok_or_else(|| {
            FollowUpError::Validation(format!(
                "Step {} cannot be scheduled {} {:?} after {}",
                self.step_order, self.delay_amount, self.delay_unit, reference
            ))
        })
    }

    pub fn max_attempts(&self) -> Option<i32> {
        self.send_conditions.as_ref().and_then(|c| c.max_attempts)
    }
}

/// Validates a step list and assigns contiguous `step_order` values starting
/// at 1. Caller-supplied orders only decide the relative position; steps
/// without one keep their list position after the ordered ones.
pub fn build_steps(sequence_id: Uuid, steps: &[CreateStep]) -> Result<Vec<SequenceStep>> {
    if steps.is_empty() {
        return Err(FollowUpError::Validation(
            "A sequence needs at least one step".to_string(),
        ));
    }

    let mut indexed: Vec<(usize, &CreateStep)> = steps.iter().enumerate().collect();
    indexed.sort_by_key(|(idx, step)| (step.step_order.unwrap_or(i32::MAX), *idx));

    let now = Utc::now();
    let mut built = Vec::with_capacity(steps.len());

    for (position, (_, step)) in indexed.into_iter().enumerate() {
        let order = position as i32 + 1;

        if step.message_template.trim().is_empty() {
            return Err(FollowUpError::Validation(format!(
                "Step {} has an empty message template",
                order
            )));
        }
        if step.delay_amount < 0 {
            return Err(FollowUpError::Validation(format!(
                "Step {} has a negative delay",
                order
            )));
        }
        let too_long = step
            .delay_unit
            .duration(step.delay_amount)
            .is_none_or(|delay| delay > Duration::days(MAX_STEP_DELAY_DAYS));
        if too_long {
            return Err(FollowUpError::Validation(format!(
                "Step {} delay cannot exceed {} days",
                order, MAX_STEP_DELAY_DAYS
            )));
        }
        if let Some(minutes) = step
            .send_conditions
            .as_ref()
            .and_then(|c| c.min_minutes_since_start)
        {
            if !(0..=MAX_STEP_DELAY_DAYS * 24 * 60).contains(&minutes) {
                return Err(FollowUpError::Validation(format!(
                    "Step {} min_minutes_since_start must be between 0 and {} days",
                    order, MAX_STEP_DELAY_DAYS
                )));
            }
        }
        if matches!(
            step.send_conditions.as_ref().and_then(|c| c.max_attempts),
            Some(max) if max < 1
        ) {
            return Err(FollowUpError::Validation(format!(
                "Step {} max_attempts must be at least 1",
                order
            )));
        }

        built.push(SequenceStep {
            id: Uuid::new_v4(),
            sequence_id,
            step_order: order,
            delay_amount: step.delay_amount,
            delay_unit: step.delay_unit,
            message_template: step.message_template.clone(),
            send_conditions: step.send_conditions.clone(),
            created_at: now,
        });
    }

    Ok(built)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(order: Option<i32>, template: &str) -> CreateStep {
        CreateStep {
            step_order: order,
            delay_amount: 1,
            delay_unit: DelayUnit::Hours,
            message_template: template.to_string(),
            send_conditions: None,
        }
    }

    #[test]
    fn test_orders_are_contiguous_from_one() {
        let sequence_id = Uuid::new_v4();
        let steps = build_steps(
            sequence_id,
            &[step(Some(10), "third"), step(Some(2), "first"), step(Some(5), "second")],
        )
        .unwrap();

        let orders: Vec<i32> = steps.iter().map(|s| s.step_order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        assert_eq!(steps[0].message_template, "first");
        assert_eq!(steps[2].message_template, "third");
        assert!(steps.iter().all(|s| s.sequence_id == sequence_id));
    }

    #[test]
    fn test_unordered_steps_keep_list_position() {
        let steps = build_steps(Uuid::new_v4(), &[step(None, "a"), step(None, "b")]).unwrap();
        assert_eq!(steps[0].message_template, "a");
        assert_eq!(steps[1].step_order, 2);
    }

    #[test]
    fn test_invalid_step_lists() {
        assert!(build_steps(Uuid::new_v4(), &[]).is_err());
        assert!(build_steps(Uuid::new_v4(), &[step(None, "   ")]).is_err());

        let mut negative = step(None, "hola");
        negative.delay_amount = -5;
        assert!(build_steps(Uuid::new_v4(), &[negative]).is_err());
    }

    #[test]
    fn test_delay_units() {
        assert_eq!(DelayUnit::Minutes.duration(90), Some(Duration::minutes(90)));
        assert_eq!(DelayUnit::Hours.duration(2), Some(Duration::hours(2)));
        assert_eq!(DelayUnit::Days.duration(1), Some(Duration::hours(24)));
        assert_eq!(DelayUnit::Days.duration(i64::MAX), None);
    }

    #[test]
    fn test_out_of_range_delays_are_rejected() {
        let mut huge = step(None, "hola");
        huge.delay_amount = 1_000_000_000;
        huge.delay_unit = DelayUnit::Days;
        let err = build_steps(Uuid::new_v4(), &[step(None, "first"), huge]).unwrap_err();
        assert!(matches!(err, FollowUpError::Validation(_)));

        let mut overflowing = step(None, "hola");
        overflowing.delay_amount = i64::MAX;
        overflowing.delay_unit = DelayUnit::Minutes;
        assert!(build_steps(Uuid::new_v4(), &[overflowing]).is_err());

        let mut year = step(None, "hola");
        year.delay_amount = MAX_STEP_DELAY_DAYS;
        year.delay_unit = DelayUnit::Days;
        assert!(build_steps(Uuid::new_v4(), &[year]).is_ok());
    }

    #[test]
    fn test_min_minutes_since_start_bounds() {
        for minutes in [-1, i64::MAX] {
            let mut guarded = step(None, "hola");
            guarded.send_conditions = Some(SendConditions {
                min_minutes_since_start: Some(minutes),
                ..Default::default()
            });
            assert!(build_steps(Uuid::new_v4(), &[guarded]).is_err());
        }
    }

    #[test]
    fn test_scheduled_from_reports_overflow() {
        let mut built = build_steps(Uuid::new_v4(), &[step(None, "hola")]).unwrap();
        let reference = Utc::now();
        assert_eq!(built[0].scheduled_from(reference).unwrap(), reference + Duration::hours(1));

        // Rows written before the delay cap existed are not trusted either.
        built[0].delay_amount = 1_000_000_000;
        built[0].delay_unit = DelayUnit::Days;
        assert!(built[0].scheduled_from(reference).is_err());
    }
}
