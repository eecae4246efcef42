use uuid::Uuid;

use crate::error::{FollowUpError, Result};
use crate::models::stats::{ExecutionSummary, StatusBreakdown};
use crate::models::{Sequence, SequenceStats};
use crate::repositories::Stores;

pub struct StatsAggregator {
    stores: Stores,
}

impl StatsAggregator {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    pub async fn sequence_stats(&self, sequence_id: Uuid) -> Result<SequenceStats> {
        let sequence = self
            .stores
            .sequences
            .find_sequence(sequence_id)
            .await?
            .ok_or_else(|| FollowUpError::not_found("Sequence", sequence_id))?;

        let summary = self.stores.executions.summarize(sequence_id).await?;
        Ok(compute(&sequence, &summary))
    }

    pub async fn organization_stats(&self, organization_id: Uuid) -> Result<Vec<SequenceStats>> {
        let sequences = self.stores.sequences.list_sequences(organization_id).await?;

        let mut stats = Vec::with_capacity(sequences.len());
        for sequence in &sequences {
            let summary = self.stores.executions.summarize(sequence.id).await?;
            stats.push(compute(sequence, &summary));
        }
        Ok(stats)
    }
}

/// Counters come from the sequence row; the breakdown and averages from the
/// executions themselves.
pub fn compute(sequence: &Sequence, summary: &ExecutionSummary) -> SequenceStats {
    let conversion_rate = if sequence.total_executions > 0 {
        sequence.successful_conversions as f64 / sequence.total_executions as f64
    } else {
        0.0
    };

    let average_steps_to_conversion = (summary.converted > 0)
        .then(|| summary.converted_steps_total as f64 / summary.converted as f64);

    SequenceStats {
        sequence_id: sequence.id,
        total_executions: sequence.total_executions,
        successful_conversions: sequence.successful_conversions,
        conversion_rate,
        average_steps_to_conversion,
        total_messages_sent: summary.messages_sent,
        by_status: StatusBreakdown {
            active: summary.active,
            paused: summary.paused,
            completed: summary.completed,
            abandoned: summary.abandoned,
            cancelled: summary.cancelled,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CreateSequence;
    use serde_json::json;

    fn sequence(total: i64, conversions: i64) -> Sequence {
        let create: CreateSequence = serde_json::from_value(json!({
            "organization_id": Uuid::new_v4(),
            "name": "Reactivación",
            "trigger_type": "action",
            "trigger_config": {"action": "cart_abandoned"},
            "steps": []
        }))
        .unwrap();
        let mut sequence = Sequence::new(&create).unwrap();
        sequence.total_executions = total;
        sequence.successful_conversions = conversions;
        sequence
    }

    #[test]
    fn test_rates_from_counters() {
        let summary = ExecutionSummary {
            completed: 3,
            cancelled: 1,
            converted: 2,
            converted_steps_total: 5,
            messages_sent: 9,
            ..Default::default()
        };

        let stats = compute(&sequence(4, 2), &summary);
        assert_eq!(stats.conversion_rate, 0.5);
        assert_eq!(stats.average_steps_to_conversion, Some(2.5));
        assert_eq!(stats.total_messages_sent, 9);
        assert_eq!(stats.by_status.completed, 3);
    }

    #[test]
    fn test_empty_sequence() {
        let stats = compute(&sequence(0, 0), &ExecutionSummary::default());
        assert_eq!(stats.conversion_rate, 0.0);
        assert_eq!(stats.average_steps_to_conversion, None);
    }
}
