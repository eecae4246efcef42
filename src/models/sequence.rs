use chrono::{DateTime, Datelike, Duration, FixedOffset, Offset, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::step::CreateStep;
use crate::error::{FollowUpError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequence {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,

    pub description: Option<String>,

    pub enabled: bool,

    #[serde(flatten)]
    pub trigger: TriggerConfig,

    pub strategy: Strategy,

    pub conditions: SequenceConditions,

    pub total_executions: i64,
    pub successful_conversions: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for Sequence {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        use sqlx::Row;

        let trigger_type: String = row.try_get("trigger_type")?;
        let trigger_config: serde_json::Value = row.try_get("trigger_config")?;
        let trigger = TriggerConfig::from_parts(&trigger_type, trigger_config)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        let strategy: String = row.try_get("strategy")?;
        let conditions: serde_json::Value = row.try_get("conditions")?;

        Ok(Self {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            enabled: row.try_get("enabled")?,
            trigger,
            strategy: Strategy::parse(&strategy).unwrap_or_default(),
            conditions: serde_json::from_value(conditions)
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
            total_executions: row.try_get("total_executions")?,
            successful_conversions: row.try_get("successful_conversions")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// What starts an execution. Evaluated by an external trigger source; the
/// engine only stores and validates it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "trigger_type", content = "trigger_config", rename_all = "snake_case")]
pub enum TriggerConfig {
    Keyword(KeywordTrigger),
    Variable(VariableTrigger),
    ConversationState(ConversationStateTrigger),
    BotStage(BotStageTrigger),
    TimeBased(TimeBasedTrigger),
    Action(ActionTrigger),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeywordTrigger {
    pub keywords: Vec<String>,

    #[serde(default)]
    pub match_mode: KeywordMatch,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeywordMatch {
    #[default]
    Contains,
    Exact,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariableTrigger {
    pub variable: String,
    pub operator: String,

    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationStateTrigger {
    pub state: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub inactivity_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BotStageTrigger {
    pub stage: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeBasedTrigger {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionTrigger {
    pub action: String,
}

impl TriggerConfig {
    pub fn trigger_type(&self) -> &'static str {
        match self {
            Self::Keyword(_) => "keyword",
            Self::Variable(_) => "variable",
            Self::ConversationState(_) => "conversation_state",
            Self::BotStage(_) => "bot_stage",
            Self::TimeBased(_) => "time_based",
            Self::Action(_) => "action",
        }
    }

    /// Payload without the tag, as stored in the `trigger_config` column.
    pub fn payload(&self) -> Result<serde_json::Value> {
        let value = match self {
            Self::Keyword(c) => serde_json::to_value(c)?,
            Self::Variable(c) => serde_json::to_value(c)?,
            Self::ConversationState(c) => serde_json::to_value(c)?,
            Self::BotStage(c) => serde_json::to_value(c)?,
            Self::TimeBased(c) => serde_json::to_value(c)?,
            Self::Action(c) => serde_json::to_value(c)?,
        };
        Ok(value)
    }

    /// Rebuilds the variant from the two stored columns. Fields belonging to
    /// other variants are ignored.
    pub fn from_parts(trigger_type: &str, config: serde_json::Value) -> Result<Self> {
        let trigger = match trigger_type {
            "keyword" => Self::Keyword(serde_json::from_value(config)?),
            "variable" => Self::Variable(serde_json::from_value(config)?),
            "conversation_state" => Self::ConversationState(serde_json::from_value(config)?),
            "bot_stage" => Self::BotStage(serde_json::from_value(config)?),
            "time_based" => Self::TimeBased(serde_json::from_value(config)?),
            "action" => Self::Action(serde_json::from_value(config)?),
            other => {
                return Err(FollowUpError::Validation(format!(
                    "Unknown trigger type '{}'",
                    other
                )))
            }
        };
        Ok(trigger)
    }

    pub fn validate(&self) -> Result<()> {
        let problem = match self {
            Self::Keyword(c) if c.keywords.iter().all(|k| k.trim().is_empty()) => {
                Some("keyword trigger needs at least one keyword")
            }
            Self::Variable(c) if c.variable.trim().is_empty() => {
                Some("variable trigger needs a variable name")
            }
            Self::ConversationState(c) if c.state.trim().is_empty() => {
                Some("conversation_state trigger needs a state")
            }
            Self::ConversationState(ConversationStateTrigger {
                inactivity_minutes: Some(m),
                ..
            }) if *m <= 0 => Some("inactivity_minutes must be positive"),
            Self::BotStage(c) if c.stage.trim().is_empty() => {
                Some("bot_stage trigger needs a stage")
            }
            Self::TimeBased(c) if c.at.is_none() && c.after_minutes.is_none() => {
                Some("time_based trigger needs 'at' or 'after_minutes'")
            }
            Self::Action(c) if c.action.trim().is_empty() => {
                Some("action trigger needs an action name")
            }
            _ => None,
        };

        match problem {
            Some(msg) => Err(FollowUpError::Validation(msg.to_string())),
            None => Ok(()),
        }
    }
}

/// Tone hint for message authors. Has no effect on scheduling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Passive,
    #[default]
    Moderate,
    Aggressive,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passive => "passive",
            Self::Moderate => "moderate",
            Self::Aggressive => "aggressive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "passive" => Some(Self::Passive),
            "moderate" => Some(Self::Moderate),
            "aggressive" => Some(Self::Aggressive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SequenceConditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_prior_messages: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_follow_ups_per_contact: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_hours: Option<BusinessHours>,

    #[serde(default)]
    pub excluded_keywords: Vec<String>,
}

impl SequenceConditions {
    pub fn validate(&self) -> Result<()> {
        if let Some(hours) = &self.business_hours {
            hours.validate()?;
        }
        if matches!(self.max_follow_ups_per_contact, Some(max) if max < 1) {
            return Err(FollowUpError::Validation(
                "max_follow_ups_per_contact must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// First excluded keyword found in `text`, compared case-insensitively.
    pub fn excluded_keyword_in(&self, text: &str) -> Option<&str> {
        let text = text.to_lowercase();
        self.excluded_keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .find(|k| text.contains(&k.to_lowercase()))
    }
}

/// Sending window. Hours are local to `utc_offset_minutes`, `end_hour` is
/// exclusive. Days use 0 = Sunday .. 6 = Saturday; empty means every day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusinessHours {
    pub start_hour: u32,
    pub end_hour: u32,

    #[serde(default)]
    pub days_of_week: Vec<u32>,

    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl BusinessHours {
    pub fn validate(&self) -> Result<()> {
        if self.start_hour >= self.end_hour || self.end_hour > 24 {
            return Err(FollowUpError::Validation(format!(
                "business hours {}..{} are not a valid window",
                self.start_hour, self.end_hour
            )));
        }
        if self.days_of_week.iter().any(|d| *d > 6) {
            return Err(FollowUpError::Validation(
                "days_of_week must be between 0 (Sunday) and 6 (Saturday)".to_string(),
            ));
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(FollowUpError::Validation(
                "utc_offset_minutes out of range".to_string(),
            ));
        }
        Ok(())
    }

    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or(Utc.fix())
    }

    fn day_allowed(&self, weekday: u32) -> bool {
        self.days_of_week.is_empty() || self.days_of_week.contains(&weekday)
    }

    pub fn is_open(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&self.offset());
        self.day_allowed(local.weekday().num_days_from_sunday())
            && local.hour() >= self.start_hour
            && local.hour() < self.end_hour
    }

    /// `at` itself when the window is open, otherwise the next opening.
    pub fn next_open(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        if self.is_open(at) {
            return at;
        }

        let offset = self.offset();
        let local = at.with_timezone(&offset);
        let today = local.date_naive();

        for days_ahead in 0..=7 {
            let date = today + Duration::days(days_ahead);
            if !self.day_allowed(date.weekday().num_days_from_sunday()) {
                continue;
            }
            let Some(opening) = date.and_hms_opt(self.start_hour, 0, 0) else {
                continue;
            };
            let Some(opening) = offset.from_local_datetime(&opening).single() else {
                continue;
            };
            let opening = opening.with_timezone(&Utc);
            if opening > at {
                return opening;
            }
        }

        at
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateSequence {
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(flatten)]
    pub trigger: TriggerConfig,

    #[serde(default)]
    pub strategy: Strategy,

    #[serde(default)]
    pub conditions: SequenceConditions,

    pub steps: Vec<CreateStep>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateSequence {
    pub name: Option<String>,
    pub description: Option<String>,
    pub enabled: Option<bool>,

    #[serde(flatten)]
    pub trigger: Option<TriggerConfig>,

    pub strategy: Option<Strategy>,
    pub conditions: Option<SequenceConditions>,

    pub steps: Option<Vec<CreateStep>>,
}

impl Sequence {
    pub fn new(create: &CreateSequence) -> Result<Self> {
        if create.name.trim().is_empty() {
            return Err(FollowUpError::Validation(
                "Sequence name cannot be empty".to_string(),
            ));
        }
        create.trigger.validate()?;
        create.conditions.validate()?;

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            organization_id: create.organization_id,
            name: create.name.trim().to_string(),
            description: create.description.clone(),
            enabled: create.enabled,
            trigger: create.trigger.clone(),
            strategy: create.strategy,
            conditions: create.conditions.clone(),
            total_executions: 0,
            successful_conversions: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Applies the scalar part of a patch. Steps are handled by the store.
    pub fn apply(&mut self, patch: &UpdateSequence) -> Result<()> {
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(FollowUpError::Validation(
                    "Sequence name cannot be empty".to_string(),
                ));
            }
            self.name = name.trim().to_string();
        }
        if let Some(description) = &patch.description {
            self.description = Some(description.clone());
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(trigger) = &patch.trigger {
            trigger.validate()?;
            self.trigger = trigger.clone();
        }
        if let Some(strategy) = patch.strategy {
            self.strategy = strategy;
        }
        if let Some(conditions) = &patch.conditions {
            conditions.validate()?;
            self.conditions = conditions.clone();
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trigger_is_tagged_by_type() {
        let create: CreateSequence = serde_json::from_value(json!({
            "organization_id": Uuid::new_v4(),
            "name": "Carrito Abandonado",
            "trigger_type": "keyword",
            "trigger_config": {"keywords": ["precio", "carrito"]},
            "steps": [{"delay_amount": 1, "delay_unit": "hours", "message_template": "Hola {nombre}"}]
        }))
        .unwrap();

        match &create.trigger {
            TriggerConfig::Keyword(k) => {
                assert_eq!(k.keywords.len(), 2);
                assert_eq!(k.match_mode, KeywordMatch::Contains);
            }
            other => panic!("Expected keyword trigger, got {:?}", other),
        }
        assert_eq!(create.strategy, Strategy::Moderate);
        assert!(create.enabled);
    }

    #[test]
    fn test_foreign_variant_fields_are_ignored() {
        let trigger = TriggerConfig::from_parts(
            "bot_stage",
            json!({"stage": "checkout", "keywords": ["ignored"], "inactivity_minutes": 5}),
        )
        .unwrap();

        assert_eq!(
            trigger,
            TriggerConfig::BotStage(BotStageTrigger {
                stage: "checkout".to_string()
            })
        );
        assert_eq!(trigger.payload().unwrap(), json!({"stage": "checkout"}));
    }

    #[test]
    fn test_unknown_trigger_type_rejected() {
        let result = TriggerConfig::from_parts("telepathy", json!({}));
        assert!(matches!(result, Err(FollowUpError::Validation(_))));
    }

    #[test]
    fn test_trigger_validation() {
        let empty = TriggerConfig::Keyword(KeywordTrigger {
            keywords: vec!["  ".to_string()],
            match_mode: KeywordMatch::Exact,
        });
        assert!(empty.validate().is_err());

        let time = TriggerConfig::TimeBased(TimeBasedTrigger {
            at: None,
            after_minutes: None,
        });
        assert!(time.validate().is_err());

        let inactivity = TriggerConfig::ConversationState(ConversationStateTrigger {
            state: "idle".to_string(),
            inactivity_minutes: Some(30),
        });
        assert!(inactivity.validate().is_ok());
    }

    #[test]
    fn test_excluded_keywords_case_insensitive() {
        let conditions = SequenceConditions {
            excluded_keywords: vec!["STOP".to_string(), "baja".to_string()],
            ..Default::default()
        };

        assert_eq!(conditions.excluded_keyword_in("por favor stop"), Some("STOP"));
        assert_eq!(conditions.excluded_keyword_in("quiero comprar"), None);
    }

    #[test]
    fn test_business_hours_window() {
        // 09:00-18:00 at UTC-3, Monday to Friday
        let hours = BusinessHours {
            start_hour: 9,
            end_hour: 18,
            days_of_week: vec![1, 2, 3, 4, 5],
            utc_offset_minutes: -180,
        };
        assert!(hours.validate().is_ok());

        // Wednesday 2024-05-15 15:00 UTC = 12:00 local
        let open = Utc.with_ymd_and_hms(2024, 5, 15, 15, 0, 0).unwrap();
        assert!(hours.is_open(open));
        assert_eq!(hours.next_open(open), open);

        // Wednesday 23:00 UTC = 20:00 local, next opening Thursday 09:00 local
        let evening = Utc.with_ymd_and_hms(2024, 5, 15, 23, 0, 0).unwrap();
        assert!(!hours.is_open(evening));
        assert_eq!(
            hours.next_open(evening),
            Utc.with_ymd_and_hms(2024, 5, 16, 12, 0, 0).unwrap()
        );

        // Saturday 2024-05-18 14:00 UTC, next opening Monday 09:00 local
        let saturday = Utc.with_ymd_and_hms(2024, 5, 18, 14, 0, 0).unwrap();
        assert_eq!(
            hours.next_open(saturday),
            Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_invalid_business_hours() {
        let hours = BusinessHours {
            start_hour: 18,
            end_hour: 9,
            days_of_week: vec![],
            utc_offset_minutes: 0,
        };
        assert!(hours.validate().is_err());

        let bad_day = BusinessHours {
            start_hour: 9,
            end_hour: 18,
            days_of_week: vec![7],
            utc_offset_minutes: 0,
        };
        assert!(bad_day.validate().is_err());
    }
}
