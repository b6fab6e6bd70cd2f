//! Cron schedules and runtime triggers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TollgateError};

/// A validated cron expression.
///
/// Accepts the classic 5-field form (minute precision) as well as the 6/7-field
/// form with seconds (and optional year). 5-field expressions are stored with a
/// leading `0` seconds field so both spellings compare equal.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    /// Parse and normalize a cron expression.
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let normalized = match fields.len() {
            5 => format!("0 {}", fields.join(" ")),
            6 | 7 => fields.join(" "),
            n => {
                return Err(TollgateError::invalid_cron(
                    expression,
                    format!("expected 5, 6 or 7 fields, found {}", n),
                ))
            }
        };

        let schedule = cron::Schedule::from_str(&normalized)
            .map_err(|e| TollgateError::invalid_cron(expression, e.to_string()))?;

        Ok(Self {
            expression: normalized,
            schedule,
        })
    }

    /// Normalized expression.
    pub fn as_str(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Next fire time from now.
    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.schedule.upcoming(Utc).next()
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Eq for CronSchedule {}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

/// When a stored job should next run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Fire once, then clear
    Once { fire_at: DateTime<Utc> },
    /// Fire on a cron schedule, re-arming after each run
    Cron {
        expression: String,
        next_fire_at: DateTime<Utc>,
    },
}

impl Trigger {
    pub fn once(fire_at: DateTime<Utc>) -> Self {
        Self::Once { fire_at }
    }

    /// Arm a cron trigger at its next fire time.
    pub fn cron(schedule: &CronSchedule) -> Result<Self> {
        let next_fire_at = schedule.next_fire().ok_or_else(|| {
            TollgateError::invalid_cron(schedule.as_str(), "schedule never fires")
        })?;
        Ok(Self::Cron {
            expression: schedule.as_str().to_string(),
            next_fire_at,
        })
    }

    pub fn fire_at(&self) -> DateTime<Utc> {
        match self {
            Self::Once { fire_at } => *fire_at,
            Self::Cron { next_fire_at, .. } => *next_fire_at,
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, Self::Cron { .. })
    }

    /// The trigger that follows a firing at `fired_at`, if any.
    pub fn rearm(&self, fired_at: DateTime<Utc>) -> Option<Self> {
        match self {
            Self::Once { .. } => None,
            Self::Cron { expression, .. } => {
                let schedule = CronSchedule::parse(expression).ok()?;
                let next_fire_at = schedule.next_after(fired_at)?;
                Some(Self::Cron {
                    expression: expression.clone(),
                    next_fire_at,
                })
            }
        }
    }
}
