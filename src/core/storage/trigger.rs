use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::core::error::SchedulingError;

/// Persisted trigger specification, tagged by `trigger` in the record's
/// `schedule` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "lowercase")]
pub enum TriggerSpec {
    Interval(IntervalSpec),
    Cron(CronSpec),
    Date {
        run_date: DateTime<Utc>,
    },
    /// Handler-only records carry no timer.
    #[serde(rename = "none")]
    Unscheduled,
}

impl TriggerSpec {
    pub fn every_minutes(minutes: u64) -> Self {
        TriggerSpec::Interval(IntervalSpec {
            minutes: Some(minutes),
            ..IntervalSpec::default()
        })
    }

    pub fn every_seconds(seconds: u64) -> Self {
        TriggerSpec::Interval(IntervalSpec {
            seconds: Some(seconds),
            ..IntervalSpec::default()
        })
    }

    /// Daily at `hour:minute` (UTC).
    pub fn daily_at(hour: u32, minute: u32) -> Self {
        TriggerSpec::Cron(CronSpec {
            hour: Some(hour.to_string()),
            minute: Some(minute.to_string()),
            ..CronSpec::default()
        })
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            TriggerSpec::Interval(_) => "interval",
            TriggerSpec::Cron(_) => "cron",
            TriggerSpec::Date { .. } => "date",
            TriggerSpec::Unscheduled => "none",
        }
    }

    pub fn is_timed(&self) -> bool {
        !matches!(self, TriggerSpec::Unscheduled)
    }

    /// A one-shot date whose moment has passed. Such a job has already had its
    /// only run (or missed it) and can never be scheduled again.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self, TriggerSpec::Date { run_date } if *run_date <= now)
    }

    /// Checks the parameters without touching any engine.
    pub fn check(&self) -> Result<(), SchedulingError> {
        match self {
            TriggerSpec::Interval(interval) => interval.period().map(|_| ()),
            TriggerSpec::Cron(cron) => cron.to_expression().map(|_| ()),
            TriggerSpec::Date { run_date } => {
                if self.is_expired(Utc::now()) {
                    Err(SchedulingError::InvalidSpec(format!(
                        "run date {} is in the past",
                        run_date.to_rfc3339()
                    )))
                } else {
                    Ok(())
                }
            }
            TriggerSpec::Unscheduled => Err(SchedulingError::UnsupportedTrigger("none".into())),
        }
    }
}

impl fmt::Display for TriggerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSpec::Interval(interval) => write!(f, "interval ({})", interval),
            TriggerSpec::Cron(cron) => match cron.to_expression() {
                Ok(expr) => write!(f, "cron ({})", expr),
                Err(_) => f.write_str("cron (invalid)"),
            },
            TriggerSpec::Date { run_date } => {
                write!(f, "date ({})", run_date.format("%Y-%m-%d %H:%M:%S"))
            }
            TriggerSpec::Unscheduled => f.write_str("none"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weeks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds: Option<u64>,
}

impl IntervalSpec {
    fn units(&self) -> [(u64, &'static str, u64); 5] {
        [
            (self.weeks.unwrap_or(0), "week", 7 * 24 * 3600),
            (self.days.unwrap_or(0), "day", 24 * 3600),
            (self.hours.unwrap_or(0), "hour", 3600),
            (self.minutes.unwrap_or(0), "minute", 60),
            (self.seconds.unwrap_or(0), "second", 1),
        ]
    }

    pub fn period(&self) -> Result<Duration, SchedulingError> {
        let mut total: u64 = 0;
        for (count, _, secs) in self.units() {
            total = count
                .checked_mul(secs)
                .and_then(|s| total.checked_add(s))
                .ok_or_else(|| SchedulingError::InvalidSpec("interval overflows".into()))?;
        }
        if total == 0 {
            return Err(SchedulingError::InvalidSpec(
                "interval must be longer than zero seconds".into(),
            ));
        }
        Ok(Duration::from_secs(total))
    }
}

impl fmt::Display for IntervalSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .units()
            .iter()
            .filter(|(count, _, _)| *count > 0)
            .map(|(count, unit, _)| {
                if *count == 1 {
                    format!("1 {}", unit)
                } else {
                    format!("{} {}s", count, unit)
                }
            })
            .collect();
        if parts.is_empty() {
            f.write_str("never")
        } else {
            write!(f, "every {}", parts.join(" "))
        }
    }
}

/// Cron fields in the usual "field = value" form, or a raw expression.
///
/// Unset fields more significant than the least significant one given are
/// `*`; less significant ones take their minimum. `day_of_week` is always `*`
/// when unset. `hour = 8` therefore means 08:00:00 every day and
/// `day_of_week = "mon", minute = 15` means quarter past every hour on Mondays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(
        default,
        deserialize_with = "cron_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub year: Option<String>,
    #[serde(
        default,
        deserialize_with = "cron_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub month: Option<String>,
    #[serde(
        default,
        deserialize_with = "cron_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub day: Option<String>,
    /// ISO week of the year. Stored records may carry it, but no engine here
    /// can fire on it, so it is rejected rather than ignored.
    #[serde(
        default,
        deserialize_with = "cron_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub week: Option<String>,
    #[serde(
        default,
        deserialize_with = "cron_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub day_of_week: Option<String>,
    #[serde(
        default,
        deserialize_with = "cron_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub hour: Option<String>,
    #[serde(
        default,
        deserialize_with = "cron_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub minute: Option<String>,
    #[serde(
        default,
        deserialize_with = "cron_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub second: Option<String>,
}

impl CronSpec {
    /// Renders a six or seven field expression (seconds first).
    pub fn to_expression(&self) -> Result<String, SchedulingError> {
        if let Some(expr) = &self.expression {
            let fields = expr.split_whitespace().count();
            return match fields {
                5 => Ok(format!("0 {}", expr.trim())),
                6 | 7 => Ok(expr.trim().to_string()),
                _ => Err(SchedulingError::InvalidSpec(format!(
                    "cron expression '{}' has {} fields",
                    expr, fields
                ))),
            };
        }

        if self.week.is_some() {
            return Err(SchedulingError::InvalidSpec(
                "cron field 'week' is not supported".into(),
            ));
        }

        // Most significant first, with the value used when unset below the
        // least significant set field.
        let ordered: [(&Option<String>, &str); 7] = [
            (&self.year, "*"),
            (&self.month, "1"),
            (&self.day, "1"),
            (&self.day_of_week, "*"),
            (&self.hour, "0"),
            (&self.minute, "0"),
            (&self.second, "0"),
        ];
        let Some(last_set) = ordered.iter().rposition(|(v, _)| v.is_some()) else {
            return Err(SchedulingError::InvalidSpec(
                "cron trigger needs at least one field".into(),
            ));
        };

        let mut resolved: Vec<String> = Vec::with_capacity(ordered.len());
        for (idx, (value, minimum)) in ordered.iter().enumerate() {
            let field = match value {
                Some(v) => v.trim().to_string(),
                None if idx > last_set => minimum.to_string(),
                None => "*".to_string(),
            };
            if field.is_empty() {
                return Err(SchedulingError::InvalidSpec("empty cron field".into()));
            }
            resolved.push(field);
        }
        let [year, month, day, dow, hour, minute, second] = <[String; 7]>::try_from(resolved)
            .map_err(|_| SchedulingError::InvalidSpec("cron field count".into()))?;

        let mut expr = format!("{} {} {} {} {} {}", second, minute, hour, day, month, dow);
        if year != "*" {
            expr.push(' ');
            expr.push_str(&year);
        }
        Ok(expr)
    }
}

/// Cron fields may be written as numbers (`"hour": 8`) or strings (`"hour": "*/2"`).
fn cron_field<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Field {
        Number(u64),
        Text(String),
    }

    Ok(match Option::<Field>::deserialize(deserializer)? {
        Some(Field::Number(n)) => Some(n.to_string()),
        Some(Field::Text(s)) => Some(s),
        None => None,
    })
}
