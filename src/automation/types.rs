//! Core automation domain types.
//!
//! Closed enums for automation types, schedule kinds, job statuses and
//! weekdays, plus the typed [`ScheduleConfig`] the HTTP layer parses user
//! JSON into before anything downstream sees it. Rows in the store keep
//! the canonical snake_case strings these types render to.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// The three automation types the platform runs per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AutomationType {
    MetadataRefresh,
    SchemaChangeDetection,
    ValidationAutomation,
}

impl AutomationType {
    pub const ALL: [AutomationType; 3] = [
        AutomationType::MetadataRefresh,
        AutomationType::SchemaChangeDetection,
        AutomationType::ValidationAutomation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AutomationType::MetadataRefresh => "metadata_refresh",
            AutomationType::SchemaChangeDetection => "schema_change_detection",
            AutomationType::ValidationAutomation => "validation_automation",
        }
    }
}

impl fmt::Display for AutomationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AutomationType {
    type Err = ScheduleConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "metadata_refresh" => Ok(AutomationType::MetadataRefresh),
            "schema_change_detection" => Ok(AutomationType::SchemaChangeDetection),
            "validation_automation" => Ok(AutomationType::ValidationAutomation),
            other => Err(ScheduleConfigError::InvalidAutomationType(
                other.to_string(),
            )),
        }
    }
}

/// Job lifecycle status; transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Scheduled => "scheduled",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// States a job may legally be in immediately before entering `self`.
    pub fn allowed_predecessors(&self) -> &'static [JobStatus] {
        match self {
            JobStatus::Scheduled => &[],
            JobStatus::Running => &[JobStatus::Scheduled],
            JobStatus::Completed => &[JobStatus::Running],
            // Submission failures and pre-start cancellations skip `running`.
            JobStatus::Failed => &[JobStatus::Scheduled, JobStatus::Running],
            JobStatus::Cancelled => &[JobStatus::Scheduled, JobStatus::Running],
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(JobStatus::Scheduled),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Weekday with Monday = 0, matching the next-run arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub fn index(&self) -> u32 {
        *self as u32
    }

    pub fn from_index(index: u32) -> Weekday {
        match index % 7 {
            0 => Weekday::Monday,
            1 => Weekday::Tuesday,
            2 => Weekday::Wednesday,
            3 => Weekday::Thursday,
            4 => Weekday::Friday,
            5 => Weekday::Saturday,
            _ => Weekday::Sunday,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Weekday::Monday => "monday",
            Weekday::Tuesday => "tuesday",
            Weekday::Wednesday => "wednesday",
            Weekday::Thursday => "thursday",
            Weekday::Friday => "friday",
            Weekday::Saturday => "saturday",
            Weekday::Sunday => "sunday",
        }
    }
}

impl FromStr for Weekday {
    type Err = ScheduleConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "monday" => Ok(Weekday::Monday),
            "tuesday" => Ok(Weekday::Tuesday),
            "wednesday" => Ok(Weekday::Wednesday),
            "thursday" => Ok(Weekday::Thursday),
            "friday" => Ok(Weekday::Friday),
            "saturday" => Ok(Weekday::Saturday),
            "sunday" => Ok(Weekday::Sunday),
            other => Err(ScheduleConfigError::InvalidDay(other.to_string())),
        }
    }
}

static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2}):(\d{2})$").expect("valid time regex"));

/// Wall-clock time of day in the user's timezone, zero-padded on output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = ScheduleConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = TIME_RE
            .captures(s)
            .ok_or_else(|| ScheduleConfigError::InvalidTime(s.to_string()))?;
        let hour: u32 = captures[1]
            .parse()
            .map_err(|_| ScheduleConfigError::InvalidTime(s.to_string()))?;
        let minute: u32 = captures[2]
            .parse()
            .map_err(|_| ScheduleConfigError::InvalidTime(s.to_string()))?;
        if hour > 23 || minute > 59 {
            return Err(ScheduleConfigError::InvalidTime(s.to_string()));
        }
        Ok(TimeOfDay { hour, minute })
    }
}

/// A validated schedule for one automation type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Daily {
        time: TimeOfDay,
        timezone: Tz,
    },
    Weekly {
        time: TimeOfDay,
        timezone: Tz,
        days: BTreeSet<Weekday>,
    },
}

impl Schedule {
    pub fn schedule_type(&self) -> &'static str {
        match self {
            Schedule::Daily { .. } => "daily",
            Schedule::Weekly { .. } => "weekly",
        }
    }

    pub fn time(&self) -> TimeOfDay {
        match self {
            Schedule::Daily { time, .. } | Schedule::Weekly { time, .. } => *time,
        }
    }

    pub fn timezone(&self) -> Tz {
        match self {
            Schedule::Daily { timezone, .. } | Schedule::Weekly { timezone, .. } => *timezone,
        }
    }

    pub fn days(&self) -> Option<&BTreeSet<Weekday>> {
        match self {
            Schedule::Daily { .. } => None,
            Schedule::Weekly { days, .. } => Some(days),
        }
    }
}

/// One automation type's entry: the enabled flag plus, when enabled, a
/// fully validated schedule. Disabled entries may omit schedule fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationSchedule {
    pub enabled: bool,
    pub schedule: Option<Schedule>,
}

/// The full per-connection schedule configuration keyed by automation type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScheduleConfig(pub BTreeMap<AutomationType, AutomationSchedule>);

/// Validation failures for user-supplied schedule configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleConfigError {
    #[error("invalid automation type: {0}")]
    InvalidAutomationType(String),
    #[error("config for {0} must be an object")]
    NotAnObject(String),
    #[error("missing or invalid 'enabled' field for {0}")]
    MissingEnabled(String),
    #[error("invalid schedule_type for {0}")]
    InvalidScheduleType(String),
    #[error("missing time field for {0}")]
    MissingTime(String),
    #[error("invalid time format '{0}', expected HH:MM")]
    InvalidTime(String),
    #[error("missing timezone for {0}")]
    MissingTimezone(String),
    #[error("invalid timezone '{0}'")]
    InvalidTimezone(String),
    #[error("weekly schedule requires at least one day for {0}")]
    MissingDays(String),
    #[error("invalid day '{0}'")]
    InvalidDay(String),
}

/// Wire shape of one entry, used for both parsing and normalised output.
#[derive(Debug, Serialize, Deserialize)]
struct RawSchedule {
    enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    schedule_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    days: Option<Vec<String>>,
}

impl ScheduleConfig {
    /// Parse and validate a user-supplied schedule configuration document.
    pub fn from_json(value: &JsonValue) -> Result<Self, ScheduleConfigError> {
        let object = value
            .as_object()
            .ok_or_else(|| ScheduleConfigError::NotAnObject("schedule_config".to_string()))?;

        let mut entries = BTreeMap::new();
        for (key, entry_value) in object {
            let automation_type: AutomationType = key.parse()?;

            if !entry_value.is_object() {
                return Err(ScheduleConfigError::NotAnObject(key.clone()));
            }
            let raw: RawSchedule = serde_json::from_value(entry_value.clone())
                .map_err(|_| ScheduleConfigError::MissingEnabled(key.clone()))?;

            let schedule = if raw.enabled {
                Some(Self::parse_schedule(key, &raw)?)
            } else {
                // Disabled entries keep whatever fields parse, so a later
                // re-enable round-trips the user's draft.
                Self::parse_schedule(key, &raw).ok()
            };

            entries.insert(
                automation_type,
                AutomationSchedule {
                    enabled: raw.enabled,
                    schedule,
                },
            );
        }

        Ok(ScheduleConfig(entries))
    }

    fn parse_schedule(key: &str, raw: &RawSchedule) -> Result<Schedule, ScheduleConfigError> {
        let schedule_type = raw
            .schedule_type
            .as_deref()
            .ok_or_else(|| ScheduleConfigError::InvalidScheduleType(key.to_string()))?;

        let time: TimeOfDay = raw
            .time
            .as_deref()
            .ok_or_else(|| ScheduleConfigError::MissingTime(key.to_string()))?
            .parse()?;

        let timezone_name = raw
            .timezone
            .as_deref()
            .ok_or_else(|| ScheduleConfigError::MissingTimezone(key.to_string()))?;
        let timezone: Tz = timezone_name
            .parse()
            .map_err(|_| ScheduleConfigError::InvalidTimezone(timezone_name.to_string()))?;

        match schedule_type {
            "daily" => Ok(Schedule::Daily { time, timezone }),
            "weekly" => {
                let names = raw
                    .days
                    .as_ref()
                    .filter(|days| !days.is_empty())
                    .ok_or_else(|| ScheduleConfigError::MissingDays(key.to_string()))?;
                let mut days = BTreeSet::new();
                for name in names {
                    days.insert(name.parse::<Weekday>()?);
                }
                Ok(Schedule::Weekly {
                    time,
                    timezone,
                    days,
                })
            }
            _ => Err(ScheduleConfigError::InvalidScheduleType(key.to_string())),
        }
    }

    /// Normalised JSON form (lowercase weekday names, zero-padded times).
    pub fn to_json(&self) -> JsonValue {
        let mut object = serde_json::Map::new();
        for (automation_type, entry) in &self.0 {
            let raw = match &entry.schedule {
                Some(schedule) => RawSchedule {
                    enabled: entry.enabled,
                    schedule_type: Some(schedule.schedule_type().to_string()),
                    time: Some(schedule.time().to_string()),
                    timezone: Some(schedule.timezone().name().to_string()),
                    days: schedule
                        .days()
                        .map(|days| days.iter().map(|d| d.as_str().to_string()).collect()),
                },
                None => RawSchedule {
                    enabled: entry.enabled,
                    schedule_type: None,
                    time: None,
                    timezone: None,
                    days: None,
                },
            };
            object.insert(
                automation_type.to_string(),
                serde_json::to_value(raw).expect("schedule serializes"),
            );
        }
        JsonValue::Object(object)
    }

    /// Entries that are enabled with a validated schedule.
    pub fn enabled_entries(&self) -> impl Iterator<Item = (AutomationType, &Schedule)> {
        self.0.iter().filter_map(|(automation_type, entry)| {
            if entry.enabled {
                entry.schedule.as_ref().map(|s| (*automation_type, s))
            } else {
                None
            }
        })
    }
}

/// Documented default configuration used when a connection has no stored
/// config: daily metadata refresh at 02:00 UTC, daily schema detection at
/// 03:00 UTC, validation automation disabled (weekly Sunday 01:00 UTC).
pub fn default_schedule_config() -> ScheduleConfig {
    let mut entries = BTreeMap::new();
    entries.insert(
        AutomationType::MetadataRefresh,
        AutomationSchedule {
            enabled: true,
            schedule: Some(Schedule::Daily {
                time: TimeOfDay { hour: 2, minute: 0 },
                timezone: chrono_tz::UTC,
            }),
        },
    );
    entries.insert(
        AutomationType::SchemaChangeDetection,
        AutomationSchedule {
            enabled: true,
            schedule: Some(Schedule::Daily {
                time: TimeOfDay { hour: 3, minute: 0 },
                timezone: chrono_tz::UTC,
            }),
        },
    );
    entries.insert(
        AutomationType::ValidationAutomation,
        AutomationSchedule {
            enabled: false,
            schedule: Some(Schedule::Weekly {
                time: TimeOfDay { hour: 1, minute: 0 },
                timezone: chrono_tz::UTC,
                days: BTreeSet::from([Weekday::Sunday]),
            }),
        },
    );
    ScheduleConfig(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_a_full_config() {
        let value = json!({
            "metadata_refresh": {
                "enabled": true,
                "schedule_type": "daily",
                "time": "02:00",
                "timezone": "America/New_York"
            },
            "validation_automation": {
                "enabled": true,
                "schedule_type": "weekly",
                "time": "01:00",
                "timezone": "UTC",
                "days": ["Monday", "thursday"]
            }
        });

        let config = ScheduleConfig::from_json(&value).expect("valid config");
        assert_eq!(config.0.len(), 2);

        let validation = &config.0[&AutomationType::ValidationAutomation];
        let schedule = validation.schedule.as_ref().expect("schedule present");
        assert_eq!(
            schedule.days().unwrap().iter().copied().collect::<Vec<_>>(),
            vec![Weekday::Monday, Weekday::Thursday]
        );
    }

    #[test]
    fn rejects_unknown_automation_type() {
        let value = json!({"anomaly_scan": {"enabled": true}});
        assert_eq!(
            ScheduleConfig::from_json(&value),
            Err(ScheduleConfigError::InvalidAutomationType(
                "anomaly_scan".to_string()
            ))
        );
    }

    #[test]
    fn rejects_bad_time_and_timezone() {
        let bad_time = json!({
            "metadata_refresh": {
                "enabled": true,
                "schedule_type": "daily",
                "time": "25:00",
                "timezone": "UTC"
            }
        });
        assert!(matches!(
            ScheduleConfig::from_json(&bad_time),
            Err(ScheduleConfigError::InvalidTime(_))
        ));

        let bad_tz = json!({
            "metadata_refresh": {
                "enabled": true,
                "schedule_type": "daily",
                "time": "02:00",
                "timezone": "Mars/Olympus_Mons"
            }
        });
        assert!(matches!(
            ScheduleConfig::from_json(&bad_tz),
            Err(ScheduleConfigError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn weekly_requires_days() {
        let value = json!({
            "validation_automation": {
                "enabled": true,
                "schedule_type": "weekly",
                "time": "01:00",
                "timezone": "UTC",
                "days": []
            }
        });
        assert!(matches!(
            ScheduleConfig::from_json(&value),
            Err(ScheduleConfigError::MissingDays(_))
        ));
    }

    #[test]
    fn disabled_entry_may_omit_schedule_fields() {
        let value = json!({"validation_automation": {"enabled": false}});
        let config = ScheduleConfig::from_json(&value).expect("valid config");
        let entry = &config.0[&AutomationType::ValidationAutomation];
        assert!(!entry.enabled);
        assert!(entry.schedule.is_none());
    }

    #[test]
    fn round_trip_normalises_case_and_padding() {
        let value = json!({
            "metadata_refresh": {
                "enabled": true,
                "schedule_type": "daily",
                "time": "2:05",
                "timezone": "UTC"
            },
            "validation_automation": {
                "enabled": true,
                "schedule_type": "weekly",
                "time": "01:00",
                "timezone": "UTC",
                "days": ["SUNDAY"]
            }
        });

        let config = ScheduleConfig::from_json(&value).expect("valid config");
        let normalised = config.to_json();

        assert_eq!(normalised["metadata_refresh"]["time"], "02:05");
        assert_eq!(normalised["validation_automation"]["days"], json!(["sunday"]));

        // Parsing the normalised form yields the same config.
        let reparsed = ScheduleConfig::from_json(&normalised).expect("valid config");
        assert_eq!(reparsed, config);
    }

    #[test]
    fn default_config_shape() {
        let config = default_schedule_config();
        let json = config.to_json();
        assert_eq!(json["metadata_refresh"]["time"], "02:00");
        assert_eq!(json["schema_change_detection"]["time"], "03:00");
        assert_eq!(json["validation_automation"]["enabled"], json!(false));
    }

    #[test]
    fn status_transition_rules() {
        assert!(
            JobStatus::Running
                .allowed_predecessors()
                .contains(&JobStatus::Scheduled)
        );
        assert!(
            !JobStatus::Running
                .allowed_predecessors()
                .contains(&JobStatus::Completed)
        );
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Scheduled.is_terminal());
    }
}
