//! Schedule manager
//!
//! Translates validated schedule configurations into materialised
//! next-run rows and owns the canonical next-run computation: candidates
//! are built as wall-clock times in the user's timezone and converted to
//! UTC through the timezone database, so a "02:00 local" schedule
//! survives DST shifts without drifting.

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use sea_orm::{DatabaseConnection, DbErr};
use serde_json::{Value as JsonValue, json};
use tracing::{info, warn};
use uuid::Uuid;

use super::types::{Schedule, ScheduleConfig, TimeOfDay, Weekday, default_schedule_config};
use crate::models::scheduled_job::Model as ScheduledJobModel;
use crate::repositories::automation_config::{AutomationConfigRepository, NewScheduledJob};
use crate::repositories::automation_job::AutomationJobRepository;
use crate::repositories::scheduled_job::ScheduledJobRepository;

/// Resolve a naive local wall-clock time against the timezone database.
///
/// Spring-forward gaps resolve to the first valid instant one hour later;
/// fall-back ambiguity resolves to the earlier offset.
fn resolve_local(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => Some(dt),
        chrono::LocalResult::Ambiguous(earliest, _) => Some(earliest),
        chrono::LocalResult::None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest(),
    }
}

/// Compute the next run instant for a schedule, strictly after `from`.
pub fn compute_next_run(schedule: &Schedule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let tz = schedule.timezone();
    let time = schedule.time();
    let now_local = from.with_timezone(&tz);

    match schedule {
        Schedule::Daily { .. } => {
            let mut date = now_local.date_naive();
            let mut candidate = resolve_local(tz, date.and_hms_opt(time.hour, time.minute, 0)?)?;
            if candidate <= from {
                date = date.succ_opt()?;
                candidate = resolve_local(tz, date.and_hms_opt(time.hour, time.minute, 0)?)?;
            }
            Some(candidate.with_timezone(&Utc))
        }
        Schedule::Weekly { days, .. } => {
            let today_index = now_local.weekday().num_days_from_monday();

            // Smallest day offset whose weekday is configured; today only
            // counts while the wall-clock time is still ahead.
            for offset in 0u32..=7 {
                let weekday = Weekday::from_index(today_index + offset);
                if !days.contains(&weekday) {
                    continue;
                }

                let date = now_local.date_naive() + Duration::days(offset as i64);
                let Some(candidate) =
                    resolve_local(tz, date.and_hms_opt(time.hour, time.minute, 0)?)
                else {
                    continue;
                };
                if candidate <= from {
                    continue;
                }
                return Some(candidate.with_timezone(&Utc));
            }
            None
        }
    }
}

/// Human-readable delta until a target instant.
fn format_time_until(target: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = target - now;
    let total_seconds = delta.num_seconds();
    if total_seconds <= 0 {
        return "overdue".to_string();
    }

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3_600;
    let minutes = (total_seconds % 3_600) / 60;

    if days > 0 {
        format!("in {}d {}h", days, hours)
    } else if hours > 0 {
        format!("in {}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("in {}m", minutes)
    } else {
        "in <1m".to_string()
    }
}

/// Schedule configuration plus computed next runs, as returned by the API.
#[derive(Debug, Clone)]
pub struct ScheduleView {
    pub schedule_config: JsonValue,
    pub next_runs: JsonValue,
}

#[derive(Clone)]
pub struct ScheduleManager {
    configs: AutomationConfigRepository,
    scheduled: ScheduledJobRepository,
    jobs: AutomationJobRepository,
}

impl ScheduleManager {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            configs: AutomationConfigRepository::new(db.clone()),
            scheduled: ScheduledJobRepository::new(db.clone()),
            jobs: AutomationJobRepository::new(db),
        }
    }

    /// Replace a connection's schedule: persist the config and
    /// re-materialise one scheduled-job row per enabled automation type,
    /// in one transaction.
    pub async fn update_connection_schedule(
        &self,
        connection_id: Uuid,
        config: &ScheduleConfig,
        user_id: Option<Uuid>,
    ) -> Result<ScheduleView, DbErr> {
        let now = Utc::now();

        let jobs: Vec<NewScheduledJob> = config
            .enabled_entries()
            .map(|(automation_type, schedule)| NewScheduledJob {
                automation_type: automation_type.as_str().to_string(),
                schedule_type: schedule.schedule_type().to_string(),
                scheduled_time: schedule.time().to_string(),
                timezone: schedule.timezone().name().to_string(),
                days_of_week: schedule.days().map(|days| {
                    json!(days.iter().map(|d| d.as_str()).collect::<Vec<_>>())
                }),
                next_run_at: compute_next_run(schedule, now),
            })
            .collect();

        self.configs
            .replace_schedule(connection_id, config.to_json(), jobs)
            .await?;

        info!(
            connection_id = %connection_id,
            user_id = ?user_id,
            "Updated connection schedule"
        );

        Ok(ScheduleView {
            schedule_config: config.to_json(),
            next_runs: self.next_runs_json(config, now),
        })
    }

    /// The stored schedule for a connection, or the documented default
    /// when none exists.
    pub async fn get_connection_schedule(
        &self,
        connection_id: Uuid,
    ) -> Result<ScheduleView, DbErr> {
        let now = Utc::now();

        match self.configs.get_connection_config(connection_id).await? {
            Some(stored) => {
                let config = ScheduleConfig::from_json(&stored.schedule_config)
                    .unwrap_or_default();
                Ok(ScheduleView {
                    schedule_config: stored.schedule_config,
                    next_runs: self.next_runs_json(&config, now),
                })
            }
            None => {
                let config = default_schedule_config();
                Ok(ScheduleView {
                    schedule_config: config.to_json(),
                    next_runs: JsonValue::Object(serde_json::Map::new()),
                })
            }
        }
    }

    /// Enabled scheduled jobs inside the due window whose automation type
    /// has no running job on the same connection. Status-read failures
    /// count as "not running" so transient store errors cannot starve the
    /// scheduler.
    pub async fn get_due_jobs(
        &self,
        buffer_minutes: i64,
    ) -> Result<Vec<ScheduledJobModel>, DbErr> {
        let now = Utc::now();
        let due = self.scheduled.find_due(now, buffer_minutes).await?;

        let mut ready = Vec::with_capacity(due.len());
        for job in due {
            let running = match self
                .jobs
                .count_running(job.connection_id, &job.automation_type)
                .await
            {
                Ok(count) => count > 0,
                Err(err) => {
                    warn!(
                        connection_id = %job.connection_id,
                        automation_type = %job.automation_type,
                        error = %err,
                        "Running-job check failed; assuming not running"
                    );
                    false
                }
            };
            if !running {
                ready.push(job);
            }
        }

        Ok(ready)
    }

    /// Stamp a scheduled job as executed and roll its next run forward
    /// from now.
    pub async fn mark_job_executed(&self, scheduled_job_id: Uuid) -> Result<bool, DbErr> {
        let Some(job) = self.scheduled.get_by_id(scheduled_job_id).await? else {
            return Ok(false);
        };

        let now = Utc::now();
        let next_run_at =
            schedule_from_row(&job).and_then(|schedule| compute_next_run(&schedule, now));

        self.scheduled
            .record_execution(scheduled_job_id, now, next_run_at)
            .await?;
        Ok(true)
    }

    fn next_runs_json(&self, config: &ScheduleConfig, now: DateTime<Utc>) -> JsonValue {
        let mut next_runs = serde_json::Map::new();
        for (automation_type, schedule) in config.enabled_entries() {
            let Some(next_run) = compute_next_run(schedule, now) else {
                continue;
            };
            next_runs.insert(
                automation_type.to_string(),
                json!({
                    "next_run_iso": next_run.to_rfc3339(),
                    "next_run_timestamp": next_run.timestamp(),
                    "time_until_next": format_time_until(next_run, now),
                    "schedule_type": schedule.schedule_type(),
                    "scheduled_time": schedule.time().to_string(),
                    "timezone": schedule.timezone().name(),
                    "days": schedule
                        .days()
                        .map(|days| days.iter().map(|d| d.as_str()).collect::<Vec<_>>()),
                }),
            );
        }
        JsonValue::Object(next_runs)
    }
}

/// Rebuild the typed schedule from a materialised row.
pub fn schedule_from_row(row: &ScheduledJobModel) -> Option<Schedule> {
    let time: TimeOfDay = row.scheduled_time.parse().ok()?;
    let timezone: Tz = row.timezone.parse().ok()?;

    match row.schedule_type.as_str() {
        "daily" => Some(Schedule::Daily { time, timezone }),
        "weekly" => {
            let days = row
                .days_of_week
                .as_ref()?
                .as_array()?
                .iter()
                .filter_map(|value| value.as_str())
                .filter_map(|name| name.parse::<Weekday>().ok())
                .collect::<std::collections::BTreeSet<_>>();
            if days.is_empty() {
                return None;
            }
            Some(Schedule::Weekly {
                time,
                timezone,
                days,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::types::AutomationType;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{ActiveModelTrait, Database, Set};
    use serde_json::json;
    use std::collections::BTreeSet;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).single().unwrap()
    }

    #[test]
    fn daily_in_non_utc_timezone() {
        // Saved at 2024-03-09 23:00 EST (-05:00), i.e. 04:00Z on the 10th.
        let schedule = Schedule::Daily {
            time: TimeOfDay { hour: 2, minute: 0 },
            timezone: chrono_tz::America::New_York,
        };
        let from = utc(2024, 3, 10, 4, 0);

        let next = compute_next_run(&schedule, from).expect("next run");
        // 02:00 local falls into the spring-forward gap and resolves to
        // 03:00 EDT, which is 07:00Z.
        assert_eq!(next, utc(2024, 3, 10, 7, 0));
    }

    #[test]
    fn daily_after_spring_forward_uses_new_offset() {
        let schedule = Schedule::Daily {
            time: TimeOfDay { hour: 2, minute: 0 },
            timezone: chrono_tz::America::New_York,
        };
        let from = utc(2024, 3, 10, 10, 0);

        let next = compute_next_run(&schedule, from).expect("next run");
        // Next day 02:00 EDT (-04:00) = 06:00Z.
        assert_eq!(next, utc(2024, 3, 11, 6, 0));
    }

    #[test]
    fn weekly_skips_today_when_time_has_passed() {
        // 2024-03-11 is a Monday; at 02:00 UTC the 01:00 slot is gone, so
        // the Thursday slot is next.
        let schedule = Schedule::Weekly {
            time: TimeOfDay { hour: 1, minute: 0 },
            timezone: chrono_tz::UTC,
            days: BTreeSet::from([Weekday::Monday, Weekday::Thursday]),
        };
        let from = utc(2024, 3, 11, 2, 0);

        let next = compute_next_run(&schedule, from).expect("next run");
        assert_eq!(next, utc(2024, 3, 14, 1, 0));
    }

    #[test]
    fn weekly_uses_today_when_time_is_ahead() {
        let schedule = Schedule::Weekly {
            time: TimeOfDay { hour: 23, minute: 30 },
            timezone: chrono_tz::UTC,
            days: BTreeSet::from([Weekday::Monday]),
        };
        let from = utc(2024, 3, 11, 2, 0);

        let next = compute_next_run(&schedule, from).expect("next run");
        assert_eq!(next, utc(2024, 3, 11, 23, 30));
    }

    #[test]
    fn weekly_single_day_rolls_a_full_week() {
        let schedule = Schedule::Weekly {
            time: TimeOfDay { hour: 1, minute: 0 },
            timezone: chrono_tz::UTC,
            days: BTreeSet::from([Weekday::Monday]),
        };
        let from = utc(2024, 3, 11, 2, 0);

        let next = compute_next_run(&schedule, from).expect("next run");
        assert_eq!(next, utc(2024, 3, 18, 1, 0));
    }

    #[test]
    fn next_run_is_strictly_in_the_future() {
        let schedule = Schedule::Daily {
            time: TimeOfDay { hour: 2, minute: 0 },
            timezone: chrono_tz::Europe::Berlin,
        };
        let from = Utc::now();
        let next = compute_next_run(&schedule, from).expect("next run");
        assert!(next > from);
        assert!(next - from <= Duration::days(1) + Duration::hours(2));
    }

    async fn setup() -> (DatabaseConnection, ScheduleManager, Uuid) {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("create in-memory db");
        Migrator::up(&db, None).await.expect("apply migrations");

        let organization_id = Uuid::new_v4();
        let org = crate::models::organization::ActiveModel {
            id: Set(organization_id),
            name: Set("Test Org".to_string()),
            created_at: Set(Utc::now().into()),
            updated_at: Set(Utc::now().into()),
        };
        org.insert(&db).await.expect("insert organization");

        let connection_id = Uuid::new_v4();
        let connection = crate::models::connection::ActiveModel {
            id: Set(connection_id),
            organization_id: Set(organization_id),
            name: Set("warehouse".to_string()),
            connection_type: Set("postgresql".to_string()),
            credentials_ciphertext: Set(None),
            is_default: Set(false),
            created_at: Set(Utc::now().into()),
            updated_at: Set(Utc::now().into()),
        };
        connection.insert(&db).await.expect("insert connection");

        (db.clone(), ScheduleManager::new(db), connection_id)
    }

    fn sample_config() -> ScheduleConfig {
        ScheduleConfig::from_json(&json!({
            "metadata_refresh": {
                "enabled": true,
                "schedule_type": "daily",
                "time": "02:00",
                "timezone": "UTC"
            },
            "validation_automation": {
                "enabled": false
            }
        }))
        .expect("valid config")
    }

    #[tokio::test]
    async fn update_materialises_one_row_per_enabled_type() {
        let (db, manager, connection_id) = setup().await;
        let view = manager
            .update_connection_schedule(connection_id, &sample_config(), None)
            .await
            .expect("update schedule");

        assert!(view.next_runs.get("metadata_refresh").is_some());
        assert!(view.next_runs.get("validation_automation").is_none());

        let rows = ScheduledJobRepository::new(db)
            .list_by_connection(connection_id)
            .await
            .expect("list scheduled jobs");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].automation_type, "metadata_refresh");
        assert!(rows[0].next_run_at.is_some());
    }

    #[tokio::test]
    async fn update_is_a_replacement_not_an_append() {
        let (db, manager, connection_id) = setup().await;

        manager
            .update_connection_schedule(connection_id, &sample_config(), None)
            .await
            .expect("first update");

        // Re-enable validation weekly: rows are recomputed, not appended.
        let second = ScheduleConfig::from_json(&json!({
            "validation_automation": {
                "enabled": true,
                "schedule_type": "weekly",
                "time": "01:00",
                "timezone": "UTC",
                "days": ["sunday"]
            }
        }))
        .expect("valid config");
        manager
            .update_connection_schedule(connection_id, &second, None)
            .await
            .expect("second update");

        let rows = ScheduledJobRepository::new(db)
            .list_by_connection(connection_id)
            .await
            .expect("list scheduled jobs");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].automation_type, "validation_automation");
    }

    #[tokio::test]
    async fn round_trip_preserves_config_modulo_normalisation() {
        let (_db, manager, connection_id) = setup().await;

        let submitted = ScheduleConfig::from_json(&json!({
            "metadata_refresh": {
                "enabled": true,
                "schedule_type": "daily",
                "time": "2:00",
                "timezone": "UTC"
            }
        }))
        .expect("valid config");

        manager
            .update_connection_schedule(connection_id, &submitted, None)
            .await
            .expect("update schedule");

        let fetched = manager
            .get_connection_schedule(connection_id)
            .await
            .expect("get schedule");
        assert_eq!(
            fetched.schedule_config["metadata_refresh"]["time"],
            json!("02:00")
        );
        assert_eq!(
            ScheduleConfig::from_json(&fetched.schedule_config).expect("parse"),
            submitted
        );
    }

    #[tokio::test]
    async fn missing_config_returns_documented_default() {
        let (_db, manager, connection_id) = setup().await;

        let view = manager
            .get_connection_schedule(connection_id)
            .await
            .expect("get schedule");
        assert_eq!(
            view.schedule_config["metadata_refresh"]["time"],
            json!("02:00")
        );
        assert_eq!(
            view.schedule_config["schema_change_detection"]["time"],
            json!("03:00")
        );
        assert_eq!(
            view.schedule_config["validation_automation"]["enabled"],
            json!(false)
        );
    }

    #[tokio::test]
    async fn mark_executed_rolls_next_run_forward() {
        let (db, manager, connection_id) = setup().await;
        manager
            .update_connection_schedule(connection_id, &sample_config(), None)
            .await
            .expect("update schedule");

        let repo = ScheduledJobRepository::new(db);
        let row = repo
            .list_by_connection(connection_id)
            .await
            .expect("list")
            .remove(0);
        let original_next = row.next_run_at.expect("next run set");

        assert!(
            manager
                .mark_job_executed(row.id)
                .await
                .expect("mark executed")
        );

        let updated = repo
            .get_by_id(row.id)
            .await
            .expect("fetch")
            .expect("exists");
        assert!(updated.last_run_at.is_some());
        let new_next = updated.next_run_at.expect("next run recomputed");
        assert!(new_next.with_timezone(&Utc) >= original_next.with_timezone(&Utc));
        assert!(new_next.with_timezone(&Utc) > Utc::now());
    }

    #[tokio::test]
    async fn next_runs_are_strictly_future_for_all_enabled_types() {
        let (_db, manager, connection_id) = setup().await;

        let config = ScheduleConfig::from_json(&json!({
            "metadata_refresh": {
                "enabled": true,
                "schedule_type": "daily",
                "time": "02:00",
                "timezone": "America/New_York"
            },
            "schema_change_detection": {
                "enabled": true,
                "schedule_type": "weekly",
                "time": "03:00",
                "timezone": "Asia/Tokyo",
                "days": ["wednesday"]
            }
        }))
        .expect("valid config");

        let view = manager
            .update_connection_schedule(connection_id, &config, None)
            .await
            .expect("update schedule");

        let now = Utc::now().timestamp();
        for automation_type in [AutomationType::MetadataRefresh, AutomationType::SchemaChangeDetection] {
            let entry = &view.next_runs[automation_type.as_str()];
            assert!(
                entry["next_run_timestamp"].as_i64().expect("timestamp") > now,
                "{} next run must be in the future",
                automation_type
            );
        }
    }
}
