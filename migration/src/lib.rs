//! Database migrations for the datawatch service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_10_01_000001_create_organizations;
mod m2025_10_01_000002_create_database_connections;
mod m2025_10_01_000003_create_automation_configs;
mod m2025_10_01_000004_create_automation_scheduled_jobs;
mod m2025_10_01_000005_create_automation_jobs;
mod m2025_10_01_000006_create_automation_runs;
mod m2025_10_01_000007_create_automation_events;
mod m2025_10_01_000008_create_validation_rules;
mod m2025_10_01_000009_create_validation_results;
mod m2025_10_01_000010_create_connection_metadata;
mod m2025_10_01_000011_create_schema_changes;
mod m2025_10_01_000012_create_profiling_history;
mod m2025_10_01_000013_create_notification_settings;
mod m2025_10_01_000014_create_metadata_change_analytics;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_10_01_000001_create_organizations::Migration),
            Box::new(m2025_10_01_000002_create_database_connections::Migration),
            Box::new(m2025_10_01_000003_create_automation_configs::Migration),
            Box::new(m2025_10_01_000004_create_automation_scheduled_jobs::Migration),
            Box::new(m2025_10_01_000005_create_automation_jobs::Migration),
            Box::new(m2025_10_01_000006_create_automation_runs::Migration),
            Box::new(m2025_10_01_000007_create_automation_events::Migration),
            Box::new(m2025_10_01_000008_create_validation_rules::Migration),
            Box::new(m2025_10_01_000009_create_validation_results::Migration),
            Box::new(m2025_10_01_000010_create_connection_metadata::Migration),
            Box::new(m2025_10_01_000011_create_schema_changes::Migration),
            Box::new(m2025_10_01_000012_create_profiling_history::Migration),
            Box::new(m2025_10_01_000013_create_notification_settings::Migration),
            Box::new(m2025_10_01_000014_create_metadata_change_analytics::Migration),
        ]
    }
}
