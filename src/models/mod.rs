//! # Data Models
//!
//! This module contains all the SeaORM entity models used throughout the
//! datawatch service.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod automation_connection_config;
pub mod automation_event;
pub mod automation_global_config;
pub mod automation_job;
pub mod automation_run;
pub mod automation_table_config;
pub mod connection;
pub mod connection_metadata;
pub mod metadata_change_analytics;
pub mod notification_setting;
pub mod organization;
pub mod profile;
pub mod profiling_history;
pub mod schema_change;
pub mod scheduled_job;
pub mod validation_result;
pub mod validation_rule;

pub use automation_connection_config::Entity as AutomationConnectionConfig;
pub use automation_event::Entity as AutomationEvent;
pub use automation_global_config::Entity as AutomationGlobalConfig;
pub use automation_job::Entity as AutomationJob;
pub use automation_run::Entity as AutomationRun;
pub use automation_table_config::Entity as AutomationTableConfig;
pub use connection::Entity as Connection;
pub use connection_metadata::Entity as ConnectionMetadata;
pub use metadata_change_analytics::Entity as MetadataChangeAnalytics;
pub use notification_setting::Entity as NotificationSetting;
pub use organization::Entity as Organization;
pub use profile::Entity as Profile;
pub use profiling_history::Entity as ProfilingHistory;
pub use schema_change::Entity as SchemaChange;
pub use scheduled_job::Entity as ScheduledJob;
pub use validation_result::Entity as ValidationResult;
pub use validation_rule::Entity as ValidationRule;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "datawatch".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
