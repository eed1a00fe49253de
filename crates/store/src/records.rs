//! Persisted document shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable record of a scheduled job, written by the owning plugin
/// before `register` and deleted on `cancel`. On restart the plugin
/// reads its records back in `on_load` and re-registers each.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Stable job id, unique across the collection.
    pub job_id: String,
    /// Owning plugin name.
    pub plugin: String,
    /// 5-field cron expression.
    pub cron: String,
    /// IANA timezone name.
    pub tz: String,
    pub created_at: DateTime<Utc>,
}

/// A keyed settings document (`key` is unique).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingDoc {
    pub key: String,
    pub value: String,
}
