//! Plugin runtime.
//!
//! Plugins are compiled into the binary (`builtin::all`) and published to
//! the registry behind a static descriptor. The configured plugin
//! directory holds declarative TOML manifests that enable/disable units;
//! a missing directory is created with an auto-generated sample manifest
//! on first start.

pub mod builtin;
pub mod context;
pub mod registry;

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use herald_domain::{Jid, Result};

pub use context::{BotContext, CommandContext};
pub use registry::{Lookup, PluginRegistry};

/// How many recent outcomes feed the error-rate health check.
const RECENT_WINDOW: usize = 20;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Descriptor & trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Static plugin metadata.
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub category: &'static str,
    /// Command tokens this plugin answers (without the prefix).
    pub commands: &'static [&'static str],
    pub aliases: &'static [&'static str],
    pub admin_only: bool,
    pub group_only: bool,
    pub owner_only: bool,
    pub usage: &'static str,
    pub example: &'static str,
}

/// One plugin unit.
///
/// `on_load` runs once when the connection first reaches running (and
/// again after a hot reload); it is the only hook allowed to register
/// scheduled jobs. `on_unload` must release them.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn info(&self) -> &PluginInfo;

    async fn run(&self, ctx: &CommandContext) -> Result<()>;

    async fn on_load(&self, _bot: &BotContext) -> Result<()> {
        Ok(())
    }

    async fn on_unload(&self, _bot: &BotContext) {}

    /// Invoked for each member added to a group (welcome flow).
    async fn on_new_member(&self, _bot: &BotContext, _group: &Jid, _member: &Jid) {}
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct PluginStats {
    pub loaded_at: DateTime<Utc>,
    pub executions: u64,
    pub errors: u64,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub total_exec_ms: u64,
    /// Outcomes of the most recent invocations, `true` = error.
    #[serde(skip)]
    recent: VecDeque<bool>,
}

impl PluginStats {
    fn new() -> Self {
        Self {
            loaded_at: Utc::now(),
            executions: 0,
            errors: 0,
            last_error: None,
            last_error_at: None,
            last_run_at: None,
            total_exec_ms: 0,
            recent: VecDeque::with_capacity(RECENT_WINDOW),
        }
    }

    fn record(&mut self, error: Option<&str>, elapsed_ms: u64) {
        self.executions += 1;
        self.last_run_at = Some(Utc::now());
        self.total_exec_ms += elapsed_ms;
        if self.recent.len() == RECENT_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(error.is_some());
        if let Some(message) = error {
            self.errors += 1;
            self.last_error = Some(message.to_string());
            self.last_error_at = Some(Utc::now());
        }
    }

    /// Error rate over the last (up to 20) invocations.
    pub fn recent_error_rate(&self) -> f64 {
        if self.recent.is_empty() {
            return 0.0;
        }
        let errors = self.recent.iter().filter(|e| **e).count();
        errors as f64 / self.recent.len() as f64
    }
}

/// A loaded plugin plus its runtime stats.
pub struct PluginEntry {
    plugin: Arc<dyn Plugin>,
    stats: parking_lot::Mutex<PluginStats>,
}

impl PluginEntry {
    fn new(plugin: Arc<dyn Plugin>) -> Arc<Self> {
        Arc::new(Self {
            plugin,
            stats: parking_lot::Mutex::new(PluginStats::new()),
        })
    }

    pub fn plugin(&self) -> &Arc<dyn Plugin> {
        &self.plugin
    }

    pub fn info(&self) -> &PluginInfo {
        self.plugin.info()
    }

    pub fn stats(&self) -> PluginStats {
        self.stats.lock().clone()
    }

    pub fn record_success(&self, elapsed_ms: u64) {
        self.stats.lock().record(None, elapsed_ms);
    }

    pub fn record_error(&self, message: &str, elapsed_ms: u64) {
        self.stats.lock().record(Some(message), elapsed_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_window_is_bounded() {
        let mut stats = PluginStats::new();
        for _ in 0..30 {
            stats.record(None, 1);
        }
        assert_eq!(stats.recent.len(), RECENT_WINDOW);
        assert_eq!(stats.executions, 30);
        assert_eq!(stats.recent_error_rate(), 0.0);
    }

    #[test]
    fn error_rate_over_recent_window() {
        let mut stats = PluginStats::new();
        // 20 old successes, then 15 errors: the window holds 5 ok + 15 err.
        for _ in 0..20 {
            stats.record(None, 1);
        }
        for _ in 0..15 {
            stats.record(Some("boom"), 1);
        }
        assert_eq!(stats.errors, 15);
        assert!(stats.recent_error_rate() > 0.5);
        assert_eq!(stats.last_error.as_deref(), Some("boom"));
    }
}
