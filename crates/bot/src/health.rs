//! Self-healing supervision.
//!
//! Four periodic loops start after a two-minute warmup: plugin health,
//! memory watermarks, transport recovery, and store reachability. A
//! faster connection-liveness probe runs every 30 seconds once a session
//! has been up for 45. Alerts page the owner over the transport; every
//! loop exits on the shutdown token.

use std::sync::Arc;
use std::time::Duration;

use sysinfo::System;
use tokio_util::sync::CancellationToken;

use herald_transport::{SendOptions, SocketReady};

use crate::connection::ConnectionState;
use crate::plugins::BotContext;

const WARMUP: Duration = Duration::from_secs(2 * 60);

const PLUGIN_LOOP_PERIOD: Duration = Duration::from_secs(15 * 60);
const MEMORY_LOOP_PERIOD: Duration = Duration::from_secs(20 * 60);
const TRANSPORT_LOOP_PERIOD: Duration = Duration::from_secs(10 * 60);
const STORE_LOOP_PERIOD: Duration = Duration::from_secs(5 * 60);

const LIVENESS_PERIOD: Duration = Duration::from_secs(30);
const LIVENESS_MIN_UPTIME: Duration = Duration::from_secs(45);
const LIVENESS_GRACE: Duration = Duration::from_secs(60);
const LIVENESS_WARN_AFTER: u32 = 3;
const LIVENESS_CRITICAL_AFTER: u32 = 5;

const MEM_TRIM_MB: u64 = 400;
const MEM_CLEAR_MB: u64 = 500;
const MEM_ALERT_MB: u64 = 600;

/// Minutes the transport may stay down before the recovery loop steps in.
const TRANSPORT_STALL_MINUTES: i64 = 60;

pub struct HealthSupervisor {
    bot: Arc<BotContext>,
    shutdown: CancellationToken,
}

impl HealthSupervisor {
    pub fn new(bot: Arc<BotContext>, shutdown: CancellationToken) -> Arc<Self> {
        Arc::new(Self { bot, shutdown })
    }

    /// Start every loop. Handles are detached; loops exit on shutdown.
    pub fn spawn_all(self: &Arc<Self>) {
        self.spawn_loop("plugin-health", PLUGIN_LOOP_PERIOD, |sup| async move {
            sup.check_plugins().await;
        });
        self.spawn_loop("memory", MEMORY_LOOP_PERIOD, |sup| async move {
            sup.check_memory().await;
        });
        self.spawn_loop("transport", TRANSPORT_LOOP_PERIOD, |sup| async move {
            sup.check_transport().await;
        });
        self.spawn_loop("store", STORE_LOOP_PERIOD, |sup| async move {
            sup.check_store().await;
        });
        self.spawn_liveness_probe();
    }

    /// Periodic loop with the two-minute warmup applied.
    fn spawn_loop<F, Fut>(self: &Arc<Self>, name: &'static str, period: Duration, body: F)
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let sup = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = sup.shutdown.cancelled() => return,
                _ = tokio::time::sleep(WARMUP) => {}
            }
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = sup.shutdown.cancelled() => break,
                    _ = interval.tick() => body(Arc::clone(&sup)).await,
                }
            }
            tracing::debug!(name, "health loop stopped");
        });
    }

    // ── Plugin health ───────────────────────────────────────────────

    async fn check_plugins(&self) {
        let unhealthy = self.bot.registry.unhealthy();
        if unhealthy.is_empty() {
            return;
        }
        for (name, rate) in &unhealthy {
            tracing::warn!(plugin = %name, error_rate = %format!("{:.0}%", rate * 100.0), "plugin error rate high");
        }
        if unhealthy.len() >= 3 {
            let names: Vec<&str> = unhealthy.iter().map(|(n, _)| n.as_str()).collect();
            self.page_owner(&format!(
                "⚠️ {} plugins failing: {}",
                unhealthy.len(),
                names.join(", ")
            ))
            .await;
        }
    }

    // ── Memory watermarks ───────────────────────────────────────────

    async fn check_memory(&self) {
        let Some(rss_mb) = process_rss_mb() else {
            return;
        };
        tracing::info!(rss_mb, "memory check");

        if rss_mb > MEM_ALERT_MB {
            self.clear_caches();
            self.page_owner(&format!("🚨 memory at {rss_mb} MB after cache clear"))
                .await;
        } else if rss_mb > MEM_CLEAR_MB {
            self.clear_caches();
            tracing::warn!(rss_mb, "caches cleared at high watermark");
        } else if rss_mb > MEM_TRIM_MB {
            // No collector to invoke here; trimming expired entries is
            // the closest equivalent.
            self.bot.rate.prune();
            tracing::info!(rss_mb, "caches trimmed at low watermark");
        }
    }

    fn clear_caches(&self) {
        self.bot.resolver.clear_cache();
        self.bot.rate.clear();
        self.bot.connection.retry_cache.clear();
    }

    // ── Transport recovery ──────────────────────────────────────────

    async fn check_transport(&self) {
        let state = self.bot.connection.state();
        if matches!(
            state,
            ConnectionState::Running | ConnectionState::Connecting | ConnectionState::AwaitingQr
        ) {
            return;
        }
        let stalled = match self.bot.connection.last_success() {
            Some(t) => chrono::Utc::now() - t > chrono::Duration::minutes(TRANSPORT_STALL_MINUTES),
            None => true,
        };
        if stalled {
            tracing::warn!(?state, "transport stalled, forcing reconnect");
            self.bot.connection.halve_attempts();
            self.bot.connection.force_reconnect();
        }
    }

    // ── Store reachability ──────────────────────────────────────────

    async fn check_store(&self) {
        let Some(store) = &self.bot.store else {
            return;
        };
        if store.ping().await.is_ok() {
            return;
        }
        tracing::warn!("store ping failed, attempting reconnect");
        if let Err(e) = store.reconnect().await {
            tracing::error!(error = %e, "store reconnect failed");
            self.page_owner("🚨 document store unreachable").await;
            return;
        }
        if let Err(e) = store.ping().await {
            tracing::error!(error = %e, "store still unreachable after reconnect");
            self.page_owner("🚨 document store unreachable").await;
        }
    }

    // ── Liveness probe ──────────────────────────────────────────────

    fn spawn_liveness_probe(self: &Arc<Self>) {
        let sup = Arc::clone(self);
        tokio::spawn(async move {
            let mut failures: u32 = 0;
            let mut interval = tokio::time::interval(LIVENESS_PERIOD);
            loop {
                tokio::select! {
                    _ = sup.shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                match sup.probe_once() {
                    ProbeOutcome::Skip => failures = 0,
                    ProbeOutcome::Ok => failures = 0,
                    ProbeOutcome::Fail => {
                        failures += 1;
                        if failures == LIVENESS_WARN_AFTER {
                            tracing::warn!(failures, "liveness probe failing");
                        } else if failures == LIVENESS_CRITICAL_AFTER {
                            tracing::error!(failures, "liveness probe critical");
                            sup.page_owner("🚨 connection liveness probe failing").await;
                        }
                    }
                }
            }
        });
    }

    fn probe_once(&self) -> ProbeOutcome {
        if !self.bot.connection.is_running() {
            return ProbeOutcome::Skip;
        }
        let Some(uptime) = self.bot.connection.uptime() else {
            return ProbeOutcome::Skip;
        };
        if uptime < LIVENESS_MIN_UPTIME {
            return ProbeOutcome::Skip;
        }
        let Some(transport) = self.bot.connection.transport() else {
            return ProbeOutcome::Fail;
        };
        let authenticated = transport.user().is_some();
        let socket_open = transport.ready() == SocketReady::Open;
        if authenticated && socket_open {
            ProbeOutcome::Ok
        } else if uptime < LIVENESS_MIN_UPTIME + LIVENESS_GRACE {
            // Grace period right after open.
            ProbeOutcome::Skip
        } else {
            ProbeOutcome::Fail
        }
    }

    // ── Alerts ──────────────────────────────────────────────────────

    async fn page_owner(&self, text: &str) {
        let owner = self.bot.owner();
        if let Err(e) = self
            .bot
            .connection
            .send_safely(
                &owner,
                herald_transport::OutgoingMessage::text(text),
                SendOptions::default(),
            )
            .await
        {
            tracing::warn!(error = %e, "owner alert not delivered");
        }
    }
}

enum ProbeOutcome {
    Skip,
    Ok,
    Fail,
}

/// Resident set size of this process in megabytes.
fn process_rss_mb() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut sys = System::new();
    sys.refresh_process(pid);
    sys.process(pid).map(|p| p.memory() / (1024 * 1024))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rss_is_measurable() {
        let rss = process_rss_mb();
        assert!(rss.is_some());
    }
}
