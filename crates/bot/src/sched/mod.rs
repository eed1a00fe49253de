//! Cron scheduler.
//!
//! The scheduler owns the live job table and nothing else: durable
//! registration is the owning plugin's job (write the store record
//! before `register`, delete it on `cancel`, re-register from records in
//! `on_load`). Handlers receive the *current* connection through
//! [`JobContext`] at fire time, never through captures, which is what
//! makes restart-time re-registration trivial.
//!
//! The dispatcher ticks every 30 s, fires due jobs on detached tasks
//! outside the table lock, and never awaits them: an overrunning handler
//! simply runs in parallel with its next fire. Fire times that elapsed
//! while the process was down are skipped, not accumulated.

pub mod cron;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use herald_domain::Config;
use herald_store::Store;

use crate::connection::Connection;
use cron::CronExpr;

const TICK_INTERVAL: Duration = Duration::from_secs(30);

/// Dependencies handed to a job handler at fire time.
pub struct JobContext {
    pub job_id: String,
    pub fired_at: DateTime<Utc>,
    pub connection: Arc<Connection>,
    pub store: Option<Arc<Store>>,
    pub config: Arc<Config>,
}

pub type JobHandler = Arc<dyn Fn(JobContext) -> BoxFuture<'static, ()> + Send + Sync>;

struct Job {
    cron: String,
    expr: CronExpr,
    tz: Tz,
    tz_name: String,
    plugin: String,
    handler: JobHandler,
    next_fire: DateTime<Utc>,
}

/// Public listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: String,
    pub cron: String,
    pub tz: String,
    pub plugin: String,
    pub next_fire: DateTime<Utc>,
}

pub struct Scheduler {
    jobs: Mutex<HashMap<String, Job>>,
    connection: Arc<Connection>,
    store: Option<Arc<Store>>,
    config: Arc<Config>,
}

impl Scheduler {
    pub fn new(
        connection: Arc<Connection>,
        store: Option<Arc<Store>>,
        config: Arc<Config>,
    ) -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(HashMap::new()),
            connection,
            store,
            config,
        })
    }

    /// Register (or replace) a job. Returns false when the cron
    /// expression or timezone does not parse; the caller is responsible
    /// for rolling back its own durable record on failure.
    pub fn register(
        &self,
        id: &str,
        cron_expr: &str,
        tz_name: &str,
        plugin: &str,
        handler: JobHandler,
    ) -> bool {
        let Some(expr) = CronExpr::parse(cron_expr) else {
            tracing::warn!(id, cron = cron_expr, "job rejected: invalid cron expression");
            return false;
        };
        let Some(tz) = cron::parse_tz(tz_name) else {
            tracing::warn!(id, tz = tz_name, "job rejected: invalid timezone");
            return false;
        };
        let Some(next_fire) = expr.next_after(&Utc::now(), tz) else {
            tracing::warn!(id, cron = cron_expr, "job rejected: no future occurrence");
            return false;
        };

        let replaced = self
            .jobs
            .lock()
            .insert(
                id.to_string(),
                Job {
                    cron: cron_expr.to_string(),
                    expr,
                    tz,
                    tz_name: tz_name.to_string(),
                    plugin: plugin.to_string(),
                    handler,
                    next_fire,
                },
            )
            .is_some();
        tracing::info!(id, cron = cron_expr, tz = tz_name, plugin, replaced, next_fire = %next_fire, "job registered");
        true
    }

    /// Stop and remove a job.
    pub fn cancel(&self, id: &str) -> bool {
        let removed = self.jobs.lock().remove(id).is_some();
        if removed {
            tracing::info!(id, "job cancelled");
        }
        removed
    }

    /// Remove every job owned by a plugin (unload path). Returns how
    /// many were dropped.
    pub fn cancel_for_plugin(&self, plugin: &str) -> usize {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|_, job| job.plugin != plugin);
        let dropped = before - jobs.len();
        if dropped > 0 {
            tracing::info!(plugin, dropped, "plugin jobs released");
        }
        dropped
    }

    pub fn list(&self) -> Vec<JobView> {
        let mut views: Vec<JobView> = self
            .jobs
            .lock()
            .iter()
            .map(|(id, job)| JobView {
                id: id.clone(),
                cron: job.cron.clone(),
                tz: job.tz_name.clone(),
                plugin: job.plugin.clone(),
                next_fire: job.next_fire,
            })
            .collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the dispatcher until shutdown.
    pub fn spawn_dispatcher(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            interval.tick().await; // immediate first tick
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => scheduler.tick(Utc::now()),
                }
            }
            tracing::info!("scheduler dispatcher stopped");
        })
    }

    /// Fire everything due at `now`. Handlers are spawned outside the
    /// lock and not awaited.
    fn tick(&self, now: DateTime<Utc>) {
        let mut due: Vec<(String, JobHandler)> = Vec::new();
        {
            let mut jobs = self.jobs.lock();
            for (id, job) in jobs.iter_mut() {
                if job.next_fire <= now {
                    // Recompute from `now`: windows that elapsed while we
                    // were away are skipped, not replayed.
                    match job.expr.next_after(&now, job.tz) {
                        Some(next) => job.next_fire = next,
                        None => {
                            tracing::warn!(id, "job has no future occurrence, leaving as-is");
                            continue;
                        }
                    }
                    due.push((id.clone(), job.handler.clone()));
                }
            }
        }

        for (id, handler) in due {
            tracing::debug!(id, "firing job");
            let ctx = JobContext {
                job_id: id,
                fired_at: now,
                connection: self.connection.clone(),
                store: self.store.clone(),
                config: self.config.clone(),
            };
            tokio::spawn(handler(ctx));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use herald_transport::mock::{MockConnector, MockTransport};

    use crate::creds::CredsStore;

    fn test_scheduler() -> (Arc<Scheduler>, tempfile::TempDir) {
        let transport = MockTransport::new();
        let (connector, _handle) = MockConnector::new(transport);
        let dir = tempfile::tempdir().unwrap();
        let creds = Arc::new(CredsStore::new(dir.path()));
        let connection = Connection::new(Arc::new(connector), creds, CancellationToken::new());
        let config = Arc::new(Config::default());
        (Scheduler::new(connection, None, config), dir)
    }

    fn counting_handler(counter: Arc<AtomicUsize>) -> JobHandler {
        Arc::new(move |_ctx: JobContext| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    fn noop_handler() -> JobHandler {
        Arc::new(|_ctx| Box::pin(async {}))
    }

    #[tokio::test]
    async fn register_validates_cron_and_tz() {
        let (sched, _dir) = test_scheduler();
        assert!(sched.register("a", "0 10 * * 1", "Africa/Lagos", "p", noop_handler()));
        assert!(!sched.register("b", "not a cron", "Africa/Lagos", "p", noop_handler()));
        assert!(!sched.register("c", "0 10 * * 1", "Not/Real", "p", noop_handler()));
        assert_eq!(sched.len(), 1);
    }

    #[tokio::test]
    async fn register_cancel_register_leaves_one_job() {
        let (sched, _dir) = test_scheduler();
        assert!(sched.register("lec_42", "0 10 * * 1", "Africa/Lagos", "lectures", noop_handler()));
        assert!(sched.cancel("lec_42"));
        assert!(!sched.cancel("lec_42"), "second cancel is a no-op");
        assert!(sched.register("lec_42", "0 10 * * 1", "Africa/Lagos", "lectures", noop_handler()));
        assert_eq!(sched.len(), 1);
        assert_eq!(sched.list()[0].id, "lec_42");
    }

    #[tokio::test]
    async fn register_same_id_replaces() {
        let (sched, _dir) = test_scheduler();
        sched.register("j", "0 10 * * 1", "Africa/Lagos", "p", noop_handler());
        sched.register("j", "0 11 * * 2", "UTC", "p", noop_handler());
        assert_eq!(sched.len(), 1);
        let view = &sched.list()[0];
        assert_eq!(view.cron, "0 11 * * 2");
        assert_eq!(view.tz, "UTC");
    }

    #[tokio::test]
    async fn cancel_for_plugin_releases_only_its_jobs() {
        let (sched, _dir) = test_scheduler();
        sched.register("a1", "* * * * *", "UTC", "alpha", noop_handler());
        sched.register("a2", "* * * * *", "UTC", "alpha", noop_handler());
        sched.register("b1", "* * * * *", "UTC", "beta", noop_handler());
        assert_eq!(sched.cancel_for_plugin("alpha"), 2);
        assert_eq!(sched.len(), 1);
        assert_eq!(sched.list()[0].id, "b1");
    }

    #[tokio::test]
    async fn tick_fires_due_jobs_and_skips_missed_windows() {
        let (sched, _dir) = test_scheduler();
        let counter = Arc::new(AtomicUsize::new(0));
        sched.register("every-min", "* * * * *", "UTC", "p", counting_handler(counter.clone()));

        // Force the job due, then tick far in the future: exactly one
        // fire even though many windows elapsed.
        let far_future = Utc::now() + chrono::Duration::hours(6);
        sched.tick(far_future);
        tokio::task::yield_now().await;
        // Spawned handler needs a moment.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1, "missed windows are skipped");

        // Not due again at the same instant.
        sched.tick(far_future);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // Due again one minute later.
        sched.tick(far_future + chrono::Duration::minutes(1));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn overrunning_handler_does_not_block_dispatch() {
        let (sched, _dir) = test_scheduler();
        let started = Arc::new(AtomicUsize::new(0));
        let started_in_handler = started.clone();
        let handler: JobHandler = Arc::new(move |_ctx| {
            let started = started_in_handler.clone();
            Box::pin(async move {
                started.fetch_add(1, Ordering::SeqCst);
                // Never completes within the test.
                tokio::time::sleep(Duration::from_secs(3600)).await;
            })
        });
        sched.register("slow", "* * * * *", "UTC", "p", handler);

        let t0 = Utc::now() + chrono::Duration::hours(1);
        sched.tick(t0);
        sched.tick(t0 + chrono::Duration::minutes(1));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(started.load(Ordering::SeqCst), 2, "fires run in parallel");
    }
}
