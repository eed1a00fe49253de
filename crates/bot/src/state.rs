//! Bot assembly: the event pump tying the supervisor's fan-out to the
//! router, group handler, call policy, and lifecycle hooks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use herald_transport::{OutgoingMessage, SendOptions};

use crate::connection::BotEvent;
use crate::groups;
use crate::normalize::normalize;
use crate::plugins::BotContext;
use crate::router::Router;

/// Auto-bio cadence: 20 minutes, which keeps updates at three per hour.
const AUTO_BIO_PERIOD: Duration = Duration::from_secs(20 * 60);

pub struct Bot {
    pub ctx: Arc<BotContext>,
    router: Arc<Router>,
    shutdown: CancellationToken,
    /// `on_load` hooks fired (first time the session reaches running).
    loaded: AtomicBool,
    /// One-shot startup notification delivered.
    notified: AtomicBool,
}

impl Bot {
    pub fn new(ctx: Arc<BotContext>, shutdown: CancellationToken) -> Arc<Self> {
        let router = Arc::new(Router::new(ctx.clone()));
        Arc::new(Self {
            ctx,
            router,
            shutdown,
            loaded: AtomicBool::new(false),
            notified: AtomicBool::new(false),
        })
    }

    /// Pump supervisor events until shutdown. Message handling is
    /// spawned per frame so separate senders run concurrently.
    pub fn spawn_event_pump(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let bot = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = bot.ctx.connection.subscribe();
            loop {
                tokio::select! {
                    _ = bot.shutdown.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(event) => bot.on_event(event).await,
                        Err(RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "event pump lagged, frames dropped");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
            tracing::info!("event pump stopped");
        })
    }

    async fn on_event(self: &Arc<Self>, event: BotEvent) {
        match event {
            BotEvent::Message(frame) => {
                let Some(transport) = self.ctx.connection.transport() else {
                    return;
                };
                let router = self.router.clone();
                let ctx = self.ctx.clone();
                tokio::spawn(async move {
                    let msg = normalize(*frame, transport, &ctx.resolver).await;
                    router.handle_message(msg).await;
                });
            }
            BotEvent::Connected => {
                if !self.loaded.swap(true, Ordering::SeqCst) {
                    tracing::info!("first connect: firing plugin load hooks");
                    self.ctx.registry.fire_on_load(&self.ctx).await;
                }
            }
            BotEvent::ChatsSynced => {
                if !self.notified.swap(true, Ordering::SeqCst) {
                    self.send_startup_notification().await;
                }
            }
            BotEvent::Call(call) => {
                if self.ctx.config.reject_call {
                    if let Some(transport) = self.ctx.connection.transport() {
                        tracing::info!(from = %call.from, "rejecting incoming call");
                        if let Err(e) = transport.reject_call(&call.call_id, &call.from).await {
                            tracing::warn!(error = %e, "call rejection failed");
                        }
                    }
                }
            }
            BotEvent::ParticipantsUpdate(update) => {
                let ctx = self.ctx.clone();
                tokio::spawn(async move {
                    groups::handle_participants_update(&ctx, update).await;
                });
            }
            BotEvent::GroupUpdate { group } => {
                tracing::debug!(group = %group, "group settings updated");
            }
            BotEvent::AwaitingQr(qr) => {
                tracing::info!(qr_len = qr.len(), "scan the QR code to pair this device");
            }
            BotEvent::Disconnected(_) => {}
        }
    }

    async fn send_startup_notification(&self) {
        let owner = self.ctx.owner();
        let plugins = self
            .ctx
            .registry
            .snapshot()
            .map(|s| s.entries().len())
            .unwrap_or(0);
        let text = format!(
            "✅ {} is up\nplugins: {plugins}\nmode: {}\nprefix: {}",
            self.ctx.config.bot_name,
            self.ctx.config.mode,
            self.ctx.config.prefix,
        );
        if let Err(e) = self
            .ctx
            .connection
            .send_safely(&owner, OutgoingMessage::text(text), SendOptions::default())
            .await
        {
            tracing::warn!(error = %e, "startup notification not delivered");
        }
    }

    /// Periodic status-text refresh, capped at three updates per hour.
    pub fn spawn_auto_bio(self: &Arc<Self>) {
        if !self.ctx.config.auto_bio {
            return;
        }
        let bot = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(AUTO_BIO_PERIOD);
            interval.tick().await; // skip the immediate tick
            loop {
                tokio::select! {
                    _ = bot.shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                if !bot.ctx.connection.is_running() {
                    continue;
                }
                let Some(transport) = bot.ctx.connection.transport() else {
                    continue;
                };
                let uptime = bot
                    .ctx
                    .connection
                    .uptime()
                    .unwrap_or_default()
                    .as_secs();
                let text = format!(
                    "{} | up {}h{:02}m | {}help",
                    bot.ctx.config.bot_name,
                    uptime / 3600,
                    (uptime % 3600) / 60,
                    bot.ctx.config.prefix,
                );
                if let Err(e) = transport.set_status_text(&text).await {
                    tracing::debug!(error = %e, "bio update failed");
                }
            }
        });
    }
}
