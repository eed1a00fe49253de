//! Connection supervision.
//!
//! One [`Connection`] owns the one-and-only transport handle. It drives
//! the connect → run → close → backoff → reconnect loop, classifies
//! every close, persists credential refreshes, and fans session events
//! out to subscribers over a broadcast channel. All outbound traffic
//! goes through [`Connection::send_safely`] or the capabilities on a
//! normalized message.

pub mod backoff;
pub mod retry_cache;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio_util::sync::CancellationToken;

use herald_domain::{Error, Jid, Result};
use herald_transport::{
    CallEvent, Connector, DisconnectReason, MessageFrame, OutgoingMessage, ParticipantsUpdate,
    SendOptions, Transport, TransportEvent,
};

use crate::creds::CredsStore;
use retry_cache::RetryCache;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const SEND_ATTEMPTS: u32 = 3;
const CLEAN_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State & events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    Initializing,
    Connecting,
    AwaitingQr,
    Running,
    Reconnecting,
    Errored,
    Stopping,
    Stopped,
}

/// Session events fanned out to subscribers.
#[derive(Debug, Clone)]
pub enum BotEvent {
    /// Authentication completed; the session is usable.
    Connected,
    /// Initial chat sync finished (fires once per session).
    ChatsSynced,
    AwaitingQr(String),
    Message(Box<MessageFrame>),
    Call(CallEvent),
    GroupUpdate { group: Jid },
    ParticipantsUpdate(ParticipantsUpdate),
    Disconnected(DisconnectReason),
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub state: ConnectionState,
    pub attempts: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_disconnect: Option<String>,
    pub uptime_secs: Option<u64>,
    pub retry_cache_len: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Connection {
    connector: Arc<dyn Connector>,
    creds: Arc<CredsStore>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<BotEvent>,
    attempts: AtomicU32,
    last_success: Mutex<Option<DateTime<Utc>>>,
    running_since: Mutex<Option<Instant>>,
    last_disconnect: Mutex<Option<DisconnectReason>>,
    reconnect_now: Notify,
    shutdown: CancellationToken,
    pub retry_cache: RetryCache,
}

impl Connection {
    pub fn new(
        connector: Arc<dyn Connector>,
        creds: Arc<CredsStore>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Initializing);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            connector,
            creds,
            transport: RwLock::new(None),
            state_tx,
            events_tx,
            attempts: AtomicU32::new(0),
            last_success: Mutex::new(None),
            running_since: Mutex::new(None),
            last_disconnect: Mutex::new(None),
            reconnect_now: Notify::new(),
            shutdown,
            retry_cache: RetryCache::default(),
        })
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.events_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ConnectionState::Running
    }

    /// The live transport handle, when a session is up. Lock-free-ish
    /// read; callers must not hold the result across reconnects without
    /// re-checking state.
    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.read().clone()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Halve the attempt counter (health-supervisor nudge before a forced
    /// reconnect).
    pub fn halve_attempts(&self) {
        let current = self.attempts.load(Ordering::SeqCst);
        self.attempts.store(current / 2, Ordering::SeqCst);
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        *self.last_success.lock()
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            state: self.state(),
            attempts: self.attempts(),
            last_success: self.last_success(),
            last_disconnect: self.last_disconnect.lock().map(|r| r.to_string()),
            uptime_secs: self
                .running_since
                .lock()
                .map(|t| t.elapsed().as_secs()),
            retry_cache_len: self.retry_cache.len(),
        }
    }

    /// Seconds the current session has been up, when running.
    pub fn uptime(&self) -> Option<Duration> {
        self.running_since.lock().map(|t| t.elapsed())
    }

    // ── Outbound ────────────────────────────────────────────────────

    /// Send with retries. Refuses unless the connection is running;
    /// between attempts waits `1000 · attempt` ms. Successful sends are
    /// recorded in the retry cache under their message id.
    pub async fn send_safely(
        &self,
        to: &Jid,
        msg: OutgoingMessage,
        opts: SendOptions,
    ) -> Result<String> {
        let mut last_err = Error::NotConnected;
        for attempt in 1..=SEND_ATTEMPTS {
            if !self.is_running() {
                return Err(Error::NotConnected);
            }
            let Some(transport) = self.transport() else {
                return Err(Error::NotConnected);
            };
            match transport.send(to, msg.clone(), opts.clone()).await {
                Ok(id) => {
                    self.retry_cache.insert(&id, msg);
                    return Ok(id);
                }
                Err(e) => {
                    tracing::warn!(to = %to, attempt, error = %e, "send failed");
                    last_err = e;
                    if attempt < SEND_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(1000 * attempt as u64)).await;
                    }
                }
            }
        }
        Err(last_err)
    }

    /// Ask the supervisor to reconnect now: ends the live session if one
    /// exists, otherwise skips the current backoff wait.
    pub fn force_reconnect(&self) {
        if let Some(transport) = self.transport() {
            tokio::spawn(async move {
                let _ = transport.end().await;
            });
        } else {
            self.reconnect_now.notify_one();
        }
    }

    // ── Run loop ────────────────────────────────────────────────────

    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let conn = Arc::clone(self);
        tokio::spawn(conn.run())
    }

    async fn run(self: Arc<Self>) {
        while !self.shutdown.is_cancelled() {
            self.set_state(ConnectionState::Connecting);
            let stored = self.creds.load();
            if stored.is_none() {
                tracing::info!("no stored credentials, expecting interactive pairing");
            }

            let connect = tokio::time::timeout(
                backoff::CONNECT_TIMEOUT,
                self.connector.connect(stored),
            );
            match connect.await {
                Ok(Ok((transport, rx))) => {
                    *self.transport.write() = Some(transport);
                    let reason = self.drive_session(rx).await;
                    *self.transport.write() = None;
                    *self.running_since.lock() = None;
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    self.after_close(reason).await;
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "connect attempt failed");
                    self.after_connect_failure().await;
                }
                Err(_) => {
                    tracing::warn!(
                        timeout_secs = backoff::CONNECT_TIMEOUT.as_secs(),
                        "connect attempt timed out"
                    );
                    self.after_connect_failure().await;
                }
            }
        }
        self.set_state(ConnectionState::Stopping);
        self.close_current_session().await;
        self.set_state(ConnectionState::Stopped);
        tracing::info!("connection supervisor stopped");
    }

    /// Drain one session's events until it closes. Returns the classified
    /// close reason.
    async fn drive_session(&self, mut rx: mpsc::Receiver<TransportEvent>) -> DisconnectReason {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.close_current_session().await;
                    return DisconnectReason::ConnectionClosed;
                }
                event = rx.recv() => match event {
                    None => {
                        tracing::warn!("event stream ended without a close frame");
                        return DisconnectReason::ConnectionLost;
                    }
                    Some(TransportEvent::Open) => {
                        self.attempts.store(0, Ordering::SeqCst);
                        *self.last_success.lock() = Some(Utc::now());
                        *self.running_since.lock() = Some(Instant::now());
                        self.set_state(ConnectionState::Running);
                        self.broadcast(BotEvent::Connected);
                        tracing::info!("session open");
                    }
                    Some(TransportEvent::QrCode(qr)) => {
                        self.set_state(ConnectionState::AwaitingQr);
                        tracing::info!("pairing required, QR code issued");
                        self.broadcast(BotEvent::AwaitingQr(qr));
                    }
                    Some(TransportEvent::ChatsSynced) => {
                        self.broadcast(BotEvent::ChatsSynced);
                    }
                    Some(TransportEvent::Message(frame)) => {
                        self.broadcast(BotEvent::Message(Box::new(frame)));
                    }
                    Some(TransportEvent::Call(call)) => {
                        self.broadcast(BotEvent::Call(call));
                    }
                    Some(TransportEvent::GroupUpdate { group }) => {
                        self.broadcast(BotEvent::GroupUpdate { group });
                    }
                    Some(TransportEvent::ParticipantsUpdate(update)) => {
                        self.broadcast(BotEvent::ParticipantsUpdate(update));
                    }
                    Some(TransportEvent::CredsUpdate(creds)) => {
                        if let Err(e) = self.creds.save(&creds) {
                            tracing::error!(error = %e, "credential refresh not persisted");
                        }
                    }
                    Some(TransportEvent::Closed(reason)) => return reason,
                }
            }
        }
    }

    /// One close → one transition into `Reconnecting` or `Errored`.
    async fn after_close(&self, reason: DisconnectReason) {
        tracing::warn!(reason = %reason, "session closed");
        *self.last_disconnect.lock() = Some(reason);
        self.broadcast(BotEvent::Disconnected(reason));

        if reason.requires_credential_wipe() {
            if let Err(e) = self.creds.cleanup() {
                tracing::error!(error = %e, "credential wipe failed");
            }
        }

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt >= backoff::MAX_ATTEMPTS {
            self.set_state(ConnectionState::Errored);
            tracing::error!(
                attempts = attempt,
                wait_secs = backoff::EXHAUSTED_WAIT.as_secs(),
                "reconnect attempts exhausted, wiping credentials and cooling off"
            );
            if let Err(e) = self.creds.cleanup() {
                tracing::error!(error = %e, "credential wipe failed");
            }
            self.wait(backoff::EXHAUSTED_WAIT).await;
            self.attempts.store(0, Ordering::SeqCst);
        } else {
            self.set_state(ConnectionState::Reconnecting);
            let delay = backoff::delay_for(reason);
            tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
            self.wait(delay).await;
        }
    }

    async fn after_connect_failure(&self) {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt >= backoff::MAX_ATTEMPTS {
            self.set_state(ConnectionState::Errored);
            if let Err(e) = self.creds.cleanup() {
                tracing::error!(error = %e, "credential wipe failed");
            }
            self.wait(backoff::EXHAUSTED_WAIT).await;
            self.attempts.store(0, Ordering::SeqCst);
        } else {
            self.set_state(ConnectionState::Reconnecting);
            self.wait(backoff::exponential(attempt)).await;
        }
    }

    async fn close_current_session(&self) {
        let transport = self.transport.write().take();
        if let Some(transport) = transport {
            if tokio::time::timeout(CLEAN_CLOSE_TIMEOUT, transport.end())
                .await
                .is_err()
            {
                tracing::warn!("clean close timed out");
            }
        }
    }

    async fn wait(&self, delay: Duration) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = self.reconnect_now.notified() => {
                tracing::info!("backoff wait skipped by forced reconnect");
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    fn broadcast(&self, event: BotEvent) {
        // A send error only means no subscriber is listening right now.
        let _ = self.events_tx.send(event);
    }
}
