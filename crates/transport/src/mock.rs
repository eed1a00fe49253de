//! In-memory transport for tests.
//!
//! [`MockTransport`] records every outbound call and serves canned group
//! metadata, display names, and media. [`MockConnector`] hands the same
//! transport to each `connect` and exposes an event injector so tests can
//! drive the supervisor without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use herald_domain::{Error, Jid, Result};

use crate::creds::Creds;
use crate::event::TransportEvent;
use crate::message::{MediaRef, MessageKey};
use crate::types::{GroupMetadata, OutgoingMessage, Presence, SendOptions, SocketReady};
use crate::{Connector, Transport};

/// One recorded outbound send.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub to: Jid,
    pub message: OutgoingMessage,
    pub options: SendOptions,
    pub id: String,
}

#[derive(Default)]
pub struct MockTransport {
    user: Mutex<Option<Jid>>,
    ready: Mutex<Option<SocketReady>>,
    pub sent: Mutex<Vec<SentMessage>>,
    pub reactions: Mutex<Vec<(Jid, MessageKey, String)>>,
    pub read_marks: Mutex<Vec<MessageKey>>,
    pub removed: Mutex<Vec<(Jid, Vec<Jid>)>>,
    pub status_texts: Mutex<Vec<String>>,
    pub presences: Mutex<Vec<Presence>>,
    pub rejected_calls: Mutex<Vec<String>>,
    groups: Mutex<HashMap<Jid, GroupMetadata>>,
    names: Mutex<HashMap<Jid, String>>,
    avatars: Mutex<HashMap<Jid, String>>,
    media: Mutex<HashMap<String, Vec<u8>>>,
    fail_sends: AtomicUsize,
    fail_group_lookups: AtomicUsize,
    send_seq: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_user(&self, jid: Jid) {
        *self.user.lock() = Some(jid);
    }

    pub fn clear_user(&self) {
        *self.user.lock() = None;
    }

    pub fn set_ready(&self, ready: SocketReady) {
        *self.ready.lock() = Some(ready);
    }

    pub fn put_group(&self, meta: GroupMetadata) {
        self.groups.lock().insert(meta.id.clone(), meta);
    }

    pub fn put_name(&self, jid: Jid, name: &str) {
        self.names.lock().insert(jid, name.to_string());
    }

    pub fn put_avatar(&self, jid: Jid, url: &str) {
        self.avatars.lock().insert(jid, url.to_string());
    }

    pub fn put_media(&self, locator: &str, bytes: Vec<u8>) {
        self.media.lock().insert(locator.to_string(), bytes);
    }

    /// Make the next `n` sends fail.
    pub fn fail_next_sends(&self, n: usize) {
        self.fail_sends.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` group metadata lookups fail.
    pub fn fail_next_group_lookups(&self, n: usize) {
        self.fail_group_lookups.store(n, Ordering::SeqCst);
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| s.message.text.clone())
            .collect()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn user(&self) -> Option<Jid> {
        self.user.lock().clone()
    }

    fn ready(&self) -> SocketReady {
        self.ready.lock().unwrap_or(SocketReady::Open)
    }

    async fn send(&self, to: &Jid, msg: OutgoingMessage, opts: SendOptions) -> Result<String> {
        if Self::take_failure(&self.fail_sends) {
            return Err(Error::Transport("mock send failure".into()));
        }
        let id = format!("MOCK{}", self.send_seq.fetch_add(1, Ordering::SeqCst));
        self.sent.lock().push(SentMessage {
            to: to.clone(),
            message: msg,
            options: opts,
            id: id.clone(),
        });
        Ok(id)
    }

    async fn react(&self, chat: &Jid, key: &MessageKey, emoji: &str) -> Result<()> {
        self.reactions
            .lock()
            .push((chat.clone(), key.clone(), emoji.to_string()));
        Ok(())
    }

    async fn read_messages(&self, keys: &[MessageKey]) -> Result<()> {
        self.read_marks.lock().extend_from_slice(keys);
        Ok(())
    }

    async fn group_metadata(&self, group: &Jid) -> Result<GroupMetadata> {
        if Self::take_failure(&self.fail_group_lookups) {
            return Err(Error::Transport("mock group lookup failure".into()));
        }
        self.groups
            .lock()
            .get(group)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("unknown group {group}")))
    }

    async fn group_remove(&self, group: &Jid, members: &[Jid]) -> Result<()> {
        self.removed.lock().push((group.clone(), members.to_vec()));
        Ok(())
    }

    async fn profile_picture_url(&self, jid: &Jid) -> Result<Option<String>> {
        Ok(self.avatars.lock().get(jid).cloned())
    }

    async fn display_name(&self, jid: &Jid) -> Result<Option<String>> {
        Ok(self.names.lock().get(jid).cloned())
    }

    async fn update_presence(&self, presence: Presence) -> Result<()> {
        self.presences.lock().push(presence);
        Ok(())
    }

    async fn set_status_text(&self, text: &str) -> Result<()> {
        self.status_texts.lock().push(text.to_string());
        Ok(())
    }

    async fn download_media(&self, media: &MediaRef) -> Result<Vec<u8>> {
        self.media
            .lock()
            .get(&media.locator)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("no media at {}", media.locator)))
    }

    async fn reject_call(&self, call_id: &str, _from: &Jid) -> Result<()> {
        self.rejected_calls.lock().push(call_id.to_string());
        Ok(())
    }

    async fn end(&self) -> Result<()> {
        *self.ready.lock() = Some(SocketReady::Closed);
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ConnectorState {
    transport: Arc<MockTransport>,
    current_tx: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    last_creds: Mutex<Option<Creds>>,
    connects: AtomicUsize,
    fail_connects: AtomicUsize,
}

/// Connector returning the same [`MockTransport`] on every attempt.
pub struct MockConnector {
    state: Arc<ConnectorState>,
}

/// Test-side handle for injecting events into the live session.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<ConnectorState>,
}

impl MockConnector {
    pub fn new(transport: Arc<MockTransport>) -> (Self, MockHandle) {
        let state = Arc::new(ConnectorState {
            transport,
            current_tx: Mutex::new(None),
            last_creds: Mutex::new(None),
            connects: AtomicUsize::new(0),
            fail_connects: AtomicUsize::new(0),
        });
        (
            Self {
                state: state.clone(),
            },
            MockHandle { state },
        )
    }
}

impl MockHandle {
    /// Inject an event into the currently connected session. Returns
    /// false when no session is live.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        let tx = self.state.current_tx.lock().clone();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Drop the live session's sender so the event stream ends without a
    /// close frame (simulates an abrupt socket loss).
    pub fn close_stream(&self) {
        *self.state.current_tx.lock() = None;
    }

    /// Make the next `n` connect attempts fail outright.
    pub fn fail_next_connects(&self, n: usize) {
        self.state.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Credentials passed to the most recent connect.
    pub fn last_creds(&self) -> Option<Creds> {
        self.state.last_creds.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        creds: Option<Creds>,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>)> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        *self.state.last_creds.lock() = creds;
        if MockTransport::take_failure(&self.state.fail_connects) {
            return Err(Error::Transport("mock connect failure".into()));
        }
        let (tx, rx) = mpsc::channel(64);
        *self.state.current_tx.lock() = Some(tx);
        Ok((self.state.transport.clone(), rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_records_and_fails_on_demand() {
        let transport = MockTransport::new();
        let to: Jid = "111@s.whatsapp.net".parse().unwrap();

        transport.fail_next_sends(1);
        assert!(transport
            .send(&to, OutgoingMessage::text("a"), SendOptions::default())
            .await
            .is_err());

        let id = transport
            .send(&to, OutgoingMessage::text("b"), SendOptions::default())
            .await
            .unwrap();
        assert!(id.starts_with("MOCK"));
        assert_eq!(transport.sent_texts(), vec!["b"]);
    }

    #[tokio::test]
    async fn connector_hands_out_sessions() {
        let transport = MockTransport::new();
        let (connector, handle) = MockConnector::new(transport);

        assert!(!handle.emit(TransportEvent::Open).await, "no session yet");

        let (_t, mut rx) = connector.connect(None).await.unwrap();
        assert!(handle.emit(TransportEvent::Open).await);
        assert!(matches!(rx.recv().await, Some(TransportEvent::Open)));
        assert_eq!(handle.connect_count(), 1);
    }
}
