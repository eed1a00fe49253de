//! Contract with the external messaging-network library.
//!
//! Herald does not implement the wire protocol; it consumes an external
//! transport through the [`Transport`] trait and the typed envelopes in
//! this crate. The bot side never sees raw frames — only
//! [`MessageFrame`]s, [`TransportEvent`]s, and the group/credential types
//! defined here. `mock` provides an in-memory transport for tests.

pub mod creds;
pub mod disconnect;
pub mod event;
pub mod message;
pub mod mock;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use herald_domain::{Jid, Result};

pub use creds::{Creds, KeyPair, SignedPreKey};
pub use disconnect::DisconnectReason;
pub use event::{CallEvent, ParticipantsUpdate, ParticipantsAction, TransportEvent};
pub use message::{ContextInfo, MediaKind, MediaRef, MessageContent, MessageFrame, MessageKey};
pub use types::{
    AdminRank, GroupMetadata, GroupParticipant, OutgoingMessage, Presence, SendOptions,
    SocketReady,
};

/// Handle to one live authenticated session on the messaging network.
///
/// All methods are safe to call concurrently; the library serializes
/// outbound writes per endpoint. Calls carry the library's own deadlines
/// (45 s connect, 30 s query).
#[async_trait]
pub trait Transport: Send + Sync {
    /// The authenticated account identity, once login has completed.
    fn user(&self) -> Option<Jid>;

    /// Current socket ready state (lock-free read).
    fn ready(&self) -> SocketReady;

    /// Send a message to an endpoint. Returns the assigned message id.
    async fn send(&self, to: &Jid, msg: OutgoingMessage, opts: SendOptions) -> Result<String>;

    /// Send an emoji reaction keyed to an existing message.
    async fn react(&self, chat: &Jid, key: &MessageKey, emoji: &str) -> Result<()>;

    /// Mark messages as read.
    async fn read_messages(&self, keys: &[MessageKey]) -> Result<()>;

    /// Fetch group metadata (name, participants, size).
    async fn group_metadata(&self, group: &Jid) -> Result<GroupMetadata>;

    /// Remove participants from a group. Requires the bot to be a group
    /// admin; the library returns an error otherwise.
    async fn group_remove(&self, group: &Jid, members: &[Jid]) -> Result<()>;

    /// Profile picture URL for a user or group, if one is set.
    async fn profile_picture_url(&self, jid: &Jid) -> Result<Option<String>>;

    /// Push-name / display name for a user, when known to the library.
    async fn display_name(&self, jid: &Jid) -> Result<Option<String>>;

    /// Update our own presence.
    async fn update_presence(&self, presence: Presence) -> Result<()>;

    /// Update the account's status text (bio).
    async fn set_status_text(&self, text: &str) -> Result<()>;

    /// Download a media payload. The underlying stream is consumed fully
    /// and returned as one buffer.
    async fn download_media(&self, media: &MediaRef) -> Result<Vec<u8>>;

    /// Reject an incoming voice call.
    async fn reject_call(&self, call_id: &str, from: &Jid) -> Result<()>;

    /// Close the session cleanly.
    async fn end(&self) -> Result<()>;
}

/// Factory that opens transport sessions.
///
/// The supervisor calls `connect` once per attempt; the returned receiver
/// yields events until the session closes (a final
/// [`TransportEvent::Closed`] carries the classified reason).
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        creds: Option<Creds>,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>)>;
}
