//! Events emitted by a live transport session.

use serde::{Deserialize, Serialize};

use herald_domain::Jid;

use crate::creds::Creds;
use crate::disconnect::DisconnectReason;
use crate::message::MessageFrame;

/// Membership delta action on a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantsAction {
    Add,
    Remove,
    Promote,
    Demote,
}

/// One group participants update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantsUpdate {
    pub group: Jid,
    pub action: ParticipantsAction,
    /// Raw participant identities (resolve through the identity resolver
    /// before use).
    pub participants: Vec<String>,
}

/// An incoming voice/video call offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEvent {
    pub call_id: String,
    pub from: Jid,
    pub is_video: bool,
}

/// Everything a session can deliver to the supervisor.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Login needs interactive authentication; the payload is the QR data.
    QrCode(String),
    /// Authentication completed; the session is usable.
    Open,
    /// The library finished its initial chat sync after open.
    ChatsSynced,
    /// New inbound messages.
    Message(MessageFrame),
    /// Incoming call offer.
    Call(CallEvent),
    /// Group subject/settings changed.
    GroupUpdate { group: Jid },
    /// Group membership delta.
    ParticipantsUpdate(ParticipantsUpdate),
    /// Credential material was refreshed and must be persisted.
    CredsUpdate(Box<Creds>),
    /// The session closed. Always the final event on the stream.
    Closed(DisconnectReason),
}
