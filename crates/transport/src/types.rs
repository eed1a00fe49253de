//! Group, presence, and outbound-message types shared with the library.

use serde::{Deserialize, Serialize};

use herald_domain::Jid;

use crate::message::{MediaKind, MessageKey};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Groups
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminRank {
    Admin,
    SuperAdmin,
}

/// One group member as reported by the roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupParticipant {
    /// The member's identity, possibly in surrogate (`@lid`) form.
    pub id: Jid,
    /// Surrogate numeric key, when the roster entry carries one.
    #[serde(default)]
    pub surrogate_key: Option<String>,
    /// The member's phone-form identity, when the roster exposes it.
    #[serde(default)]
    pub phone: Option<Jid>,
    #[serde(default)]
    pub admin: Option<AdminRank>,
}

impl GroupParticipant {
    pub fn is_admin(&self) -> bool {
        self.admin.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMetadata {
    pub id: Jid,
    pub subject: String,
    #[serde(default)]
    pub description: Option<String>,
    pub participants: Vec<GroupParticipant>,
}

impl GroupMetadata {
    pub fn size(&self) -> usize {
        self.participants.len()
    }

    /// Find a participant by canonical identity, surrogate form, or phone.
    pub fn find(&self, jid: &Jid) -> Option<&GroupParticipant> {
        self.participants.iter().find(|p| {
            p.id == *jid
                || p.phone.as_ref() == Some(jid)
                || p.id.to_canonical() == jid.to_canonical()
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Presence
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Available,
    Unavailable,
    Composing,
    Recording,
}

/// Socket ready state, readable without locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketReady {
    Connecting,
    Open,
    Closing,
    Closed,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outbound
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A message herald sends. Text is the common case; media messages carry
/// an already-uploaded payload reference plus an optional caption.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    #[serde(default)]
    pub text: Option<String>,
    /// Image shown as the message header (welcome cards).
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub media_kind: Option<MediaKind>,
    /// Identities to notify via platform mentions.
    #[serde(default)]
    pub mentions: Vec<Jid>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image_url: None,
            media_kind: None,
            mentions: Vec::new(),
        }
    }

    pub fn with_mentions(mut self, mentions: Vec<Jid>) -> Self {
        self.mentions = mentions;
        self
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }
}

/// Per-send options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOptions {
    /// Quote this message (reply threading).
    #[serde(default)]
    pub quoted: Option<MessageKey>,
    /// Hint for disappearing-message chats; the library echoes the chat's
    /// ephemeral window when set.
    #[serde(default)]
    pub ephemeral: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(id: &str, phone: Option<&str>, admin: Option<AdminRank>) -> GroupParticipant {
        GroupParticipant {
            id: id.parse().unwrap(),
            surrogate_key: None,
            phone: phone.map(|p| p.parse().unwrap()),
            admin,
        }
    }

    #[test]
    fn find_matches_phone_and_canonical() {
        let meta = GroupMetadata {
            id: "1203630412@g.us".parse().unwrap(),
            subject: "test".into(),
            description: None,
            participants: vec![
                participant("999@lid", Some("111@s.whatsapp.net"), Some(AdminRank::Admin)),
                participant("222@s.whatsapp.net", None, None),
            ],
        };

        let by_phone = meta.find(&"111@s.whatsapp.net".parse().unwrap()).unwrap();
        assert!(by_phone.is_admin());

        let by_device: Jid = "222:5@s.whatsapp.net".parse().unwrap();
        assert!(meta.find(&by_device).is_some());

        assert!(meta.find(&"333@s.whatsapp.net".parse().unwrap()).is_none());
    }
}
