//! Typed message envelopes.
//!
//! The network wraps message content in nested, type-tagged envelopes
//! (ephemeral messages, view-once messages). [`MessageContent`] models
//! the content as a sum type; the normalizer in the bot crate unwraps to
//! the innermost variant and derives the final type tag from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use herald_domain::Jid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Keys and frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Uniquely identifies a message within a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    pub id: String,
    /// The chat endpoint the message lives in (user or group).
    pub remote: Jid,
    pub from_me: bool,
    /// In groups: the raw sender identity as delivered by the network
    /// (may be a device-suffixed or surrogate form).
    #[serde(default)]
    pub participant: Option<String>,
}

/// One inbound message as delivered by the transport, before
/// normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFrame {
    pub key: MessageKey,
    /// Sender's self-reported display name, when present on the frame.
    #[serde(default)]
    pub push_name: Option<String>,
    pub content: MessageContent,
    pub timestamp: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Content sum type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Message content, one variant per wire content type.
///
/// `Ephemeral` and `ViewOnce` are wrappers: well-formed input nests at
/// most one level of each, but consumers must bound unwrapping anyway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MessageContent {
    Conversation {
        text: String,
        #[serde(default)]
        context_info: Option<ContextInfo>,
    },
    ExtendedText {
        text: String,
        #[serde(default)]
        context_info: Option<ContextInfo>,
    },
    Image {
        media: MediaRef,
        #[serde(default)]
        caption: Option<String>,
        #[serde(default)]
        context_info: Option<ContextInfo>,
    },
    Video {
        media: MediaRef,
        #[serde(default)]
        caption: Option<String>,
        #[serde(default)]
        context_info: Option<ContextInfo>,
    },
    Audio {
        media: MediaRef,
        #[serde(default)]
        context_info: Option<ContextInfo>,
    },
    Document {
        media: MediaRef,
        #[serde(default)]
        file_name: Option<String>,
        #[serde(default)]
        caption: Option<String>,
        #[serde(default)]
        context_info: Option<ContextInfo>,
    },
    Sticker {
        media: MediaRef,
        #[serde(default)]
        context_info: Option<ContextInfo>,
    },
    ListResponse {
        selected_row_id: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        context_info: Option<ContextInfo>,
    },
    ButtonsResponse {
        selected_button_id: String,
        #[serde(default)]
        context_info: Option<ContextInfo>,
    },
    TemplateButtonReply {
        selected_id: String,
        #[serde(default)]
        context_info: Option<ContextInfo>,
    },
    Reaction {
        emoji: String,
        key: MessageKey,
    },
    /// Disappearing-message wrapper.
    Ephemeral { inner: Box<MessageContent> },
    /// View-once wrapper.
    ViewOnce { inner: Box<MessageContent> },
    /// Protocol or otherwise unmodeled content.
    Unknown {
        #[serde(default)]
        tag: String,
    },
}

impl MessageContent {
    /// Wire type tag for this variant.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Conversation { .. } => "conversation",
            Self::ExtendedText { .. } => "extendedTextMessage",
            Self::Image { .. } => "imageMessage",
            Self::Video { .. } => "videoMessage",
            Self::Audio { .. } => "audioMessage",
            Self::Document { .. } => "documentMessage",
            Self::Sticker { .. } => "stickerMessage",
            Self::ListResponse { .. } => "listResponseMessage",
            Self::ButtonsResponse { .. } => "buttonsResponseMessage",
            Self::TemplateButtonReply { .. } => "templateButtonReplyMessage",
            Self::Reaction { .. } => "reactionMessage",
            Self::Ephemeral { .. } => "ephemeralMessage",
            Self::ViewOnce { .. } => "viewOnceMessage",
            Self::Unknown { .. } => "unknown",
        }
    }

    /// Context info attached to this variant, if the variant carries one.
    pub fn context_info(&self) -> Option<&ContextInfo> {
        match self {
            Self::Conversation { context_info, .. }
            | Self::ExtendedText { context_info, .. }
            | Self::Image { context_info, .. }
            | Self::Video { context_info, .. }
            | Self::Audio { context_info, .. }
            | Self::Document { context_info, .. }
            | Self::Sticker { context_info, .. }
            | Self::ListResponse { context_info, .. }
            | Self::ButtonsResponse { context_info, .. }
            | Self::TemplateButtonReply { context_info, .. } => context_info.as_ref(),
            _ => None,
        }
    }

    /// The media payload carried by this variant, if any.
    pub fn media(&self) -> Option<&MediaRef> {
        match self {
            Self::Image { media, .. }
            | Self::Video { media, .. }
            | Self::Audio { media, .. }
            | Self::Document { media, .. }
            | Self::Sticker { media, .. } => Some(media),
            _ => None,
        }
    }
}

/// Reply/mention context attached to message content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextInfo {
    /// Id of the message being replied to.
    #[serde(default)]
    pub stanza_id: Option<String>,
    /// Raw identity of the quoted message's sender.
    #[serde(default)]
    pub participant: Option<String>,
    /// The quoted content itself.
    #[serde(default)]
    pub quoted_message: Option<Box<MessageContent>>,
    /// Raw identities mentioned in the message.
    #[serde(default)]
    pub mentioned: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Media
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    Sticker,
}

/// Opaque handle the transport can stream a media payload from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub kind: MediaKind,
    /// Library-internal locator (encrypted blob URL).
    pub locator: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tags() {
        let content = MessageContent::Conversation {
            text: "hi".into(),
            context_info: None,
        };
        assert_eq!(content.type_tag(), "conversation");

        let wrapped = MessageContent::Ephemeral {
            inner: Box::new(content),
        };
        assert_eq!(wrapped.type_tag(), "ephemeralMessage");
    }

    #[test]
    fn context_info_only_on_carrying_variants() {
        let ctx = ContextInfo {
            stanza_id: Some("X1".into()),
            ..Default::default()
        };
        let text = MessageContent::ExtendedText {
            text: "hello".into(),
            context_info: Some(ctx),
        };
        assert!(text.context_info().is_some());

        let wrapper = MessageContent::Ephemeral {
            inner: Box::new(text),
        };
        assert!(wrapper.context_info().is_none());
    }

    #[test]
    fn media_accessor() {
        let media = MediaRef {
            kind: MediaKind::Image,
            locator: "enc:abc".into(),
            mime_type: Some("image/jpeg".into()),
            size_bytes: Some(1024),
        };
        let content = MessageContent::Image {
            media: media.clone(),
            caption: None,
            context_info: None,
        };
        assert_eq!(content.media(), Some(&media));
        assert!(MessageContent::Unknown { tag: String::new() }.media().is_none());
    }
}
