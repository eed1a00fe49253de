//! Message normalization.
//!
//! Raw frames arrive wrapped (ephemeral, view-once) and with their text
//! spread across half a dozen content fields. `normalize` flattens each
//! frame into one [`NormalizedMessage`] with a guaranteed string body,
//! canonical mentions, an optional quoted-reply descriptor, and the
//! send/react/download capabilities plugins use. Extraction never fails:
//! anything unreadable degrades to its empty default with a warning.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use herald_domain::{Error, Jid, Result};
use herald_transport::{
    ContextInfo, MediaRef, MessageContent, MessageFrame, MessageKey, OutgoingMessage, SendOptions,
    Transport,
};

use crate::identity::IdentityResolver;

/// Wrapper unwrapping is bounded; well-formed input nests at most one
/// level of each wrapper kind.
const MAX_UNWRAP_PASSES: usize = 4;

/// Content types that carry a downloadable payload.
const MEDIA_TAGS: &[&str] = &[
    "imageMessage",
    "videoMessage",
    "audioMessage",
    "documentMessage",
    "stickerMessage",
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Quoted reply
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Descriptor of the message this one replies to.
#[derive(Debug, Clone)]
pub struct QuotedMessage {
    pub id: Option<String>,
    /// The quoted sender. When `sender_resolved` is false this is a
    /// best-effort value that must not be persisted without
    /// re-resolution.
    pub sender: Option<Jid>,
    pub sender_resolved: bool,
    pub type_tag: &'static str,
    pub text: String,
    media: Option<MediaRef>,
}

impl QuotedMessage {
    /// Lazily fetch the quoted media, fully consumed into one buffer.
    pub async fn download(&self, transport: &dyn Transport) -> Result<Option<Vec<u8>>> {
        match &self.media {
            Some(media) => transport.download_media(media).await.map(Some),
            None => Ok(None),
        }
    }

    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// NormalizedMessage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct NormalizedMessage {
    pub id: String,
    /// The chat endpoint this message lives in.
    pub chat: Jid,
    /// Canonical sender identity.
    pub sender: Jid,
    pub from_me: bool,
    pub is_group: bool,
    pub type_tag: &'static str,
    /// Always present, possibly empty, always trimmed.
    pub body: String,
    /// The extracted text before trimming. Command parsing uses this so
    /// leading whitespace defeats the prefix match.
    raw_body: String,
    /// Canonical individual identities only.
    pub mentions: Vec<Jid>,
    pub quoted: Option<QuotedMessage>,
    pub push_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    key: MessageKey,
    media: Option<MediaRef>,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for NormalizedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NormalizedMessage")
            .field("id", &self.id)
            .field("chat", &self.chat)
            .field("sender", &self.sender)
            .field("type_tag", &self.type_tag)
            .field("body", &self.body)
            .field("mentions", &self.mentions)
            .field("quoted", &self.quoted)
            .finish_non_exhaustive()
    }
}

impl NormalizedMessage {
    /// Reply in the same chat, quoting this message. Empty text is
    /// rejected.
    pub async fn reply(&self, text: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Err(Error::Other("refusing to send an empty reply".into()));
        }
        self.transport
            .send(
                &self.chat,
                OutgoingMessage::text(text),
                SendOptions {
                    quoted: Some(self.key.clone()),
                    ephemeral: false,
                },
            )
            .await
    }

    /// React to this message with an emoji.
    pub async fn react(&self, emoji: &str) -> Result<()> {
        self.transport.react(&self.chat, &self.key, emoji).await
    }

    /// Download the primary media, or `None` when the message has none.
    pub async fn download(&self) -> Result<Option<Vec<u8>>> {
        match &self.media {
            Some(media) => self.transport.download_media(media).await.map(Some),
            None => Ok(None),
        }
    }

    pub fn has_media(&self) -> bool {
        MEDIA_TAGS.contains(&self.type_tag)
    }

    /// The sender's display name, falling back to the push name and then
    /// the local part.
    pub async fn display_name(&self) -> String {
        if let Ok(Some(name)) = self.transport.display_name(&self.sender).await {
            return name;
        }
        self.push_name
            .clone()
            .unwrap_or_else(|| self.sender.local().to_string())
    }

    /// Whether the sender is a group admin. False outside groups.
    pub async fn is_admin(&self) -> bool {
        if !self.is_group {
            return false;
        }
        match self.transport.group_metadata(&self.chat).await {
            Ok(meta) => meta.find(&self.sender).map(|p| p.is_admin()).unwrap_or(false),
            Err(e) => {
                tracing::warn!(chat = %self.chat, error = %e, "admin check failed");
                false
            }
        }
    }

    /// Whether the bot itself is an admin of this group. False outside
    /// groups or before login completes.
    pub async fn is_bot_admin(&self) -> bool {
        if !self.is_group {
            return false;
        }
        let Some(me) = self.transport.user() else {
            return false;
        };
        match self.transport.group_metadata(&self.chat).await {
            Ok(meta) => meta.find(&me).map(|p| p.is_admin()).unwrap_or(false),
            Err(e) => {
                tracing::warn!(chat = %self.chat, error = %e, "bot-admin check failed");
                false
            }
        }
    }

    pub fn key(&self) -> &MessageKey {
        &self.key
    }

    /// Untrimmed extracted text (strict prefix matching).
    pub fn raw_body(&self) -> &str {
        &self.raw_body
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Normalization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Flatten a raw frame into a [`NormalizedMessage`].
pub async fn normalize(
    frame: MessageFrame,
    transport: Arc<dyn Transport>,
    resolver: &IdentityResolver,
) -> NormalizedMessage {
    let chat = frame.key.remote.clone();
    let is_group = chat.is_group();

    let content = unwrap_content(frame.content);
    let type_tag = content.type_tag();
    let raw_body = extract_raw_body(&content);
    let body = raw_body.trim().to_string();
    let media = content.media().cloned();

    let sender = resolve_sender(&frame.key, &chat, is_group, &transport, resolver).await;

    let ctx = content.context_info();
    let quoted = match ctx {
        Some(ctx) if ctx.quoted_message.is_some() => {
            Some(build_quoted(ctx, is_group.then_some(&chat), &transport, resolver).await)
        }
        _ => None,
    };

    let mut mentions = Vec::new();
    if let Some(ctx) = ctx {
        for raw in &ctx.mentioned {
            let resolved = resolver
                .resolve(&*transport, raw, is_group.then_some(&chat))
                .await;
            match IdentityResolver::validate_and_normalize(&resolved.jid.to_string()) {
                Some(jid) => {
                    if !mentions.contains(&jid) {
                        mentions.push(jid);
                    }
                }
                None => tracing::warn!(raw, "dropping unresolvable mention"),
            }
        }
    }
    // A canonical quoted sender is an implicit mention.
    if let Some(q) = &quoted {
        if q.sender_resolved {
            if let Some(sender) = &q.sender {
                if sender.is_canonical_user() && !mentions.contains(sender) {
                    mentions.push(sender.clone());
                }
            }
        }
    }

    NormalizedMessage {
        id: frame.key.id.clone(),
        chat,
        sender,
        from_me: frame.key.from_me,
        is_group,
        type_tag,
        body,
        raw_body,
        mentions,
        quoted,
        push_name: frame.push_name,
        timestamp: frame.timestamp,
        key: frame.key,
        media,
        transport,
    }
}

/// Peel ephemeral / view-once wrappers down to the innermost content.
/// Bounded to guard against malformed cyclic nesting.
pub fn unwrap_content(mut content: MessageContent) -> MessageContent {
    for _ in 0..MAX_UNWRAP_PASSES {
        content = match content {
            MessageContent::Ephemeral { inner } | MessageContent::ViewOnce { inner } => *inner,
            other => return other,
        };
    }
    content
}

/// First non-empty wins: conversation text, typed text, caption,
/// selected list row, selected button, selected template reply.
/// Returned untrimmed; the normalizer derives `body` by trimming.
pub fn extract_raw_body(content: &MessageContent) -> String {
    let raw = match content {
        MessageContent::Conversation { text, .. } => text.as_str(),
        MessageContent::ExtendedText { text, .. } => text.as_str(),
        MessageContent::Image { caption, .. }
        | MessageContent::Video { caption, .. }
        | MessageContent::Document { caption, .. } => {
            caption.as_deref().unwrap_or_default()
        }
        MessageContent::ListResponse {
            selected_row_id, ..
        } => selected_row_id.as_str(),
        MessageContent::ButtonsResponse {
            selected_button_id, ..
        } => selected_button_id.as_str(),
        MessageContent::TemplateButtonReply { selected_id, .. } => selected_id.as_str(),
        _ => "",
    };
    raw.to_string()
}

/// Trimmed body for a content variant.
pub fn extract_body(content: &MessageContent) -> String {
    extract_raw_body(content).trim().to_string()
}

async fn resolve_sender(
    key: &MessageKey,
    chat: &Jid,
    is_group: bool,
    transport: &Arc<dyn Transport>,
    resolver: &IdentityResolver,
) -> Jid {
    if key.from_me {
        if let Some(me) = transport.user() {
            return me.to_canonical();
        }
    }
    if is_group {
        match &key.participant {
            Some(raw) => {
                resolver
                    .resolve(&**transport, raw, Some(chat))
                    .await
                    .jid
            }
            None => {
                tracing::warn!(chat = %chat, "group frame without participant");
                chat.clone()
            }
        }
    } else {
        chat.to_canonical()
    }
}

async fn build_quoted(
    ctx: &ContextInfo,
    group: Option<&Jid>,
    transport: &Arc<dyn Transport>,
    resolver: &IdentityResolver,
) -> QuotedMessage {
    let inner = ctx
        .quoted_message
        .as_deref()
        .cloned()
        .map(unwrap_content)
        .unwrap_or(MessageContent::Unknown { tag: String::new() });

    let (sender, sender_resolved) = match &ctx.participant {
        Some(raw) => {
            let resolved = resolver.resolve(&**transport, raw, group).await;
            (Some(resolved.jid), !resolved.provisional)
        }
        None => (None, false),
    };

    QuotedMessage {
        id: ctx.stanza_id.clone(),
        sender,
        sender_resolved,
        type_tag: inner.type_tag(),
        text: extract_body(&inner),
        media: inner.media().cloned(),
    }
}
