//! Group membership events: welcome/goodbye cards.
//!
//! Each participant delta resolves the raw identities, fetches group
//! metadata and the member's profile picture (falling back to the
//! configured default), and sends a templated card with the member in
//! the mention list so the platform notifies them. Adds additionally
//! invoke every plugin's `on_new_member` hook.

use std::sync::Arc;

use chrono_tz::Tz;

use herald_domain::Jid;
use herald_transport::{OutgoingMessage, ParticipantsAction, ParticipantsUpdate, SendOptions};

use crate::plugins::BotContext;

pub async fn handle_participants_update(bot: &Arc<BotContext>, update: ParticipantsUpdate) {
    if !bot.config.welcome {
        return;
    }
    let action = update.action;
    if !matches!(action, ParticipantsAction::Add | ParticipantsAction::Remove) {
        return;
    }
    let Some(transport) = bot.connection.transport() else {
        tracing::warn!(group = %update.group, "participants update with no live transport");
        return;
    };

    let (subject, size) = match transport.group_metadata(&update.group).await {
        Ok(meta) => (meta.subject.clone(), meta.size()),
        Err(e) => {
            tracing::warn!(group = %update.group, error = %e, "group metadata unavailable");
            (update.group.local().to_string(), 0)
        }
    };

    for raw in &update.participants {
        let resolved = bot
            .resolver
            .resolve(&*transport, raw, Some(&update.group))
            .await;
        let member = resolved.jid;

        let name = match transport.display_name(&member).await {
            Ok(Some(name)) => name,
            _ => member.local().to_string(),
        };
        let avatar = match transport.profile_picture_url(&member).await {
            Ok(Some(url)) => url,
            _ => bot.config.default_avatar_url.clone(),
        };

        let text = render_card(action, &name, &subject, size, &bot.config.timezone);
        let message = OutgoingMessage::text(text)
            .with_image(avatar)
            .with_mentions(vec![member.clone()]);
        if let Err(e) = bot
            .connection
            .send_safely(&update.group, message, SendOptions::default())
            .await
        {
            tracing::warn!(group = %update.group, error = %e, "membership card not sent");
        }

        if action == ParticipantsAction::Add {
            fire_new_member_hooks(bot, &update.group, &member).await;
        }
    }
}

async fn fire_new_member_hooks(bot: &Arc<BotContext>, group: &Jid, member: &Jid) {
    let Some(snapshot) = bot.registry.snapshot() else {
        return;
    };
    for entry in snapshot.entries() {
        entry.plugin().on_new_member(bot, group, member).await;
    }
}

/// Welcome/goodbye template with name, date, time, group name, and
/// member count substituted. Timestamps render in the configured
/// timezone, falling back to UTC when the name does not parse.
fn render_card(
    action: ParticipantsAction,
    name: &str,
    subject: &str,
    size: usize,
    tz_name: &str,
) -> String {
    let tz: Tz = tz_name.parse().unwrap_or(chrono_tz::UTC);
    let now = chrono::Utc::now().with_timezone(&tz);
    let date = now.format("%Y-%m-%d");
    let time = now.format("%H:%M");
    match action {
        ParticipantsAction::Add => format!(
            "welcome @{name} to *{subject}*!\nyou are member #{size}\njoined {date} at {time}"
        ),
        ParticipantsAction::Remove => format!(
            "goodbye @{name} 👋\n*{subject}* now has {count} members\nleft {date} at {time}",
            count = size
        ),
        _ => String::new(),
    }
}
