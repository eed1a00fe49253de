//! `manage` — owner-only moderation commands (mode, ban, unban).

use async_trait::async_trait;

use herald_domain::{BotMode, Result};

use crate::identity::IdentityResolver;
use crate::plugins::{CommandContext, Plugin, PluginInfo};

static INFO: PluginInfo = PluginInfo {
    name: "manage",
    version: "1.0.0",
    category: "owner",
    commands: &["mode", "ban", "unban"],
    aliases: &[],
    admin_only: false,
    group_only: false,
    owner_only: true,
    usage: "mode <public|private> | ban <number> | unban <number>",
    example: ".mode private",
};

pub struct ManagePlugin;

impl ManagePlugin {
    /// Target of a ban/unban: the first mention, else the first argument
    /// treated as a phone number.
    fn target(ctx: &CommandContext) -> Option<herald_domain::Jid> {
        if let Some(mention) = ctx.msg.mentions.first() {
            return Some(mention.clone());
        }
        let raw = ctx.arg(0)?;
        IdentityResolver::validate_and_normalize(
            &herald_domain::Jid::from_digits(raw).to_string(),
        )
    }
}

#[async_trait]
impl Plugin for ManagePlugin {
    fn info(&self) -> &PluginInfo {
        &INFO
    }

    async fn run(&self, ctx: &CommandContext) -> Result<()> {
        let Some(store) = &ctx.bot.store else {
            ctx.msg.reply("store is unavailable, try again later").await?;
            return Ok(());
        };

        match ctx.command.as_str() {
            "mode" => match ctx.arg(0).and_then(BotMode::parse) {
                Some(mode) => {
                    store.set_bot_mode(mode).await?;
                    ctx.msg.reply(&format!("bot mode set to {mode}")).await?;
                }
                None => {
                    ctx.msg.reply("usage: mode <public|private>").await?;
                }
            },
            "ban" => match Self::target(ctx) {
                Some(who) => {
                    let fresh = store.ban(&who).await?;
                    let verdict = if fresh { "banned" } else { "already banned" };
                    ctx.msg.reply(&format!("{} {verdict}", who.local())).await?;
                }
                None => {
                    ctx.msg.reply("usage: ban <number or mention>").await?;
                }
            },
            "unban" => match Self::target(ctx) {
                Some(who) => {
                    let removed = store.unban(&who).await?;
                    let verdict = if removed { "unbanned" } else { "was not banned" };
                    ctx.msg.reply(&format!("{} {verdict}", who.local())).await?;
                }
                None => {
                    ctx.msg.reply("usage: unban <number or mention>").await?;
                }
            },
            _ => {}
        }
        Ok(())
    }
}
