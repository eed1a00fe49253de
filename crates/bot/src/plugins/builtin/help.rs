//! `help` — command index.

use async_trait::async_trait;

use herald_domain::Result;

use crate::plugins::{CommandContext, Plugin, PluginInfo};

static INFO: PluginInfo = PluginInfo {
    name: "help",
    version: "1.0.0",
    category: "core",
    commands: &["help", "menu"],
    aliases: &["commands"],
    admin_only: false,
    group_only: false,
    owner_only: false,
    usage: "help [command]",
    example: ".help ping",
};

pub struct HelpPlugin;

#[async_trait]
impl Plugin for HelpPlugin {
    fn info(&self) -> &PluginInfo {
        &INFO
    }

    async fn run(&self, ctx: &CommandContext) -> Result<()> {
        let prefix = &ctx.bot.config.prefix;
        let Some(snapshot) = ctx.bot.registry.snapshot() else {
            ctx.msg.reply("plugins are reloading, try again shortly").await?;
            return Ok(());
        };

        // `.help <command>` — detail for one command.
        if let Some(wanted) = ctx.arg(0) {
            let wanted = wanted.to_ascii_lowercase();
            for entry in snapshot.entries() {
                let info = entry.info();
                if info.commands.contains(&wanted.as_str())
                    || info.aliases.contains(&wanted.as_str())
                {
                    let mut text = format!(
                        "*{}* v{} ({})\nusage: {}{}\nexample: {}",
                        info.name, info.version, info.category, prefix, info.usage, info.example
                    );
                    if !info.aliases.is_empty() {
                        text.push_str(&format!("\naliases: {}", info.aliases.join(", ")));
                    }
                    ctx.msg.reply(&text).await?;
                    return Ok(());
                }
            }
            ctx.msg
                .reply(&format!("no command {wanted:?} — try {prefix}help"))
                .await?;
            return Ok(());
        }

        // Full menu, grouped by category.
        let mut lines = vec![format!("*{}* commands", ctx.bot.config.bot_name)];
        let mut last_category = "";
        for entry in snapshot.entries() {
            let info = entry.info();
            if info.category != last_category {
                lines.push(format!("\n_{}_", info.category));
                last_category = info.category;
            }
            for command in info.commands {
                lines.push(format!("  {prefix}{command}"));
            }
        }
        ctx.msg.reply(&lines.join("\n")).await?;
        Ok(())
    }
}
