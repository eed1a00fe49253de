//! `hello` — the auto-generated sample unit.
//!
//! Ships as a starting point for plugin authors. It deliberately claims
//! `help` alongside its own command; the registry's first-registered-wins
//! rule rejects the unit, which doubles as a live demonstration of the
//! collision diagnostic.

use async_trait::async_trait;

use herald_domain::Result;

use crate::plugins::{CommandContext, Plugin, PluginInfo};

static INFO: PluginInfo = PluginInfo {
    name: "hello",
    version: "1.0.0",
    category: "sample",
    commands: &["hello", "help"],
    aliases: &[],
    admin_only: false,
    group_only: false,
    owner_only: false,
    usage: "hello",
    example: ".hello",
};

pub struct HelloPlugin;

#[async_trait]
impl Plugin for HelloPlugin {
    fn info(&self) -> &PluginInfo {
        &INFO
    }

    async fn run(&self, ctx: &CommandContext) -> Result<()> {
        let name = ctx.msg.display_name().await;
        ctx.msg.reply(&format!("hello, {name}!")).await?;
        Ok(())
    }
}
