//! `ping` — liveness check with end-to-end latency.

use async_trait::async_trait;
use chrono::Utc;

use herald_domain::Result;

use crate::plugins::{CommandContext, Plugin, PluginInfo};

static INFO: PluginInfo = PluginInfo {
    name: "ping",
    version: "1.0.0",
    category: "core",
    commands: &["ping"],
    aliases: &["speed"],
    admin_only: false,
    group_only: false,
    owner_only: false,
    usage: "ping",
    example: ".ping",
};

pub struct PingPlugin;

#[async_trait]
impl Plugin for PingPlugin {
    fn info(&self) -> &PluginInfo {
        &INFO
    }

    async fn run(&self, ctx: &CommandContext) -> Result<()> {
        let latency_ms = (Utc::now() - ctx.msg.timestamp).num_milliseconds().max(0);
        ctx.msg.reply(&format!("pong — {latency_ms} ms")).await?;
        Ok(())
    }
}
