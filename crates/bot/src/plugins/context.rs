//! Contexts handed to plugin hooks.
//!
//! Hooks never capture the transport: every invocation receives the
//! current connection through its context, so a reconnect or restart
//! needs no fix-up inside plugins.

use std::sync::Arc;

use herald_domain::{Config, Jid};
use herald_store::Store;

use crate::connection::Connection;
use crate::identity::IdentityResolver;
use crate::normalize::NormalizedMessage;
use crate::perms::PermissionOracle;
use crate::plugins::PluginRegistry;
use crate::ratelimit::RateLimiter;
use crate::sched::Scheduler;

/// Shared services available to every plugin hook.
pub struct BotContext {
    pub config: Arc<Config>,
    pub connection: Arc<Connection>,
    /// `None` when the deployment runs without a document store; plugins
    /// must degrade.
    pub store: Option<Arc<Store>>,
    pub resolver: Arc<IdentityResolver>,
    pub perms: Arc<PermissionOracle>,
    pub rate: Arc<RateLimiter>,
    pub scheduler: Arc<Scheduler>,
    pub registry: Arc<PluginRegistry>,
}

impl BotContext {
    /// Owner identity in canonical form.
    pub fn owner(&self) -> Jid {
        self.config.owner_jid()
    }
}

/// Everything a command invocation sees.
pub struct CommandContext {
    pub msg: NormalizedMessage,
    /// The matched command token (lowercased, without prefix).
    pub command: String,
    /// Whitespace-tokenized arguments.
    pub args: Vec<String>,
    /// The raw argument text after the command token.
    pub args_text: String,
    pub bot: Arc<BotContext>,
}

impl CommandContext {
    /// First argument, if present.
    pub fn arg(&self, n: usize) -> Option<&str> {
        self.args.get(n).map(String::as_str)
    }
}
