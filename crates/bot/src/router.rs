//! Command routing.
//!
//! One inbound normalized message flows through: status-broadcast
//! handling, auto-read/auto-react, ban and mode gates, the global rate
//! limit, prefix parsing, plugin gates (owner → admin → group), the
//! anti-link policy, and finally the plugin invocation with error
//! isolation. Gate refusals reply with a one-line reason; bans and rate
//! limits drop silently to avoid amplification.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use rand::Rng;
use regex::Regex;
use tracing::Instrument;

use crate::normalize::NormalizedMessage;
use crate::plugins::{BotContext, CommandContext, Lookup};
use crate::ratelimit::SCOPE_GLOBAL;

/// Delay between the anti-link warning and the removal.
const ANTILINK_COURTESY_DELAY: Duration = Duration::from_secs(2);

const AUTO_REACT_RATE: f64 = 0.10;
const AUTO_REACT_EMOJI: &[&str] = &["👍", "😂", "🔥", "❤️", "💯", "🙌"];

/// Explicit URLs only; bare domain-like tokens are deliberately not
/// matched to keep false positives out of ordinary chat.
fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bhttps?://\S+").unwrap())
}

pub struct Router {
    bot: Arc<BotContext>,
}

impl Router {
    pub fn new(bot: Arc<BotContext>) -> Self {
        Self { bot }
    }

    pub fn context(&self) -> &Arc<BotContext> {
        &self.bot
    }

    /// Route one inbound message. Never returns an error: everything is
    /// handled or logged here.
    pub async fn handle_message(&self, msg: NormalizedMessage) {
        let config = &self.bot.config;

        // Status broadcasts never reach plugins.
        if msg.chat.is_status_broadcast() {
            if config.auto_status_seen {
                if let Err(e) = msg.transport().read_messages(&[msg.key().clone()]).await {
                    tracing::warn!(error = %e, "status-seen ack failed");
                }
            }
            return;
        }

        if config.auto_read {
            if let Err(e) = msg.transport().read_messages(&[msg.key().clone()]).await {
                tracing::warn!(error = %e, "auto-read failed");
            }
        }

        if config.auto_react && !msg.from_me && !msg.body.is_empty() {
            let roll: f64 = rand::thread_rng().gen();
            if roll < AUTO_REACT_RATE {
                let emoji = AUTO_REACT_EMOJI[rand::thread_rng().gen_range(0..AUTO_REACT_EMOJI.len())];
                if let Err(e) = msg.react(emoji).await {
                    tracing::debug!(error = %e, "auto-react failed");
                }
            }
        }

        // Permission snapshot for this message.
        let is_owner = self.bot.perms.is_owner(&msg.sender);
        let is_admin = self.bot.perms.is_admin(&msg.sender).await;

        if !is_owner && self.bot.perms.is_banned(&msg.sender).await {
            tracing::debug!(sender = %msg.sender, "dropped message from banned sender");
            return;
        }
        if self.bot.perms.bot_mode().await == herald_domain::BotMode::Private
            && !is_owner
            && !is_admin
        {
            tracing::debug!(sender = %msg.sender, "dropped: bot is private");
            return;
        }

        if !self.bot.rate.check(&msg.sender, SCOPE_GLOBAL) {
            tracing::debug!(sender = %msg.sender, "rate limited");
            return;
        }

        // Command token, when the raw body starts exactly with the
        // prefix (leading whitespace defeats the match).
        let command = self.parse_command(&msg);

        if let Some((token, _)) = &command {
            if !self.apply_gates(&msg, token, is_owner, is_admin).await {
                return;
            }
        }

        // Anti-link applies to every group message, command or not.
        if self.enforce_antilink(&msg, is_owner, is_admin).await {
            return;
        }

        if let Some((token, args_text)) = command {
            self.invoke(msg, token, args_text).await;
        }
    }

    /// Split `.cmd rest of args` into `(cmd, "rest of args")`.
    fn parse_command(&self, msg: &NormalizedMessage) -> Option<(String, String)> {
        let prefix = &self.bot.config.prefix;
        let rest = msg.raw_body().strip_prefix(prefix.as_str())?;
        let rest = rest.trim_start();
        if rest.is_empty() {
            return None;
        }
        let (token, args_text) = match rest.split_once(char::is_whitespace) {
            Some((token, args)) => (token, args.trim()),
            None => (rest.trim_end(), ""),
        };
        Some((token.to_ascii_lowercase(), args_text.to_string()))
    }

    /// Plugin gates, in order. Returns false when the message must not
    /// proceed; each refusal sends a single one-line diagnostic.
    async fn apply_gates(
        &self,
        msg: &NormalizedMessage,
        token: &str,
        is_owner: bool,
        is_admin: bool,
    ) -> bool {
        let entry = match self.bot.registry.lookup(token) {
            Lookup::Found(entry) => entry,
            Lookup::NotFound => return true, // nothing to gate; nothing will run
            Lookup::Reloading => {
                if let Err(e) = msg.reply("plugins are reloading, try again in a moment").await {
                    tracing::warn!(error = %e, "reloading notice failed");
                }
                return false;
            }
        };
        let info = entry.info();

        if info.owner_only && !is_owner {
            self.deny(msg, "owner only").await;
            return false;
        }
        if info.admin_only && !is_admin {
            self.deny(msg, "admins only").await;
            return false;
        }
        if info.group_only && !msg.is_group {
            self.deny(msg, "groups only").await;
            return false;
        }
        true
    }

    async fn deny(&self, msg: &NormalizedMessage, reason: &str) {
        if let Err(e) = msg.reply(reason).await {
            tracing::warn!(error = %e, "gate diagnostic failed");
        }
    }

    /// Returns true when the message was consumed by the policy.
    async fn enforce_antilink(
        &self,
        msg: &NormalizedMessage,
        is_owner: bool,
        is_admin: bool,
    ) -> bool {
        if !self.bot.config.antilink || !msg.is_group || is_owner || is_admin {
            return false;
        }
        if !url_regex().is_match(&msg.body) {
            return false;
        }
        if msg.is_admin().await {
            return false;
        }

        tracing::info!(sender = %msg.sender, chat = %msg.chat, "anti-link triggered");
        if let Err(e) = msg.reply("links are not allowed here").await {
            tracing::warn!(error = %e, "anti-link warning failed");
        }
        tokio::time::sleep(ANTILINK_COURTESY_DELAY).await;

        if !msg.is_bot_admin().await {
            tracing::warn!(chat = %msg.chat, "anti-link: bot is not a group admin, cannot remove");
            return true;
        }
        if let Err(e) = msg
            .transport()
            .group_remove(&msg.chat, &[msg.sender.clone()])
            .await
        {
            tracing::warn!(error = %e, sender = %msg.sender, "anti-link removal failed");
        }
        true
    }

    /// Invoke the plugin with error isolation and stats recording.
    async fn invoke(&self, msg: NormalizedMessage, token: String, args_text: String) {
        let entry = match self.bot.registry.lookup(&token) {
            Lookup::Found(entry) => entry,
            Lookup::NotFound => return,
            Lookup::Reloading => {
                if let Err(e) = msg.reply("plugins are reloading, try again in a moment").await {
                    tracing::warn!(error = %e, "reloading notice failed");
                }
                return;
            }
        };
        let name = entry.info().name;

        let ctx = CommandContext {
            args: args_text.split_whitespace().map(str::to_string).collect(),
            args_text,
            command: token,
            msg,
            bot: self.bot.clone(),
        };

        let span = tracing::info_span!("plugin", name);
        let started = Instant::now();
        let result = entry.plugin().run(&ctx).instrument(span).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => entry.record_success(elapsed_ms),
            Err(e) => {
                entry.record_error(&e.to_string(), elapsed_ms);
                if e.is_decrypt_noise() {
                    tracing::warn!(plugin = name, error = %e, "decrypt noise during command");
                } else {
                    tracing::warn!(plugin = name, error = %e, "plugin run failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;

    use herald_domain::{Config, Error, Jid, Result};
    use herald_transport::mock::{MockConnector, MockTransport};
    use herald_transport::{
        AdminRank, GroupMetadata, GroupParticipant, MessageContent, MessageFrame, MessageKey,
    };

    use crate::connection::Connection;
    use crate::creds::CredsStore;
    use crate::identity::IdentityResolver;
    use crate::normalize::normalize;
    use crate::plugins::{Plugin, PluginInfo, PluginRegistry};
    use crate::ratelimit::RateLimiter;
    use crate::sched::Scheduler;

    // ── Test plugin ─────────────────────────────────────────────────

    #[derive(Default)]
    struct Recorder {
        runs: Mutex<Vec<String>>,
    }

    struct RecordingPlugin {
        info: PluginInfo,
        recorder: Arc<Recorder>,
        fail: bool,
    }

    #[async_trait]
    impl Plugin for RecordingPlugin {
        fn info(&self) -> &PluginInfo {
            &self.info
        }

        async fn run(&self, ctx: &CommandContext) -> Result<()> {
            self.recorder.runs.lock().push(ctx.command.clone());
            if self.fail {
                return Err(Error::Other("plugin exploded".into()));
            }
            Ok(())
        }
    }

    fn plugin(
        name: &'static str,
        commands: &'static [&'static str],
        admin_only: bool,
        recorder: Arc<Recorder>,
        fail: bool,
    ) -> Arc<dyn Plugin> {
        Arc::new(RecordingPlugin {
            info: PluginInfo {
                name,
                version: "1.0.0",
                category: "test",
                commands,
                aliases: &[],
                admin_only,
                group_only: false,
                owner_only: false,
                usage: "",
                example: "",
            },
            recorder,
            fail,
        })
    }

    // ── Rig ─────────────────────────────────────────────────────────

    struct Rig {
        router: Router,
        transport: Arc<MockTransport>,
        resolver: Arc<IdentityResolver>,
        recorder: Arc<Recorder>,
        _dirs: (tempfile::TempDir, tempfile::TempDir),
    }

    fn rig_with(vars: &[(&str, &str)], plugins: Vec<Arc<dyn Plugin>>) -> Rig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let config = Arc::new(Config::from_vars(&map));

        let transport = MockTransport::new();
        let (connector, _handle) = MockConnector::new(transport.clone());
        let creds_dir = tempfile::tempdir().unwrap();
        let plugin_dir = tempfile::tempdir().unwrap();
        let connection = Connection::new(
            Arc::new(connector),
            Arc::new(CredsStore::new(creds_dir.path())),
            CancellationToken::new(),
        );
        let registry = Arc::new(PluginRegistry::load(plugin_dir.path(), plugins).unwrap());
        let resolver = Arc::new(IdentityResolver::new());
        let scheduler = Scheduler::new(connection.clone(), None, config.clone());
        let perms = crate::perms::PermissionOracle::new(config.clone(), None);

        let bot = Arc::new(BotContext {
            config,
            connection,
            store: None,
            resolver: resolver.clone(),
            perms,
            rate: Arc::new(RateLimiter::default()),
            scheduler,
            registry,
        });
        let recorder = Arc::new(Recorder::default());
        Rig {
            router: Router::new(bot),
            transport,
            resolver,
            recorder,
            _dirs: (creds_dir, plugin_dir),
        }
    }

    fn rig(vars: &[(&str, &str)]) -> Rig {
        let recorder = Arc::new(Recorder::default());
        let mut r = rig_with(
            vars,
            vec![
                plugin("foo", &["bar"], true, recorder.clone(), false),
                plugin("echo", &["echo"], false, recorder.clone(), false),
                plugin("boom", &["boom"], false, recorder.clone(), true),
            ],
        );
        r.recorder = recorder;
        r
    }

    /// `chat` is either `"direct"` (DM from `from`) or a group jid.
    async fn send_text(rig: &Rig, from: &str, chat: &str, text: &str) {
        let remote: Jid = if chat == "direct" {
            format!("{from}@s.whatsapp.net").parse().unwrap()
        } else {
            chat.parse().unwrap()
        };
        let participant = remote
            .is_group()
            .then(|| format!("{from}@s.whatsapp.net"));
        let frame = MessageFrame {
            key: MessageKey {
                id: format!("T{}", rig.transport.sent.lock().len()),
                remote,
                from_me: false,
                participant,
            },
            push_name: None,
            content: MessageContent::Conversation {
                text: text.into(),
                context_info: None,
            },
            timestamp: Utc::now(),
        };
        let msg = normalize(frame, rig.transport.clone(), &rig.resolver).await;
        rig.router.handle_message(msg).await;
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn command_gating_scenario() {
        let rig = rig(&[("OWNER_NUMBER", "111"), ("ADMIN_NUMBERS", "222")]);

        // Non-admin sender: diagnostic, no run.
        send_text(&rig, "333", "direct", ".bar").await;
        assert_eq!(rig.transport.sent_texts(), vec!["admins only"]);
        assert!(rig.recorder.runs.lock().is_empty());

        // Admin sender: runs once.
        send_text(&rig, "222", "direct", ".bar").await;
        assert_eq!(rig.recorder.runs.lock().as_slice(), ["bar"]);
    }

    #[tokio::test]
    async fn strict_prefix_no_leading_whitespace() {
        let rig = rig(&[("OWNER_NUMBER", "111")]);
        send_text(&rig, "333", "direct", " .echo hi").await;
        assert!(rig.recorder.runs.lock().is_empty(), "leading space is not a command");

        send_text(&rig, "333", "direct", ".echo hi").await;
        assert_eq!(rig.recorder.runs.lock().as_slice(), ["echo"]);
    }

    #[tokio::test]
    async fn rate_limit_drops_eleventh_silently() {
        let rig = rig(&[("OWNER_NUMBER", "111")]);
        for _ in 0..11 {
            send_text(&rig, "444", "direct", ".echo x").await;
        }
        assert_eq!(
            rig.recorder.runs.lock().len(),
            10,
            "first 10 dispatched, 11th dropped"
        );
        // Silent: no diagnostic reply was sent.
        assert!(rig.transport.sent_texts().is_empty());
    }

    #[tokio::test]
    async fn private_mode_drops_non_admins() {
        let rig = rig(&[("OWNER_NUMBER", "111"), ("MODE", "private")]);
        send_text(&rig, "333", "direct", ".echo hi").await;
        assert!(rig.recorder.runs.lock().is_empty());
        assert!(rig.transport.sent_texts().is_empty(), "silent drop");

        send_text(&rig, "111", "direct", ".echo hi").await;
        assert_eq!(rig.recorder.runs.lock().len(), 1, "owner still served");
    }

    #[tokio::test]
    async fn plugin_errors_update_stats_but_do_not_propagate() {
        let rig = rig(&[("OWNER_NUMBER", "111")]);
        send_text(&rig, "333", "direct", ".boom").await;
        send_text(&rig, "333", "direct", ".echo ok").await;

        let stats = rig.router.context().registry.stats();
        let boom = stats.iter().find(|(n, _)| n == "boom").unwrap();
        assert_eq!(boom.1.errors, 1);
        assert_eq!(boom.1.last_error.as_deref(), Some("plugin exploded"));
        assert_eq!(rig.recorder.runs.lock().len(), 2, "router kept going");
    }

    #[tokio::test]
    async fn antilink_warns_then_removes() {
        tokio::time::pause();
        let rig = rig(&[("OWNER_NUMBER", "111"), ("ANTILINK", "true")]);

        let group = "1203630412@g.us";
        let sender: Jid = "333@s.whatsapp.net".parse().unwrap();
        let me: Jid = "999@s.whatsapp.net".parse().unwrap();
        rig.transport.set_user(me.clone());
        rig.transport.put_group(GroupMetadata {
            id: group.parse().unwrap(),
            subject: "g".into(),
            description: None,
            participants: vec![
                GroupParticipant {
                    id: sender.clone(),
                    surrogate_key: None,
                    phone: None,
                    admin: None,
                },
                GroupParticipant {
                    id: me,
                    surrogate_key: None,
                    phone: None,
                    admin: Some(AdminRank::Admin),
                },
            ],
        });

        send_text(&rig, "333", group, "check https://example.com out").await;

        assert_eq!(rig.transport.sent_texts(), vec!["links are not allowed here"]);
        let removed = rig.transport.removed.lock();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].1, vec![sender]);
        assert!(rig.recorder.runs.lock().is_empty(), "no plugin ran");
    }

    #[tokio::test]
    async fn antilink_ignores_bare_domains_and_admins() {
        tokio::time::pause();
        let rig = rig(&[
            ("OWNER_NUMBER", "111"),
            ("ADMIN_NUMBERS", "222"),
            ("ANTILINK", "true"),
        ]);
        let group = "1203630412@g.us";
        rig.transport.put_group(GroupMetadata {
            id: group.parse().unwrap(),
            subject: "g".into(),
            description: None,
            participants: vec![],
        });

        // Bare domain token: not a link under the policy.
        send_text(&rig, "333", group, "see foo.bar for details").await;
        // Admin posting a real link: exempt.
        send_text(&rig, "222", group, "https://example.com").await;

        assert!(rig.transport.removed.lock().is_empty());
        assert!(rig.transport.sent_texts().is_empty());
    }

    #[tokio::test]
    async fn status_broadcast_short_circuits() {
        let rig = rig(&[("OWNER_NUMBER", "111"), ("AUTO_STATUS_SEEN", "true")]);
        send_text(&rig, "333", "status@broadcast", ".echo hi").await;
        assert!(rig.recorder.runs.lock().is_empty());
        assert_eq!(rig.transport.read_marks.lock().len(), 1, "status acked");
    }

    #[tokio::test]
    async fn unknown_commands_are_ignored() {
        let rig = rig(&[("OWNER_NUMBER", "111")]);
        send_text(&rig, "333", "direct", ".nosuchcommand").await;
        assert!(rig.recorder.runs.lock().is_empty());
        assert!(rig.transport.sent_texts().is_empty());
    }
}
