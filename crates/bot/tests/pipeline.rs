//! End-to-end ingest: supervisor → event pump → normalizer → router →
//! plugin, all over the in-memory transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use herald_domain::{Config, Jid};
use herald_transport::mock::{MockConnector, MockHandle, MockTransport};
use herald_transport::{
    Creds, KeyPair, MessageContent, MessageFrame, MessageKey, SignedPreKey, TransportEvent,
};

use herald_bot::connection::Connection;
use herald_bot::creds::CredsStore;
use herald_bot::identity::IdentityResolver;
use herald_bot::perms::PermissionOracle;
use herald_bot::plugins::{builtin, BotContext, PluginRegistry};
use herald_bot::ratelimit::RateLimiter;
use herald_bot::sched::Scheduler;
use herald_bot::state::Bot;

struct Stack {
    transport: Arc<MockTransport>,
    handle: MockHandle,
    ctx: Arc<BotContext>,
    shutdown: CancellationToken,
    _dirs: (tempfile::TempDir, tempfile::TempDir),
}

fn sample_creds() -> Creds {
    Creds {
        noise_key: KeyPair {
            public: "cA==".into(),
            private: "cQ==".into(),
        },
        signed_identity_key: KeyPair {
            public: "cg==".into(),
            private: "cw==".into(),
        },
        signed_pre_key: SignedPreKey {
            key_pair: KeyPair {
                public: "dA==".into(),
                private: "dQ==".into(),
            },
            signature: "dg==".into(),
            key_id: 1,
        },
        registration_id: 1,
        me: None,
        extra: serde_json::Map::new(),
    }
}

async fn boot(vars: &[(&str, &str)]) -> Stack {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let config = Arc::new(Config::from_vars(&map));

    let transport = MockTransport::new();
    transport.set_user(config.owner_jid());
    let (connector, handle) = MockConnector::new(transport.clone());

    let creds_dir = tempfile::tempdir().unwrap();
    let plugin_dir = tempfile::tempdir().unwrap();
    let creds = Arc::new(CredsStore::new(creds_dir.path()));
    creds.save(&sample_creds()).unwrap();

    let shutdown = CancellationToken::new();
    let connection = Connection::new(Arc::new(connector), creds, shutdown.clone());
    connection.spawn();

    let registry =
        Arc::new(PluginRegistry::load(plugin_dir.path(), builtin::all()).unwrap());
    let resolver = Arc::new(IdentityResolver::new());
    let scheduler = Scheduler::new(connection.clone(), None, config.clone());
    let perms = PermissionOracle::new(config.clone(), None);

    let ctx = Arc::new(BotContext {
        config,
        connection,
        store: None,
        resolver,
        perms,
        rate: Arc::new(RateLimiter::default()),
        scheduler,
        registry,
    });
    let bot = Bot::new(ctx.clone(), shutdown.clone());
    bot.spawn_event_pump();

    // Open the session.
    for _ in 0..50 {
        if handle.emit(TransportEvent::Open).await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    Stack {
        transport,
        handle,
        ctx,
        shutdown,
        _dirs: (creds_dir, plugin_dir),
    }
}

fn text_frame(from: &str, text: &str) -> MessageFrame {
    let remote: Jid = format!("{from}@s.whatsapp.net").parse().unwrap();
    MessageFrame {
        key: MessageKey {
            id: format!("E2E-{text}"),
            remote,
            from_me: false,
            participant: None,
        },
        push_name: None,
        content: MessageContent::Conversation {
            text: text.into(),
            context_info: None,
        },
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn ping_round_trip() {
    let stack = boot(&[("OWNER_NUMBER", "111")]).await;

    stack
        .handle
        .emit(TransportEvent::Message(text_frame("333", ".ping")))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let texts = stack.transport.sent_texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with("pong"), "got {texts:?}");

    stack.shutdown.cancel();
}

#[tokio::test]
async fn chats_synced_notifies_owner_once() {
    let stack = boot(&[("OWNER_NUMBER", "111"), ("BOT_NAME", "TestBot")]).await;

    stack.handle.emit(TransportEvent::ChatsSynced).await;
    stack.handle.emit(TransportEvent::ChatsSynced).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let sent = stack.transport.sent.lock().clone();
    assert_eq!(sent.len(), 1, "startup notification is one-shot");
    assert_eq!(sent[0].to.to_string(), "111@s.whatsapp.net");
    assert!(sent[0].message.text.as_deref().unwrap().contains("TestBot"));

    stack.shutdown.cancel();
}

#[tokio::test]
async fn rejects_calls_when_configured() {
    let stack = boot(&[("OWNER_NUMBER", "111"), ("REJECT_CALL", "true")]).await;

    stack
        .handle
        .emit(TransportEvent::Call(herald_transport::CallEvent {
            call_id: "CALL1".into(),
            from: "333@s.whatsapp.net".parse().unwrap(),
            is_video: false,
        }))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(stack.transport.rejected_calls.lock().as_slice(), ["CALL1"]);

    stack.shutdown.cancel();
}

#[tokio::test]
async fn reload_twice_is_idempotent() {
    let stack = boot(&[("OWNER_NUMBER", "111")]).await;

    let names = |snapshot: &herald_bot::plugins::registry::RegistrySnapshot| -> Vec<String> {
        snapshot
            .entries()
            .iter()
            .map(|e| e.info().name.to_string())
            .collect()
    };
    let initial = names(&stack.ctx.registry.snapshot().unwrap());

    stack.ctx.registry.reload_all(&stack.ctx).await.unwrap();
    let once = names(&stack.ctx.registry.snapshot().unwrap());
    stack.ctx.registry.reload_all(&stack.ctx).await.unwrap();
    let twice = names(&stack.ctx.registry.snapshot().unwrap());

    assert_eq!(initial, once);
    assert_eq!(once, twice);

    stack.shutdown.cancel();
}

#[tokio::test]
async fn help_lists_commands() {
    let stack = boot(&[("OWNER_NUMBER", "111")]).await;

    stack
        .handle
        .emit(TransportEvent::Message(text_frame("333", ".help")))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let texts = stack.transport.sent_texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains(".ping"));
    assert!(texts[0].contains(".mode"));

    stack.shutdown.cancel();
}
