use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use herald_domain::{Config, ConfigSeverity};
use herald_store::Store;

use herald_bot::api::{self, ApiState};
use herald_bot::backend;
use herald_bot::connection::{Connection, ConnectionState};
use herald_bot::creds::CredsStore;
use herald_bot::health::HealthSupervisor;
use herald_bot::identity::IdentityResolver;
use herald_bot::perms::PermissionOracle;
use herald_bot::plugins::{builtin, BotContext, PluginRegistry};
use herald_bot::ratelimit::RateLimiter;
use herald_bot::sched::Scheduler;
use herald_bot::state::Bot;

/// Grace period before the shutdown hard-exit timer fires.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(15);

#[derive(Parser)]
#[command(name = "herald", version, about = "chat-service agent")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the bot (default).
    Serve,
    /// Print the version and exit.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            run_server().await
        }
        Some(Command::Version) => {
            println!("herald {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,herald_bot=debug")),
        )
        .json()
        .init();
}

async fn run_server() -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "herald starting");
    let config = Arc::new(Config::from_env());

    // ── Config validation (fatal on errors) ─────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Shutdown plumbing ───────────────────────────────────────────
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    // ── Credential store + bootstrap import ─────────────────────────
    let creds = Arc::new(CredsStore::new(&config.state_dir));
    creds.ensure().context("creating state directory")?;
    if !creds.exists() {
        if let Some(blob) = &config.session_blob {
            creds.import_bootstrap(blob);
        }
    }

    // ── Document store ──────────────────────────────────────────────
    let store = match Store::connect(&config.mongodb_uri, &config.database_name).await {
        Ok(store) => {
            tracing::info!(db = %config.database_name, "document store ready");
            Some(Arc::new(store))
        }
        Err(e) => {
            tracing::warn!(error = %e, "document store unavailable, features degrade");
            None
        }
    };

    // ── Connection supervisor ───────────────────────────────────────
    let connector = backend::connector(&config).context("selecting transport backend")?;
    let connection = Connection::new(connector, creds, shutdown.clone());
    connection.spawn();

    // ── Identity resolver ───────────────────────────────────────────
    let resolver = Arc::new(IdentityResolver::new());
    resolver.spawn_sweeper(shutdown.clone());

    // ── Plugins ─────────────────────────────────────────────────────
    let registry = Arc::new(
        PluginRegistry::load(&config.plugin_dir, builtin::all())
            .context("loading plugin registry")?,
    );

    // ── Scheduler ───────────────────────────────────────────────────
    let scheduler = Scheduler::new(connection.clone(), store.clone(), config.clone());
    scheduler.spawn_dispatcher(shutdown.clone());

    // ── Permissions & rate limits ───────────────────────────────────
    let perms = PermissionOracle::new(config.clone(), store.clone());
    let rate = Arc::new(RateLimiter::default());

    // ── Bot context + event pump ────────────────────────────────────
    let ctx = Arc::new(BotContext {
        config: config.clone(),
        connection: connection.clone(),
        store: store.clone(),
        resolver,
        perms,
        rate,
        scheduler,
        registry,
    });
    let bot = Bot::new(ctx.clone(), shutdown.clone());
    bot.spawn_event_pump();
    bot.spawn_auto_bio();

    // ── Health supervision ──────────────────────────────────────────
    HealthSupervisor::new(ctx.clone(), shutdown.clone()).spawn_all();

    // ── Control plane (runs until shutdown) ─────────────────────────
    let api_state = ApiState {
        bot: ctx,
        shutdown: shutdown.clone(),
        started_at: Instant::now(),
    };
    api::serve(api_state).await.context("control plane failed")?;

    // ── Graceful exit: transport end → store close → cache clear ────
    tracing::info!("control plane stopped, finishing shutdown");
    wait_for_stop(&connection).await;
    bot.ctx.registry.unload_all(&bot.ctx).await;
    if let Some(store) = store {
        store.close().await;
    }
    bot.ctx.resolver.clear_cache();
    bot.ctx.rate.clear();
    connection.retry_cache.clear();
    tracing::info!("herald stopped");
    Ok(())
}

/// SIGINT/SIGTERM start graceful shutdown; a hard timer forces exit 1 if
/// it stalls.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let sigint = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("installing SIGTERM handler");
            tokio::select! {
                _ = sigint => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = sigint.await;
        }

        tracing::info!("shutdown signal received");
        shutdown.cancel();

        tokio::time::sleep(SHUTDOWN_DEADLINE).await;
        tracing::error!("graceful shutdown timed out, forcing exit");
        std::process::exit(1);
    });
}

/// Give the supervisor a moment to close the session cleanly.
async fn wait_for_stop(connection: &Arc<Connection>) {
    let mut state = connection.watch_state();
    let deadline = tokio::time::sleep(Duration::from_secs(5));
    tokio::pin!(deadline);
    loop {
        if *state.borrow() == ConnectionState::Stopped {
            return;
        }
        tokio::select! {
            _ = &mut deadline => return,
            changed = state.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}
