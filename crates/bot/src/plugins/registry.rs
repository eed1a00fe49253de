//! Plugin registry.
//!
//! Discovery walks the configured manifest directory: each `*.toml`
//! names a compiled-in plugin and may disable it. Compiled plugins
//! without a manifest load with their defaults, so the stock set works
//! on an empty directory; a missing directory is created and seeded with
//! a sample manifest.
//!
//! Command and alias names must be unique across the registry. On a
//! collision the later plugin is rejected with a diagnostic — first
//! registered wins. Readers get an immutable snapshot; `reload_all`
//! publishes a replacement atomically, and lookups made mid-reload see a
//! transient `Reloading` result.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;

use herald_domain::Result;

use super::{BotContext, Plugin, PluginEntry, PluginStats};

const SAMPLE_MANIFEST: &str = "hello.toml";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manifests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct PluginManifest {
    /// Name of a compiled-in plugin unit.
    plugin: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct RegistrySnapshot {
    entries: Vec<Arc<PluginEntry>>,
    /// command token → entry index.
    commands: HashMap<String, usize>,
    /// alias token → entry index (first registered wins).
    aliases: HashMap<String, usize>,
    /// names of units rejected at load time, with the reason.
    rejected: Vec<(String, String)>,
}

impl RegistrySnapshot {
    pub fn entries(&self) -> &[Arc<PluginEntry>] {
        &self.entries
    }

    pub fn rejected(&self) -> &[(String, String)] {
        &self.rejected
    }
}

/// Result of a command lookup.
pub enum Lookup {
    Found(Arc<PluginEntry>),
    NotFound,
    /// A reload is in flight; ask the sender to retry.
    Reloading,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PluginRegistry {
    manifest_dir: PathBuf,
    /// Compiled-in units, in registration order.
    available: Vec<Arc<dyn Plugin>>,
    snapshot: RwLock<Option<Arc<RegistrySnapshot>>>,
}

impl PluginRegistry {
    /// Build and run initial discovery.
    pub fn load(manifest_dir: &Path, available: Vec<Arc<dyn Plugin>>) -> Result<Self> {
        let registry = Self {
            manifest_dir: manifest_dir.to_path_buf(),
            available,
            snapshot: RwLock::new(None),
        };
        let snapshot = registry.discover()?;
        let count = snapshot.entries.len();
        *registry.snapshot.write() = Some(Arc::new(snapshot));
        tracing::info!(plugins = count, dir = %manifest_dir.display(), "plugin registry loaded");
        Ok(registry)
    }

    /// Current snapshot, if no reload is in flight.
    pub fn snapshot(&self) -> Option<Arc<RegistrySnapshot>> {
        self.snapshot.read().clone()
    }

    /// Resolve a command token. Exact command names beat aliases.
    pub fn lookup(&self, token: &str) -> Lookup {
        let Some(snapshot) = self.snapshot() else {
            return Lookup::Reloading;
        };
        let token = token.to_ascii_lowercase();
        let idx = snapshot
            .commands
            .get(&token)
            .or_else(|| snapshot.aliases.get(&token));
        match idx {
            Some(&i) => Lookup::Found(snapshot.entries[i].clone()),
            None => Lookup::NotFound,
        }
    }

    /// All (name, stats) pairs in registration order.
    pub fn stats(&self) -> Vec<(String, PluginStats)> {
        self.snapshot()
            .map(|s| {
                s.entries
                    .iter()
                    .map(|e| (e.info().name.to_string(), e.stats()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Plugins whose error rate exceeds 50% over their last 20 runs.
    pub fn unhealthy(&self) -> Vec<(String, f64)> {
        self.snapshot()
            .map(|s| {
                s.entries
                    .iter()
                    .filter_map(|e| {
                        let rate = e.stats().recent_error_rate();
                        (rate > 0.5).then(|| (e.info().name.to_string(), rate))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fire `on_load` for every loaded plugin, in registration order.
    pub async fn fire_on_load(&self, bot: &BotContext) {
        let Some(snapshot) = self.snapshot() else {
            return;
        };
        for entry in &snapshot.entries {
            let name = entry.info().name;
            if let Err(e) = entry.plugin().on_load(bot).await {
                tracing::warn!(plugin = name, error = %e, "on_load failed");
            }
        }
    }

    /// Fire `on_unload` for every loaded plugin and leave the registry
    /// empty (shutdown path).
    pub async fn unload_all(&self, bot: &BotContext) {
        let old = self.snapshot.write().take();
        if let Some(old) = old {
            for entry in &old.entries {
                entry.plugin().on_unload(bot).await;
            }
        }
    }

    /// Unload everything, re-run discovery, publish the new snapshot.
    /// Lookups made in between see `Reloading`.
    pub async fn reload_all(&self, bot: &BotContext) -> Result<usize> {
        self.unload_all(bot).await;
        let snapshot = match self.discover() {
            Ok(s) => s,
            Err(e) => {
                // Leave the registry empty rather than half-loaded.
                tracing::error!(error = %e, "plugin rediscovery failed");
                return Err(e);
            }
        };
        let count = snapshot.entries.len();
        *self.snapshot.write() = Some(Arc::new(snapshot));
        tracing::info!(plugins = count, "plugin registry reloaded");
        Ok(count)
    }

    // ── Discovery ───────────────────────────────────────────────────

    fn discover(&self) -> Result<RegistrySnapshot> {
        let manifests = self.read_manifests()?;

        let mut entries: Vec<Arc<PluginEntry>> = Vec::new();
        let mut commands: HashMap<String, usize> = HashMap::new();
        let mut aliases: HashMap<String, usize> = HashMap::new();
        let mut rejected: Vec<(String, String)> = Vec::new();

        for plugin in &self.available {
            let info = plugin.info();
            if manifests.get(info.name) == Some(&false) {
                tracing::debug!(plugin = info.name, "disabled by manifest");
                continue;
            }
            if info.commands.is_empty() {
                rejected.push((info.name.to_string(), "declares no commands".into()));
                tracing::warn!(plugin = info.name, "rejected: declares no commands");
                continue;
            }

            // Uniqueness across commands and aliases, after lowercasing.
            let mut tokens: Vec<String> = Vec::new();
            let mut conflict: Option<String> = None;
            for token in info.commands.iter().chain(info.aliases.iter()) {
                let token = token.to_ascii_lowercase();
                if commands.contains_key(&token)
                    || aliases.contains_key(&token)
                    || tokens.contains(&token)
                {
                    conflict = Some(token);
                    break;
                }
                tokens.push(token);
            }
            if let Some(token) = conflict {
                let reason = format!("command or alias {token:?} is already registered");
                tracing::warn!(plugin = info.name, %reason, "rejected: duplicate command");
                rejected.push((info.name.to_string(), reason));
                continue;
            }

            let idx = entries.len();
            for command in info.commands {
                commands.insert(command.to_ascii_lowercase(), idx);
            }
            for alias in info.aliases {
                aliases.entry(alias.to_ascii_lowercase()).or_insert(idx);
            }
            entries.push(PluginEntry::new(plugin.clone()));
        }

        // Manifests naming unknown plugins deserve a diagnostic too.
        for name in manifests.keys() {
            if !self.available.iter().any(|p| p.info().name == name) {
                tracing::warn!(plugin = %name, "manifest names an unknown plugin unit");
            }
        }

        Ok(RegistrySnapshot {
            entries,
            commands,
            aliases,
            rejected,
        })
    }

    /// Read `*.toml` manifests; create the directory (with the sample
    /// manifest) when missing or empty.
    fn read_manifests(&self) -> Result<HashMap<String, bool>> {
        if !self.manifest_dir.exists() {
            std::fs::create_dir_all(&self.manifest_dir)?;
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.manifest_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .collect();

        if paths.is_empty() {
            let sample = self.manifest_dir.join(SAMPLE_MANIFEST);
            std::fs::write(&sample, sample_manifest_body())?;
            tracing::info!(path = %sample.display(), "plugin directory seeded with sample manifest");
            paths.push(sample);
        }
        paths.sort();

        let mut manifests = HashMap::new();
        for path in paths {
            let text = std::fs::read_to_string(&path)?;
            match toml::from_str::<PluginManifest>(&text) {
                Ok(manifest) => {
                    manifests.insert(manifest.plugin, manifest.enabled);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "unreadable plugin manifest");
                }
            }
        }
        Ok(manifests)
    }
}

fn sample_manifest_body() -> String {
    "# Auto-generated sample plugin manifest.\n\
     # Each manifest enables one compiled-in plugin unit.\n\
     plugin = \"hello\"\n\
     enabled = true\n"
        .to_string()
}
