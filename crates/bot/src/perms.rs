//! Permission oracle: owner, admin, ban, and bot-mode predicates.
//!
//! Admin status is the union of the configured owner, the configured
//! admin list, and the store's admin collection. Every store-backed
//! check degrades to config-only when the store is down.

use std::sync::Arc;

use herald_domain::{BotMode, Config, Jid};
use herald_store::Store;

pub struct PermissionOracle {
    config: Arc<Config>,
    store: Option<Arc<Store>>,
}

impl PermissionOracle {
    pub fn new(config: Arc<Config>, store: Option<Arc<Store>>) -> Arc<Self> {
        Arc::new(Self { config, store })
    }

    /// Owner comparison is over canonical local parts.
    pub fn is_owner(&self, who: &Jid) -> bool {
        who.to_canonical().local() == self.config.owner_number
    }

    /// Owner, configured admin, or store-backed admin.
    pub async fn is_admin(&self, who: &Jid) -> bool {
        if self.is_owner(who) {
            return true;
        }
        let local = who.to_canonical().local().to_string();
        if self.config.admin_numbers.iter().any(|n| *n == local) {
            return true;
        }
        if let Some(store) = &self.store {
            match store.is_admin(&who.to_canonical()).await {
                Ok(admin) => return admin,
                Err(e) => {
                    tracing::warn!(error = %e, "admin lookup degraded to config-only");
                }
            }
        }
        false
    }

    /// Store-backed ban list. The owner can never be banned; store
    /// failure reads as not banned.
    pub async fn is_banned(&self, who: &Jid) -> bool {
        if self.is_owner(who) {
            return false;
        }
        let Some(store) = &self.store else {
            return false;
        };
        match store.is_banned(&who.to_canonical()).await {
            Ok(banned) => banned,
            Err(e) => {
                tracing::warn!(error = %e, "ban lookup failed, treating as not banned");
                false
            }
        }
    }

    /// Persisted bot mode, falling back to the static config value.
    pub async fn bot_mode(&self) -> BotMode {
        if let Some(store) = &self.store {
            match store.bot_mode().await {
                Ok(Some(mode)) => return mode,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "mode lookup failed, using configured mode");
                }
            }
        }
        self.config.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn oracle(owner: &str, admins: &str, mode: &str) -> Arc<PermissionOracle> {
        let vars: HashMap<String, String> = [
            ("OWNER_NUMBER".to_string(), owner.to_string()),
            ("ADMIN_NUMBERS".to_string(), admins.to_string()),
            ("MODE".to_string(), mode.to_string()),
        ]
        .into_iter()
        .collect();
        PermissionOracle::new(Arc::new(Config::from_vars(&vars)), None)
    }

    fn jid(n: &str) -> Jid {
        Jid::from_digits(n)
    }

    #[tokio::test]
    async fn owner_and_config_admins() {
        let oracle = oracle("111", "222, 333", "public");
        assert!(oracle.is_owner(&jid("111")));
        assert!(!oracle.is_owner(&jid("222")));

        assert!(oracle.is_admin(&jid("111")).await, "owner is an admin");
        assert!(oracle.is_admin(&jid("222")).await);
        assert!(oracle.is_admin(&jid("333")).await);
        assert!(!oracle.is_admin(&jid("444")).await);
    }

    #[tokio::test]
    async fn device_suffix_does_not_defeat_owner_check() {
        let oracle = oracle("111", "", "public");
        let suffixed: Jid = "111:9@s.whatsapp.net".parse().unwrap();
        assert!(oracle.is_owner(&suffixed));
        assert!(oracle.is_admin(&suffixed).await);
    }

    #[tokio::test]
    async fn no_store_means_nobody_is_banned() {
        let oracle = oracle("111", "", "public");
        assert!(!oracle.is_banned(&jid("444")).await);
        assert!(!oracle.is_banned(&jid("111")).await);
    }

    #[tokio::test]
    async fn mode_falls_back_to_config() {
        let oracle = oracle("111", "", "private");
        assert_eq!(oracle.bot_mode().await, BotMode::Private);
    }
}
