//! Identity resolution.
//!
//! Opaque identities from the transport — device-suffixed user ids and
//! surrogate group-member keys — are canonicalized here before anything
//! is stored or compared. Surrogate resolution goes through the group
//! roster and is cached with a TTL; the cache is process-local and never
//! persisted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use herald_domain::Jid;
use herald_transport::Transport;

/// Cache entries expire this long after insertion.
const CACHE_TTL: Duration = Duration::from_secs(30 * 60);
/// The whole cache is dropped on this cadence to bound memory.
pub const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// A resolution result. `provisional` marks best-effort values that must
/// be re-resolved before being persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub jid: Jid,
    pub provisional: bool,
}

impl Resolved {
    fn settled(jid: Jid) -> Self {
        Self {
            jid,
            provisional: false,
        }
    }

    fn provisional(jid: Jid) -> Self {
        Self {
            jid,
            provisional: true,
        }
    }
}

struct CacheEntry {
    jid: Jid,
    inserted_at: Instant,
}

pub struct IdentityResolver {
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Canonicalize an opaque identity.
    ///
    /// Three cases:
    /// - a user identity (possibly device-suffixed) canonicalizes purely;
    /// - a surrogate (`@lid`) identity is looked up in the cache, then in
    ///   the group roster when `group` is known — insert-on-success;
    /// - anything else passes through unchanged with a warning.
    ///
    /// A failed roster lookup yields a digits-derived best-effort value
    /// marked `provisional`.
    pub async fn resolve(
        &self,
        transport: &dyn Transport,
        opaque: &str,
        group: Option<&Jid>,
    ) -> Resolved {
        let parsed: Jid = match opaque.parse() {
            Ok(jid) => jid,
            Err(_) => {
                tracing::warn!(opaque, "unparseable identity, passing through as digits");
                return Resolved::provisional(Jid::from_digits(opaque));
            }
        };

        if parsed.is_user() {
            return Resolved::settled(parsed.to_canonical());
        }

        if parsed.is_surrogate() {
            if let Some(hit) = self.cache_get(opaque) {
                return Resolved::settled(hit);
            }
            if let Some(group) = group {
                match transport.group_metadata(group).await {
                    Ok(meta) => {
                        let canonical = meta.participants.iter().find_map(|p| {
                            let matches = p.surrogate_key.as_deref() == Some(parsed.local())
                                || p.id.to_canonical() == parsed.to_canonical();
                            if matches {
                                p.phone.clone().or_else(|| {
                                    p.id.is_user().then(|| p.id.to_canonical())
                                })
                            } else {
                                None
                            }
                        });
                        if let Some(jid) = canonical {
                            self.cache_put(opaque, jid.clone());
                            return Resolved::settled(jid);
                        }
                        tracing::warn!(opaque, group = %group, "surrogate not in roster");
                    }
                    Err(e) => {
                        tracing::warn!(opaque, group = %group, error = %e, "roster fetch failed");
                    }
                }
            }
            // Best-effort: derive from digits, flag for re-resolution.
            return Resolved::provisional(Jid::from_digits(parsed.local()));
        }

        tracing::warn!(opaque, "identity not in a resolvable form, returning unchanged");
        Resolved::settled(parsed)
    }

    /// Strictly canonical form or nothing: individual-endpoint suffix and
    /// a purely numeric local part.
    pub fn validate_and_normalize(opaque: &str) -> Option<Jid> {
        let jid: Jid = opaque.parse().ok()?;
        let canonical = jid.to_canonical();
        canonical.is_canonical_user().then_some(canonical)
    }

    fn cache_get(&self, key: &str) -> Option<Jid> {
        let cache = self.cache.lock();
        let entry = cache.get(key)?;
        (entry.inserted_at.elapsed() < CACHE_TTL).then(|| entry.jid.clone())
    }

    fn cache_put(&self, key: &str, jid: Jid) {
        self.cache.lock().insert(
            key.to_string(),
            CacheEntry {
                jid,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop the whole cache. Called hourly and by the memory loop.
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Spawn the hourly full-cache sweep.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        shutdown: tokio_util::sync::CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let resolver = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CACHE_SWEEP_INTERVAL);
            interval.tick().await; // immediate first tick
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let dropped = resolver.cache_len();
                        resolver.clear_cache();
                        if dropped > 0 {
                            tracing::debug!(dropped, "identity cache swept");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_transport::mock::MockTransport;
    use herald_transport::{AdminRank, GroupMetadata, GroupParticipant};

    fn group_with_surrogate() -> GroupMetadata {
        GroupMetadata {
            id: "1203630412@g.us".parse().unwrap(),
            subject: "test group".into(),
            description: None,
            participants: vec![GroupParticipant {
                id: "98765@lid".parse().unwrap(),
                surrogate_key: Some("98765".into()),
                phone: Some("2348012345678@s.whatsapp.net".parse().unwrap()),
                admin: Some(AdminRank::Admin),
            }],
        }
    }

    #[tokio::test]
    async fn device_suffix_is_stripped() {
        let transport = MockTransport::new();
        let resolver = IdentityResolver::new();
        let r = resolver
            .resolve(&*transport, "111:7@s.whatsapp.net", None)
            .await;
        assert!(!r.provisional);
        assert_eq!(r.jid.to_string(), "111@s.whatsapp.net");
    }

    #[tokio::test]
    async fn surrogate_resolves_via_roster_then_cache() {
        let transport = MockTransport::new();
        transport.put_group(group_with_surrogate());
        let group: Jid = "1203630412@g.us".parse().unwrap();
        let resolver = IdentityResolver::new();

        let r = resolver
            .resolve(&*transport, "98765@lid", Some(&group))
            .await;
        assert!(!r.provisional);
        assert_eq!(r.jid.to_string(), "2348012345678@s.whatsapp.net");
        assert_eq!(resolver.cache_len(), 1);

        // Second resolution must not need the roster.
        transport.fail_next_group_lookups(1);
        let r2 = resolver
            .resolve(&*transport, "98765@lid", Some(&group))
            .await;
        assert_eq!(r2, r);
    }

    #[tokio::test]
    async fn roster_failure_yields_provisional_digits() {
        let transport = MockTransport::new();
        transport.fail_next_group_lookups(1);
        let group: Jid = "1203630412@g.us".parse().unwrap();
        let resolver = IdentityResolver::new();

        let r = resolver
            .resolve(&*transport, "98765@lid", Some(&group))
            .await;
        assert!(r.provisional);
        assert_eq!(r.jid.to_string(), "98765@s.whatsapp.net");
        assert_eq!(resolver.cache_len(), 0, "failures are not cached");
    }

    #[tokio::test]
    async fn other_forms_pass_through() {
        let transport = MockTransport::new();
        let resolver = IdentityResolver::new();
        let r = resolver
            .resolve(&*transport, "1203630412@g.us", None)
            .await;
        assert!(!r.provisional);
        assert_eq!(r.jid.to_string(), "1203630412@g.us");
    }

    #[tokio::test]
    async fn resolve_is_idempotent() {
        let transport = MockTransport::new();
        transport.put_group(group_with_surrogate());
        let group: Jid = "1203630412@g.us".parse().unwrap();
        let resolver = IdentityResolver::new();

        let once = resolver
            .resolve(&*transport, "98765@lid", Some(&group))
            .await;
        let twice = resolver
            .resolve(&*transport, &once.jid.to_string(), Some(&group))
            .await;
        assert_eq!(once.jid, twice.jid);
    }

    #[test]
    fn validate_and_normalize_filters() {
        assert_eq!(
            IdentityResolver::validate_and_normalize("111:3@s.whatsapp.net")
                .unwrap()
                .to_string(),
            "111@s.whatsapp.net"
        );
        assert!(IdentityResolver::validate_and_normalize("1203630412@g.us").is_none());
        assert!(IdentityResolver::validate_and_normalize("98765@lid").is_none());
        assert!(IdentityResolver::validate_and_normalize("abc@s.whatsapp.net").is_none());
        assert!(IdentityResolver::validate_and_normalize("not-a-jid").is_none());
    }
}
