//! Analysis cache and in-flight registry.
//!
//! Maps a request fingerprint to either a completed report or a running
//! computation. Concurrent identical requests join the running computation
//! instead of duplicating it; this is the at-most-one-concurrent-compute
//! guarantee per fingerprint. Entries expire by TTL, with optional LRU
//! eviction when a capacity limit is configured.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::models::{AnalysisMode, AnalysisReport};
use crate::preprocess::normalize_source;

/// Cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long a completed report stays servable.
    pub ttl: Duration,
    /// Optional bound on stored reports; least-recently-used entries are
    /// evicted past it.
    pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_entries: Some(256),
        }
    }
}

/// Computes the deterministic fingerprint of a request's semantically
/// relevant inputs: normalized source, sorted agent set, and mode.
pub fn fingerprint(source: &str, agent_ids: &[&str], mode: AnalysisMode) -> String {
    let mut sorted: Vec<&str> = agent_ids.to_vec();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(normalize_source(source).as_bytes());
    hasher.update([0u8]);
    for id in sorted {
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(mode.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

enum Slot {
    Ready {
        report: Arc<AnalysisReport>,
        stored_at: Instant,
        last_access: Instant,
    },
    InFlight {
        tx: broadcast::Sender<Arc<AnalysisReport>>,
    },
}

/// Result of consulting the cache for a fingerprint.
pub enum Lookup {
    /// A fresh report is stored; serve it.
    Hit(Arc<AnalysisReport>),
    /// Another task is computing this fingerprint; await its broadcast.
    Join(broadcast::Receiver<Arc<AnalysisReport>>),
    /// The caller claimed the fingerprint and must call `complete` or
    /// `abandon` when done.
    Claimed,
}

/// The cache / in-flight registry. All operations are linearizable per
/// fingerprint through the inner mutex.
pub struct AnalysisCache {
    config: CacheConfig,
    slots: Mutex<HashMap<String, Slot>>,
}

impl AnalysisCache {
    /// Creates an empty cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Consults the cache, atomically claiming the fingerprint on a miss.
    pub async fn begin(&self, fp: &str) -> Lookup {
        let mut slots = self.slots.lock().await;

        let mut expired = false;
        match slots.get_mut(fp) {
            Some(Slot::Ready {
                report,
                stored_at,
                last_access,
            }) => {
                if stored_at.elapsed() < self.config.ttl {
                    *last_access = Instant::now();
                    debug!("Cache hit for {}", &fp[..8.min(fp.len())]);
                    return Lookup::Hit(Arc::clone(report));
                }
                expired = true;
            }
            Some(Slot::InFlight { tx }) => {
                debug!("Joining in-flight computation for {}", &fp[..8.min(fp.len())]);
                return Lookup::Join(tx.subscribe());
            }
            None => {}
        }

        if expired {
            slots.remove(fp);
        }

        let (tx, _) = broadcast::channel(1);
        slots.insert(fp.to_string(), Slot::InFlight { tx });
        Lookup::Claimed
    }

    /// Stores a finished report, releasing every joined waiter with the
    /// same report instance so all of them observe identical metadata.
    pub async fn complete(&self, fp: &str, report: Arc<AnalysisReport>) {
        let mut slots = self.slots.lock().await;

        if let Some(Slot::InFlight { tx }) = slots.remove(fp) {
            // No receivers is fine; nobody joined.
            let _ = tx.send(Arc::clone(&report));
        }

        let now = Instant::now();
        slots.insert(
            fp.to_string(),
            Slot::Ready {
                report,
                stored_at: now,
                last_access: now,
            },
        );

        if let Some(max) = self.config.max_entries {
            evict_lru(&mut slots, max);
        }
    }

    /// Releases joined waiters with a report that is not worth storing
    /// (total failure); the fingerprint becomes claimable again.
    pub async fn abandon(&self, fp: &str, report: Arc<AnalysisReport>) {
        let mut slots = self.slots.lock().await;
        if let Some(Slot::InFlight { tx }) = slots.remove(fp) {
            let _ = tx.send(report);
        }
    }

    /// Number of stored (completed) reports.
    #[allow(dead_code)] // Introspection for tests and tooling
    pub async fn len(&self) -> usize {
        self.slots
            .lock()
            .await
            .values()
            .filter(|slot| matches!(slot, Slot::Ready { .. }))
            .count()
    }
}

/// Evicts least-recently-used Ready slots until the count fits. In-flight
/// slots are never evicted.
fn evict_lru(slots: &mut HashMap<String, Slot>, max: usize) {
    loop {
        let ready_count = slots
            .values()
            .filter(|slot| matches!(slot, Slot::Ready { .. }))
            .count();
        if ready_count <= max {
            return;
        }

        let oldest = slots
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Ready { last_access, .. } => Some((key.clone(), *last_access)),
                Slot::InFlight { .. } => None,
            })
            .min_by_key(|(_, last_access)| *last_access);

        match oldest {
            Some((key, _)) => {
                debug!("Evicting LRU cache entry {}", &key[..8.min(key.len())]);
                slots.remove(&key);
            }
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnalysisMode;

    fn report() -> Arc<AnalysisReport> {
        Arc::new(AnalysisReport::failed(
            "Vault".to_string(),
            "ethereum".to_string(),
            AnalysisMode::Quick,
            vec!["security".to_string()],
            10,
        ))
    }

    #[test]
    fn test_fingerprint_ignores_agent_order_and_whitespace() {
        let a = fingerprint(
            "contract A {\n  uint x;   \n}\n",
            &["security", "logic"],
            AnalysisMode::Quick,
        );
        let b = fingerprint(
            "contract A {\n  uint x;\n}",
            &["logic", "security"],
            AnalysisMode::Quick,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_distinguishes_mode_and_source() {
        let base = fingerprint("contract A {}", &["security"], AnalysisMode::Quick);
        assert_ne!(
            base,
            fingerprint("contract A {}", &["security"], AnalysisMode::Comprehensive)
        );
        assert_ne!(
            base,
            fingerprint("contract B {}", &["security"], AnalysisMode::Quick)
        );
        assert_ne!(
            base,
            fingerprint("contract A {}", &["logic"], AnalysisMode::Quick)
        );
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let cache = AnalysisCache::new(CacheConfig::default());

        assert!(matches!(cache.begin("fp1").await, Lookup::Claimed));
        let stored = report();
        cache.complete("fp1", Arc::clone(&stored)).await;

        match cache.begin("fp1").await {
            Lookup::Hit(found) => assert!(Arc::ptr_eq(&found, &stored)),
            _ => panic!("expected hit"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_claimants_join_and_get_same_instance() {
        let cache = Arc::new(AnalysisCache::new(CacheConfig::default()));

        assert!(matches!(cache.begin("fp1").await, Lookup::Claimed));
        let mut rx = match cache.begin("fp1").await {
            Lookup::Join(rx) => rx,
            _ => panic!("expected join"),
        };

        let stored = report();
        cache.complete("fp1", Arc::clone(&stored)).await;

        let joined = rx.recv().await.unwrap();
        assert!(Arc::ptr_eq(&joined, &stored));
        assert_eq!(
            joined.metadata.analysis_id,
            stored.metadata.analysis_id
        );
    }

    #[tokio::test]
    async fn test_expired_entry_is_claimable_again() {
        let cache = AnalysisCache::new(CacheConfig {
            ttl: Duration::from_millis(10),
            max_entries: None,
        });

        assert!(matches!(cache.begin("fp1").await, Lookup::Claimed));
        cache.complete("fp1", report()).await;

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(matches!(cache.begin("fp1").await, Lookup::Claimed));
    }

    #[tokio::test]
    async fn test_abandon_releases_waiters_without_storing() {
        let cache = AnalysisCache::new(CacheConfig::default());

        assert!(matches!(cache.begin("fp1").await, Lookup::Claimed));
        let mut rx = match cache.begin("fp1").await {
            Lookup::Join(rx) => rx,
            _ => panic!("expected join"),
        };

        cache.abandon("fp1", report()).await;
        assert!(rx.recv().await.is_ok());

        // A failed computation is not served from cache afterwards.
        assert!(matches!(cache.begin("fp1").await, Lookup::Claimed));
    }

    #[tokio::test]
    async fn test_lru_eviction_respects_capacity() {
        let cache = AnalysisCache::new(CacheConfig {
            ttl: Duration::from_secs(3600),
            max_entries: Some(2),
        });

        for fp in ["a", "b", "c"] {
            assert!(matches!(cache.begin(fp).await, Lookup::Claimed));
            cache.complete(fp, report()).await;
        }
        assert_eq!(cache.len().await, 2);

        // "a" was least recently used and should be gone.
        assert!(matches!(cache.begin("a").await, Lookup::Claimed));
    }
}
