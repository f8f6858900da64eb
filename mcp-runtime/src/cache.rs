use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use skybridge_core::spaces::{SchemaEntry, SpaceMetadata, SpaceRef};

/// Two independent in-process maps: space metadata and tool schemas.
///
/// Entries expire on read when older than the configured TTL; there is no
/// background eviction. Private spaces never enter either map: the cache key
/// is not scoped by bearer token, so serving private data from it would leak
/// across tenants. Locks are never held across I/O.
pub struct SpaceCache {
    metadata: RwLock<HashMap<SpaceRef, CacheSlot<SpaceMetadata>>>,
    schemas: RwLock<HashMap<SpaceRef, CacheSlot<SchemaEntry>>>,
    metadata_ttl: Duration,
    schema_ttl: Duration,
    pub stats: CacheStats,
}

struct CacheSlot<T> {
    value: T,
    fetched_at: Instant,
}

/// Observability counters. Not part of the protocol surface.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub metadata_hits: AtomicU64,
    pub metadata_misses: AtomicU64,
    pub metadata_revalidations: AtomicU64,
    pub schema_hits: AtomicU64,
    pub schema_misses: AtomicU64,
}

impl CacheStats {
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "metadata": {
                "hits": self.metadata_hits.load(Ordering::Relaxed),
                "misses": self.metadata_misses.load(Ordering::Relaxed),
                "revalidations": self.metadata_revalidations.load(Ordering::Relaxed),
            },
            "schema": {
                "hits": self.schema_hits.load(Ordering::Relaxed),
                "misses": self.schema_misses.load(Ordering::Relaxed),
            }
        })
    }
}

impl SpaceCache {
    pub fn new(metadata_ttl: Duration, schema_ttl: Duration) -> Self {
        Self {
            metadata: RwLock::new(HashMap::new()),
            schemas: RwLock::new(HashMap::new()),
            metadata_ttl,
            schema_ttl,
            stats: CacheStats::default(),
        }
    }

    /// Fresh metadata, or `None` when absent or expired.
    pub fn get_metadata(&self, space_ref: &SpaceRef) -> Option<SpaceMetadata> {
        let guard = self.metadata.read().unwrap_or_else(|e| e.into_inner());
        match guard.get(space_ref) {
            Some(slot) if slot.fetched_at.elapsed() < self.metadata_ttl => {
                self.stats.metadata_hits.fetch_add(1, Ordering::Relaxed);
                Some(slot.value.clone())
            }
            _ => {
                self.stats.metadata_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Metadata regardless of freshness. Used to supply `If-None-Match` on
    /// revalidation; does not touch the hit/miss counters.
    pub fn get_metadata_stale(&self, space_ref: &SpaceRef) -> Option<SpaceMetadata> {
        let guard = self.metadata.read().unwrap_or_else(|e| e.into_inner());
        guard.get(space_ref).map(|slot| slot.value.clone())
    }

    /// Bump `fetched_at` without replacing the value (after a 304).
    pub fn touch_metadata(&self, space_ref: &SpaceRef) {
        let mut guard = self.metadata.write().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = guard.get_mut(space_ref) {
            slot.fetched_at = Instant::now();
            self.stats
                .metadata_revalidations
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Unconditional replace, unless the space is private, which never caches.
    pub fn put_metadata(&self, value: SpaceMetadata) {
        if value.private {
            return;
        }
        let mut guard = self.metadata.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(
            value.space_ref.clone(),
            CacheSlot {
                value,
                fetched_at: Instant::now(),
            },
        );
    }

    pub fn get_schema(&self, space_ref: &SpaceRef) -> Option<SchemaEntry> {
        let guard = self.schemas.read().unwrap_or_else(|e| e.into_inner());
        match guard.get(space_ref) {
            Some(slot) if slot.fetched_at.elapsed() < self.schema_ttl => {
                self.stats.schema_hits.fetch_add(1, Ordering::Relaxed);
                Some(slot.value.clone())
            }
            _ => {
                self.stats.schema_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a schema entry. The caller is responsible for never passing a
    /// private space's schema here; `put_schema_checked` enforces it.
    pub fn put_schema_checked(&self, entry: SchemaEntry, private: bool) {
        if private {
            return;
        }
        let mut guard = self.schemas.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(
            entry.space_ref.clone(),
            CacheSlot {
                value: entry,
                fetched_at: Instant::now(),
            },
        );
    }

    pub fn schema_len(&self) -> usize {
        self.schemas
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skybridge_core::spaces::ToolDescriptor;

    fn meta(raw_ref: &str, private: bool) -> SpaceMetadata {
        SpaceMetadata {
            space_ref: SpaceRef::parse(raw_ref).unwrap(),
            subdomain: raw_ref.replace('/', "-"),
            sdk: "gradio".to_string(),
            private,
            emoji: None,
            title: None,
            runtime_stage: None,
            etag: Some("\"v1\"".to_string()),
        }
    }

    #[test]
    fn private_metadata_is_never_cached() {
        let cache = SpaceCache::new(Duration::from_secs(300), Duration::from_secs(300));
        cache.put_metadata(meta("acme/secret", true));
        let space_ref = SpaceRef::parse("acme/secret").unwrap();
        assert!(cache.get_metadata(&space_ref).is_none());
        assert!(cache.get_metadata_stale(&space_ref).is_none());
    }

    #[test]
    fn private_schema_is_never_cached() {
        let cache = SpaceCache::new(Duration::from_secs(300), Duration::from_secs(300));
        let space_ref = SpaceRef::parse("acme/secret").unwrap();
        cache.put_schema_checked(
            SchemaEntry {
                space_ref: space_ref.clone(),
                tools: vec![],
            },
            true,
        );
        assert!(cache.get_schema(&space_ref).is_none());
        assert_eq!(cache.schema_len(), 0);
    }

    #[test]
    fn expired_metadata_reads_as_miss_but_stays_stale_readable() {
        let cache = SpaceCache::new(Duration::ZERO, Duration::ZERO);
        cache.put_metadata(meta("acme/demo", false));
        let space_ref = SpaceRef::parse("acme/demo").unwrap();

        assert!(cache.get_metadata(&space_ref).is_none());
        let stale = cache
            .get_metadata_stale(&space_ref)
            .expect("stale read should still return the value");
        assert_eq!(stale.etag.as_deref(), Some("\"v1\""));
    }

    #[test]
    fn touch_revives_expired_entry() {
        let cache = SpaceCache::new(Duration::from_secs(300), Duration::from_secs(300));
        cache.put_metadata(meta("acme/demo", false));
        let space_ref = SpaceRef::parse("acme/demo").unwrap();

        cache.touch_metadata(&space_ref);
        assert!(cache.get_metadata(&space_ref).is_some());
        assert_eq!(cache.stats.metadata_revalidations.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn counters_track_hits_and_misses() {
        let cache = SpaceCache::new(Duration::from_secs(300), Duration::from_secs(300));
        let space_ref = SpaceRef::parse("acme/demo").unwrap();
        assert!(cache.get_metadata(&space_ref).is_none());
        cache.put_metadata(meta("acme/demo", false));
        assert!(cache.get_metadata(&space_ref).is_some());
        assert_eq!(cache.stats.metadata_misses.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats.metadata_hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn schema_cache_round_trip() {
        let cache = SpaceCache::new(Duration::from_secs(300), Duration::from_secs(300));
        let space_ref = SpaceRef::parse("acme/demo").unwrap();
        cache.put_schema_checked(
            SchemaEntry {
                space_ref: space_ref.clone(),
                tools: vec![ToolDescriptor {
                    name: "generate".to_string(),
                    description: "generate tool".to_string(),
                    input_schema: serde_json::json!({"type": "object", "properties": {}, "required": []}),
                }],
            },
            false,
        );
        let entry = cache.get_schema(&space_ref).expect("schema should be cached");
        assert_eq!(entry.tools.len(), 1);
        assert_eq!(entry.tools[0].name, "generate");
    }
}
