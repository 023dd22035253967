use std::time::{Duration, Instant};

use moka::sync::Cache;
use moka::Expiry;
use recipe_core::{CacheError, ResultCache};

#[derive(Clone)]
struct Entry {
    value: String,
    ttl: Duration,
}

/// Expires each entry after the ttl it was last written with.
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// Process-local cache on top of moka.
#[derive(Clone)]
pub struct MemoryCache {
    entries: Cache<String, Entry>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self { entries: Cache::builder().expire_after(PerEntryTtl).build() }
    }
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Live entries, after pending evictions have been applied.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.get(key).map(|entry| entry.value))
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), Entry { value: value.to_string(), ttl });
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.invalidate(key);
        Ok(())
    }

    fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "recipes-api:recipes";

    #[test]
    fn get_returns_value_until_deleted() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get(KEY), Ok(None));

        cache
            .set(KEY, "[]", Duration::from_secs(60))
            .unwrap_or_else(|err| panic!("set failed: {err}"));
        assert_eq!(cache.get(KEY), Ok(Some("[]".to_string())));

        cache.delete(KEY).unwrap_or_else(|err| panic!("delete failed: {err}"));
        assert_eq!(cache.get(KEY), Ok(None));
        assert!(cache.is_empty());
    }

    #[test]
    fn set_overwrites_previous_value() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.set(KEY, "old", ttl).unwrap_or_else(|err| panic!("set failed: {err}"));
        cache.set(KEY, "new", ttl).unwrap_or_else(|err| panic!("set failed: {err}"));
        assert_eq!(cache.get(KEY), Ok(Some("new".to_string())));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = MemoryCache::new();
        cache
            .set(KEY, "[]", Duration::from_millis(20))
            .unwrap_or_else(|err| panic!("set failed: {err}"));
        cache
            .set("other", "[]", Duration::from_secs(60))
            .unwrap_or_else(|err| panic!("set failed: {err}"));
        std::thread::sleep(Duration::from_millis(60));

        assert_eq!(cache.get(KEY), Ok(None));
        assert_eq!(cache.get("other"), Ok(Some("[]".to_string())));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn rewrite_takes_the_new_ttl() {
        let cache = MemoryCache::new();
        cache
            .set(KEY, "short", Duration::from_millis(20))
            .unwrap_or_else(|err| panic!("set failed: {err}"));
        cache
            .set(KEY, "long", Duration::from_secs(60))
            .unwrap_or_else(|err| panic!("set failed: {err}"));
        std::thread::sleep(Duration::from_millis(60));

        assert_eq!(cache.get(KEY), Ok(Some("long".to_string())));
    }

    #[test]
    fn deleting_missing_key_is_not_an_error() {
        let cache = MemoryCache::new();
        assert_eq!(cache.delete("missing"), Ok(()));
        assert_eq!(cache.ping(), Ok(()));
    }
}
