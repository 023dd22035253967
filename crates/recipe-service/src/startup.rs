use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use recipe_api::{ListCache, MemoryRecipeStore, RecipeService};
use recipe_cache::{MemoryCache, RedisCache, RedisCacheConfig};
use recipe_core::{RecipeStore, ResultCache};
use recipe_store_sqlite::SqliteRecipeStore;

use crate::config::{Args, CacheTarget, StoreTarget};

/// Capped exponential backoff for dependencies that must be up before serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `connect` until it succeeds or `policy.max_attempts` is exhausted.
///
/// # Errors
/// Returns the last connection error, annotated with the attempt count.
pub async fn connect_with_retry<T, F, S>(
    policy: RetryPolicy,
    what: &str,
    mut connect: F,
    mut sleep: impl FnMut(Duration) -> S,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
    S: Future<Output = ()>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match connect() {
            Ok(value) => {
                tracing::info!(dependency = what, attempt, "connected");
                return Ok(value);
            }
            Err(err) if attempt >= max_attempts => {
                return Err(err.context(format!("{what} unreachable after {attempt} attempts")));
            }
            Err(err) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    dependency = what,
                    attempt,
                    max_attempts,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %format!("{err:#}"),
                    "connection failed"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

async fn open_store(target: StoreTarget, policy: RetryPolicy) -> Result<Arc<dyn RecipeStore>> {
    match target {
        StoreTarget::Memory => {
            tracing::warn!("using in-memory recipe store; data is lost on restart");
            Ok(Arc::new(MemoryRecipeStore::new()))
        }
        StoreTarget::Sqlite(path) => {
            let store = connect_with_retry(
                policy,
                "recipe store",
                || connect_sqlite(&path),
                tokio::time::sleep,
            )
            .await?;
            Ok(Arc::new(store))
        }
    }
}

fn connect_sqlite(path: &Path) -> Result<SqliteRecipeStore> {
    let store = SqliteRecipeStore::connect(path)?;
    store.ping()?;
    Ok(store)
}

fn open_cache(target: CacheTarget) -> Result<Arc<dyn ResultCache>> {
    let cache: Arc<dyn ResultCache> = match target {
        CacheTarget::Memory => Arc::new(MemoryCache::new()),
        CacheTarget::Redis { address, password } => {
            let config = RedisCacheConfig::new(address, password);
            Arc::new(RedisCache::new(&config).context("failed to configure redis cache")?)
        }
    };
    match cache.ping() {
        Ok(()) => tracing::info!("result cache reachable"),
        Err(err) => tracing::warn!(error = %err, "result cache unreachable; continuing without warm cache"),
    }
    Ok(cache)
}

/// Wire the store, optional cache and seed data into a ready service.
///
/// # Errors
/// Returns an error when the store stays unreachable, the cache address is
/// invalid, or the seed file cannot be imported.
pub async fn build_service(args: &Args) -> Result<RecipeService> {
    let store = open_store(args.store_target(), args.retry_policy()).await?;
    let cache = args
        .cache_target()
        .map(open_cache)
        .transpose()?
        .map(|backend| ListCache::new(backend, args.cache_key.clone(), args.cache_ttl()));
    let service = RecipeService::new(store, cache);
    match service.cache() {
        Some(cache) => tracing::info!(
            key = cache.key(),
            ttl_secs = cache.ttl().as_secs(),
            "recipe list cache enabled"
        ),
        None => tracing::info!("recipe list cache disabled"),
    }

    if let Some(seed) = &args.seed {
        let body = std::fs::read(seed)
            .with_context(|| format!("failed to read seed file {}", seed.display()))?;
        let inserted = service
            .import(&body)
            .map_err(|err| anyhow!("failed to import {}: {err}", seed.display()))?;
        tracing::info!(inserted, file = %seed.display(), "seeded recipes");
    }

    let available = service.count().map_err(|err| anyhow!("failed to count recipes: {err}"))?;
    tracing::info!(available, "available recipes");
    Ok(service)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use clap::Parser;

    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        }
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = policy(10);
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(500));
        assert_eq!(policy.delay_after(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let calls = Cell::new(0_u32);
        let slept = std::sync::Mutex::new(Vec::new());
        let result: Result<()> = connect_with_retry(
            policy(3),
            "test store",
            || {
                calls.set(calls.get() + 1);
                Err(anyhow!("connection refused"))
            },
            |delay| {
                if let Ok(mut slept) = slept.lock() {
                    slept.push(delay);
                }
                std::future::ready(())
            },
        )
        .await;

        let err = match result {
            Ok(()) => panic!("retry should fail"),
            Err(err) => err,
        };
        assert_eq!(calls.get(), 3);
        assert!(format!("{err:#}").contains("after 3 attempts"));
        let slept = slept.lock().map(|slept| slept.clone()).unwrap_or_default();
        assert_eq!(slept, vec![Duration::from_millis(100), Duration::from_millis(200)]);
    }

    #[tokio::test]
    async fn retry_returns_first_success() {
        let calls = Cell::new(0_u32);
        let value = connect_with_retry(
            policy(5),
            "test store",
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(anyhow!("not yet"))
                } else {
                    Ok(42)
                }
            },
            |_| std::future::ready(()),
        )
        .await
        .unwrap_or_else(|err| panic!("retry should succeed: {err}"));
        assert_eq!(value, 42);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let calls = Cell::new(0_u32);
        let result: Result<()> = connect_with_retry(
            policy(0),
            "test store",
            || {
                calls.set(calls.get() + 1);
                Err(anyhow!("down"))
            },
            |_| std::future::ready(()),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn build_service_seeds_memory_store() {
        let seed = std::env::temp_dir().join(format!("recipes-seed-{}.json", ulid::Ulid::new()));
        std::fs::write(&seed, r#"[{"name": "Tortilla", "tags": ["spanish"]}]"#)
            .unwrap_or_else(|err| panic!("failed to write seed file: {err}"));

        let args = Args::try_parse_from([
            "recipe-service",
            "--db",
            "memory",
            "--cache",
            "memory",
            "--cache-key",
            "kitchen:recipes",
            "--cache-ttl-secs",
            "30",
            "--seed",
            seed.to_str().unwrap_or_else(|| panic!("temp path should be UTF-8")),
        ])
        .unwrap_or_else(|err| panic!("arguments should parse: {err}"));

        let service =
            build_service(&args).await.unwrap_or_else(|err| panic!("startup failed: {err}"));
        assert_eq!(service.count(), Ok(1));
        let cache = service.cache().unwrap_or_else(|| panic!("memory cache should be configured"));
        assert_eq!(cache.key(), "kitchen:recipes");
        assert_eq!(cache.ttl(), Duration::from_secs(30));

        let _ = std::fs::remove_file(&seed);
    }

    #[tokio::test]
    async fn build_service_opens_sqlite_store() {
        let db = std::env::temp_dir().join(format!("recipes-service-{}.sqlite3", ulid::Ulid::new()));
        let args = Args::try_parse_from([
            "recipe-service",
            "--db",
            db.to_str().unwrap_or_else(|| panic!("temp path should be UTF-8")),
        ])
        .unwrap_or_else(|err| panic!("arguments should parse: {err}"));

        let service =
            build_service(&args).await.unwrap_or_else(|err| panic!("startup failed: {err}"));
        assert_eq!(service.count(), Ok(0));
        assert!(service.cache().is_none());

        let _ = std::fs::remove_file(&db);
    }
}
