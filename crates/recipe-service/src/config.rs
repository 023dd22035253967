use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use recipe_api::DEFAULT_LIST_CACHE_KEY;

use crate::startup::RetryPolicy;

const MEMORY_TARGET: &str = "memory";

#[derive(Debug, Parser)]
#[command(name = "recipe-service")]
#[command(about = "HTTP service for recipe records")]
pub struct Args {
    /// SQLite database path, or `memory` for a non-persistent store.
    #[arg(long, env = "RECIPES_DB", default_value = "./recipes.sqlite3")]
    pub db: String,
    #[arg(long, env = "RECIPES_BIND", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,
    /// `memory`, or a Redis address (`host:port` or `redis://...`). Unset disables caching.
    #[arg(long, env = "RECIPES_CACHE")]
    pub cache: Option<String>,
    #[arg(long, env = "RECIPES_CACHE_PASSWORD", hide_env_values = true)]
    pub cache_password: Option<String>,
    #[arg(long, env = "RECIPES_CACHE_KEY", default_value = DEFAULT_LIST_CACHE_KEY)]
    pub cache_key: String,
    #[arg(long, env = "RECIPES_CACHE_TTL_SECS", default_value_t = 120)]
    pub cache_ttl_secs: u64,
    #[arg(long, env = "RECIPES_CONNECT_ATTEMPTS", default_value_t = 10)]
    pub connect_attempts: u32,
    #[arg(long, env = "RECIPES_CONNECT_DELAY_MS", default_value_t = 500)]
    pub connect_delay_ms: u64,
    #[arg(long, env = "RECIPES_CONNECT_MAX_DELAY_MS", default_value_t = 30_000)]
    pub connect_max_delay_ms: u64,
    /// JSON array of recipes imported once the store is reachable.
    #[arg(long, env = "RECIPES_SEED")]
    pub seed: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTarget {
    Memory,
    Sqlite(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheTarget {
    Memory,
    Redis { address: String, password: Option<String> },
}

impl Args {
    #[must_use]
    pub fn store_target(&self) -> StoreTarget {
        if self.db == MEMORY_TARGET {
            StoreTarget::Memory
        } else {
            StoreTarget::Sqlite(PathBuf::from(&self.db))
        }
    }

    #[must_use]
    pub fn cache_target(&self) -> Option<CacheTarget> {
        let raw = self.cache.as_deref().map(str::trim).filter(|raw| !raw.is_empty())?;
        if raw == MEMORY_TARGET {
            return Some(CacheTarget::Memory);
        }
        Some(CacheTarget::Redis { address: raw.to_string(), password: self.cache_password.clone() })
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.connect_attempts,
            initial_delay: Duration::from_millis(self.connect_delay_ms),
            max_delay: Duration::from_millis(self.connect_max_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        let argv = std::iter::once("recipe-service").chain(args.iter().copied());
        Args::try_parse_from(argv).unwrap_or_else(|err| panic!("arguments should parse: {err}"))
    }

    #[test]
    fn defaults_use_sqlite_without_cache() {
        let args = parse(&["--db", "./recipes.sqlite3"]);
        assert_eq!(args.store_target(), StoreTarget::Sqlite(PathBuf::from("./recipes.sqlite3")));
        assert_eq!(args.cache_target(), None);
        assert_eq!(args.cache_ttl(), Duration::from_secs(120));
        assert_eq!(args.cache_key, DEFAULT_LIST_CACHE_KEY);
    }

    #[test]
    fn memory_targets_are_recognized() {
        let args = parse(&["--db", "memory", "--cache", "memory"]);
        assert_eq!(args.store_target(), StoreTarget::Memory);
        assert_eq!(args.cache_target(), Some(CacheTarget::Memory));
    }

    #[test]
    fn redis_target_carries_password() {
        let args = parse(&["--cache", "localhost:6379", "--cache-password", "hunter2"]);
        assert_eq!(
            args.cache_target(),
            Some(CacheTarget::Redis {
                address: "localhost:6379".to_string(),
                password: Some("hunter2".to_string()),
            })
        );
    }

    #[test]
    fn blank_cache_address_disables_cache() {
        let args = parse(&["--cache", "  "]);
        assert_eq!(args.cache_target(), None);
    }

    #[test]
    fn retry_policy_reflects_flags() {
        let args = parse(&[
            "--connect-attempts",
            "3",
            "--connect-delay-ms",
            "10",
            "--connect-max-delay-ms",
            "40",
        ]);
        let policy = args.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_millis(10));
        assert_eq!(policy.max_delay, Duration::from_millis(40));
    }
}
