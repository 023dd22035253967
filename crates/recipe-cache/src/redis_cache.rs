use std::time::Duration;

use ::redis::{Client, Commands, Connection, IntoConnectionInfo};
use recipe_core::{CacheError, ResultCache};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    /// `host:port` or a full `redis://` URL. TLS (`rediss://`) is not
    /// compiled in.
    pub address: String,
    pub password: Option<String>,
    pub connect_timeout: Duration,
}

impl RedisCacheConfig {
    #[must_use]
    pub fn new(address: impl Into<String>, password: Option<String>) -> Self {
        Self { address: address.into(), password, connect_timeout: DEFAULT_CONNECT_TIMEOUT }
    }

    fn url(&self) -> String {
        if self.address.contains("://") {
            self.address.clone()
        } else {
            format!("redis://{}/0", self.address)
        }
    }
}

/// Redis-backed cache. Opens one connection per command.
pub struct RedisCache {
    client: Client,
    connect_timeout: Duration,
}

impl RedisCache {
    /// Build a client for `config`. No connection is made until first use.
    ///
    /// # Errors
    /// Returns [`CacheError::Connection`] when the address cannot be parsed.
    pub fn new(config: &RedisCacheConfig) -> Result<Self, CacheError> {
        let mut info = config
            .url()
            .into_connection_info()
            .map_err(|err| CacheError::Connection(format!("invalid redis address: {err}")))?;
        if let Some(password) = config.password.as_ref().filter(|password| !password.is_empty()) {
            info.redis.password = Some(password.clone());
        }
        let client = Client::open(info)
            .map_err(|err| CacheError::Connection(format!("invalid redis address: {err}")))?;
        Ok(Self { client, connect_timeout: config.connect_timeout })
    }

    fn connection(&self) -> Result<Connection, CacheError> {
        self.client
            .get_connection_with_timeout(self.connect_timeout)
            .map_err(|err| CacheError::Connection(err.to_string()))
    }
}

impl ResultCache for RedisCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection()?;
        let value: Option<String> =
            conn.get(key).map_err(|err| CacheError::Command(err.to_string()))?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection()?;
        // SET EX rejects a zero expiry.
        let seconds = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(key, value, seconds)
            .map_err(|err| CacheError::Command(err.to_string()))?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection()?;
        let _: () = conn.del(key).map_err(|err| CacheError::Command(err.to_string()))?;
        Ok(())
    }

    fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection()?;
        let reply = ::redis::cmd("PING")
            .query::<String>(&mut conn)
            .map_err(|err| CacheError::Command(err.to_string()))?;
        tracing::debug!(reply = %reply, "redis ping");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_address_becomes_redis_url() {
        let config = RedisCacheConfig::new("cache.internal:6379", None);
        assert_eq!(config.url(), "redis://cache.internal:6379/0");

        let explicit = RedisCacheConfig::new("redis://cache.internal:6380/2", None);
        assert_eq!(explicit.url(), "redis://cache.internal:6380/2");
    }

    #[test]
    fn tls_address_is_rejected_up_front() {
        let config = RedisCacheConfig::new("rediss://cache.internal:6380/0", None);
        match RedisCache::new(&config) {
            Err(CacheError::Connection(message)) => {
                assert!(message.starts_with("invalid redis address"), "{message}");
            }
            Err(other) => panic!("expected a connection error, got {other:?}"),
            Ok(_) => panic!("rediss:// should not be accepted without TLS support"),
        }
    }

    #[test]
    fn client_builds_without_connecting() {
        let config = RedisCacheConfig::new("127.0.0.1:6379", Some("secret".to_string()));
        assert!(RedisCache::new(&config).is_ok());
    }

    #[test]
    fn unreachable_server_reports_connection_error() {
        let mut config = RedisCacheConfig::new("127.0.0.1:1", None);
        config.connect_timeout = Duration::from_millis(200);
        let cache =
            RedisCache::new(&config).unwrap_or_else(|err| panic!("client should build: {err}"));
        assert!(matches!(cache.ping(), Err(CacheError::Connection(_))));
        assert!(matches!(cache.get("key"), Err(CacheError::Connection(_))));
    }
}
