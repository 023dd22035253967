//! Result cache backends for the recipe list snapshot.
//!
//! - [`MemoryCache`]: in-process moka cache with per-entry expiry
//! - [`RedisCache`]: shared Redis instance (feature `redis`)

mod memory;
#[cfg(feature = "redis")]
mod redis_cache;

pub use memory::MemoryCache;
#[cfg(feature = "redis")]
pub use redis_cache::{RedisCache, RedisCacheConfig};
pub use recipe_core::{CacheError, ResultCache};
