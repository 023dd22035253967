use std::sync::Arc;
use std::time::Duration;

use recipe_core::{
    DeleteResult, Recipe, RecipeError, RecipeId, RecipeInput, RecipeStore, ResultCache,
    SeedRecipe, UpdateResult,
};
use time::OffsetDateTime;

mod memory;

pub use memory::MemoryRecipeStore;

pub const DEFAULT_LIST_CACHE_KEY: &str = "recipes-api:recipes";
pub const DEFAULT_LIST_CACHE_TTL: Duration = Duration::from_secs(120);

/// Where and for how long the full recipe list is cached.
#[derive(Clone)]
pub struct ListCache {
    backend: Arc<dyn ResultCache>,
    key: String,
    ttl: Duration,
}

impl ListCache {
    #[must_use]
    pub fn new(backend: Arc<dyn ResultCache>, key: impl Into<String>, ttl: Duration) -> Self {
        Self { backend, key: key.into(), ttl }
    }

    #[must_use]
    pub fn with_defaults(backend: Arc<dyn ResultCache>) -> Self {
        Self::new(backend, DEFAULT_LIST_CACHE_KEY, DEFAULT_LIST_CACHE_TTL)
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lookup(&self) -> Option<Vec<Recipe>> {
        let cached = match self.backend.get(&self.key) {
            Ok(Some(cached)) => cached,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(key = %self.key, error = %err, "cache read failed, falling back to store");
                return None;
            }
        };
        match serde_json::from_str(&cached) {
            Ok(recipes) => Some(recipes),
            Err(err) => {
                tracing::warn!(key = %self.key, error = %err, "cached recipe list is not decodable");
                None
            }
        }
    }

    fn populate(&self, recipes: &[Recipe]) {
        let data = match serde_json::to_string(recipes) {
            Ok(data) => data,
            Err(err) => {
                tracing::error!(error = %err, "failed to encode recipe list for cache");
                return;
            }
        };
        if let Err(err) = self.backend.set(&self.key, &data, self.ttl) {
            tracing::error!(key = %self.key, error = %err, "cache write failed");
        }
    }

    fn clear(&self) {
        tracing::info!(key = %self.key, "clearing recipe list cache");
        if let Err(err) = self.backend.delete(&self.key) {
            tracing::error!(key = %self.key, error = %err, "cache clear failed");
        }
    }
}

/// Recipe operations over an injected store and optional list cache.
#[derive(Clone)]
pub struct RecipeService {
    store: Arc<dyn RecipeStore>,
    cache: Option<ListCache>,
}

impl RecipeService {
    #[must_use]
    pub fn new(store: Arc<dyn RecipeStore>, cache: Option<ListCache>) -> Self {
        Self { store, cache }
    }

    #[must_use]
    pub fn cache(&self) -> Option<&ListCache> {
        self.cache.as_ref()
    }

    /// Store a new recipe with a fresh id and the current timestamp.
    ///
    /// # Errors
    /// Returns [`RecipeError::Store`] when the write fails.
    pub fn create(&self, input: RecipeInput) -> Result<Recipe, RecipeError> {
        let recipe = Recipe::create(input);
        self.store.insert(&recipe).map_err(|err| RecipeError::store(&err))?;
        tracing::info!(recipe_id = %recipe.id, "recipe created");
        self.invalidate_list();
        Ok(recipe)
    }

    /// All recipes, served from the list cache when one is configured and warm.
    ///
    /// # Errors
    /// Returns [`RecipeError::Store`] when the store query fails. Cache
    /// failures never surface here.
    pub fn list(&self) -> Result<Vec<Recipe>, RecipeError> {
        let Some(cache) = &self.cache else {
            return self.store.list().map_err(|err| RecipeError::store(&err));
        };

        if let Some(recipes) = cache.lookup() {
            tracing::info!(count = recipes.len(), "cache_hit recipes");
            return Ok(recipes);
        }

        tracing::info!("cache_miss recipes");
        let recipes = self.store.list().map_err(|err| RecipeError::store(&err))?;
        cache.populate(&recipes);
        Ok(recipes)
    }

    /// # Errors
    /// Returns [`RecipeError::InvalidId`] for a malformed id,
    /// [`RecipeError::NotFound`] when no record matches, and
    /// [`RecipeError::Store`] on store failure.
    pub fn get(&self, raw_id: &str) -> Result<Recipe, RecipeError> {
        let id = RecipeId::parse(raw_id)?;
        self.store
            .find(id)
            .map_err(|err| RecipeError::store(&err))?
            .ok_or(RecipeError::NotFound(id))
    }

    /// Replace the mutable fields of one recipe. `id` and `published_at` are kept.
    ///
    /// # Errors
    /// Returns [`RecipeError::InvalidId`] for a malformed id and
    /// [`RecipeError::Store`] on store failure. A missing record is reported
    /// through `matched_count == 0`, not as an error.
    pub fn update(&self, raw_id: &str, input: &RecipeInput) -> Result<UpdateResult, RecipeError> {
        let id = RecipeId::parse(raw_id)?;
        let result = self.store.update(id, input).map_err(|err| RecipeError::store(&err))?;
        tracing::info!(
            recipe_id = %id,
            matched = result.matched_count,
            modified = result.modified_count,
            "recipe update result"
        );
        self.invalidate_list();
        Ok(result)
    }

    /// # Errors
    /// Returns [`RecipeError::InvalidId`] for a malformed id,
    /// [`RecipeError::NotFound`] when nothing was deleted, and
    /// [`RecipeError::Store`] on store failure.
    pub fn delete(&self, raw_id: &str) -> Result<DeleteResult, RecipeError> {
        let id = RecipeId::parse(raw_id)?;
        let result = self.store.delete(id).map_err(|err| RecipeError::store(&err))?;
        if result.deleted_count == 0 {
            return Err(RecipeError::NotFound(id));
        }
        tracing::info!(recipe_id = %id, "recipe deleted");
        self.invalidate_list();
        Ok(result)
    }

    /// Recipes tagged with exactly `tag`. Bypasses the list cache.
    ///
    /// # Errors
    /// Returns [`RecipeError::Store`] on store failure.
    pub fn search_by_tag(&self, tag: &str) -> Result<Vec<Recipe>, RecipeError> {
        self.store.find_by_tag(tag).map_err(|err| RecipeError::store(&err))
    }

    /// # Errors
    /// Returns [`RecipeError::Store`] on store failure.
    pub fn count(&self) -> Result<u64, RecipeError> {
        self.store.count().map_err(|err| RecipeError::store(&err))
    }

    /// Bulk-load recipes from a JSON array. Every record gets a fresh id.
    ///
    /// # Errors
    /// Returns [`RecipeError::InvalidPayload`] when `json` is not an array of
    /// recipes and [`RecipeError::Store`] when the insert fails.
    pub fn import(&self, json: &[u8]) -> Result<usize, RecipeError> {
        let seeds: Vec<SeedRecipe> = serde_json::from_slice(json)
            .map_err(|err| RecipeError::InvalidPayload(err.to_string()))?;
        let now = OffsetDateTime::now_utc();
        let recipes = seeds.into_iter().map(|seed| seed.into_recipe(now)).collect::<Vec<_>>();
        let inserted = self.store.insert_many(&recipes).map_err(|err| RecipeError::store(&err))?;
        tracing::info!(inserted, "imported recipes");
        self.invalidate_list();
        Ok(inserted)
    }

    fn invalidate_list(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }
}
