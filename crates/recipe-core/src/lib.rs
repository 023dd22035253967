use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum RecipeError {
    #[error("invalid id: {0}")]
    InvalidId(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("recipe {0} not found")]
    NotFound(RecipeId),
    #[error("store error: {0}")]
    Store(String),
}

impl RecipeError {
    /// Wrap a store failure, keeping the full context chain as text.
    #[must_use]
    pub fn store(err: &anyhow::Error) -> Self {
        Self::Store(format!("{err:#}"))
    }
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CacheError {
    #[error("cache connection failed: {0}")]
    Connection(String),
    #[error("cache command failed: {0}")]
    Command(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RecipeId(pub Ulid);

impl RecipeId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a client-supplied identifier.
    ///
    /// # Errors
    /// Returns [`RecipeError::InvalidId`] when `raw` is not a 26-character ULID.
    pub fn parse(raw: &str) -> Result<Self, RecipeError> {
        Ulid::from_string(raw)
            .map(Self)
            .map_err(|err| RecipeError::InvalidId(format!("{raw}: {err}")))
    }
}

impl Default for RecipeId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RecipeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecipeId {
    type Err = RecipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recipe {
    pub id: RecipeId,
    pub name: String,
    pub tags: Vec<String>,
    pub ingredients: Vec<String>,
    pub instructions: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub published_at: OffsetDateTime,
}

impl Recipe {
    /// Build a new record with a fresh id and the current time.
    #[must_use]
    pub fn create(input: RecipeInput) -> Self {
        Self::with_published_at(input, OffsetDateTime::now_utc())
    }

    #[must_use]
    pub fn with_published_at(input: RecipeInput, published_at: OffsetDateTime) -> Self {
        Self {
            id: RecipeId::new(),
            name: input.name,
            tags: input.tags,
            ingredients: input.ingredients,
            instructions: input.instructions,
            published_at,
        }
    }

    /// Replace the mutable fields. Returns `true` when anything changed.
    pub fn apply(&mut self, input: &RecipeInput) -> bool {
        if self.has_fields(input) {
            return false;
        }
        self.name.clone_from(&input.name);
        self.tags.clone_from(&input.tags);
        self.ingredients.clone_from(&input.ingredients);
        self.instructions.clone_from(&input.instructions);
        true
    }

    #[must_use]
    pub fn has_fields(&self, input: &RecipeInput) -> bool {
        self.name == input.name
            && self.tags == input.tags
            && self.ingredients == input.ingredients
            && self.instructions == input.instructions
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|candidate| candidate == tag)
    }
}

/// Client-supplied recipe fields. Unknown keys such as `id` or
/// `published_at` are ignored, absent keys default to empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RecipeInput {
    pub name: String,
    pub tags: Vec<String>,
    pub ingredients: Vec<String>,
    pub instructions: Vec<String>,
}

impl RecipeInput {
    /// Decode a request body.
    ///
    /// # Errors
    /// Returns [`RecipeError::InvalidPayload`] on malformed JSON, a body that
    /// is not a JSON object, or mistyped fields.
    pub fn from_json(body: &[u8]) -> Result<Self, RecipeError> {
        let invalid = |err: serde_json::Error| RecipeError::InvalidPayload(err.to_string());
        // Derived struct decoding also accepts positional arrays.
        match serde_json::from_slice(body).map_err(invalid)? {
            value @ serde_json::Value::Object(_) => serde_json::from_value(value).map_err(invalid),
            _ => Err(RecipeError::InvalidPayload("expected a JSON object".to_string())),
        }
    }
}

/// One entry of a bulk import file. A missing `published_at` means "now".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SeedRecipe {
    #[serde(flatten)]
    pub fields: RecipeInput,
    #[serde(with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
}

impl SeedRecipe {
    #[must_use]
    pub fn into_recipe(self, now: OffsetDateTime) -> Recipe {
        Recipe::with_published_at(self.fields, self.published_at.unwrap_or(now))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// Authoritative storage for recipe records.
///
/// Implementations are shared between concurrent requests and must do their
/// own synchronization.
pub trait RecipeStore: Send + Sync {
    /// # Errors
    /// Returns an error when the write fails, including on a duplicate id.
    fn insert(&self, recipe: &Recipe) -> anyhow::Result<()>;

    /// Insert all records atomically where the backend allows it.
    ///
    /// # Errors
    /// Returns an error when any write fails.
    fn insert_many(&self, recipes: &[Recipe]) -> anyhow::Result<usize>;

    /// All records in store iteration order.
    ///
    /// # Errors
    /// Returns an error when records cannot be read or decoded.
    fn list(&self) -> anyhow::Result<Vec<Recipe>>;

    /// # Errors
    /// Returns an error when the lookup fails; a missing record is `Ok(None)`.
    fn find(&self, id: RecipeId) -> anyhow::Result<Option<Recipe>>;

    /// Replace name, tags, ingredients and instructions of one record.
    ///
    /// # Errors
    /// Returns an error when the write fails; a missing record reports zero matches.
    fn update(&self, id: RecipeId, fields: &RecipeInput) -> anyhow::Result<UpdateResult>;

    /// # Errors
    /// Returns an error when the delete fails; a missing record reports zero deletions.
    fn delete(&self, id: RecipeId) -> anyhow::Result<DeleteResult>;

    /// Records whose tags contain `tag` exactly (case-sensitive).
    ///
    /// # Errors
    /// Returns an error when records cannot be read or decoded.
    fn find_by_tag(&self, tag: &str) -> anyhow::Result<Vec<Recipe>>;

    /// # Errors
    /// Returns an error when the count query fails.
    fn count(&self) -> anyhow::Result<u64>;

    /// # Errors
    /// Returns an error when the backend is unreachable.
    fn ping(&self) -> anyhow::Result<()>;
}

/// Key/value store used for the list snapshot.
pub trait ResultCache: Send + Sync {
    /// # Errors
    /// Returns an error when the backend cannot be reached; a miss is `Ok(None)`.
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// # Errors
    /// Returns an error when the value cannot be stored.
    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// # Errors
    /// Returns an error when the backend cannot be reached. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// # Errors
    /// Returns an error when the backend cannot be reached.
    fn ping(&self) -> Result<(), CacheError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_input() -> RecipeInput {
        RecipeInput {
            name: "Oregano Marinara Chicken".to_string(),
            tags: vec!["main".to_string(), "chicken".to_string()],
            ingredients: vec!["2 chicken breasts".to_string(), "1 cup marinara".to_string()],
            instructions: vec!["Bake for 30 minutes".to_string()],
        }
    }

    #[test]
    fn input_ignores_client_supplied_id_and_timestamp() {
        let body = br#"{
            "id": "01HZZZZZZZZZZZZZZZZZZZZZZZ",
            "published_at": "2020-01-01T00:00:00Z",
            "name": "Pancakes",
            "tags": ["breakfast"]
        }"#;
        let input = RecipeInput::from_json(body)
            .unwrap_or_else(|err| panic!("body should decode: {err}"));
        assert_eq!(input.name, "Pancakes");
        assert_eq!(input.tags, vec!["breakfast".to_string()]);
        assert!(input.ingredients.is_empty());
        assert!(input.instructions.is_empty());
    }

    #[test]
    fn input_rejects_malformed_json_and_wrong_types() {
        let bodies: [&[u8]; 4] = [b"{", b"not json", br#"{"name": 5}"#, br#"{"tags": "main"}"#];
        for body in bodies {
            match RecipeInput::from_json(body) {
                Err(RecipeError::InvalidPayload(_)) => {}
                other => panic!("expected InvalidPayload, got {other:?}"),
            }
        }
    }

    #[test]
    fn input_rejects_non_object_bodies() {
        let bodies: [&[u8]; 5] =
            [b"[]", br#"["x"]"#, br#"["Array Soup", ["x"]]"#, b"null", b"\"Soup\""];
        for body in bodies {
            match RecipeInput::from_json(body) {
                Err(RecipeError::InvalidPayload(_)) => {}
                other => panic!("expected InvalidPayload, got {other:?}"),
            }
        }
    }

    #[test]
    fn create_assigns_fresh_ids() {
        let first = Recipe::create(sample_input());
        let second = Recipe::create(sample_input());
        assert_ne!(first.id, second.id);
        assert!(first.has_fields(&sample_input()));
    }

    #[test]
    fn apply_reports_whether_fields_changed() {
        let mut recipe = Recipe::create(sample_input());
        let id = recipe.id;
        let published_at = recipe.published_at;

        assert!(!recipe.apply(&sample_input()));

        let mut changed = sample_input();
        changed.tags.push("quick".to_string());
        assert!(recipe.apply(&changed));
        assert_eq!(recipe.tags.len(), 3);
        assert_eq!(recipe.id, id);
        assert_eq!(recipe.published_at, published_at);
    }

    #[test]
    fn tag_match_is_exact_and_case_sensitive() {
        let recipe = Recipe::create(sample_input());
        assert!(recipe.has_tag("main"));
        assert!(!recipe.has_tag("Main"));
        assert!(!recipe.has_tag("mai"));
    }

    #[test]
    fn recipe_json_round_trips_through_display_id() {
        let recipe = Recipe::create(sample_input());
        let value = serde_json::to_value(&recipe)
            .unwrap_or_else(|err| panic!("recipe should serialize: {err}"));
        assert_eq!(
            value.get("id").and_then(serde_json::Value::as_str),
            Some(recipe.id.to_string().as_str())
        );
        let decoded: Recipe = serde_json::from_value(value)
            .unwrap_or_else(|err| panic!("recipe should deserialize: {err}"));
        assert_eq!(decoded, recipe);
    }

    #[test]
    fn seed_recipe_keeps_supplied_timestamp() {
        let body = r#"[
            {"name": "Old", "published_at": "2019-05-04T10:00:00Z"},
            {"name": "New"}
        ]"#;
        let seeds: Vec<SeedRecipe> = serde_json::from_str(body)
            .unwrap_or_else(|err| panic!("seed file should decode: {err}"));
        let now = OffsetDateTime::now_utc();
        let recipes = seeds.into_iter().map(|seed| seed.into_recipe(now)).collect::<Vec<_>>();
        assert_eq!(recipes[0].published_at.year(), 2019);
        assert_eq!(recipes[1].published_at, now);
    }

    #[test]
    fn parse_accepts_display_output() {
        let id = RecipeId::new();
        assert_eq!(RecipeId::parse(&id.to_string()), Ok(id));
        assert_eq!(id.to_string().parse::<RecipeId>(), Ok(id));
    }

    proptest! {
        #[test]
        fn parse_rejects_strings_that_are_not_26_chars(raw in "[0-9A-Za-z]{0,25}|[0-9A-Za-z]{27,40}") {
            prop_assert!(matches!(RecipeId::parse(&raw), Err(RecipeError::InvalidId(_))));
        }

        #[test]
        fn parse_rejects_non_base32_characters(prefix in "[0-9A-HJKMNP-TV-Z]{10}", bad in "[!@#$%^&*()_+=ILOU-]") {
            let raw = format!("{prefix}{bad}{}", "0".repeat(15));
            prop_assert!(matches!(RecipeId::parse(&raw), Err(RecipeError::InvalidId(_))));
        }
    }
}
