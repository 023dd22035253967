use std::path::Path;

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use recipe_core::{DeleteResult, Recipe, RecipeId, RecipeInput, RecipeStore, UpdateResult};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS recipes (
  recipe_id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  tags_json TEXT NOT NULL,
  ingredients_json TEXT NOT NULL,
  instructions_json TEXT NOT NULL,
  published_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_recipes_published_at ON recipes(published_at);
";

const SELECT_RECIPE_COLUMNS: &str =
    "recipe_id, name, tags_json, ingredients_json, instructions_json, published_at";

pub struct SqliteRecipeStore {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

impl SqliteRecipeStore {
    /// Open a SQLite-backed recipe store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open a private in-memory database. Nothing survives the handle.
    ///
    /// # Errors
    /// Returns an error when `SQLite` cannot allocate the database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("failed to configure sqlite pragmas")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open and bring the schema up to date in one step.
    ///
    /// # Errors
    /// Returns an error when opening or migrating fails.
    pub fn connect(path: &Path) -> Result<Self> {
        let store = Self::open(path)?;
        store.migrate()?;
        Ok(store)
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let conn = self.conn.lock();
        conn.execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&self) -> Result<()> {
        let mut conn = self.conn.lock();
        conn.execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&conn)?;
        if version > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        if version < 1 {
            let tx = conn.transaction().context("failed to start migration v1 transaction")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&tx, 1)?;
            tx.commit().context("failed to commit migration v1")?;
        }

        Ok(())
    }
}

impl RecipeStore for SqliteRecipeStore {
    fn insert(&self, recipe: &Recipe) -> Result<()> {
        let conn = self.conn.lock();
        insert_recipe(&conn, recipe)
    }

    fn insert_many(&self, recipes: &[Recipe]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("failed to start transaction")?;
        for recipe in recipes {
            insert_recipe(&tx, recipe)?;
        }
        tx.commit().context("failed to commit bulk insert")?;
        Ok(recipes.len())
    }

    fn list(&self) -> Result<Vec<Recipe>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_RECIPE_COLUMNS} FROM recipes ORDER BY rowid ASC"
        ))?;
        let mut rows = stmt.query([])?;
        let mut recipes = Vec::new();
        while let Some(row) = rows.next()? {
            recipes.push(recipe_from_row(row)?);
        }
        Ok(recipes)
    }

    fn find(&self, id: RecipeId) -> Result<Option<Recipe>> {
        let conn = self.conn.lock();
        find_recipe(&conn, id)
    }

    fn update(&self, id: RecipeId, fields: &RecipeInput) -> Result<UpdateResult> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("failed to start transaction")?;

        let Some(existing) = find_recipe(&tx, id)? else {
            return Ok(UpdateResult { matched_count: 0, modified_count: 0 });
        };
        if existing.has_fields(fields) {
            return Ok(UpdateResult { matched_count: 1, modified_count: 0 });
        }

        let modified = tx
            .execute(
                "UPDATE recipes
                 SET name = ?2, tags_json = ?3, ingredients_json = ?4, instructions_json = ?5
                 WHERE recipe_id = ?1",
                params![
                    id.to_string(),
                    fields.name,
                    encode_list(&fields.tags, "tags")?,
                    encode_list(&fields.ingredients, "ingredients")?,
                    encode_list(&fields.instructions, "instructions")?,
                ],
            )
            .context("failed to update recipe")?;
        tx.commit().context("failed to commit update transaction")?;

        Ok(UpdateResult { matched_count: 1, modified_count: u64::try_from(modified)? })
    }

    fn delete(&self, id: RecipeId) -> Result<DeleteResult> {
        let conn = self.conn.lock();
        let deleted = conn
            .execute("DELETE FROM recipes WHERE recipe_id = ?1", params![id.to_string()])
            .context("failed to delete recipe")?;
        Ok(DeleteResult { deleted_count: u64::try_from(deleted)? })
    }

    fn find_by_tag(&self, tag: &str) -> Result<Vec<Recipe>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_RECIPE_COLUMNS} FROM recipes
             WHERE EXISTS (
               SELECT 1 FROM json_each(recipes.tags_json) WHERE json_each.value = ?1
             )
             ORDER BY rowid ASC"
        ))?;
        let mut rows = stmt.query(params![tag])?;
        let mut recipes = Vec::new();
        while let Some(row) = rows.next()? {
            recipes.push(recipe_from_row(row)?);
        }
        Ok(recipes)
    }

    fn count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM recipes", [], |row| row.get(0))
            .context("failed to count recipes")?;
        Ok(u64::try_from(count)?)
    }

    fn ping(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .context("sqlite ping failed")?;
        Ok(())
    }
}

fn insert_recipe(conn: &Connection, recipe: &Recipe) -> Result<()> {
    conn.execute(
        "INSERT INTO recipes(
            recipe_id, name, tags_json, ingredients_json, instructions_json, published_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            recipe.id.to_string(),
            recipe.name,
            encode_list(&recipe.tags, "tags")?,
            encode_list(&recipe.ingredients, "ingredients")?,
            encode_list(&recipe.instructions, "instructions")?,
            rfc3339(recipe.published_at)?,
        ],
    )
    .with_context(|| format!("failed to insert recipe {}", recipe.id))?;
    Ok(())
}

fn find_recipe(conn: &Connection, id: RecipeId) -> Result<Option<Recipe>> {
    let mut stmt =
        conn.prepare(&format!("SELECT {SELECT_RECIPE_COLUMNS} FROM recipes WHERE recipe_id = ?1"))?;
    let raw = stmt.query_row(params![id.to_string()], RawRecipeRow::read).optional()?;
    raw.map(RawRecipeRow::decode).transpose()
}

fn recipe_from_row(row: &Row<'_>) -> Result<Recipe> {
    RawRecipeRow::read(row)?.decode()
}

struct RawRecipeRow {
    recipe_id: String,
    name: String,
    tags_json: String,
    ingredients_json: String,
    instructions_json: String,
    published_at: String,
}

impl RawRecipeRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            recipe_id: row.get(0)?,
            name: row.get(1)?,
            tags_json: row.get(2)?,
            ingredients_json: row.get(3)?,
            instructions_json: row.get(4)?,
            published_at: row.get(5)?,
        })
    }

    fn decode(self) -> Result<Recipe> {
        Ok(Recipe {
            id: parse_recipe_id(&self.recipe_id)?,
            name: self.name,
            tags: decode_list(&self.tags_json, "tags")?,
            ingredients: decode_list(&self.ingredients_json, "ingredients")?,
            instructions: decode_list(&self.instructions_json, "instructions")?,
            published_at: parse_rfc3339(&self.published_at)?,
        })
    }
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version: Option<i64> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
        .context("failed to read schema version")?;
    Ok(version.unwrap_or(0))
}

fn record_schema_version(tx: &Transaction<'_>, version: i64) -> Result<()> {
    let now = rfc3339(OffsetDateTime::now_utc())?;
    tx.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn encode_list(values: &[String], field: &str) -> Result<String> {
    serde_json::to_string(values).with_context(|| format!("failed to serialize {field}"))
}

fn decode_list(raw: &str, field: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw).with_context(|| format!("invalid {field} column: {raw}"))
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}

fn parse_recipe_id(raw: &str) -> Result<RecipeId> {
    let parsed = Ulid::from_string(raw).with_context(|| format!("invalid ULID: {raw}"))?;
    Ok(RecipeId(parsed))
}
