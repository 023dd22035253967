use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use recipe_core::{DeleteResult, Recipe, RecipeId, RecipeInput, RecipeStore, UpdateResult};

/// Process-local store kept in insertion order. Nothing is persisted.
#[derive(Default)]
pub struct MemoryRecipeStore {
    recipes: RwLock<Vec<Recipe>>,
}

impl MemoryRecipeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecipeStore for MemoryRecipeStore {
    fn insert(&self, recipe: &Recipe) -> Result<()> {
        let mut recipes = self.recipes.write();
        if recipes.iter().any(|existing| existing.id == recipe.id) {
            return Err(anyhow!("duplicate recipe id {}", recipe.id));
        }
        recipes.push(recipe.clone());
        Ok(())
    }

    fn insert_many(&self, batch: &[Recipe]) -> Result<usize> {
        let mut recipes = self.recipes.write();
        for (index, recipe) in batch.iter().enumerate() {
            let clashes_with_store = recipes.iter().any(|existing| existing.id == recipe.id);
            let clashes_with_batch = batch[..index].iter().any(|earlier| earlier.id == recipe.id);
            if clashes_with_store || clashes_with_batch {
                return Err(anyhow!("duplicate recipe id {}", recipe.id));
            }
        }
        recipes.extend_from_slice(batch);
        Ok(batch.len())
    }

    fn list(&self) -> Result<Vec<Recipe>> {
        Ok(self.recipes.read().clone())
    }

    fn find(&self, id: RecipeId) -> Result<Option<Recipe>> {
        Ok(self.recipes.read().iter().find(|recipe| recipe.id == id).cloned())
    }

    fn update(&self, id: RecipeId, fields: &RecipeInput) -> Result<UpdateResult> {
        let mut recipes = self.recipes.write();
        let Some(recipe) = recipes.iter_mut().find(|recipe| recipe.id == id) else {
            return Ok(UpdateResult::default());
        };
        let modified = recipe.apply(fields);
        Ok(UpdateResult { matched_count: 1, modified_count: u64::from(modified) })
    }

    fn delete(&self, id: RecipeId) -> Result<DeleteResult> {
        let mut recipes = self.recipes.write();
        let before = recipes.len();
        recipes.retain(|recipe| recipe.id != id);
        Ok(DeleteResult { deleted_count: u64::try_from(before - recipes.len())? })
    }

    fn find_by_tag(&self, tag: &str) -> Result<Vec<Recipe>> {
        Ok(self.recipes.read().iter().filter(|recipe| recipe.has_tag(tag)).cloned().collect())
    }

    fn count(&self) -> Result<u64> {
        Ok(u64::try_from(self.recipes.read().len())?)
    }

    fn ping(&self) -> Result<()> {
        Ok(())
    }
}
