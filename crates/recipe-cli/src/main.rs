use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use recipe_api::RecipeService;
use recipe_core::RecipeInput;
use recipe_store_sqlite::SqliteRecipeStore;
use serde::Serialize;

#[derive(Debug, Parser)]
#[command(name = "recipes")]
#[command(about = "Recipe store administration")]
struct Cli {
    #[arg(long, env = "RECIPES_DB", default_value = "./recipes.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Recipe {
        #[command(subcommand)]
        command: RecipeCommand,
    },
    /// Import a JSON array of recipes; every record gets a fresh id.
    Seed(SeedArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum RecipeCommand {
    Add(AddArgs),
    Count,
    List,
    Get {
        #[arg(long)]
        id: String,
    },
    Search {
        #[arg(long)]
        tag: String,
    },
}

#[derive(Debug, Args)]
struct AddArgs {
    #[arg(long)]
    name: String,
    #[arg(long = "tag")]
    tags: Vec<String>,
    #[arg(long = "ingredient")]
    ingredients: Vec<String>,
    #[arg(long = "instruction")]
    instructions: Vec<String>,
}

#[derive(Debug, Args)]
struct SeedArgs {
    #[arg(long)]
    file: PathBuf,
}

#[derive(Debug, Serialize)]
struct MigrateResult {
    dry_run: bool,
    current_version: i64,
    target_version: i64,
    would_apply_versions: Vec<i64>,
    after_version: Option<i64>,
}

#[derive(Debug, Serialize)]
struct CountResult {
    count: u64,
}

#[derive(Debug, Serialize)]
struct SeedResult {
    file: String,
    inserted: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Db { command } => run_db(&cli.db, command),
        Command::Recipe { command } => run_recipe(&cli.db, command),
        Command::Seed(args) => run_seed(&cli.db, &args),
    }
}

fn run_db(db: &Path, command: DbCommand) -> Result<()> {
    let store = SqliteRecipeStore::open(db)?;
    match command {
        DbCommand::SchemaVersion => print_json(&store.schema_status()?),
        DbCommand::Migrate(args) => {
            let before = store.schema_status()?;
            if args.dry_run {
                return print_json(&MigrateResult {
                    dry_run: true,
                    current_version: before.current_version,
                    target_version: before.target_version,
                    would_apply_versions: before.pending_versions,
                    after_version: None,
                });
            }
            store.migrate()?;
            let after = store.schema_status()?;
            print_json(&MigrateResult {
                dry_run: false,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: Some(after.current_version),
            })
        }
    }
}

fn open_service(db: &Path) -> Result<RecipeService> {
    let store = SqliteRecipeStore::connect(db)?;
    Ok(RecipeService::new(Arc::new(store), None))
}

fn run_recipe(db: &Path, command: RecipeCommand) -> Result<()> {
    let service = open_service(db)?;
    match command {
        RecipeCommand::Add(args) => {
            let recipe = service
                .create(RecipeInput {
                    name: args.name,
                    tags: args.tags,
                    ingredients: args.ingredients,
                    instructions: args.instructions,
                })
                .map_err(|err| anyhow!(err))?;
            print_json(&recipe)
        }
        RecipeCommand::Count => {
            let count = service.count().map_err(|err| anyhow!(err))?;
            print_json(&CountResult { count })
        }
        RecipeCommand::List => print_json(&service.list().map_err(|err| anyhow!(err))?),
        RecipeCommand::Get { id } => print_json(&service.get(&id).map_err(|err| anyhow!(err))?),
        RecipeCommand::Search { tag } => {
            print_json(&service.search_by_tag(&tag).map_err(|err| anyhow!(err))?)
        }
    }
}

fn run_seed(db: &Path, args: &SeedArgs) -> Result<()> {
    let body = fs::read(&args.file)
        .with_context(|| format!("failed to read seed file {}", args.file.display()))?;
    let service = open_service(db)?;
    let inserted = service.import(&body).map_err(|err| anyhow!(err))?;
    print_json(&SeedResult { file: args.file.display().to_string(), inserted })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("failed to encode output")?);
    Ok(())
}
