//! tagshelf: manage tag taxonomies and toggle tags in prompt files.
//!
//! Taxonomies live as JSON files under the data directory; category paths are
//! written `a/b/c`, with an empty path or `/` meaning the root.

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use tag_cli::{Config, FileField, JsonDirStorage};
use tag_core::model::parse_path;
use tag_core::{
    Category, Entry, EventBus, FieldKey, Orchestrator, Tag, TaxonomyId, TaxonomyStore,
    ToggleOutcome, UseState,
};

#[derive(Parser, Debug)]
#[command(name = "tagshelf")]
#[command(about = "Tag taxonomies for prompt text")]
struct Cli {
    /// Storage directory (overrides TAGSHELF_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Taxonomy to operate on (overrides TAGSHELF_DEFAULT_TAXONOMY)
    #[arg(short, long, global = true)]
    taxonomy: Option<String>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the taxonomy tree.
    List,
    /// List taxonomy ids.
    Taxonomies,
    /// Create an empty taxonomy.
    CreateTaxonomy { id: String },
    /// Add a category; the last path segment is its name.
    AddCategory { path: String },
    /// Add a tag to the category at PATH.
    AddTag { path: String, name: String, value: String },
    /// Rename the category at PATH.
    RenameCategory { path: String, new_name: String },
    /// Rename a tag, keeping its value.
    RenameTag {
        path: String,
        name: String,
        value: String,
        new_name: String,
    },
    /// Change a tag's name and/or value.
    EditTag(EditTagArgs),
    /// Delete the category at PATH and everything in it.
    DeleteCategory { path: String },
    /// Delete a tag.
    DeleteTag { path: String, name: String, value: String },
    /// Move a tag to another category.
    MoveTag {
        from: String,
        to: String,
        name: String,
        value: String,
    },
    /// Move the category at FROM under TO_PARENT.
    MoveCategory { from: String, to_parent: String },
    /// Put the listed entries of the category at PATH first, in that order.
    Reorder { path: String, keys: Vec<String> },
    /// Manage favorites.
    #[command(subcommand)]
    Favorite(FavoriteCmd),
    /// Search tag names and values in every taxonomy.
    Search { query: String },
    /// Insert a tag into a text file, or remove it if it is already there.
    Toggle(ToggleArgs),
}

#[derive(Args, Debug)]
struct EditTagArgs {
    path: String,
    name: String,
    value: String,
    #[arg(long)]
    new_name: Option<String>,
    #[arg(long)]
    new_value: Option<String>,
}

#[derive(Subcommand, Debug)]
enum FavoriteCmd {
    /// Star a tag.
    Add { name: String, value: String },
    /// Unstar every favorite with VALUE.
    Remove { value: String },
    /// Show favorites of every taxonomy.
    List,
}

#[derive(Args, Debug)]
struct ToggleArgs {
    /// Text file holding the prompt
    #[arg(long)]
    file: PathBuf,
    /// Byte offset of the cursor (defaults to the end of the file)
    #[arg(long)]
    cursor: Option<usize>,
    /// Tag value to toggle
    value: String,
    /// Display name (defaults to the tag's name in the taxonomy, or the value)
    #[arg(long)]
    name: Option<String>,
}

type Store = TaxonomyStore<JsonDirStorage>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respects RUST_LOG, defaults to info (or debug with --verbose). Logs go
    // to stderr so stdout stays parseable.
    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env(cli.data_dir.clone(), cli.taxonomy.clone())?;
    debug!("Data directory: {}", config.data_dir.display());

    let storage = JsonDirStorage::new(config.data_dir.clone());
    let store = Arc::new(TaxonomyStore::new(storage, Arc::new(EventBus::new())));
    run(cli, &config, store).await
}

async fn run(cli: Cli, config: &Config, store: Arc<Store>) -> Result<()> {
    let id = config.default_taxonomy.clone();
    match cli.command {
        Command::List => {
            let root = store.snapshot(&id).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&root)?);
            } else {
                println!("{}", id);
                print_tree(&root, 1);
            }
        }
        Command::Taxonomies => {
            let ids = store.list_taxonomies().await?;
            if cli.json {
                println!("{}", serde_json::to_string(&ids)?);
            } else {
                for id in ids {
                    println!("{}", id);
                }
            }
        }
        Command::CreateTaxonomy { id } => {
            let id = TaxonomyId::new(id);
            store.create_taxonomy(&id).await?;
            info!("Created taxonomy {}", id);
        }
        Command::AddCategory { path } => {
            let (parent, name) = split_name(&path)?;
            store.add_category(&id, &parent, &name).await?;
        }
        Command::AddTag { path, name, value } => {
            store.add_tag(&id, &parse_path(&path), &name, &value).await?;
        }
        Command::RenameCategory { path, new_name } => {
            store.rename_category(&id, &parse_path(&path), &new_name).await?;
        }
        Command::RenameTag {
            path,
            name,
            value,
            new_name,
        } => {
            store
                .rename_tag(&id, &parse_path(&path), &name, &value, &new_name)
                .await?;
        }
        Command::EditTag(args) => {
            if args.new_name.is_none() && args.new_value.is_none() {
                bail!("edit-tag needs --new-name and/or --new-value");
            }
            let new_name = args.new_name.as_deref().unwrap_or(&args.name);
            let new_value = args.new_value.as_deref().unwrap_or(&args.value);
            store
                .update_tag(&id, &parse_path(&args.path), &args.name, &args.value, new_name, new_value)
                .await?;
        }
        Command::DeleteCategory { path } => {
            store.delete_category(&id, &parse_path(&path)).await?;
        }
        Command::DeleteTag { path, name, value } => {
            store.delete_tag(&id, &parse_path(&path), &name, &value).await?;
        }
        Command::MoveTag {
            from,
            to,
            name,
            value,
        } => {
            store
                .move_tag(&id, &parse_path(&from), &parse_path(&to), &name, &value)
                .await?;
        }
        Command::MoveCategory { from, to_parent } => {
            store
                .move_category(&id, &parse_path(&from), &parse_path(&to_parent))
                .await?;
        }
        Command::Reorder { path, keys } => {
            store.reorder(&id, &parse_path(&path), &keys).await?;
        }
        Command::Favorite(cmd) => favorite(&store, &id, cmd, cli.json).await?,
        Command::Search { query } => {
            let hits = store.search(&query).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else {
                for hit in hits {
                    let star = if hit.favorited { "*" } else { " " };
                    println!(
                        "{} {}:{}/{} = {}",
                        star,
                        hit.taxonomy,
                        hit.path.join("/"),
                        hit.name,
                        hit.value
                    );
                }
            }
        }
        Command::Toggle(args) => toggle(store, &id, args, cli.json).await?,
    }
    Ok(())
}

async fn favorite(store: &Store, id: &TaxonomyId, cmd: FavoriteCmd, json: bool) -> Result<()> {
    match cmd {
        FavoriteCmd::Add { name, value } => {
            if !store.add_favorite(id, &name, &value).await? {
                info!("{} is already a favorite", value);
            }
        }
        FavoriteCmd::Remove { value } => {
            if !store.remove_favorite(id, &value).await? {
                info!("{} was not a favorite", value);
            }
        }
        FavoriteCmd::List => {
            let favorites = store.favorites().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&favorites)?);
            } else {
                for (taxonomy, root) in favorites.iter() {
                    println!("{}", taxonomy);
                    print_tree(root, 1);
                }
            }
        }
    }
    Ok(())
}

async fn toggle(store: Arc<Store>, id: &TaxonomyId, args: ToggleArgs, json: bool) -> Result<()> {
    let key = FieldKey::new(args.file.display().to_string(), "text");
    let field = Arc::new(
        FileField::open(&args.file, key.clone(), args.cursor)
            .await
            .with_context(|| format!("Failed to open {}", args.file.display()))?,
    );

    // Show the whole taxonomy so the result reports every tag's state.
    let shown: Vec<_> = store
        .walk_tags(id)
        .await?
        .into_iter()
        .map(|tag| (Tag::new(tag.name, tag.value), Some(id.clone())))
        .collect();
    let name = args
        .name
        .clone()
        .or_else(|| {
            shown
                .iter()
                .find(|(tag, _)| tag.value == args.value)
                .map(|(tag, _)| tag.name.clone())
        })
        .unwrap_or_else(|| args.value.clone());
    let tag = Tag::new(name, args.value.clone());

    let mut orchestrator = Orchestrator::new(Arc::clone(&field), store);
    orchestrator.render(&key, "taxonomy", shown)?;
    let outcome = orchestrator.toggle(&key, &tag)?;
    field
        .save()
        .await
        .with_context(|| format!("Failed to write {}", args.file.display()))?;

    let used: Vec<&str> = orchestrator
        .instances(&key, "taxonomy")
        .iter()
        .filter(|instance| instance.state == UseState::Used)
        .map(|instance| instance.tag.name.as_str())
        .collect();
    if json {
        let report = serde_json::json!({
            "outcome": match &outcome {
                ToggleOutcome::Inserted { .. } => "inserted",
                ToggleOutcome::Removed => "removed",
                ToggleOutcome::NotPresent => "notPresent",
            },
            "used": used,
        });
        println!("{}", report);
    } else {
        match outcome {
            ToggleOutcome::Inserted { variant, range } => {
                println!("inserted {:?} at {}..{} ({:?})", tag.value, range.start, range.end, variant)
            }
            ToggleOutcome::Removed => println!("removed {:?}", tag.value),
            ToggleOutcome::NotPresent => println!("{:?} not present", tag.value),
        }
        println!("used: {}", used.join(", "));
    }
    Ok(())
}

/// Split `a/b/c` into the parent path `a/b` and the name `c`.
fn split_name(path: &str) -> Result<(Vec<String>, String)> {
    let mut segments = parse_path(path);
    match segments.pop() {
        Some(name) => Ok((segments, name)),
        None => bail!("a category path needs at least one segment"),
    }
}

fn print_tree(category: &Category, depth: usize) {
    let indent = "  ".repeat(depth);
    for (name, entry) in category.iter() {
        match entry {
            Entry::Tag(value) => println!("{}{} = {}", indent, name, value),
            Entry::Category(child) => {
                println!("{}{}/", indent, name);
                print_tree(child, depth + 1);
            }
        }
    }
}
