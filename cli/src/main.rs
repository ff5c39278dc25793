mod commands;
mod config;
mod server;
mod telemetry;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use crate::commands::{
    cmd_collection_add, cmd_collection_create, cmd_collection_delete, cmd_collection_list,
    cmd_collection_remove, cmd_collection_show, cmd_plan_add, cmd_plan_create, cmd_plan_delete,
    cmd_plan_list, cmd_plan_remove, cmd_plan_show, cmd_recipe_add_ingredient, cmd_recipe_create,
    cmd_recipe_delete, cmd_recipe_import, cmd_recipe_list, cmd_recipe_remove_ingredient,
    cmd_recipe_show, cmd_shopping_check, cmd_shopping_export, cmd_shopping_generate,
    cmd_shopping_list, cmd_shopping_show, cmd_shopping_stock, cmd_unit_add, cmd_unit_list,
    cmd_user_login, cmd_user_register,
};
use crate::config::Config;
use larder_core::models::User;
use larder_core::service::LarderService;

#[derive(Parser)]
#[command(
    name = "larder",
    version,
    about = "Recipes, meal plans and shopping lists",
    long_about = "\n\n  larder: keep your recipes, plan the week, and let the shopping list add itself up.\n"
)]
struct Cli {
    /// User to act as (must already be registered)
    #[arg(long, global = true, env = "LARDER_USER")]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage user accounts
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// List or add units of measure
    Unit {
        #[command(subcommand)]
        command: UnitCommands,
    },
    /// Manage recipes
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Group recipes into collections
    Collection {
        #[command(subcommand)]
        command: CollectionCommands,
    },
    /// Plan meals over a run of days
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Generate and work through shopping lists
    Shopping {
        #[command(subcommand)]
        command: ShoppingCommands,
    },
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a new account
    Register {
        username: String,
        #[arg(long, env = "LARDER_PASSWORD", hide_env_values = true)]
        password: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Log in and print an API session token
    Login {
        username: String,
        #[arg(long, env = "LARDER_PASSWORD", hide_env_values = true)]
        password: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum UnitCommands {
    /// List all known units
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a custom unit (never converted to anything else)
    Add {
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// Create a new, empty recipe
    Create {
        /// Recipe title
        title: String,
        /// Number of servings the recipe makes
        #[arg(short, long, default_value = "1")]
        servings: f64,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        instructions: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add an ingredient to a recipe
    AddIngredient {
        /// Recipe title or ID
        recipe: String,
        /// Ingredient name
        ingredient: String,
        /// Quantity with optional unit (e.g. "200g", "500 ml", "2 tbsp", "3")
        quantity: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove an ingredient from a recipe
    RemoveIngredient {
        /// Recipe title or ID
        recipe: String,
        /// Ingredient name
        ingredient: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a recipe with its ingredients
    Show {
        /// Recipe title or ID
        recipe: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List your recipes
    List {
        /// Only show titles containing this text
        #[arg(short, long)]
        search: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a recipe
    Delete {
        /// Recipe title or ID
        recipe: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import a recipe from a Cooklang (.cook) file
    Import {
        /// Path to the .cook file
        file: PathBuf,
        /// Override recipe title (default: from metadata or filename)
        #[arg(long)]
        title: Option<String>,
        /// Override servings (default: from metadata or 1)
        #[arg(short, long)]
        servings: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum CollectionCommands {
    /// Create a collection
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List your collections
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the recipes in a collection
    Show {
        collection_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a recipe to a collection
    Add {
        collection_id: i64,
        /// Recipe title or ID
        recipe: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a recipe from a collection
    Remove {
        collection_id: i64,
        /// Recipe title or ID
        recipe: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a collection (its recipes are kept)
    Delete {
        collection_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Create a meal plan
    Create {
        name: String,
        /// First day of the plan (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        start: Option<String>,
        /// Number of days the plan covers (1-31)
        #[arg(short, long, default_value = "7")]
        days: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Schedule a recipe on a day of the plan
    Add {
        plan_id: i64,
        /// Recipe title or ID
        recipe: String,
        /// Day within the plan, starting at 0
        #[arg(short, long, default_value = "0")]
        day: i64,
        /// How many times the recipe is made (default: 1)
        #[arg(short, long)]
        quantity: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a scheduled recipe by entry ID
    Remove {
        plan_id: i64,
        entry_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a plan day by day
    Show {
        plan_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List your meal plans
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a meal plan
    Delete {
        plan_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ShoppingCommands {
    /// Build a shopping list from every recipe in a meal plan
    Generate {
        plan_id: i64,
        /// List name (default: "Shopping list for <plan>")
        #[arg(short, long)]
        name: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List your shopping lists
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the items on a shopping list
    Show {
        list_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark an item as bought
    Check {
        list_id: i64,
        item_id: i64,
        /// Mark the item as not bought again
        #[arg(long)]
        undo: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record how much of an item is already in stock
    Stock {
        list_id: i64,
        item_id: i64,
        quantity: f64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export a shopping list as CSV
    Export {
        list_id: i64,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn require_user(svc: &LarderService, user: Option<&str>) -> Result<User> {
    let username = user.context("No user selected. Pass --user <name> or set LARDER_USER")?;
    svc.local_user(username)
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let svc = LarderService::open(&config.db_path)?;

    match cli.command {
        Commands::Serve { port, bind } => {
            telemetry::init_telemetry();
            tracing::info!(data_dir = %config.data_dir.display(), "opening larder");
            server::start_server(svc, port, &bind).await
        }
        Commands::User { command } => match command {
            UserCommands::Register {
                username,
                password,
                json,
            } => cmd_user_register(&svc, &username, &password, json),
            UserCommands::Login {
                username,
                password,
                json,
            } => cmd_user_login(&svc, &username, &password, json),
        },
        Commands::Unit { command } => match command {
            UnitCommands::List { json } => cmd_unit_list(&svc, json),
            UnitCommands::Add { name, json } => cmd_unit_add(&svc, &name, json),
        },
        Commands::Recipe { command } => {
            let user = require_user(&svc, cli.user.as_deref())?;
            match command {
                RecipeCommands::Create {
                    title,
                    servings,
                    description,
                    instructions,
                    json,
                } => cmd_recipe_create(&svc, &user, &title, servings, description, instructions, json),
                RecipeCommands::AddIngredient {
                    recipe,
                    ingredient,
                    quantity,
                    json,
                } => cmd_recipe_add_ingredient(&svc, &user, &recipe, &ingredient, &quantity, json),
                RecipeCommands::RemoveIngredient {
                    recipe,
                    ingredient,
                    json,
                } => cmd_recipe_remove_ingredient(&svc, &user, &recipe, &ingredient, json),
                RecipeCommands::Show { recipe, json } => cmd_recipe_show(&svc, &user, &recipe, json),
                RecipeCommands::List { search, json } => {
                    cmd_recipe_list(&svc, &user, search.as_deref(), json)
                }
                RecipeCommands::Delete { recipe, json } => {
                    cmd_recipe_delete(&svc, &user, &recipe, json)
                }
                RecipeCommands::Import {
                    file,
                    title,
                    servings,
                    json,
                } => cmd_recipe_import(&svc, &user, &file, title, servings, json),
            }
        }
        Commands::Collection { command } => {
            let user = require_user(&svc, cli.user.as_deref())?;
            match command {
                CollectionCommands::Create {
                    name,
                    description,
                    json,
                } => cmd_collection_create(&svc, &user, &name, description.as_deref(), json),
                CollectionCommands::List { json } => cmd_collection_list(&svc, &user, json),
                CollectionCommands::Show {
                    collection_id,
                    json,
                } => cmd_collection_show(&svc, &user, collection_id, json),
                CollectionCommands::Add {
                    collection_id,
                    recipe,
                    json,
                } => cmd_collection_add(&svc, &user, collection_id, &recipe, json),
                CollectionCommands::Remove {
                    collection_id,
                    recipe,
                    json,
                } => cmd_collection_remove(&svc, &user, collection_id, &recipe, json),
                CollectionCommands::Delete {
                    collection_id,
                    json,
                } => cmd_collection_delete(&svc, &user, collection_id, json),
            }
        }
        Commands::Plan { command } => {
            let user = require_user(&svc, cli.user.as_deref())?;
            match command {
                PlanCommands::Create {
                    name,
                    start,
                    days,
                    json,
                } => cmd_plan_create(&svc, &user, &name, start, days, json),
                PlanCommands::Add {
                    plan_id,
                    recipe,
                    day,
                    quantity,
                    json,
                } => cmd_plan_add(&svc, &user, plan_id, &recipe, day, quantity, json),
                PlanCommands::Remove {
                    plan_id,
                    entry_id,
                    json,
                } => cmd_plan_remove(&svc, &user, plan_id, entry_id, json),
                PlanCommands::Show { plan_id, json } => cmd_plan_show(&svc, &user, plan_id, json),
                PlanCommands::List { json } => cmd_plan_list(&svc, &user, json),
                PlanCommands::Delete { plan_id, json } => {
                    cmd_plan_delete(&svc, &user, plan_id, json)
                }
            }
        }
        Commands::Shopping { command } => {
            let user = require_user(&svc, cli.user.as_deref())?;
            match command {
                ShoppingCommands::Generate {
                    plan_id,
                    name,
                    json,
                } => cmd_shopping_generate(&svc, &user, plan_id, name.as_deref(), json),
                ShoppingCommands::List { json } => cmd_shopping_list(&svc, &user, json),
                ShoppingCommands::Show { list_id, json } => {
                    cmd_shopping_show(&svc, &user, list_id, json)
                }
                ShoppingCommands::Check {
                    list_id,
                    item_id,
                    undo,
                    json,
                } => cmd_shopping_check(&svc, &user, list_id, item_id, undo, json),
                ShoppingCommands::Stock {
                    list_id,
                    item_id,
                    quantity,
                    json,
                } => cmd_shopping_stock(&svc, &user, list_id, item_id, quantity, json),
                ShoppingCommands::Export {
                    list_id,
                    output,
                    json,
                } => cmd_shopping_export(&svc, &user, list_id, output.as_deref(), json),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_user_flag_is_global() {
        let cli = Cli::try_parse_from(["larder", "plan", "list", "--user", "alice"]).unwrap();
        assert_eq!(cli.user.as_deref(), Some("alice"));
    }

    #[test]
    fn test_require_user_needs_a_name() {
        let svc = LarderService::new_in_memory().unwrap();
        assert!(require_user(&svc, None).is_err());
        assert!(require_user(&svc, Some("ghost")).is_err());
        svc.register("alice", "password123").unwrap();
        assert_eq!(require_user(&svc, Some("alice")).unwrap().username, "alice");
    }
}
