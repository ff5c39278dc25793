use anyhow::Result;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use larder_core::models::User;
use larder_core::service::LarderService;

use super::helpers::{fmt_quantity, json_error, truncate};
use super::resolve_recipe;

pub(crate) fn cmd_collection_create(
    svc: &LarderService,
    user: &User,
    name: &str,
    description: Option<&str>,
    json: bool,
) -> Result<()> {
    let collection = svc.create_collection(user.id, name, description)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&collection)?);
    } else {
        println!(
            "Created collection: {} (id: {})",
            collection.name, collection.id
        );
    }
    Ok(())
}

pub(crate) fn cmd_collection_list(svc: &LarderService, user: &User, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct CollectionRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Recipes")]
        recipes: i64,
        #[tabled(rename = "Description")]
        description: String,
    }

    let collections = svc.db().list_collections(user.id)?;
    if collections.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No collections yet");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&collections)?);
        return Ok(());
    }

    let rows: Vec<CollectionRow> = collections
        .iter()
        .map(|c| CollectionRow {
            id: c.id,
            name: truncate(&c.name, 30),
            recipes: c.recipe_count,
            description: c
                .description
                .as_deref()
                .map_or_else(|| "-".to_string(), |d| truncate(d, 40)),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..3)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_collection_show(
    svc: &LarderService,
    user: &User,
    collection_id: i64,
    json: bool,
) -> Result<()> {
    let detail = svc.db().get_collection_detail(user.id, collection_id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    let c = &detail.collection;
    println!("=== {} ===", c.name);
    if let Some(ref description) = c.description {
        println!("  {description}");
    }
    if detail.recipes.is_empty() {
        println!("  (no recipes)");
    }
    for r in &detail.recipes {
        println!(
            "  [{}] {} ({} servings)",
            r.id,
            r.title,
            fmt_quantity(r.servings)
        );
    }
    Ok(())
}

pub(crate) fn cmd_collection_add(
    svc: &LarderService,
    user: &User,
    collection_id: i64,
    recipe_ref: &str,
    json: bool,
) -> Result<()> {
    let recipe = resolve_recipe(svc, user.id, recipe_ref)?;
    let added = svc
        .db()
        .add_recipe_to_collection(user.id, collection_id, recipe.id)?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "collection_id": collection_id, "recipe_id": recipe.id, "added": added })
        );
    } else if added {
        println!("Added {} to collection {collection_id}", recipe.title);
    } else {
        println!("{} is already in collection {collection_id}", recipe.title);
    }
    Ok(())
}

pub(crate) fn cmd_collection_remove(
    svc: &LarderService,
    user: &User,
    collection_id: i64,
    recipe_ref: &str,
    json: bool,
) -> Result<()> {
    let recipe = resolve_recipe(svc, user.id, recipe_ref)?;
    if svc
        .db()
        .remove_recipe_from_collection(user.id, collection_id, recipe.id)?
    {
        if json {
            println!("{}", serde_json::json!({ "removed": recipe.id }));
        } else {
            println!("Removed {} from collection {collection_id}", recipe.title);
        }
    } else {
        let msg = format!("{} is not in collection {collection_id}", recipe.title);
        if json {
            println!("{}", json_error(&msg));
        } else {
            eprintln!("{msg}");
        }
        process::exit(2);
    }
    Ok(())
}

pub(crate) fn cmd_collection_delete(
    svc: &LarderService,
    user: &User,
    collection_id: i64,
    json: bool,
) -> Result<()> {
    if svc.db().delete_collection(user.id, collection_id)? {
        if json {
            println!("{}", serde_json::json!({ "deleted": collection_id }));
        } else {
            println!("Deleted collection {collection_id}");
        }
    } else {
        if json {
            println!("{}", json_error("Collection not found"));
        } else {
            eprintln!("Collection {collection_id} not found");
        }
        process::exit(2);
    }
    Ok(())
}
