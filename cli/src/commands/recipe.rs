use anyhow::{Context, Result, bail};
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use larder_core::models::{self, NewRecipe, NewRecipeIngredient, User};
use larder_core::service::LarderService;

use super::helpers::{fmt_quantity, json_error, parse_quantity_with_unit, resolve_unit, truncate};
use super::resolve_recipe;

pub(crate) fn cmd_recipe_create(
    svc: &LarderService,
    user: &User,
    title: &str,
    servings: f64,
    description: Option<String>,
    instructions: Option<String>,
    json: bool,
) -> Result<()> {
    let detail = svc.create_recipe(
        user.id,
        &NewRecipe {
            title: title.to_string(),
            description,
            instructions,
            servings,
            image_url: None,
            ingredients: Vec::new(),
        },
    )?;
    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
    } else {
        let id = detail.recipe.id;
        let title = &detail.recipe.title;
        println!("Created recipe: {title} (id: {id}, servings: {servings})");
        println!("Add ingredients with: larder recipe add-ingredient \"{title}\" <ingredient> <quantity>");
    }
    Ok(())
}

pub(crate) fn cmd_recipe_add_ingredient(
    svc: &LarderService,
    user: &User,
    recipe_ref: &str,
    ingredient_name: &str,
    quantity_str: &str,
    json: bool,
) -> Result<()> {
    let recipe = resolve_recipe(svc, user.id, recipe_ref)?;
    let (quantity, raw_unit) = parse_quantity_with_unit(quantity_str)?;
    // Resolving may create a custom unit, so reject bad input first
    models::validate_name("ingredient_name", ingredient_name)?;
    models::validate_quantity(quantity)?;
    let unit = resolve_unit(svc.db(), raw_unit.as_deref())?;

    let ingredient = svc.add_recipe_ingredient(
        user.id,
        recipe.id,
        &NewRecipeIngredient {
            ingredient_name: ingredient_name.to_string(),
            quantity,
            unit_id: unit.id,
        },
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ingredient)?);
    } else {
        let name = &ingredient.ingredient_name;
        let unit_name = &unit.name;
        let title = &recipe.title;
        println!("Added {} {unit_name} of {name} to {title}", fmt_quantity(quantity));
    }
    Ok(())
}

pub(crate) fn cmd_recipe_remove_ingredient(
    svc: &LarderService,
    user: &User,
    recipe_ref: &str,
    ingredient_name: &str,
    json: bool,
) -> Result<()> {
    let recipe = resolve_recipe(svc, user.id, recipe_ref)?;
    if svc
        .db()
        .remove_recipe_ingredient(user.id, recipe.id, ingredient_name)?
    {
        if json {
            println!("{}", serde_json::json!({ "removed": ingredient_name }));
        } else {
            println!("Removed {ingredient_name} from {}", recipe.title);
        }
    } else {
        if json {
            println!(
                "{}",
                json_error(&format!(
                    "Ingredient '{ingredient_name}' not found in recipe"
                ))
            );
        } else {
            eprintln!("Ingredient '{ingredient_name}' not found in recipe");
        }
        process::exit(2);
    }
    Ok(())
}

pub(crate) fn cmd_recipe_show(
    svc: &LarderService,
    user: &User,
    recipe_ref: &str,
    json: bool,
) -> Result<()> {
    let recipe = resolve_recipe(svc, user.id, recipe_ref)?;
    let detail = svc.db().get_recipe_detail(user.id, recipe.id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    let r = &detail.recipe;
    println!("=== {} ===", r.title);
    println!("  Servings: {}", fmt_quantity(r.servings));
    if let Some(ref description) = r.description {
        println!("  {description}");
    }

    println!("\n  INGREDIENTS:");
    if detail.ingredients.is_empty() {
        println!("    (none)");
    }
    for ing in &detail.ingredients {
        let unit = ing.unit_name.as_deref().unwrap_or("?");
        println!(
            "    {} {unit} {}",
            fmt_quantity(ing.quantity),
            ing.ingredient_name
        );
    }

    if let Some(ref instructions) = r.instructions {
        println!("\n  INSTRUCTIONS:");
        for line in instructions.lines() {
            println!("    {line}");
        }
    }

    Ok(())
}

pub(crate) fn cmd_recipe_list(
    svc: &LarderService,
    user: &User,
    search: Option<&str>,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Title")]
        title: String,
        #[tabled(rename = "Servings")]
        servings: String,
        #[tabled(rename = "Updated")]
        updated: String,
    }

    let recipes = svc.db().list_recipes(user.id, search)?;
    if recipes.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No recipes found");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&recipes)?);
        return Ok(());
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            id: r.id,
            title: truncate(&r.title, 40),
            servings: fmt_quantity(r.servings),
            updated: r.updated_at.get(..10).unwrap_or(&r.updated_at).to_string(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..3)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    Ok(())
}

pub(crate) fn cmd_recipe_delete(
    svc: &LarderService,
    user: &User,
    recipe_ref: &str,
    json: bool,
) -> Result<()> {
    let recipe = resolve_recipe(svc, user.id, recipe_ref)?;
    svc.db().delete_recipe(user.id, recipe.id)?;
    if json {
        println!("{}", serde_json::json!({ "deleted": recipe.id }));
    } else {
        println!("Deleted recipe: {} (id: {})", recipe.title, recipe.id);
    }
    Ok(())
}

/// One ingredient as read from a Cooklang file, before unit resolution.
#[derive(Debug, Clone, PartialEq)]
struct ImportedIngredient {
    name: String,
    quantity: f64,
    unit: Option<String>,
}

pub(crate) fn cmd_recipe_import(
    svc: &LarderService,
    user: &User,
    file: &std::path::Path,
    title_override: Option<String>,
    servings_override: Option<f64>,
    json: bool,
) -> Result<()> {
    let input = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read file: {}", file.display()))?;

    let (recipe_data, _report) = cooklang::parse(&input)
        .into_result()
        .map_err(|e| anyhow::anyhow!("Failed to parse Cooklang file: {e}"))?;

    let title = title_override
        .or_else(|| recipe_data.metadata.title().map(String::from))
        .or_else(|| file.file_stem().and_then(|s| s.to_str()).map(String::from))
        .context("Could not determine recipe title. Use --title to specify one")?;

    let servings = servings_override
        .or_else(|| {
            recipe_data
                .metadata
                .servings()
                .and_then(|s| s.as_number().map(f64::from))
        })
        .unwrap_or(1.0);

    let converter = cooklang::Converter::default();
    let grouped = recipe_data.group_ingredients(&converter);
    let imported: Vec<ImportedIngredient> = grouped.iter().map(imported_ingredient).collect();

    if imported.is_empty() {
        bail!("No ingredients found in recipe");
    }
    models::validate_name("title", &title)?;
    models::validate_servings(servings)?;

    let mut ingredients = Vec::with_capacity(imported.len());
    for ing in &imported {
        let unit = resolve_unit(svc.db(), ing.unit.as_deref())?;
        if let Some(ref raw) = ing.unit {
            if larder_core::units::lookup(&unit.name).is_none() {
                eprintln!(
                    "Warning: unit '{raw}' for {} is not convertible; it will only add up with itself",
                    ing.name
                );
            }
        }
        ingredients.push(NewRecipeIngredient {
            ingredient_name: ing.name.clone(),
            quantity: ing.quantity,
            unit_id: unit.id,
        });
    }

    let detail = svc.create_recipe(
        user.id,
        &NewRecipe {
            title,
            description: None,
            instructions: None,
            servings,
            image_url: None,
            ingredients,
        },
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
    } else {
        let title = &detail.recipe.title;
        let ing_count = detail.ingredients.len();
        let servings = fmt_quantity(detail.recipe.servings);
        println!("Imported recipe: {title} ({ing_count} ingredients, {servings} servings)");
    }

    Ok(())
}

fn imported_ingredient(gi: &cooklang::ingredient_list::GroupedIngredient<'_>) -> ImportedIngredient {
    // Take the first quantity from the grouped quantities (if any)
    let (quantity, unit) = gi.quantity.iter().next().map_or(
        (None, None),
        |qty: &cooklang::Quantity| {
            let value = match qty.value() {
                cooklang::Value::Number(n) => Some(n.value()),
                cooklang::Value::Range { start, .. } => Some(start.value()),
                cooklang::Value::Text(t) => t.trim().parse::<f64>().ok(),
            };
            (value, qty.unit().map(String::from))
        },
    );

    ImportedIngredient {
        name: gi.ingredient.display_name().to_string(),
        quantity: quantity.filter(|q| q.is_finite() && *q > 0.0).unwrap_or(1.0),
        unit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ingredients(src: &str) -> Vec<ImportedIngredient> {
        let (recipe, _) = cooklang::parse(src).into_result().unwrap();
        let converter = cooklang::Converter::default();
        recipe
            .group_ingredients(&converter)
            .iter()
            .map(imported_ingredient)
            .collect()
    }

    #[test]
    fn test_imported_ingredient_with_unit() {
        let ings = parse_ingredients("Mix @flour{200%g} with @milk{300%ml}.\n");
        assert_eq!(ings.len(), 2);
        assert_eq!(ings[0].name, "flour");
        assert!((ings[0].quantity - 200.0).abs() < f64::EPSILON);
        assert_eq!(ings[0].unit.as_deref(), Some("g"));
        assert_eq!(ings[1].unit.as_deref(), Some("ml"));
    }

    #[test]
    fn test_imported_ingredient_without_quantity() {
        let ings = parse_ingredients("Season with @salt.\n");
        assert_eq!(ings.len(), 1);
        assert!((ings[0].quantity - 1.0).abs() < f64::EPSILON);
        assert!(ings[0].unit.is_none());
    }

    #[test]
    fn test_import_file_creates_recipe() {
        let svc = LarderService::new_in_memory().unwrap();
        let user = svc.register("alice", "password123").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pancakes.cook");
        std::fs::write(&path, "Whisk @flour{200%g}, @eggs{2} and @milk{1%cup}.\n").unwrap();

        cmd_recipe_import(&svc, &user, &path, None, Some(4.0), true).unwrap();

        let recipe = svc.db().get_recipe_by_title(user.id, "pancakes").unwrap();
        assert!((recipe.servings - 4.0).abs() < f64::EPSILON);
        let ings = svc.db().get_recipe_ingredients(recipe.id).unwrap();
        let units: Vec<_> = ings.iter().map(|i| i.unit_name.clone().unwrap()).collect();
        assert_eq!(units, vec!["gram", "piece", "cup"]);
    }

    #[test]
    fn test_imported_cups_add_up_with_milliliters() {
        let svc = LarderService::new_in_memory().unwrap();
        let user = svc.register("alice", "password123").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cocoa.cook");
        std::fs::write(&path, "Warm @milk{1%cup} slowly.\n").unwrap();
        cmd_recipe_import(&svc, &user, &path, None, None, true).unwrap();
        let cocoa = svc.db().get_recipe_by_title(user.id, "cocoa").unwrap();

        let ml = svc.db().get_unit_by_name("milliliter").unwrap().unwrap();
        let porridge = svc
            .create_recipe(
                user.id,
                &NewRecipe {
                    title: "Porridge".to_string(),
                    description: None,
                    instructions: None,
                    servings: 1.0,
                    image_url: None,
                    ingredients: vec![NewRecipeIngredient {
                        ingredient_name: "milk".to_string(),
                        quantity: 200.0,
                        unit_id: ml.id,
                    }],
                },
            )
            .unwrap();

        let plan = svc
            .create_meal_plan(
                user.id,
                &models::NewMealPlan {
                    name: "Week".to_string(),
                    start_date: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                    days: 7,
                },
            )
            .unwrap();
        svc.add_meal_plan_entry(user.id, plan.id, cocoa.id, 0, None)
            .unwrap();
        svc.add_meal_plan_entry(user.id, plan.id, porridge.recipe.id, 1, None)
            .unwrap();

        let list = svc.generate_shopping_list(user.id, plan.id, None).unwrap();
        let items = svc.db().get_shopping_list_items(list.shopping_list_id).unwrap();
        assert_eq!(items.len(), 1);
        assert!((items[0].quantity - 450.0).abs() < 1e-9);
        assert_eq!(items[0].unit, "milliliter");
    }

    #[test]
    fn test_rejected_ingredient_creates_no_unit() {
        let svc = LarderService::new_in_memory().unwrap();
        let user = svc.register("alice", "password123").unwrap();
        cmd_recipe_create(&svc, &user, "Paella", 4.0, None, None, true).unwrap();

        assert!(cmd_recipe_add_ingredient(&svc, &user, "Paella", "  ", "1 pinch", true).is_err());
        assert!(svc.db().get_unit_by_name("pinch").unwrap().is_none());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("risotto.cook");
        std::fs::write(&path, "Strip @thyme{1%sprig}.\n").unwrap();
        assert!(cmd_recipe_import(&svc, &user, &path, None, Some(0.0), true).is_err());
        assert!(svc.db().get_unit_by_name("sprig").unwrap().is_none());
    }
}
