use anyhow::{Context, Result};
use std::path::Path;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use larder_core::models::{UpdateShoppingListItem, User};
use larder_core::service::LarderService;

use super::helpers::{fmt_quantity, json_error, truncate};

pub(crate) fn cmd_shopping_generate(
    svc: &LarderService,
    user: &User,
    plan_id: i64,
    name: Option<&str>,
    json: bool,
) -> Result<()> {
    let list = svc.generate_shopping_list(user.id, plan_id, name)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&list)?);
    } else {
        let items = svc.db().get_shopping_list_items(list.shopping_list_id)?;
        println!(
            "Generated shopping list: {} (id: {}, {} items)",
            list.name,
            list.shopping_list_id,
            items.len()
        );
    }
    Ok(())
}

pub(crate) fn cmd_shopping_list(svc: &LarderService, user: &User, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct ListRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Plan")]
        plan: String,
        #[tabled(rename = "Items")]
        items: i64,
        #[tabled(rename = "Created")]
        created: String,
    }

    let lists = svc.db().list_shopping_lists(user.id)?;
    if lists.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No shopping lists yet");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&lists)?);
        return Ok(());
    }

    let rows: Vec<ListRow> = lists
        .iter()
        .map(|l| ListRow {
            id: l.id,
            name: truncate(&l.name, 40),
            plan: l
                .meal_plan_id
                .map_or_else(|| "-".to_string(), |id| id.to_string()),
            items: l.item_count,
            created: l.created_at.get(..10).unwrap_or(&l.created_at).to_string(),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

pub(crate) fn cmd_shopping_show(
    svc: &LarderService,
    user: &User,
    list_id: i64,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct ItemRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "")]
        check: &'static str,
        #[tabled(rename = "Ingredient")]
        name: String,
        #[tabled(rename = "Qty")]
        quantity: String,
        #[tabled(rename = "Unit")]
        unit: String,
        #[tabled(rename = "In stock")]
        in_stock: String,
    }

    let detail = svc.db().get_shopping_list_detail(user.id, list_id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    println!("=== {} ===", detail.list.name);
    if detail.items.is_empty() {
        println!("  (empty)");
        return Ok(());
    }

    let rows: Vec<ItemRow> = detail
        .items
        .iter()
        .map(|i| ItemRow {
            id: i.id,
            check: if i.bought { "[x]" } else { "[ ]" },
            name: truncate(&i.ingredient_name, 30),
            quantity: fmt_quantity(i.quantity),
            unit: i.unit.clone(),
            in_stock: if i.in_stock_quantity > 0.0 {
                fmt_quantity(i.in_stock_quantity)
            } else {
                "-".to_string()
            },
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..4)).with(Alignment::right()))
        .with(Modify::new(Columns::new(5..6)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    let bought = detail.items.iter().filter(|i| i.bought).count();
    println!("  {bought}/{} bought", detail.items.len());
    Ok(())
}

pub(crate) fn cmd_shopping_check(
    svc: &LarderService,
    user: &User,
    list_id: i64,
    item_id: i64,
    undo: bool,
    json: bool,
) -> Result<()> {
    let item = svc.update_shopping_list_item(
        user.id,
        list_id,
        item_id,
        &UpdateShoppingListItem {
            bought: Some(!undo),
            in_stock_quantity: None,
        },
    )?;
    if json {
        println!("{}", serde_json::to_string_pretty(&item)?);
    } else if item.bought {
        println!("Checked off {}", item.ingredient_name);
    } else {
        println!("Unchecked {}", item.ingredient_name);
    }
    Ok(())
}

pub(crate) fn cmd_shopping_stock(
    svc: &LarderService,
    user: &User,
    list_id: i64,
    item_id: i64,
    quantity: f64,
    json: bool,
) -> Result<()> {
    let item = svc.update_shopping_list_item(
        user.id,
        list_id,
        item_id,
        &UpdateShoppingListItem {
            bought: None,
            in_stock_quantity: Some(quantity),
        },
    )?;
    if json {
        println!("{}", serde_json::to_string_pretty(&item)?);
    } else {
        println!(
            "{}: {} {} already in stock",
            item.ingredient_name,
            fmt_quantity(item.in_stock_quantity),
            item.unit
        );
    }
    Ok(())
}

pub(crate) fn cmd_shopping_export(
    svc: &LarderService,
    user: &User,
    list_id: i64,
    output: Option<&Path>,
    json: bool,
) -> Result<()> {
    let csv = svc.export_shopping_list_csv(user.id, list_id)?;
    match output {
        Some(path) => {
            std::fs::write(path, &csv)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "exported": list_id, "path": path.display().to_string() })
                );
            } else {
                println!("Exported shopping list {list_id} to {}", path.display());
            }
        }
        None if json => {
            println!("{}", json_error("--json needs --output when exporting CSV"));
            process::exit(2);
        }
        None => print!("{csv}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::models::{NewMealPlan, NewRecipe, NewRecipeIngredient};

    #[test]
    fn test_export_writes_csv_file() {
        let svc = LarderService::new_in_memory().unwrap();
        let user = svc.register("alice", "password123").unwrap();
        let gram = svc.db().get_unit_by_name("gram").unwrap().unwrap();
        let recipe = svc
            .create_recipe(
                user.id,
                &NewRecipe {
                    title: "Bread".to_string(),
                    description: None,
                    instructions: None,
                    servings: 1.0,
                    image_url: None,
                    ingredients: vec![NewRecipeIngredient {
                        ingredient_name: "Flour".to_string(),
                        quantity: 500.0,
                        unit_id: gram.id,
                    }],
                },
            )
            .unwrap();
        let plan = svc
            .create_meal_plan(
                user.id,
                &NewMealPlan {
                    name: "Week".to_string(),
                    start_date: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                    days: 7,
                },
            )
            .unwrap();
        svc.add_meal_plan_entry(user.id, plan.id, recipe.recipe.id, 0, Some(2.0))
            .unwrap();
        let list = svc.generate_shopping_list(user.id, plan.id, None).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.csv");
        cmd_shopping_export(&svc, &user, list.shopping_list_id, Some(&path), true).unwrap();

        let csv = std::fs::read_to_string(&path).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("ingredient,quantity,unit,bought,in_stock_quantity")
        );
        assert_eq!(lines.next(), Some("Flour,1.0,kilogram,false,0.0"));
        assert_eq!(lines.next(), None);
    }
}
