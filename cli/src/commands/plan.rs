use anyhow::Result;
use std::process;
use tabled::{Table, Tabled, settings::Style};

use larder_core::models::{NewMealPlan, User};
use larder_core::service::LarderService;

use super::helpers::{fmt_quantity, json_error, parse_date, truncate};
use super::resolve_recipe;

pub(crate) fn cmd_plan_create(
    svc: &LarderService,
    user: &User,
    name: &str,
    start: Option<String>,
    days: i64,
    json: bool,
) -> Result<()> {
    let start_date = parse_date(start)?;
    let plan = svc.create_meal_plan(
        user.id,
        &NewMealPlan {
            name: name.to_string(),
            start_date,
            days,
        },
    )?;
    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        println!(
            "Created meal plan: {} (id: {}, {} days from {})",
            plan.name, plan.id, plan.days, plan.start_date
        );
    }
    Ok(())
}

pub(crate) fn cmd_plan_add(
    svc: &LarderService,
    user: &User,
    plan_id: i64,
    recipe_ref: &str,
    day: i64,
    quantity: Option<f64>,
    json: bool,
) -> Result<()> {
    let recipe = resolve_recipe(svc, user.id, recipe_ref)?;
    let entry = svc.add_meal_plan_entry(user.id, plan_id, recipe.id, day, quantity)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    } else {
        println!(
            "Planned {} x{} on day {} (entry id: {})",
            entry.recipe_title,
            fmt_quantity(entry.quantity),
            entry.day,
            entry.id
        );
    }
    Ok(())
}

pub(crate) fn cmd_plan_remove(
    svc: &LarderService,
    user: &User,
    plan_id: i64,
    entry_id: i64,
    json: bool,
) -> Result<()> {
    if svc
        .db()
        .remove_meal_plan_entry(user.id, plan_id, entry_id)?
    {
        if json {
            println!("{}", serde_json::json!({ "removed": entry_id }));
        } else {
            println!("Removed entry {entry_id} from meal plan {plan_id}");
        }
    } else {
        if json {
            println!("{}", json_error("Meal plan entry not found"));
        } else {
            eprintln!("Entry {entry_id} not found in meal plan {plan_id}");
        }
        process::exit(2);
    }
    Ok(())
}

pub(crate) fn cmd_plan_show(
    svc: &LarderService,
    user: &User,
    plan_id: i64,
    json: bool,
) -> Result<()> {
    let detail = svc.db().get_meal_plan_detail(user.id, plan_id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    println!("=== {} ===", detail.plan.name);
    for day in &detail.schedule {
        println!("\n  Day {} ({}):", day.day, day.date);
        if day.entries.is_empty() {
            println!("    -");
        }
        for e in &day.entries {
            println!(
                "    [{}] {} x{}",
                e.id,
                e.recipe_title,
                fmt_quantity(e.quantity)
            );
        }
    }
    Ok(())
}

pub(crate) fn cmd_plan_list(svc: &LarderService, user: &User, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct PlanRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Start")]
        start: String,
        #[tabled(rename = "Days")]
        days: i64,
    }

    let plans = svc.db().list_meal_plans(user.id)?;
    if plans.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No meal plans yet");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&plans)?);
        return Ok(());
    }

    let rows: Vec<PlanRow> = plans
        .iter()
        .map(|p| PlanRow {
            id: p.id,
            name: truncate(&p.name, 30),
            start: p.start_date.clone(),
            days: p.days,
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

pub(crate) fn cmd_plan_delete(
    svc: &LarderService,
    user: &User,
    plan_id: i64,
    json: bool,
) -> Result<()> {
    if svc.db().delete_meal_plan(user.id, plan_id)? {
        if json {
            println!("{}", serde_json::json!({ "deleted": plan_id }));
        } else {
            println!("Deleted meal plan {plan_id}");
        }
    } else {
        if json {
            println!("{}", json_error("Meal plan not found"));
        } else {
            eprintln!("Meal plan {plan_id} not found");
        }
        process::exit(2);
    }
    Ok(())
}
