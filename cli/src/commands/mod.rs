mod collection;
mod helpers;
mod plan;
mod recipe;
mod shopping;
mod unit;
mod user;

use anyhow::Result;

use larder_core::models::Recipe;
use larder_core::service::LarderService;

pub(crate) use collection::{
    cmd_collection_add, cmd_collection_create, cmd_collection_delete, cmd_collection_list,
    cmd_collection_remove, cmd_collection_show,
};
pub(crate) use plan::{
    cmd_plan_add, cmd_plan_create, cmd_plan_delete, cmd_plan_list, cmd_plan_remove, cmd_plan_show,
};
pub(crate) use recipe::{
    cmd_recipe_add_ingredient, cmd_recipe_create, cmd_recipe_delete, cmd_recipe_import,
    cmd_recipe_list, cmd_recipe_remove_ingredient, cmd_recipe_show,
};
pub(crate) use shopping::{
    cmd_shopping_check, cmd_shopping_export, cmd_shopping_generate, cmd_shopping_list,
    cmd_shopping_show, cmd_shopping_stock,
};
pub(crate) use unit::{cmd_unit_add, cmd_unit_list};
pub(crate) use user::{cmd_user_login, cmd_user_register};

/// Resolve a recipe given either its numeric ID or its title.
pub(super) fn resolve_recipe(svc: &LarderService, user_id: i64, reference: &str) -> Result<Recipe> {
    match reference.trim().parse::<i64>() {
        Ok(id) => svc.db().get_recipe(user_id, id),
        Err(_) => svc.db().get_recipe_by_title(user_id, reference.trim()),
    }
}
