mod category;
mod helpers;
mod import;
mod meal;
mod plan;

pub(crate) use category::{
    cmd_category_add, cmd_category_list, cmd_category_remove, cmd_value_add, cmd_value_list,
    cmd_value_remove,
};
pub(crate) use import::{cmd_export, cmd_import_catalog};
pub(crate) use meal::{
    cmd_meal_add, cmd_meal_attach, cmd_meal_list, cmd_meal_remove, cmd_meal_set, cmd_meal_show,
    cmd_meal_unset,
};
pub(crate) use plan::{cmd_history, cmd_plan_clear, cmd_plan_set, cmd_plan_show, cmd_suggest};
