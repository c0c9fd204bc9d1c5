//! Category registry tools.

use serde::Deserialize;
use serde_json::{json, Value};

use fedmem_core::{Result, UserContext};

use super::parse_args;
use crate::state::AppState;

pub fn register_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": {"type": "string"},
            "description": {"type": "string"},
            "icon": {"type": "string"},
            "parent": {"type": "string"}
        },
        "required": ["name"]
    })
}

pub fn list_schema() -> Value {
    json!({
        "type": "object",
        "properties": {}
    })
}

pub fn remove_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": {"type": "string"}
        },
        "required": ["name"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RegisterArgs {
    name: String,
    description: Option<String>,
    icon: Option<String>,
    parent: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RemoveArgs {
    name: String,
}

pub fn execute_register(
    state: &AppState,
    user: &UserContext,
    arguments: Option<Value>,
) -> Result<Value> {
    let args: RegisterArgs = parse_args(arguments)?;
    let record = state.categories.register(
        &user.user_id,
        &args.name,
        args.description.as_deref(),
        args.icon.as_deref(),
        args.parent.as_deref(),
    )?;
    serde_json::to_value(record).map_err(Into::into)
}

pub fn execute_list(state: &AppState, user: &UserContext) -> Result<Value> {
    let categories = state.categories.list(&user.user_id)?;
    Ok(json!({
        "total": categories.len(),
        "categories": categories,
    }))
}

pub fn execute_remove(
    state: &AppState,
    user: &UserContext,
    arguments: Option<Value>,
) -> Result<Value> {
    let args: RemoveArgs = parse_args(arguments)?;
    let removed = state.categories.remove(&user.user_id, &args.name)?;
    Ok(json!({
        "name": args.name,
        "removed": removed,
    }))
}
