//! MCP Tools
//!
//! Declarative tool catalog and dispatch. Every handler is a thin adapter
//! over the router and module layer; handlers receive the session's
//! `UserContext` by parameter. Public tools are callable without one; every
//! other tool is rejected upstream with the authentication-required error
//! before dispatch reaches this module.

pub mod categories;
pub mod memory;
pub mod modules;
pub mod relationships;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use fedmem_core::{MemoryError, Result, UserContext};

use crate::state::AppState;

// ============================================================================
// CATALOG
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Callable without a `UserContext`.
    Public,
    /// Requires a resolved `UserContext`.
    Private,
}

pub struct ToolDef {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub visibility: Visibility,
    pub schema: fn() -> Value,
}

/// The static per-process tool catalog.
pub const CATALOG: &[ToolDef] = &[
    ToolDef {
        name: "storeMemory",
        title: "Store memory",
        description: "Store a new memory. Routed to a module automatically from metadata \
                      and content, or explicitly via moduleId.",
        visibility: Visibility::Private,
        schema: memory::store_schema,
    },
    ToolDef {
        name: "searchMemory",
        title: "Search memories",
        description: "Federated semantic search across all modules, or a single module via \
                      moduleId. Returns ranked hits with similarity scores.",
        visibility: Visibility::Private,
        schema: memory::search_schema,
    },
    ToolDef {
        name: "getMemory",
        title: "Get memory",
        description: "Fetch one memory by id; the owning module is resolved automatically.",
        visibility: Visibility::Private,
        schema: memory::get_schema,
    },
    ToolDef {
        name: "updateMemory",
        title: "Update memory",
        description: "Update a memory's content and/or metadata. Content changes re-embed; \
                      metadata-only changes do not. Never moves the memory between modules.",
        visibility: Visibility::Private,
        schema: memory::update_schema,
    },
    ToolDef {
        name: "deleteMemory",
        title: "Delete memory",
        description: "Delete a memory, its index entry, and its relationships. Idempotent.",
        visibility: Visibility::Private,
        schema: memory::delete_schema,
    },
    ToolDef {
        name: "listModules",
        title: "List modules",
        description: "List the registered memory modules and their descriptors.",
        visibility: Visibility::Public,
        schema: modules::list_schema,
    },
    ToolDef {
        name: "getModuleStats",
        title: "Module statistics",
        description: "Per-module statistics. With credentials: your own counts and activity. \
                      Without: global row counts only.",
        visibility: Visibility::Public,
        schema: modules::stats_schema,
    },
    ToolDef {
        name: "analyzeModule",
        title: "Analyze module",
        description: "Aggregate one module: category distribution, top keywords, and the \
                      module's metadata facets.",
        visibility: Visibility::Private,
        schema: modules::analyze_schema,
    },
    ToolDef {
        name: "classifyPreview",
        title: "Preview classification",
        description: "Run the pure write classifier on content and metadata without storing \
                      anything.",
        visibility: Visibility::Private,
        schema: modules::classify_schema,
    },
    ToolDef {
        name: "reindexMemories",
        title: "Rebuild memory index",
        description: "Idempotent integrity sweep: re-derive every central index entry from \
                      the module tables and drop orphans.",
        visibility: Visibility::Private,
        schema: modules::reindex_schema,
    },
    ToolDef {
        name: "createRelationship",
        title: "Create relationship",
        description: "Link two memories, possibly across modules. Both endpoints must exist.",
        visibility: Visibility::Private,
        schema: relationships::create_schema,
    },
    ToolDef {
        name: "listRelationships",
        title: "List relationships",
        description: "List the relationships incident to one memory.",
        visibility: Visibility::Private,
        schema: relationships::list_schema,
    },
    ToolDef {
        name: "registerCategory",
        title: "Register category",
        description: "Add or refresh a category in your vocabulary. Idempotent by name.",
        visibility: Visibility::Private,
        schema: categories::register_schema,
    },
    ToolDef {
        name: "listCategories",
        title: "List categories",
        description: "List your registered categories, sorted by name.",
        visibility: Visibility::Private,
        schema: categories::list_schema,
    },
    ToolDef {
        name: "removeCategory",
        title: "Remove category",
        description: "Remove a category from your vocabulary. Idempotent.",
        visibility: Visibility::Private,
        schema: categories::remove_schema,
    },
];

pub fn find(name: &str) -> Option<&'static ToolDef> {
    CATALOG.iter().find(|t| t.name == name)
}

// ============================================================================
// DISPATCH
// ============================================================================

/// Run a tool. Visibility gating has already happened; `user` is `Some` for
/// every private tool by the time dispatch runs.
pub async fn dispatch(
    state: &AppState,
    user: Option<&UserContext>,
    name: &str,
    arguments: Option<Value>,
    token: &CancellationToken,
) -> Result<Value> {
    match name {
        "storeMemory" => memory::execute_store(state, require(user)?, arguments, token).await,
        "searchMemory" => memory::execute_search(state, require(user)?, arguments, token).await,
        "getMemory" => memory::execute_get(state, require(user)?, arguments),
        "updateMemory" => memory::execute_update(state, require(user)?, arguments, token).await,
        "deleteMemory" => memory::execute_delete(state, require(user)?, arguments),
        "listModules" => modules::execute_list(state),
        "getModuleStats" => modules::execute_stats(state, user, arguments),
        "analyzeModule" => modules::execute_analyze(state, require(user)?, arguments),
        "classifyPreview" => modules::execute_classify(state, require(user)?, arguments),
        "reindexMemories" => modules::execute_reindex(state, require(user)?),
        "createRelationship" => {
            relationships::execute_create(state, require(user)?, arguments)
        }
        "listRelationships" => relationships::execute_list(state, require(user)?, arguments),
        "registerCategory" => categories::execute_register(state, require(user)?, arguments),
        "listCategories" => categories::execute_list(state, require(user)?),
        "removeCategory" => categories::execute_remove(state, require(user)?, arguments),
        other => Err(MemoryError::InvalidArgument(format!("unknown tool: {other}"))),
    }
}

fn require<'a>(user: Option<&'a UserContext>) -> Result<&'a UserContext> {
    user.ok_or(MemoryError::AuthenticationRequired)
}

/// Deserialize tool arguments, mapping schema violations to
/// `InvalidArgument` so they surface as `-32602`.
pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(arguments: Option<Value>) -> Result<T> {
    let value = arguments.unwrap_or(Value::Object(Default::default()));
    serde_json::from_value(value)
        .map_err(|e| MemoryError::InvalidArgument(format!("invalid arguments: {e}")))
}
