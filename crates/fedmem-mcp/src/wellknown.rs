//! Well-known discovery endpoints.
//!
//! `/.well-known/oauth-protected-resource` describes the auth surface for
//! streamable-HTTP clients; `/sse/info` names the server and its transports.
//! Token-in-URL sessions get neither — that router simply has no such routes.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::protocol::http::HttpState;
use crate::protocol::messages::{SERVER_NAME, SERVER_VERSION};

pub async fn oauth_protected_resource(State(state): State<HttpState>) -> Json<Value> {
    let base = &state.app.config.base_url;
    Json(json!({
        "resource": base,
        "authorization_servers": [base],
        "bearer_methods_supported": ["header"],
        "resource_documentation": format!("{base}/sse/info"),
    }))
}

pub async fn sse_info(State(state): State<HttpState>) -> Json<Value> {
    let base = &state.app.config.base_url;
    Json(json!({
        "name": SERVER_NAME,
        "version": SERVER_VERSION,
        "transports": ["streamable-http", "sse"],
        "authentication": {
            "methods": ["bearer", "url-token"],
            "oauth_discovery": format!("{base}/.well-known/oauth-protected-resource"),
        },
    }))
}
