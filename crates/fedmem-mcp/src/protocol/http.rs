//! Streamable HTTP transport.
//!
//! Endpoints:
//! - POST /mcp — JSON-RPC request → JSON or single-event SSE response
//! - GET /mcp — standalone event stream (keep-alive comments ≤ 30 s)
//! - DELETE /mcp — terminate session
//!
//! The session id is issued on the first POST and carried in the
//! `mcp-session-id` header. An authentication-required response additionally
//! sets `WWW-Authenticate` on the outer HTTP response.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{sse::Event, sse::KeepAlive, IntoResponse, Response, Sse},
    routing::{delete, get, post},
    Router,
};
use futures::stream;
use tracing::warn;

use fedmem_core::Credential;

use super::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use super::SESSION_ID_HEADER;
use crate::session::{Session, SessionManager};
use crate::state::AppState;
use crate::wellknown;

/// Keep-alive cadence; the wire contract demands ≤ 30 s.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(25);

#[derive(Clone)]
pub struct HttpState {
    pub app: Arc<AppState>,
    pub sessions: Arc<SessionManager>,
}

/// Build the streamable-HTTP router, including the well-known endpoints.
pub fn router(app: Arc<AppState>, sessions: Arc<SessionManager>) -> Router {
    let state = HttpState { app, sessions };
    Router::new()
        .route("/mcp", post(handle_post))
        .route("/mcp", get(handle_get))
        .route("/mcp", delete(handle_delete))
        .route(
            "/.well-known/oauth-protected-resource",
            get(wellknown::oauth_protected_resource),
        )
        .route("/sse/info", get(wellknown::sse_info))
        .with_state(state)
}

async fn existing_session(state: &HttpState, headers: &HeaderMap) -> Option<Arc<Session>> {
    let id = headers.get(SESSION_ID_HEADER)?.to_str().ok()?;
    state.sessions.get(id).await
}

/// Get the session named in the headers, or create one bound to whatever
/// principal the Authorization header resolves to.
async fn get_or_create_session(state: &HttpState, headers: &HeaderMap) -> Arc<Session> {
    if let Some(session) = existing_session(state, headers).await {
        return session;
    }

    let user = match bearer(headers) {
        Some(token) => match state.app.auth.resolve(Credential::Bearer(token)).await {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "credential resolution failed; treating as unauthenticated");
                None
            }
        },
        None => None,
    };
    state.sessions.create(user, None).await
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// POST /mcp — handle one JSON-RPC request.
async fn handle_post(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "failed to parse JSON-RPC request");
            let error = JsonRpcResponse::error(None, JsonRpcError::parse_error());
            return (
                StatusCode::BAD_REQUEST,
                [(header::CONTENT_TYPE, "application/json")],
                serde_json::to_string(&error).unwrap_or_default(),
            )
                .into_response();
        }
    };

    let session = get_or_create_session(&state, &headers).await;
    let response = session.handle(request).await;

    let Some(response) = response else {
        // Notification — no body.
        let mut http = StatusCode::ACCEPTED.into_response();
        set_session_header(&mut http, &session.id);
        return http;
    };

    let needs_auth = response.needs_auth();
    let payload = serde_json::to_string(&response).unwrap_or_else(|e| {
        warn!(error = %e, "failed to serialize response");
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#
            .to_string()
    });

    let accepts_sse = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"));

    let mut http = if accepts_sse {
        let event = Event::default().data(&payload);
        let body = stream::once(async move { Ok::<_, Infallible>(event) });
        Sse::new(body).into_response()
    } else {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            payload,
        )
            .into_response()
    };

    set_session_header(&mut http, &session.id);
    if needs_auth {
        let challenge = format!(
            "Bearer realm=\"{base}\", resource_metadata=\"{base}/.well-known/oauth-protected-resource\"",
            base = state.app.config.base_url
        );
        if let Ok(value) = HeaderValue::from_str(&challenge) {
            http.headers_mut().insert(header::WWW_AUTHENTICATE, value);
        }
    }
    http
}

/// GET /mcp — standalone event stream for server notifications. Stays open
/// with keep-alive comments.
async fn handle_get(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    match existing_session(&state, &headers).await {
        Some(session) => {
            session.touch();
            let body = stream::pending::<Result<Event, Infallible>>();
            let mut http = Sse::new(body)
                .keep_alive(
                    KeepAlive::new()
                        .interval(KEEP_ALIVE_INTERVAL)
                        .text("keep-alive"),
                )
                .into_response();
            set_session_header(&mut http, &session.id);
            http
        }
        None => (
            StatusCode::NOT_FOUND,
            "No active session. Send POST /mcp first.",
        )
            .into_response(),
    }
}

/// DELETE /mcp — terminate the session.
async fn handle_delete(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    let Some(id) = headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        return (StatusCode::BAD_REQUEST, "Missing mcp-session-id header").into_response();
    };
    if state.sessions.close(id).await {
        StatusCode::OK.into_response()
    } else {
        (StatusCode::NOT_FOUND, "Session not found").into_response()
    }
}

fn set_session_header(response: &mut Response, session_id: &str) {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_ID_HEADER, value);
    }
}

// ============================================================================
// TESTS
// ============================================================================
