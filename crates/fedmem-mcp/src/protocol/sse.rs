//! Token-in-URL SSE transport.
//!
//! The URL path carries the user's opaque token:
//! - GET /{token}/sse — authenticate, open the session event stream. The
//!   first event names the per-session message endpoint; keep-alive comments
//!   flow every ≤ 30 s.
//! - POST /{token}/messages?sessionId=… — enqueue one JSON-RPC request and
//!   return an empty 200 immediately; the response is emitted on the stream.
//!
//! Requests are processed by the session's FIFO worker, so responses keep
//! request order. Keep-alives may be dropped under backpressure; real
//! responses never are — a writer blocked past the threshold closes the
//! session. OAuth discovery is not served on this transport.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{sse::Event, sse::KeepAlive, IntoResponse, Response, Sse},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use fedmem_core::Credential;

use super::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::session::SessionManager;
use crate::state::AppState;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(25);

/// Outbound stream buffer per session.
const STREAM_BUFFER: usize = 64;

#[derive(Clone)]
pub struct SseState {
    pub app: Arc<AppState>,
    pub sessions: Arc<SessionManager>,
}

/// Build the token-in-URL router. No OAuth discovery here.
pub fn router(app: Arc<AppState>, sessions: Arc<SessionManager>) -> Router {
    let state = SseState { app, sessions };
    Router::new()
        .route("/{token}/sse", get(handle_sse))
        .route("/{token}/messages", post(handle_message))
        .with_state(state)
}

/// Closes the session when the client's stream goes away.
struct CloseOnDrop {
    sessions: Arc<SessionManager>,
    session_id: String,
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        let sessions = self.sessions.clone();
        let session_id = self.session_id.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if sessions.close(&session_id).await {
                    info!(session_id = %session_id, "session closed on disconnect");
                }
            });
        }
    }
}

/// GET /{token}/sse — open the event stream.
async fn handle_sse(State(state): State<SseState>, Path(token): Path<String>) -> Response {
    let user = match state.app.auth.resolve(Credential::UrlToken(&token)).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return (StatusCode::UNAUTHORIZED, "Unknown or inactive token").into_response()
        }
        Err(e) => {
            warn!(error = %e, "token resolution failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Auth lookup failed").into_response();
        }
    };

    let (out_tx, out_rx) = mpsc::channel::<String>(STREAM_BUFFER);
    let session = state.sessions.create(Some(user), Some(out_tx)).await;

    let endpoint = format!("/{token}/messages?sessionId={}", session.id);
    let first = futures::stream::once(async move {
        Ok::<_, Infallible>(Event::default().event("endpoint").data(endpoint))
    });

    struct StreamState {
        rx: mpsc::Receiver<String>,
        _guard: CloseOnDrop,
    }
    let rest = futures::stream::unfold(
        StreamState {
            rx: out_rx,
            _guard: CloseOnDrop {
                sessions: state.sessions.clone(),
                session_id: session.id.clone(),
            },
        },
        |mut stream_state| async move {
            stream_state.rx.recv().await.map(|payload| {
                (
                    Ok::<_, Infallible>(Event::default().event("message").data(payload)),
                    stream_state,
                )
            })
        },
    );

    Sse::new(futures::StreamExt::chain(first, rest))
        .keep_alive(
            KeepAlive::new()
                .interval(KEEP_ALIVE_INTERVAL)
                .text("keep-alive"),
        )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// POST /{token}/messages — enqueue a request; empty 200 immediately.
async fn handle_message(
    State(state): State<SseState>,
    Path(token): Path<String>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> Response {
    let user = match state.app.auth.resolve(Credential::UrlToken(&token)).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return (StatusCode::UNAUTHORIZED, "Unknown or inactive token").into_response()
        }
        Err(e) => {
            warn!(error = %e, "token resolution failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Auth lookup failed").into_response();
        }
    };

    let Some(session_id) = query.session_id else {
        return (StatusCode::BAD_REQUEST, "Missing sessionId").into_response();
    };
    let Some(session) = state.sessions.get(&session_id).await else {
        return (StatusCode::NOT_FOUND, "Session not found").into_response();
    };

    // The session must belong to the token's user.
    match session.user().await {
        Some(owner) if owner.user_id == user.user_id => {}
        _ => return (StatusCode::FORBIDDEN, "Session owner mismatch").into_response(),
    }

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

    if !session.enqueue(request).await {
        return (StatusCode::CONFLICT, "Session is closed").into_response();
    }

    // The JSON-RPC response arrives on the SSE channel.
    StatusCode::OK.into_response()
}

// ============================================================================
// TESTS
// ============================================================================
