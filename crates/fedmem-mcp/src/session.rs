//! Session management.
//!
//! One session per connected client, keyed by session id. Within a session,
//! requests are strictly serialized — the SSE transport routes them through a
//! per-session FIFO worker so responses leave in request order; the
//! streamable HTTP transport serializes on the per-session server lock.
//! Closing a session (DELETE, disconnect, idle sweep) cancels in-flight work
//! cooperatively through the session's token.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use fedmem_core::UserContext;

use crate::protocol::types::{JsonRpcRequest, JsonRpcResponse};
use crate::server::McpServer;
use crate::state::AppState;

/// Outbound queue bound for SSE sessions.
const OUTBOUND_BUFFER: usize = 64;

/// How long a blocked writer may hold up a real response before the session
/// is closed. Keep-alives are never queued, so they cannot block anything.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// One live session.
pub struct Session {
    pub id: String,
    pub cancel: CancellationToken,
    server: Arc<tokio::sync::Mutex<McpServer>>,
    /// FIFO inbound queue; present only on queue-driven (SSE) sessions.
    inbound: Option<mpsc::Sender<JsonRpcRequest>>,
    last_activity: std::sync::Mutex<Instant>,
}

impl Session {
    pub fn touch(&self) {
        if let Ok(mut at) = self.last_activity.lock() {
            *at = Instant::now();
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .map(|at| at.elapsed())
            .unwrap_or_default()
    }

    pub async fn user(&self) -> Option<UserContext> {
        self.server.lock().await.user().cloned()
    }

    /// Serialize and run one request, returning the response inline.
    /// Requests on the same session queue on the server lock.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        self.touch();
        let mut server = self.server.lock().await;
        server.handle_request(request).await
    }

    /// Enqueue a request for the FIFO worker. The response surfaces on the
    /// session's event stream.
    pub async fn enqueue(&self, request: JsonRpcRequest) -> bool {
        self.touch();
        match &self.inbound {
            Some(tx) => tx.send(request).await.is_ok(),
            None => false,
        }
    }
}

pub struct SessionManager {
    state: Arc<AppState>,
    sessions: tokio::sync::Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(state: Arc<AppState>) -> Arc<Self> {
        Arc::new(Self {
            state,
            sessions: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Create a session bound to an optional user context.
    ///
    /// With `outbound`, the session runs a FIFO worker: inbound requests are
    /// processed one at a time and responses are pushed onto the channel in
    /// request order. A writer blocked past [`SEND_TIMEOUT`] closes the
    /// session — responses are never dropped.
    pub async fn create(
        self: &Arc<Self>,
        user: Option<UserContext>,
        outbound: Option<mpsc::Sender<String>>,
    ) -> Arc<Session> {
        let id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let server = Arc::new(tokio::sync::Mutex::new(McpServer::new(
            self.state.clone(),
            user,
            cancel.child_token(),
        )));

        let inbound = match outbound {
            Some(out_tx) => {
                let (in_tx, in_rx) = mpsc::channel::<JsonRpcRequest>(OUTBOUND_BUFFER);
                self.spawn_worker(id.clone(), server.clone(), cancel.clone(), in_rx, out_tx);
                Some(in_tx)
            }
            None => None,
        };

        let session = Arc::new(Session {
            id: id.clone(),
            cancel,
            server,
            inbound,
            last_activity: std::sync::Mutex::new(Instant::now()),
        });
        self.sessions.lock().await.insert(id.clone(), session.clone());
        info!(session_id = %id, "session created");
        session
    }

    fn spawn_worker(
        self: &Arc<Self>,
        session_id: String,
        server: Arc<tokio::sync::Mutex<McpServer>>,
        cancel: CancellationToken,
        mut inbound: mpsc::Receiver<JsonRpcRequest>,
        outbound: mpsc::Sender<String>,
    ) {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let request = tokio::select! {
                    _ = cancel.cancelled() => break,
                    request = inbound.recv() => match request {
                        Some(request) => request,
                        None => break,
                    },
                };

                let response = {
                    let mut server = server.lock().await;
                    server.handle_request(request).await
                };
                let Some(response) = response else { continue };

                let payload = match serde_json::to_string(&response) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "response serialization failed");
                        continue;
                    }
                };

                // A real response must reach the client; if the writer is
                // stuck past the threshold, close the session instead of
                // dropping it.
                match tokio::time::timeout(SEND_TIMEOUT, outbound.send(payload)).await {
                    Ok(Ok(())) => {}
                    _ => {
                        warn!(session_id = %session_id, "outbound writer blocked; closing session");
                        if let Some(manager) = manager.upgrade() {
                            manager.close(&session_id).await;
                        } else {
                            cancel.cancel();
                        }
                        break;
                    }
                }
            }
        });
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(id).cloned()
    }

    /// Close and remove a session, cancelling in-flight work.
    pub async fn close(&self, id: &str) -> bool {
        let session = self.sessions.lock().await.remove(id);
        match session {
            Some(session) => {
                session.cancel.cancel();
                let mut server = session.server.lock().await;
                server.close();
                info!(session_id = %id, "session closed");
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Background sweep closing sessions idle past the configured timeout.
    pub fn spawn_idle_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        let idle_timeout = manager.state.config.session_idle_timeout;
        tokio::spawn(async move {
            let period = (idle_timeout / 4).max(Duration::from_secs(5));
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let idle: Vec<String> = {
                    let sessions = manager.sessions.lock().await;
                    sessions
                        .values()
                        .filter(|s| s.idle_for() > idle_timeout)
                        .map(|s| s.id.clone())
                        .collect()
                };
                for id in idle {
                    info!(session_id = %id, "closing idle session");
                    manager.close(&id).await;
                }
            }
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
