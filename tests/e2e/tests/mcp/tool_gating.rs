//! Unauthenticated tool gating over the real transports: public tools
//! answer, private tools return `-32001` with the `WWW-Authenticate`
//! challenge, and a URL-token session reaches private tools.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use fedmem_e2e_tests::harness::TestStack;
use fedmem_mcp::protocol::{http, sse, SESSION_ID_HEADER};
use serde_json::{json, Value};
use tower::ServiceExt;

fn rpc(id: i64, method: &str, params: Value) -> String {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}).to_string()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn anonymous_session_public_ok_private_rejected() {
    let stack = TestStack::new();
    let router = http::router(stack.state.clone(), stack.sessions.clone());

    // initialize without credentials
    let init = router
        .clone()
        .oneshot(
            Request::post("/mcp")
                .body(Body::from(rpc(1, "initialize", json!({}))))
                .unwrap(),
        )
        .await
        .unwrap();
    let session_id = init.headers()[SESSION_ID_HEADER].to_str().unwrap().to_string();

    // Public tool succeeds.
    let response = router
        .clone()
        .oneshot(
            Request::post("/mcp")
                .header(SESSION_ID_HEADER, &session_id)
                .body(Body::from(rpc(
                    2,
                    "tools/call",
                    json!({"name": "listModules", "arguments": {}}),
                )))
                .unwrap(),
        )
        .await
        .unwrap();
    let payload = body_json(response).await;
    assert!(payload["error"].is_null(), "listModules failed: {payload}");

    // getModuleStats also succeeds, in global scope.
    let response = router
        .clone()
        .oneshot(
            Request::post("/mcp")
                .header(SESSION_ID_HEADER, &session_id)
                .body(Body::from(rpc(
                    3,
                    "tools/call",
                    json!({"name": "getModuleStats", "arguments": {}}),
                )))
                .unwrap(),
        )
        .await
        .unwrap();
    let payload = body_json(response).await;
    let text = payload["result"]["content"][0]["text"].as_str().unwrap();
    let stats: Value = serde_json::from_str(text).unwrap();
    assert_eq!(stats["scope"], "global");

    // Private tool: -32001 + WWW-Authenticate on the HTTP response.
    let response = router
        .oneshot(
            Request::post("/mcp")
                .header(SESSION_ID_HEADER, &session_id)
                .body(Body::from(rpc(
                    4,
                    "tools/call",
                    json!({"name": "searchMemory", "arguments": {"query": "anything"}}),
                )))
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    let payload = body_json(response).await;
    assert_eq!(payload["error"]["code"], -32001);
    assert_eq!(payload["error"]["data"]["kind"], "AuthenticationRequired");
}

#[tokio::test]
async fn url_token_session_runs_private_tools() {
    let stack = TestStack::new();
    let (_user, opaque_token) = stack.user_with_token("carol");
    let router = sse::router(stack.state.clone(), stack.sessions.clone());

    // Stand the session up the way the SSE GET handler does, then drive the
    // message endpoint.
    let (out_tx, mut out_rx) = tokio::sync::mpsc::channel::<String>(64);
    let user_ctx = stack
        .state
        .auth
        .resolve(fedmem_core::Credential::UrlToken(&opaque_token))
        .await
        .unwrap()
        .expect("token resolves");
    let session = stack.sessions.create(Some(user_ctx), Some(out_tx)).await;
    let endpoint = format!("/{opaque_token}/messages?sessionId={}", session.id);

    for (id, method, params) in [
        (1, "initialize", json!({})),
        (
            2,
            "tools/call",
            json!({"name": "storeMemory", "arguments": {"content": "Handling CORS in Express"}}),
        ),
        (
            3,
            "tools/call",
            json!({"name": "searchMemory", "arguments": {"query": "CORS", "limit": 3}}),
        ),
    ] {
        let response = router
            .clone()
            .oneshot(
                Request::post(&endpoint)
                    .body(Body::from(rpc(id, method, params)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // Responses come back on the stream, in request order.
    let mut responses = Vec::new();
    for _ in 0..3 {
        let payload = tokio::time::timeout(std::time::Duration::from_secs(5), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        responses.push(serde_json::from_str::<Value>(&payload).unwrap());
    }
    assert_eq!(responses[0]["id"], 1);
    assert_eq!(responses[1]["id"], 2);
    assert_eq!(responses[2]["id"], 3);

    let search_text = responses[2]["result"]["content"][0]["text"].as_str().unwrap();
    let search: Value = serde_json::from_str(search_text).unwrap();
    assert!(search["total"].as_u64().unwrap() >= 1);
    assert_eq!(search["results"][0]["moduleId"], "technical");
}

#[tokio::test]
async fn per_user_stats_require_the_user_context() {
    let stack = TestStack::new();
    let user = stack.user("dana");
    let anon_router = http::router(stack.state.clone(), stack.sessions.clone());

    stack
        .state
        .router
        .store(
            &user.user_id,
            "Meeting about CORS policy",
            None,
            Some("work"),
            &fedmem_e2e_tests::harness::token(),
        )
        .await
        .unwrap();

    let init = anon_router
        .clone()
        .oneshot(
            Request::post("/mcp")
                .body(Body::from(rpc(1, "initialize", json!({}))))
                .unwrap(),
        )
        .await
        .unwrap();
    let session_id = init.headers()[SESSION_ID_HEADER].to_str().unwrap().to_string();

    let response = anon_router
        .oneshot(
            Request::post("/mcp")
                .header(SESSION_ID_HEADER, &session_id)
                .body(Body::from(rpc(
                    2,
                    "tools/call",
                    json!({"name": "getModuleStats", "arguments": {"moduleId": "work"}}),
                )))
                .unwrap(),
        )
        .await
        .unwrap();
    let payload = body_json(response).await;
    let stats: Value =
        serde_json::from_str(payload["result"]["content"][0]["text"].as_str().unwrap()).unwrap();
    // Global scope exposes counts only — no per-user activity fields.
    assert_eq!(stats["scope"], "global");
    assert!(stats["modules"][0].get("totalAccesses").is_none());
}
