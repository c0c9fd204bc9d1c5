//! Delete cascade journeys: row, index entry, and relationships all go; the
//! other endpoint survives; the system returns to its prior shape.

use fedmem_core::NewRelationship;
use fedmem_e2e_tests::harness::{token, TestStack};
use serde_json::json;

#[tokio::test]
async fn delete_removes_row_index_entry_and_relationships() {
    let stack = TestStack::new();
    let user = stack.user("ada");

    let m = stack
        .state
        .router
        .store(&user.user_id, "memory m about deploys", None, Some("technical"), &token())
        .await
        .unwrap();
    let n = stack
        .state
        .router
        .store(&user.user_id, "memory n about standups", None, Some("work"), &token())
        .await
        .unwrap();

    stack
        .state
        .router
        .create_relationship(
            &user.user_id,
            NewRelationship {
                source_module: "technical".to_string(),
                source_memory_id: m.memory_id.clone(),
                target_module: "work".to_string(),
                target_memory_id: n.memory_id.clone(),
                relationship_type: "references".to_string(),
                strength: 0.7,
                metadata: json!({}),
            },
        )
        .unwrap();
    assert_eq!(stack.state.relationships.count(&user.user_id).unwrap(), 1);

    assert!(stack.state.router.delete(&user.user_id, &m.memory_id).unwrap());

    // M is gone everywhere.
    assert!(stack.state.router.get(&user.user_id, &m.memory_id).unwrap().is_none());
    assert!(stack
        .state
        .cmi
        .get_entry(&user.user_id, "technical", &m.memory_id)
        .unwrap()
        .is_none());
    assert_eq!(stack.state.relationships.count(&user.user_id).unwrap(), 0);

    // N and its index entry are untouched.
    assert!(stack.state.router.get(&user.user_id, &n.memory_id).unwrap().is_some());
    assert!(stack
        .state
        .cmi
        .get_entry(&user.user_id, "work", &n.memory_id)
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn repeated_delete_is_a_noop_success() {
    let stack = TestStack::new();
    let user = stack.user("bee");
    let m = stack
        .state
        .router
        .store(&user.user_id, "short-lived", None, Some("personal"), &token())
        .await
        .unwrap();

    assert!(stack.state.router.delete(&user.user_id, &m.memory_id).unwrap());
    assert!(!stack.state.router.delete(&user.user_id, &m.memory_id).unwrap());
    assert!(!stack.state.router.delete(&user.user_id, "never-existed").unwrap());
}

#[tokio::test]
async fn store_then_delete_restores_prior_state() {
    let stack = TestStack::new();
    let user = stack.user("law");

    let rows_before: i64 = stack
        .state
        .registry
        .list()
        .iter()
        .map(|m| m.count(Some(&user.user_id)).unwrap())
        .sum();
    let index_before = stack.state.cmi.count(Some(&user.user_id)).unwrap();

    let m = stack
        .state
        .router
        .store(&user.user_id, "transient thought", None, None, &token())
        .await
        .unwrap();
    stack.state.router.delete(&user.user_id, &m.memory_id).unwrap();

    let rows_after: i64 = stack
        .state
        .registry
        .list()
        .iter()
        .map(|m| m.count(Some(&user.user_id)).unwrap())
        .sum();
    assert_eq!(rows_before, rows_after);
    assert_eq!(
        index_before,
        stack.state.cmi.count(Some(&user.user_id)).unwrap()
    );
}

#[tokio::test]
async fn get_after_delete_reports_not_found_at_the_tool_layer() {
    use fedmem_mcp::tools;

    let stack = TestStack::new();
    let user = stack.user("tool");
    let m = stack
        .state
        .router
        .store(&user.user_id, "soon gone", None, Some("work"), &token())
        .await
        .unwrap();
    stack.state.router.delete(&user.user_id, &m.memory_id).unwrap();

    let err = tools::dispatch(
        &stack.state,
        Some(&user),
        "getMemory",
        Some(json!({"memoryId": m.memory_id})),
        &token(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "NotFound");
}
