//! Write classification journeys: metadata-driven routing, content-driven
//! routing, and retrieval of the routed memory.

use fedmem_e2e_tests::harness::{token, TestStack};
use fedmem_core::SearchRequest;
use serde_json::json;

#[tokio::test]
async fn metadata_routes_to_work_and_indexes_it() {
    let stack = TestStack::new();
    let user = stack.user("ada");

    let outcome = stack
        .state
        .router
        .store(
            &user.user_id,
            "Atlas kickoff notes",
            Some(json!({"type": "project", "projectName": "Atlas"})),
            None,
            &token(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.module_id, "work");

    // Exactly one index entry, carrying the module as default category.
    let entry = stack
        .state
        .cmi
        .get_entry(&user.user_id, "work", &outcome.memory_id)
        .unwrap()
        .expect("index entry");
    assert!(entry.categories.contains(&"work".to_string()));
    assert_eq!(stack.state.cmi.count(Some(&user.user_id)).unwrap(), 1);

    // And the memory is findable with meaningful similarity.
    let hits = stack
        .state
        .router
        .search(
            &user.user_id,
            "Atlas",
            SearchRequest {
                limit: 3,
                ..Default::default()
            },
            &token(),
        )
        .await
        .unwrap();
    assert_eq!(hits[0].id, outcome.memory_id);
    assert!(hits[0].similarity >= 0.5, "similarity {}", hits[0].similarity);
}

#[tokio::test]
async fn content_routes_to_personal_not_work() {
    let stack = TestStack::new();
    let user = stack.user("bee");

    let outcome = stack
        .state
        .router
        .store(
            &user.user_id,
            "Today I went hiking with my sister",
            Some(json!({})),
            None,
            &token(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.module_id, "personal");

    let work = stack.state.registry.get("work").unwrap();
    assert_eq!(work.count(Some(&user.user_id)).unwrap(), 0);
    let personal = stack.state.registry.get("personal").unwrap();
    assert_eq!(personal.count(Some(&user.user_id)).unwrap(), 1);
}

#[tokio::test]
async fn classification_is_pure_and_repeatable() {
    let stack = TestStack::new();
    let content = "Handling CORS in Express";
    let metadata = json!({});
    let first = stack.state.router.classify(content, &metadata).to_string();
    assert_eq!(first, "technical");
    for _ in 0..5 {
        assert_eq!(stack.state.router.classify(content, &metadata), first);
    }
}

#[tokio::test]
async fn every_live_memory_has_exactly_one_index_entry() {
    let stack = TestStack::new();
    let user = stack.user("cov");

    for (content, module) in [
        ("Handling CORS in Express", Some("technical")),
        ("Meeting about CORS policy", Some("work")),
        ("Today I went hiking with my sister", None),
    ] {
        stack
            .state
            .router
            .store(&user.user_id, content, None, module, &token())
            .await
            .unwrap();
    }

    let mut live_rows = 0;
    for module in stack.state.registry.list() {
        live_rows += module.count(Some(&user.user_id)).unwrap();
    }
    assert_eq!(live_rows, 3);
    assert_eq!(stack.state.cmi.count(Some(&user.user_id)).unwrap(), 3);
}
