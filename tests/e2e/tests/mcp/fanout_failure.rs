//! Partial fan-out failure: a module whose adapter errors on reads is
//! excluded from a federated search; the other modules still answer.

use fedmem_core::{MemoryError, SearchRequest};
use fedmem_e2e_tests::harness::{token, TestStack};

#[tokio::test]
async fn broken_learning_module_does_not_break_federated_search() {
    let stack = TestStack::with_failing_learning();
    let user = stack.user("ada");

    stack
        .state
        .router
        .store(&user.user_id, "Handling CORS in Express", None, Some("technical"), &token())
        .await
        .unwrap();
    stack
        .state
        .router
        .store(&user.user_id, "Meeting about CORS policy", None, Some("work"), &token())
        .await
        .unwrap();
    // The learning adapter accepts writes, so its index entry exists and its
    // rescore will fail during fan-out.
    stack
        .state
        .router
        .store(&user.user_id, "CORS chapter in the web course", None, Some("learning"), &token())
        .await
        .unwrap();

    let hits = stack
        .state
        .router
        .search(
            &user.user_id,
            "CORS",
            SearchRequest { limit: 5, ..Default::default() },
            &token(),
        )
        .await
        .unwrap();

    assert!(!hits.is_empty(), "other modules must still answer");
    assert!(hits.iter().all(|h| h.module_id != "learning"));
    assert!(hits.iter().any(|h| h.module_id == "technical"));
    assert!(hits.iter().any(|h| h.module_id == "work"));
}

#[tokio::test]
async fn single_module_search_on_the_broken_module_fails_whole_call() {
    let stack = TestStack::with_failing_learning();
    let user = stack.user("bee");

    let err = stack
        .state
        .router
        .search(
            &user.user_id,
            "CORS",
            SearchRequest {
                limit: 5,
                module_id: Some("learning".to_string()),
                ..Default::default()
            },
            &token(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "StorageFailure");
}

#[tokio::test]
async fn reindex_sweep_still_runs_with_a_broken_reader() {
    let stack = TestStack::with_failing_learning();
    let user = stack.user("sweep");
    stack
        .state
        .router
        .store(&user.user_id, "Meeting about CORS policy", None, Some("work"), &token())
        .await
        .unwrap();

    // The failing store still supports scan_all, so the sweep completes.
    let report = stack.state.router.reindex().unwrap();
    assert!(report.entries_upserted >= 1);
}

#[tokio::test]
async fn broken_module_errors_are_contained_not_cancelled() {
    let stack = TestStack::with_failing_learning();
    let user = stack.user("kind");
    stack
        .state
        .router
        .store(&user.user_id, "CORS chapter in the web course", None, Some("learning"), &token())
        .await
        .unwrap();

    // Only the broken module held candidates; the search still succeeds,
    // with an empty result rather than an error.
    let hits = stack
        .state
        .router
        .search(
            &user.user_id,
            "CORS",
            SearchRequest { limit: 5, ..Default::default() },
            &token(),
        )
        .await
        .unwrap();
    assert!(hits.is_empty());

    // And direct gets against the broken module surface the real error kind.
    let module = stack.state.registry.get("learning").unwrap();
    let err = module.get(&user.user_id, "whatever").unwrap_err();
    assert!(matches!(err, MemoryError::StorageFailure(_)));
}
