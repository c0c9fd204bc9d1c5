//! Cross-module search journeys: two-stage ordering, monotonicity, and user
//! isolation.

use fedmem_core::SearchRequest;
use fedmem_e2e_tests::harness::{token, TestStack};

async fn seed_cors_corpus(stack: &TestStack, user_id: &str) -> (String, String, String) {
    let a = stack
        .state
        .router
        .store(user_id, "Handling CORS in Express", None, Some("technical"), &token())
        .await
        .unwrap();
    let b = stack
        .state
        .router
        .store(user_id, "Meeting about CORS policy", None, Some("work"), &token())
        .await
        .unwrap();
    let c = stack
        .state
        .router
        .store(
            user_id,
            "Hiking trails near Mount Wilson",
            None,
            Some("personal"),
            &token(),
        )
        .await
        .unwrap();
    (a.memory_id, b.memory_id, c.memory_id)
}

#[tokio::test]
async fn cors_memories_rank_ahead_of_hiking() {
    let stack = TestStack::new();
    let user = stack.user("ada");
    let (a, b, c) = seed_cors_corpus(&stack, &user.user_id).await;

    let hits = stack
        .state
        .router
        .search(
            &user.user_id,
            "CORS",
            SearchRequest { limit: 3, ..Default::default() },
            &token(),
        )
        .await
        .unwrap();

    let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    let pos = |id: &str| ids.iter().position(|x| *x == id);
    let pa = pos(&a).expect("A returned");
    let pb = pos(&b).expect("B returned");
    if let Some(pc) = pos(&c) {
        assert!(pa < pc, "technical CORS memory must outrank hiking");
        assert!(pb < pc, "work CORS memory must outrank hiking");
    }
    // Results arrive in descending full-resolution similarity.
    for pair in hits.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
    }
}

#[tokio::test]
async fn increasing_limit_only_appends() {
    let stack = TestStack::new();
    let user = stack.user("mono");
    seed_cors_corpus(&stack, &user.user_id).await;
    stack
        .state
        .router
        .store(
            &user.user_id,
            "CORS preflight caching notes",
            None,
            Some("technical"),
            &token(),
        )
        .await
        .unwrap();

    let mut previous: Vec<String> = Vec::new();
    for limit in 1..=4 {
        let hits = stack
            .state
            .router
            .search(
                &user.user_id,
                "CORS",
                SearchRequest { limit, ..Default::default() },
                &token(),
            )
            .await
            .unwrap();
        let ids: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();
        assert!(ids.len() >= previous.len());
        assert_eq!(&ids[..previous.len()], &previous[..], "prefix must be stable");
        previous = ids;
    }
}

#[tokio::test]
async fn search_never_leaks_other_users_rows() {
    let stack = TestStack::new();
    let owner = stack.user("owner");
    let snoop = stack.user("snoop");
    seed_cors_corpus(&stack, &owner.user_id).await;

    let hits = stack
        .state
        .router
        .search(
            &snoop.user_id,
            "CORS",
            SearchRequest { limit: 10, ..Default::default() },
            &token(),
        )
        .await
        .unwrap();
    assert!(hits.is_empty());

    let hits = stack
        .state
        .router
        .search(
            &owner.user_id,
            "CORS",
            SearchRequest { limit: 10, ..Default::default() },
            &token(),
        )
        .await
        .unwrap();
    assert!(!hits.is_empty());
}

#[tokio::test]
async fn module_subset_restricts_candidates() {
    let stack = TestStack::new();
    let user = stack.user("subset");
    seed_cors_corpus(&stack, &user.user_id).await;

    let hits = stack
        .state
        .router
        .search(
            &user.user_id,
            "CORS",
            SearchRequest {
                limit: 10,
                modules: Some(vec!["work".to_string()]),
                ..Default::default()
            },
            &token(),
        )
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.module_id == "work"));
}

#[tokio::test]
async fn search_bumps_access_counters_best_effort() {
    let stack = TestStack::new();
    let user = stack.user("counter");
    let (a, _, _) = seed_cors_corpus(&stack, &user.user_id).await;

    let hits = stack
        .state
        .router
        .search(
            &user.user_id,
            "CORS",
            SearchRequest { limit: 3, ..Default::default() },
            &token(),
        )
        .await
        .unwrap();
    assert!(hits.iter().any(|h| h.id == a));

    let module = stack.state.registry.get("technical").unwrap();
    let record = module.get_many(&user.user_id, &[a]).unwrap().remove(0);
    assert!(record.access_count >= 1);
    assert!(record.last_accessed.is_some());
}
