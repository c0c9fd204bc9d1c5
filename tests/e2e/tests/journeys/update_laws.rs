//! Update laws: re-embedding on content change, vector stability on
//! metadata-only change, idempotent repeated updates, round-trip fidelity.

use fedmem_core::UpdateRequest;
use fedmem_e2e_tests::harness::{token, TestStack};
use serde_json::json;

#[tokio::test]
async fn round_trip_preserves_content_and_metadata_keys() {
    let stack = TestStack::new();
    let user = stack.user("ada");

    let m = stack
        .state
        .router
        .store(
            &user.user_id,
            "Postgres partial indexes",
            Some(json!({"language": "sql", "tags": ["db"]})),
            Some("technical"),
            &token(),
        )
        .await
        .unwrap();

    let (_, record) = stack.state.router.get(&user.user_id, &m.memory_id).unwrap().unwrap();
    assert_eq!(record.content, "Postgres partial indexes");
    assert_eq!(record.metadata["language"], "sql");
    assert_eq!(record.metadata["tags"], json!(["db"]));
}

#[tokio::test]
async fn content_change_reembeds_metadata_change_does_not() {
    let stack = TestStack::new();
    let user = stack.user("vec");
    let m = stack
        .state
        .router
        .store(&user.user_id, "original wording", None, Some("work"), &token())
        .await
        .unwrap();

    let module = stack.state.registry.get("work").unwrap();
    let before = module
        .get_many(&user.user_id, &[m.memory_id.clone()])
        .unwrap()
        .remove(0);
    let cmi_before = stack
        .state
        .cmi
        .get_entry(&user.user_id, "work", &m.memory_id)
        .unwrap()
        .unwrap();

    // Metadata-only: vectors byte-identical.
    stack
        .state
        .router
        .update(
            &user.user_id,
            &m.memory_id,
            UpdateRequest {
                content: None,
                metadata: Some(json!({"status": "reviewed"})),
            },
            &token(),
        )
        .await
        .unwrap();
    let after_meta = module
        .get_many(&user.user_id, &[m.memory_id.clone()])
        .unwrap()
        .remove(0);
    let cmi_after_meta = stack
        .state
        .cmi
        .get_entry(&user.user_id, "work", &m.memory_id)
        .unwrap()
        .unwrap();
    assert_eq!(before.embedding, after_meta.embedding);
    assert_eq!(cmi_before.embedding, cmi_after_meta.embedding);
    assert_eq!(after_meta.metadata["status"], "reviewed");

    // Content change: both tiers move.
    stack
        .state
        .router
        .update(
            &user.user_id,
            &m.memory_id,
            UpdateRequest {
                content: Some("entirely rewritten wording".to_string()),
                metadata: None,
            },
            &token(),
        )
        .await
        .unwrap();
    let after_content = module
        .get_many(&user.user_id, &[m.memory_id.clone()])
        .unwrap()
        .remove(0);
    let cmi_after_content = stack
        .state
        .cmi
        .get_entry(&user.user_id, "work", &m.memory_id)
        .unwrap()
        .unwrap();
    assert_ne!(before.embedding, after_content.embedding);
    assert_ne!(cmi_before.embedding, cmi_after_content.embedding);
    // Metadata from the earlier patch survives the content update.
    assert_eq!(after_content.metadata["status"], "reviewed");
}

#[tokio::test]
async fn repeating_the_same_update_changes_nothing() {
    let stack = TestStack::new();
    let user = stack.user("idem");
    let m = stack
        .state
        .router
        .store(&user.user_id, "version one", None, Some("personal"), &token())
        .await
        .unwrap();

    let request = UpdateRequest {
        content: Some("version two".to_string()),
        metadata: Some(json!({"revision": 2})),
    };
    stack
        .state
        .router
        .update(&user.user_id, &m.memory_id, request.clone(), &token())
        .await
        .unwrap();
    let module = stack.state.registry.get("personal").unwrap();
    let first = module
        .get_many(&user.user_id, &[m.memory_id.clone()])
        .unwrap()
        .remove(0);

    stack
        .state
        .router
        .update(&user.user_id, &m.memory_id, request, &token())
        .await
        .unwrap();
    let second = module
        .get_many(&user.user_id, &[m.memory_id.clone()])
        .unwrap()
        .remove(0);

    assert_eq!(first.content, second.content);
    assert_eq!(first.embedding, second.embedding);
    assert_eq!(first.metadata, second.metadata);
}

#[tokio::test]
async fn update_never_moves_a_memory_between_modules() {
    let stack = TestStack::new();
    let user = stack.user("fixed");
    let m = stack
        .state
        .router
        .store(
            &user.user_id,
            "Today I went hiking with my sister",
            None,
            None,
            &token(),
        )
        .await
        .unwrap();
    assert_eq!(m.module_id, "personal");

    // New content that would classify as technical must stay in personal.
    let (module_id, _) = stack
        .state
        .router
        .update(
            &user.user_id,
            &m.memory_id,
            UpdateRequest {
                content: Some("Debugging the CORS api server".to_string()),
                metadata: None,
            },
            &token(),
        )
        .await
        .unwrap();
    assert_eq!(module_id, "personal");
    assert_eq!(
        stack
            .state
            .cmi
            .resolve(&user.user_id, &m.memory_id)
            .unwrap()
            .as_deref(),
        Some("personal")
    );
}
