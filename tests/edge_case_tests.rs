//! Edge case tests: empty stores, unicode, boundaries, and odd-but-valid input.

mod common;

use abelana::{CompactConfig, FollowOutcome, Stats, StoreBatchExt, StoreCompactExt};
use common::TestEnv;

// =============================================================================
// Empty Store
// =============================================================================

#[test]
fn test_empty_store_stats_unknown() {
    let env = TestEnv::new();
    assert_eq!(env.stats("anyone"), Stats::unknown());
}

#[test]
fn test_registered_user_starts_at_zero() {
    let mut env = TestEnv::new();
    env.register("alice");

    assert_eq!(
        env.stats("alice"),
        Stats {
            following: 0,
            followers: 0
        }
    );
}

#[test]
fn test_empty_store_drain_does_nothing() {
    let mut env = TestEnv::new();
    let report = env.settle();
    assert_eq!(report.ran(), 0);
}

#[test]
fn test_empty_timeline_for_new_user() {
    let mut env = TestEnv::new();
    env.register("alice");

    assert!(env.timeline_ids("alice", "").is_empty());
    assert!(env.profile_ids("alice", "").is_empty());
}

// =============================================================================
// Unicode
// =============================================================================

#[test]
fn test_unicode_display_name() {
    let mut env = TestEnv::new();
    let user = env
        .store
        .register_user("mei", "王美丽 🌸", "mei@example.com")
        .unwrap();
    assert_eq!(user.display_name, "王美丽 🌸");

    env.photo("mei.p1", 1);
    let entries = env.store.get_timeline("mei", "").unwrap();
    assert_eq!(entries[0].name, "王美丽 🌸");
}

#[test]
fn test_unicode_comment() {
    let mut env = TestEnv::new();
    env.register("alice");
    env.photo("alice.p1", 1);

    let comment = env.store.add_comment("alice", "alice.p1", "جميل جدا ✨").unwrap();
    assert_eq!(comment.text, "جميل جدا ✨");
}

#[test]
fn test_unicode_user_id() {
    let mut env = TestEnv::new();
    env.store
        .register_user("józef", "Józef", "jozef@example.com")
        .unwrap();
    env.photo("józef.p1", 1);

    assert_eq!(env.profile_ids("józef", ""), vec!["józef.p1"]);
}

// =============================================================================
// Boundaries
// =============================================================================

#[test]
fn test_display_name_max_length() {
    let mut env = TestEnv::new();
    let name = "n".repeat(100);
    assert!(env.store.register_user("alice", &name, "alice@example.com").is_ok());

    let name = "n".repeat(101);
    assert!(env.store.register_user("bob", &name, "bob@example.com").is_err());
}

#[test]
fn test_comment_max_length_counts_chars() {
    let mut env = TestEnv::new();
    env.register("alice");
    env.photo("alice.p1", 1);

    // 500 multi-byte characters is still within the limit.
    let text = "é".repeat(500);
    assert!(env.store.add_comment("alice", "alice.p1", &text).is_ok());
}

#[test]
fn test_page_size_one() {
    let mut env = TestEnv::with_page_size(1);
    env.register("alice");
    env.photo("alice.p1", 1);
    env.photo("alice.p2", 2);

    assert_eq!(env.timeline_ids("alice", ""), vec!["alice.p2"]);
    assert_eq!(env.profile_ids("alice", "2"), vec!["alice.p1"]);
}

#[test]
fn test_negative_date_cursor_is_valid() {
    let mut env = TestEnv::new();
    env.register("alice");
    env.photo("alice.old", -5);

    assert!(env.profile_ids("alice", "-10").is_empty());
    assert_eq!(env.profile_ids("alice", "0"), vec!["alice.old"]);
}

#[test]
fn test_rapid_comments_get_distinct_times() {
    let mut env = TestEnv::new();
    env.register("alice");
    env.photo("alice.p1", 1);

    for i in 0..20 {
        env.store.add_comment("alice", "alice.p1", &format!("c{}", i)).unwrap();
    }

    let comments = env.store.get_comments("alice.p1").unwrap();
    assert_eq!(comments.len(), 20);
    assert!(comments.windows(2).all(|w| w[0].time < w[1].time));
    assert_eq!(comments[19].text, "c19");
}

// =============================================================================
// Batch and maintenance
// =============================================================================

#[test]
fn test_follow_all_empty_list() {
    let mut env = TestEnv::new();
    env.register("alice");

    let result = env.store.follow_all("alice", &[]).unwrap();
    assert!(result.followed.is_empty());
    assert!(result.pending.is_empty());
    assert!(result.errors.is_empty());
}

#[test]
fn test_follow_all_duplicates_count_once() {
    let mut env = TestEnv::new();
    env.register("alice");
    env.register("bob");

    let result = env
        .store
        .follow_all("alice", &["bob@example.com", "bob@example.com"])
        .unwrap();
    assert_eq!(result.followed.len(), 2);
    assert_eq!(env.stats("alice").following, 1);
}

#[test]
fn test_refollow_after_resolution_reopens_intent() {
    let mut env = TestEnv::new();
    env.register("alice");
    env.follow_email("alice", "carol@example.com");
    env.register("carol");
    env.settle();

    env.store.delete_user("carol").unwrap();
    let outcome = env.follow_email("alice", "carol@example.com");
    assert!(matches!(outcome, FollowOutcome::Pending { .. }));

    let intents = env.store.pending_follows("alice").unwrap();
    assert_eq!(intents.len(), 1);
    assert!(intents[0].resolved_at.is_none());
}

#[test]
fn test_compact_on_empty_store() {
    let mut env = TestEnv::new();
    let result = env.store.compact(&CompactConfig::new()).unwrap();
    assert_eq!(result.intents_pruned, 0);
    assert_eq!(result.tasks_pruned, 0);
}
