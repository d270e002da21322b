//! Integration tests for profile and timeline pagination.

mod common;

use common::TestEnv;

/// alice has five photos dated 100..=500; bob follows her and has one at 250.
fn setup(page_size: usize) -> TestEnv {
    let mut env = TestEnv::with_page_size(page_size);
    env.register("alice");
    env.register("bob");
    env.register("carol");
    for i in 1..=5 {
        env.photo(&format!("alice.p{}", i), i * 100);
    }
    env.photo("bob.b1", 250);
    env.follow_id("bob", "alice");
    env
}

// =============================================================================
// Profile
// =============================================================================

#[test]
fn test_profile_newest_first_and_capped() {
    let env = setup(3);

    assert_eq!(env.profile_ids("alice", ""), vec!["alice.p5", "alice.p4", "alice.p3"]);
}

#[test]
fn test_profile_cursor_is_exclusive() {
    let env = setup(3);

    let first = env.store.profile_for_user("alice", "0").unwrap();
    let cursor = first.last().unwrap().created.to_string();
    assert_eq!(cursor, "300");

    assert_eq!(env.profile_ids("alice", &cursor), vec!["alice.p2", "alice.p1"]);
    assert!(env.profile_ids("alice", "100").is_empty());
}

#[test]
fn test_profile_entries_carry_owner_and_no_like_count() {
    let env = setup(10);

    let entries = env.store.profile_for_user("alice", "").unwrap();
    assert_eq!(entries.len(), 5);
    for e in &entries {
        assert_eq!(e.user_id, "alice");
        assert_eq!(e.name, "ALICE");
        assert_eq!(e.likes, -1);
        assert!(!e.i_like);
    }
}

#[test]
fn test_profile_malformed_cursor_returns_first_page() {
    let env = setup(3);

    assert_eq!(
        env.profile_ids("alice", "last tuesday"),
        vec!["alice.p5", "alice.p4", "alice.p3"]
    );
}

#[test]
fn test_profile_unknown_user_is_empty() {
    let env = setup(3);

    assert!(env.profile_ids("ghost", "").is_empty());
}

#[test]
fn test_profile_only_own_photos() {
    let env = setup(10);

    assert_eq!(env.profile_ids("bob", ""), vec!["bob.b1"]);
}

// =============================================================================
// Timeline
// =============================================================================

#[test]
fn test_timeline_merges_followed_users() {
    let env = setup(10);

    assert_eq!(
        env.timeline_ids("bob", ""),
        vec!["alice.p5", "alice.p4", "alice.p3", "bob.b1", "alice.p2", "alice.p1"]
    );
}

#[test]
fn test_timeline_pages_without_gaps() {
    let env = setup(3);

    let first = env.timeline_ids("bob", "");
    assert_eq!(first, vec!["alice.p5", "alice.p4", "alice.p3"]);

    let second = env.timeline_ids("bob", first.last().unwrap());
    assert_eq!(second, vec!["bob.b1", "alice.p2", "alice.p1"]);

    assert!(env.timeline_ids("bob", second.last().unwrap()).is_empty());
}

#[test]
fn test_timeline_ties_on_date_are_not_skipped() {
    let mut env = TestEnv::with_page_size(1);
    env.register("alice");
    env.photo("alice.a", 100);
    env.photo("alice.b", 100);
    env.photo("alice.c", 100);

    let mut seen = Vec::new();
    let mut cursor = String::new();
    loop {
        let page = env.timeline_ids("alice", &cursor);
        if page.is_empty() {
            break;
        }
        cursor = page[0].clone();
        seen.extend(page);
    }
    assert_eq!(seen, vec!["alice.c", "alice.b", "alice.a"]);
}

#[test]
fn test_timeline_excludes_unfollowed_users() {
    let mut env = setup(10);
    env.photo("carol.c1", 999);

    assert!(!env.timeline_ids("bob", "").contains(&"carol.c1".to_string()));
    assert_eq!(env.timeline_ids("carol", ""), vec!["carol.c1"]);
}

#[test]
fn test_timeline_bad_cursor_returns_first_page() {
    let env = setup(2);

    let expected = vec!["alice.p5", "alice.p4"];
    assert_eq!(env.timeline_ids("bob", "not-a-photo-id"), expected);
    assert_eq!(env.timeline_ids("bob", "alice.missing"), expected);
    assert_eq!(env.timeline_ids("bob", "0"), expected);
}

#[test]
fn test_timeline_entries_name_the_owner() {
    let env = setup(10);

    let entries = env.store.get_timeline("bob", "").unwrap();
    let b1 = entries.iter().find(|e| e.photo_id == "bob.b1").unwrap();
    assert_eq!(b1.user_id, "bob");
    assert_eq!(b1.name, "BOB");
    assert_eq!(b1.created, 250);
    assert_eq!(b1.likes, 0);
}

#[test]
fn test_timeline_of_unknown_user_is_empty() {
    let env = setup(10);

    assert!(env.timeline_ids("ghost", "").is_empty());
}
