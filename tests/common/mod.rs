//! Shared test infrastructure for Abelana integration tests.
//!
//! Provides TestEnv helper for consistent test setup/teardown.

#![allow(dead_code)]

use abelana::{Config, DrainReport, FollowOutcome, Photo, Stats, Store, User};
use tempfile::TempDir;

/// Test environment with automatic cleanup.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub store: Store,
}

impl TestEnv {
    /// Create a new test environment with an initialized store.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create a test environment with custom engine settings.
    pub fn with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Store::init_with_config(temp_dir.path(), config).expect("Failed to init store");
        Self { temp_dir, store }
    }

    /// Small pages so pagination is easy to exercise.
    pub fn with_page_size(size: usize) -> Self {
        Self::with_config(Config {
            timeline_batch_size: size,
            ..Config::default()
        })
    }

    pub fn email(user_id: &str) -> String {
        format!("{}@example.com", user_id)
    }

    /// Sign up a user with `<id>@example.com`.
    pub fn register(&mut self, user_id: &str) -> User {
        self.store
            .register_user(user_id, &user_id.to_uppercase(), &Self::email(user_id))
            .expect("Failed to register user")
    }

    pub fn follow_id(&mut self, user_id: &str, following_id: &str) -> bool {
        self.store
            .follow_by_id(user_id, following_id)
            .expect("Failed to follow by id")
    }

    pub fn follow_email(&mut self, user_id: &str, email: &str) -> FollowOutcome {
        self.store.follow(user_id, email).expect("Failed to follow by email")
    }

    pub fn photo(&mut self, photo_id: &str, date: i64) -> Photo {
        self.store.add_photo_at(photo_id, date).expect("Failed to add photo")
    }

    /// Run background tasks until nothing more is due.
    pub fn settle(&mut self) -> DrainReport {
        self.store.drain_until_idle(20).expect("Failed to drain tasks")
    }

    pub fn stats(&self, user_id: &str) -> Stats {
        self.store.statistics(user_id)
    }

    pub fn timeline_ids(&self, user_id: &str, last_id: &str) -> Vec<String> {
        self.store
            .get_timeline(user_id, last_id)
            .expect("Failed to read timeline")
            .into_iter()
            .map(|e| e.photo_id)
            .collect()
    }

    pub fn profile_ids(&self, user_id: &str, last_date: &str) -> Vec<String> {
        self.store
            .profile_for_user(user_id, last_date)
            .expect("Failed to read profile")
            .into_iter()
            .map(|e| e.photo_id)
            .collect()
    }

    /// Assert that `user_id` follows `following_id`, on both sides of the edge.
    /// Hold the database write lock from a second connection until the
    /// returned handle is dropped.
    pub fn lock_writes(&self) -> rusqlite::Connection {
        let path = self.temp_dir.path().join(".abelana").join("abelana.db");
        let conn = rusqlite::Connection::open(path).expect("Failed to open second connection");
        conn.execute_batch("BEGIN IMMEDIATE").expect("Failed to take write lock");
        conn
    }

    pub fn assert_follows(&self, user_id: &str, following_id: &str) {
        let i_follow = self.store.i_follow(user_id).expect("Failed to read follows");
        assert!(
            i_follow.iter().any(|id| id == following_id),
            "Expected {} to follow {}, follows: {:?}",
            user_id,
            following_id,
            i_follow
        );
        let follows_me = self.store.follows_me(following_id).expect("Failed to read followers");
        assert!(
            follows_me.iter().any(|id| id == user_id),
            "Expected {} among followers of {}, followers: {:?}",
            user_id,
            following_id,
            follows_me
        );
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
