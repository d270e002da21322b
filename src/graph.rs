//! Graph engine: follow edges, follow-by-email intents, and the fan-out
//! that resolves intents when the address owner joins.

use crate::error::EngineError;
use crate::storage::Db;
use crate::store::Store;
use crate::tasks::Task;
use crate::types::{Activity, FollowIntent, FollowOutcome, Person, Stats, validate_email};
use chrono::Utc;
use eyre::{Context, Result};

impl Store {
    /// Establish the edge `user_id -> following_id`.
    ///
    /// Both users must exist. Returns true if a new edge was written; a
    /// repeated call is a no-op and returns false, so callers may retry
    /// freely. The new-follower notification is queued after the commit and
    /// its failure does not fail the follow.
    pub fn follow_by_id(&mut self, user_id: &str, following_id: &str) -> Result<bool> {
        let verbose = self.config.verbose;
        let created = self.storage.transaction("follow_by_id", |db| {
            let created = link(db, user_id, following_id)?;
            if verbose {
                log::info!(
                    "follow_by_id: {} -> {} ({})",
                    user_id,
                    following_id,
                    if created { "new" } else { "existing" }
                );
            }
            Ok(created)
        })?;

        if created {
            self.notify_new_follower(user_id, following_id);
        }
        Ok(created)
    }

    /// Follow whoever owns `email`, or remember the wish until they join.
    ///
    /// The address lookup and the write share one transaction, so an owner
    /// who signs up concurrently either gets the edge here or finds the
    /// intent in their `FindFollows`.
    pub fn follow(&mut self, user_id: &str, email: &str) -> Result<FollowOutcome> {
        let email = email.trim();
        validate_email(email).map_err(|_| eyre::eyre!(EngineError::MalformedInput(format!("email '{}'", email))))?;

        let verbose = self.config.verbose;
        let (outcome, created) = self.storage.transaction("follow", |db| {
            if let Some(target) = db.user_id_by_email(email)? {
                let created = link(db, user_id, &target)?;
                if verbose {
                    log::info!("follow: {} found as {}", email, target);
                }
                return Ok((FollowOutcome::Followed { user_id: target }, created));
            }

            if !db.user_exists(user_id)? {
                return Err(eyre::eyre!(EngineError::user_not_found(user_id)));
            }
            let added = db.insert_intent(user_id, email, Utc::now())?;
            if verbose {
                log::info!(
                    "follow: {} not found, intent for {} {}",
                    email,
                    user_id,
                    if added { "recorded" } else { "already pending" }
                );
            }
            Ok((
                FollowOutcome::Pending {
                    email: email.to_string(),
                },
                false,
            ))
        })?;

        if let FollowOutcome::Followed { user_id: target } = &outcome
            && created
        {
            self.notify_new_follower(user_id, target);
        }
        Ok(outcome)
    }

    /// Queue `NowFollows` for a committed edge. Best effort.
    fn notify_new_follower(&mut self, user_id: &str, following_id: &str) {
        let task = Task::NowFollows {
            user_id: user_id.to_string(),
            following_id: following_id.to_string(),
        };
        if let Err(e) = self.enqueue(&task) {
            log::warn!("Failed to queue now_follows {} -> {}: {:#}", user_id, following_id, e);
        }
    }

    /// Fan out pending intents for `email` now that `user_id` owns it.
    ///
    /// Queues one `FollowById` per waiting user and marks their intents
    /// resolved, all in one transaction. Returns the number of tasks queued.
    pub fn find_follows(&mut self, user_id: &str, email: &str) -> Result<usize> {
        let now = Utc::now();
        let verbose = self.config.verbose;
        let queued = self
            .storage
            .transaction("find_follows", |db| {
                let waiting = db.users_wanting(email)?;
                let mut queued = 0;
                for follower in waiting.iter().filter(|id| id.as_str() != user_id) {
                    let task = Task::FollowById {
                        user_id: follower.clone(),
                        following_id: user_id.to_string(),
                    };
                    let payload = serde_json::to_string(&task).context("Failed to serialize task")?;
                    db.enqueue_task(&payload, now.timestamp_millis())?;
                    queued += 1;
                }
                db.resolve_intents(email, now)?;
                if verbose {
                    log::info!("find_follows: {} <{}> queued {} follows", user_id, email, queued);
                }
                Ok(queued)
            })
            .wrap_err_with(|| format!("find_follows {} <{}>", user_id, email))?;

        Ok(queued)
    }

    /// Follow counts. A user that cannot be read yields `{-1, -1}`.
    pub fn statistics(&self, user_id: &str) -> Stats {
        let db = self.storage.db();
        let lookup = || -> Result<Option<Stats>> {
            if !db.user_exists(user_id)? {
                return Ok(None);
            }
            Ok(Some(Stats {
                following: db.count_following(user_id)?,
                followers: db.count_followers(user_id)?,
            }))
        };
        match lookup() {
            Ok(Some(stats)) => stats,
            Ok(None) => {
                log::warn!("statistics: user {} not found", user_id);
                Stats::unknown()
            }
            Err(e) => {
                log::error!("statistics {}: {:#}", user_id, e);
                Stats::unknown()
            }
        }
    }

    /// Users this user follows, in follow order.
    pub fn get_following(&self, user_id: &str) -> Result<Vec<Person>> {
        let users = self.storage.db().following_users(user_id)?;
        Ok(users.into_iter().map(Person::from).collect())
    }

    /// Users following this user, in follow order.
    pub fn get_followers(&self, user_id: &str) -> Result<Vec<Person>> {
        let users = self.storage.db().follower_users(user_id)?;
        Ok(users.into_iter().map(Person::from).collect())
    }

    /// Ids this user follows (the `IFollow` set).
    pub fn i_follow(&self, user_id: &str) -> Result<Vec<String>> {
        self.storage.db().following_ids(user_id)
    }

    /// Ids following this user (the `FollowsMe` set).
    pub fn follows_me(&self, user_id: &str) -> Result<Vec<String>> {
        self.storage.db().follower_ids(user_id)
    }

    pub fn is_following(&self, user_id: &str, following_id: &str) -> Result<bool> {
        self.storage.db().is_following(user_id, following_id)
    }

    pub fn get_person(&self, person_id: &str) -> Result<Option<Person>> {
        Ok(self.storage.db().get_user(person_id)?.map(Person::from))
    }

    /// All follow intents of a user, resolved ones included.
    pub fn pending_follows(&self, user_id: &str) -> Result<Vec<FollowIntent>> {
        self.storage.db().intents_for(user_id)
    }

    /// Activity feed of a user, newest first.
    pub fn activity(&self, user_id: &str) -> Result<Vec<Activity>> {
        self.storage.db().activity_for(user_id)
    }

    /// Handler for `NowFollows`: note the new follower on the followed
    /// user's activity feed. Missing users make this a no-op.
    pub(crate) fn record_new_follower(&mut self, user_id: &str, following_id: &str) -> Result<()> {
        self.storage.transaction("now_follows", |db| {
            if !db.user_exists(user_id)? || !db.user_exists(following_id)? {
                log::debug!("now_follows: {} or {} is gone", user_id, following_id);
                return Ok(());
            }
            db.insert_activity(&Activity {
                user_id: following_id.to_string(),
                kind: "follow".to_string(),
                actor_id: user_id.to_string(),
                created_at: Utc::now(),
            })?;
            Ok(())
        })
    }
}

/// Write `user_id -> following_id` inside an open transaction.
fn link(db: &Db<'_>, user_id: &str, following_id: &str) -> Result<bool> {
    if user_id == following_id {
        return Err(eyre::eyre!(EngineError::SelfFollow(user_id.to_string())));
    }
    for id in [user_id, following_id] {
        if !db.user_exists(id)? {
            return Err(eyre::eyre!(EngineError::user_not_found(id))
                .wrap_err(format!("follow {} -> {}", user_id, following_id)));
        }
    }
    db.insert_follow(user_id, following_id, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::engine_error;
    use tempfile::TempDir;

    fn setup_test_store() -> (TempDir, Store) {
        let temp_dir = TempDir::new().unwrap();
        let mut store = Store::init(temp_dir.path()).unwrap();
        store.register_user("alice", "Alice", "alice@example.com").unwrap();
        store.register_user("bob", "Bob", "bob@example.com").unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_follow_by_id_sets_both_sides() {
        let (_temp_dir, mut store) = setup_test_store();

        assert!(store.follow_by_id("alice", "bob").unwrap());

        assert_eq!(store.i_follow("alice").unwrap(), vec!["bob"]);
        assert_eq!(store.follows_me("bob").unwrap(), vec!["alice"]);
        assert!(store.is_following("alice", "bob").unwrap());
        assert!(!store.is_following("bob", "alice").unwrap());
    }

    #[test]
    fn test_follow_by_id_twice_is_noop() {
        let (_temp_dir, mut store) = setup_test_store();

        assert!(store.follow_by_id("alice", "bob").unwrap());
        assert!(!store.follow_by_id("alice", "bob").unwrap());

        assert_eq!(store.i_follow("alice").unwrap().len(), 1);
        assert_eq!(store.follows_me("bob").unwrap().len(), 1);
    }

    #[test]
    fn test_self_follow_rejected() {
        let (_temp_dir, mut store) = setup_test_store();

        let err = store.follow_by_id("alice", "alice").unwrap_err();
        assert!(matches!(engine_error(&err), Some(EngineError::SelfFollow(_))));
        assert!(store.i_follow("alice").unwrap().is_empty());
    }

    #[test]
    fn test_follow_missing_target_writes_nothing() {
        let (_temp_dir, mut store) = setup_test_store();

        let err = store.follow_by_id("alice", "ghost").unwrap_err();
        assert_eq!(engine_error(&err), Some(&EngineError::user_not_found("ghost")));
        assert!(store.i_follow("alice").unwrap().is_empty());
    }

    #[test]
    fn test_follow_unknown_email_records_intent_once() {
        let (_temp_dir, mut store) = setup_test_store();

        let outcome = store.follow("alice", "carol@example.com").unwrap();
        assert_eq!(
            outcome,
            FollowOutcome::Pending {
                email: "carol@example.com".to_string()
            }
        );
        store.follow("alice", "carol@example.com").unwrap();

        let intents = store.pending_follows("alice").unwrap();
        assert_eq!(intents.len(), 1);
        assert!(intents[0].resolved_at.is_none());
    }

    #[test]
    fn test_follow_registered_email_writes_edge_not_intent() {
        let (temp_dir, mut store) = setup_test_store();

        // The owner signs up through another handle on the same store.
        let mut other = Store::open(temp_dir.path()).unwrap();
        other.register_user("carol", "Carol", "carol@example.com").unwrap();
        other.drain_until_idle(10).unwrap();

        let outcome = store.follow("alice", "carol@example.com").unwrap();
        assert_eq!(
            outcome,
            FollowOutcome::Followed {
                user_id: "carol".to_string()
            }
        );
        assert!(store.is_following("alice", "carol").unwrap());
        assert!(store.pending_follows("alice").unwrap().is_empty());

        // Only the new edge queues a notification.
        store.follow("alice", "carol@example.com").unwrap();
        let pending = store.tasks(crate::tasks::TaskStatus::Pending).unwrap();
        let notices = pending.iter().filter(|t| t.payload.contains("now_follows")).count();
        assert_eq!(notices, 1);
    }

    #[test]
    fn test_follow_malformed_email() {
        let (_temp_dir, mut store) = setup_test_store();

        let err = store.follow("alice", "not-an-address").unwrap_err();
        assert!(matches!(engine_error(&err), Some(EngineError::MalformedInput(_))));
        assert!(store.pending_follows("alice").unwrap().is_empty());
    }

    #[test]
    fn test_statistics_unknown_user() {
        let (_temp_dir, store) = setup_test_store();
        assert_eq!(store.statistics("ghost"), Stats::unknown());
    }

    #[test]
    fn test_record_new_follower_is_idempotent() {
        let (_temp_dir, mut store) = setup_test_store();

        store.record_new_follower("alice", "bob").unwrap();
        store.record_new_follower("alice", "bob").unwrap();

        let activity = store.activity("bob").unwrap();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].actor_id, "alice");
    }
}
