//! High-level store API for Abelana.

use crate::config::Config;
use crate::error::EngineError;
use crate::id::generate_photo_suffix;
use crate::storage::{ABELANA_DIR, Storage};
use crate::tasks::Task;
use crate::types::{Photo, PhotoId, User, validate_display_name, validate_email, validate_user_id};
use chrono::Utc;
use eyre::{Context, Result};
use std::path::Path;

/// The main Abelana store: owns the document store and the engine config.
///
/// Graph, engagement and reader operations are implemented on this type in
/// their own modules.
pub struct Store {
    pub(crate) storage: Storage,
    pub(crate) config: Config,
}

impl Store {
    /// Initialize a new store in the given directory, writing a default config.
    pub fn init(root: &Path) -> Result<Self> {
        Self::init_with_config(root, Config::default())
    }

    /// Initialize a new store with an explicit config, persisting it if none exists.
    pub fn init_with_config(root: &Path, config: Config) -> Result<Self> {
        config.validate()?;
        let storage = Storage::init(root)?;
        storage.set_busy_timeout(config.busy_timeout())?;
        config.write_if_missing(&root.join(ABELANA_DIR))?;
        Ok(Self { storage, config })
    }

    /// Open an existing store with the config found on disk.
    pub fn open(root: &Path) -> Result<Self> {
        let storage = Storage::open(root)?;
        let config = Config::load(&root.join(ABELANA_DIR)).context("Failed to load config")?;
        storage.set_busy_timeout(config.busy_timeout())?;
        Ok(Self { storage, config })
    }

    /// Open an existing store, overriding the on-disk config.
    pub fn open_with_config(root: &Path, config: Config) -> Result<Self> {
        config.validate()?;
        let storage = Storage::open(root)?;
        storage.set_busy_timeout(config.busy_timeout())?;
        Ok(Self { storage, config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn root(&self) -> &Path {
        self.storage.root()
    }

    /// Sign up a user, or refresh the display name of an existing one.
    ///
    /// A new user gets a `FindFollows` task in the same transaction, so
    /// everyone who was waiting for their address is followed up.
    pub fn register_user(&mut self, user_id: &str, display_name: &str, email: &str) -> Result<User> {
        validate_user_id(user_id).map_err(|e| eyre::eyre!(EngineError::from(e)))?;
        validate_display_name(display_name).map_err(|e| eyre::eyre!(EngineError::from(e)))?;
        let email = email.trim();
        validate_email(email).map_err(|e| eyre::eyre!(EngineError::from(e)))?;

        let payload = serde_json::to_string(&Task::FindFollows {
            user_id: user_id.to_string(),
            email: email.to_string(),
        })
        .context("Failed to serialize task")?;

        let verbose = self.config.verbose;
        let user = self.storage.transaction("register_user", |db| {
            if let Some(existing) = db.get_user(user_id)? {
                if existing.display_name != display_name {
                    db.update_display_name(user_id, display_name)?;
                }
                return Ok(User {
                    display_name: display_name.to_string(),
                    ..existing
                });
            }

            let user = User {
                user_id: user_id.to_string(),
                display_name: display_name.to_string(),
                email: email.to_string(),
                created_at: Utc::now(),
            };
            db.insert_user(&user)?;
            db.enqueue_task(&payload, Utc::now().timestamp_millis())?;
            if verbose {
                log::info!("register_user: {} <{}> queued find_follows", user_id, email);
            }
            Ok(user)
        })?;

        Ok(user)
    }

    /// Get a user by ID.
    pub fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        self.storage.db().get_user(user_id)
    }

    /// Remove a user and everything they own: photos with their likes and
    /// comments, follow edges in both directions, intents, flags.
    pub fn delete_user(&mut self, user_id: &str) -> Result<()> {
        let deleted = self
            .storage
            .transaction("delete_user", |db| db.delete_user(user_id))
            .context("Failed to delete user")?;
        if !deleted {
            return Err(eyre::eyre!(EngineError::user_not_found(user_id)));
        }
        log::info!("Deleted user {}", user_id);
        Ok(())
    }

    /// Ingest an uploaded photo, dated now.
    pub fn add_photo(&mut self, photo_id: &str) -> Result<Photo> {
        self.add_photo_at(photo_id, Utc::now().timestamp_millis())
    }

    /// Ingest a photo with an explicit date (unix ms). Re-adding an existing
    /// id returns the stored photo unchanged.
    pub fn add_photo_at(&mut self, photo_id: &str, date: i64) -> Result<Photo> {
        let id: PhotoId = photo_id.parse().map_err(|e| eyre::eyre!(EngineError::from(e)))?;

        let verbose = self.config.verbose;
        self.storage.transaction("add_photo", |db| {
            if !db.user_exists(id.owner())? {
                return Err(eyre::eyre!(EngineError::user_not_found(id.owner())));
            }
            if let Some(existing) = db.get_photo(photo_id)? {
                return Ok(existing);
            }
            let photo = Photo {
                photo_id: photo_id.to_string(),
                owner_id: id.owner().to_string(),
                date,
                flagged: false,
            };
            db.insert_photo(&photo)?;
            if verbose {
                log::info!("add_photo: {} at {}", photo_id, date);
            }
            Ok(photo)
        })
    }

    /// Create a photo with a generated `<owner>.<suffix>` id.
    pub fn post_photo(&mut self, owner_id: &str) -> Result<Photo> {
        let now = Utc::now();
        let id = PhotoId::new(owner_id, generate_photo_suffix(owner_id, now))
            .map_err(|e| eyre::eyre!(EngineError::from(e)))?;
        self.add_photo_at(&id.to_string(), now.timestamp_millis())
    }

    /// Get a photo by ID.
    pub fn get_photo(&self, photo_id: &str) -> Result<Option<Photo>> {
        self.storage.db().get_photo(photo_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::engine_error;
    use crate::tasks::TaskStatus;
    use tempfile::TempDir;

    fn setup_test_store() -> (TempDir, Store) {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::init(temp_dir.path()).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_register_and_get() {
        let (_temp_dir, mut store) = setup_test_store();

        let user = store.register_user("alice", "Alice", "alice@example.com").unwrap();
        assert_eq!(user.user_id, "alice");

        let retrieved = store.get_user("alice").unwrap();
        assert_eq!(retrieved.unwrap().email, "alice@example.com");
    }

    #[test]
    fn test_register_queues_find_follows_once() {
        let (_temp_dir, mut store) = setup_test_store();

        store.register_user("alice", "Alice", "alice@example.com").unwrap();
        store.register_user("alice", "Alice B", "alice@example.com").unwrap();

        let pending = store.tasks(TaskStatus::Pending).unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].payload.contains("find_follows"));
        assert_eq!(store.get_user("alice").unwrap().unwrap().display_name, "Alice B");
    }

    #[test]
    fn test_register_rejects_dotted_id() {
        let (_temp_dir, mut store) = setup_test_store();

        let err = store.register_user("al.ice", "Alice", "alice@example.com").unwrap_err();
        assert!(matches!(engine_error(&err), Some(EngineError::Validation(_))));
    }

    #[test]
    fn test_open_uses_saved_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            timeline_batch_size: 12,
            ..Config::default()
        };
        Store::init_with_config(temp_dir.path(), config).unwrap();

        let store = Store::open(temp_dir.path()).unwrap();
        assert_eq!(store.config().timeline_batch_size, 12);
    }

    #[test]
    fn test_add_photo_requires_owner() {
        let (_temp_dir, mut store) = setup_test_store();

        let err = store.add_photo("ghost.p1").unwrap_err();
        assert_eq!(engine_error(&err), Some(&EngineError::user_not_found("ghost")));
    }

    #[test]
    fn test_add_photo_is_idempotent() {
        let (_temp_dir, mut store) = setup_test_store();
        store.register_user("alice", "Alice", "alice@example.com").unwrap();

        let first = store.add_photo_at("alice.p1", 100).unwrap();
        let second = store.add_photo_at("alice.p1", 200).unwrap();
        assert_eq!(first, second);
        assert_eq!(second.date, 100);
    }

    #[test]
    fn test_post_photo_generates_owned_id() {
        let (_temp_dir, mut store) = setup_test_store();
        store.register_user("alice", "Alice", "alice@example.com").unwrap();

        let photo = store.post_photo("alice").unwrap();
        let id: PhotoId = photo.photo_id.parse().unwrap();
        assert_eq!(id.owner(), "alice");
    }

    #[test]
    fn test_delete_missing_user_is_not_found() {
        let (_temp_dir, mut store) = setup_test_store();

        let err = store.delete_user("ghost").unwrap_err();
        assert_eq!(engine_error(&err), Some(&EngineError::user_not_found("ghost")));
    }
}
