//! Storage layer for Abelana: the document store over SQLite.
//!
//! Entities keep their ancestor relationships as foreign keys
//! (User -> Photo -> Like/Comment) and relationship sets are
//! association tables, so membership checks are index lookups.

use crate::error::EngineError;
use crate::tasks::{TaskRecord, TaskStatus};
use crate::types::{Activity, Comment, FollowIntent, Photo, TimelineEntry, User};
use chrono::{DateTime, SecondsFormat, Utc};
use eyre::{Context, Result};
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Storage directory name.
pub const ABELANA_DIR: &str = ".abelana";

/// SQLite database file.
pub const DB_FILE: &str = "abelana.db";

/// Schema version recorded in `meta`.
const SCHEMA_VERSION: &str = "1";

/// How long a writer waits for a competing transaction unless configured.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Storage handle for reading/writing abelana data.
pub struct Storage {
    root: PathBuf,
    db: Connection,
}

impl Storage {
    /// Initialize storage in the given directory.
    pub fn init(root: &Path) -> Result<Self> {
        let dir = root.join(ABELANA_DIR);
        fs::create_dir_all(&dir).context("Failed to create .abelana directory")?;

        let storage = Self::connect(root)?;
        storage.init_schema()?;
        Ok(storage)
    }

    /// Open existing storage.
    pub fn open(root: &Path) -> Result<Self> {
        let dir = root.join(ABELANA_DIR);
        if !dir.exists() {
            eyre::bail!("No .abelana directory found. Run 'abelana init' first.");
        }

        let storage = Self::connect(root)?;
        storage.init_schema()?;
        Ok(storage)
    }

    fn connect(root: &Path) -> Result<Self> {
        let db_path = root.join(ABELANA_DIR).join(DB_FILE);
        let db = Connection::open(&db_path)
            .map_err(|e| eyre::Report::new(e).wrap_err(EngineError::StoreUnavailable("open".to_string())))?;
        db.busy_timeout(BUSY_TIMEOUT)
            .context("Failed to set busy timeout")?;
        db.pragma_update(None, "foreign_keys", true)
            .context("Failed to enable foreign keys")?;

        Ok(Self {
            root: root.to_path_buf(),
            db,
        })
    }

    /// Change how long writes wait on a competing transaction.
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
        self.db.busy_timeout(timeout).context("Failed to set busy timeout")?;
        Ok(())
    }

    /// Path of the directory holding the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Initialize SQLite schema.
    fn init_schema(&self) -> Result<()> {
        self.db
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    user_id TEXT PRIMARY KEY,
                    display_name TEXT NOT NULL,
                    email TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_users_email ON users(email);

                CREATE TABLE IF NOT EXISTS follows (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    follower_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    followed_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL,
                    UNIQUE (follower_id, followed_id)
                );
                CREATE INDEX IF NOT EXISTS idx_follows_followed ON follows(followed_id);

                CREATE TABLE IF NOT EXISTS follow_intents (
                    user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    email TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    resolved_at TEXT,
                    PRIMARY KEY (user_id, email)
                );
                CREATE INDEX IF NOT EXISTS idx_intents_email ON follow_intents(email);

                CREATE TABLE IF NOT EXISTS photos (
                    photo_id TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    date INTEGER NOT NULL,
                    flagged INTEGER NOT NULL DEFAULT 0
                );
                CREATE INDEX IF NOT EXISTS idx_photos_owner_date ON photos(owner_id, date DESC);

                CREATE TABLE IF NOT EXISTS likes (
                    photo_id TEXT NOT NULL REFERENCES photos(photo_id) ON DELETE CASCADE,
                    user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (photo_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS comments (
                    photo_id TEXT NOT NULL REFERENCES photos(photo_id) ON DELETE CASCADE,
                    time INTEGER NOT NULL,
                    person_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    text TEXT NOT NULL,
                    PRIMARY KEY (photo_id, time)
                );

                CREATE TABLE IF NOT EXISTS flags (
                    photo_id TEXT NOT NULL REFERENCES photos(photo_id) ON DELETE CASCADE,
                    user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (photo_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS approvals (
                    photo_id TEXT NOT NULL REFERENCES photos(photo_id) ON DELETE CASCADE,
                    moderator_id TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (photo_id, moderator_id)
                );

                CREATE TABLE IF NOT EXISTS activity (
                    user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    kind TEXT NOT NULL,
                    actor_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, kind, actor_id)
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    payload TEXT NOT NULL,
                    attempts INTEGER NOT NULL DEFAULT 0,
                    status TEXT NOT NULL CHECK (status IN ('pending', 'failed')),
                    not_before INTEGER NOT NULL,
                    last_error TEXT,
                    created_ms INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_tasks_due ON tasks(status, not_before);

                CREATE TABLE IF NOT EXISTS meta (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
            "#,
            )
            .context("Failed to initialize schema")?;

        self.db.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?)",
            params![SCHEMA_VERSION],
        )?;

        Ok(())
    }

    /// Read access outside a transaction.
    pub fn db(&self) -> Db<'_> {
        Db { conn: &self.db }
    }

    /// Run `f` in one IMMEDIATE transaction. Any error rolls everything back.
    ///
    /// SQLite contention surfaces as `EngineError::TransactionConflict`,
    /// other SQLite failures as `EngineError::StoreUnavailable`.
    pub fn transaction<T>(&mut self, op: &str, f: impl FnOnce(&Db<'_>) -> Result<T>) -> Result<T> {
        let tx = self
            .db
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| classify(op, e.into()))?;

        let out = f(&Db { conn: &tx }).map_err(|e| classify(op, e))?;

        tx.commit().map_err(|e| classify(op, e.into()))?;
        Ok(out)
    }

    /// Run SQLite VACUUM.
    pub fn vacuum(&self) -> Result<()> {
        self.db.execute_batch("VACUUM").context("Failed to vacuum")?;
        Ok(())
    }
}

/// Attach the engine error kind to a failed store call.
fn classify(op: &str, err: eyre::Report) -> eyre::Report {
    if err.downcast_ref::<EngineError>().is_some() {
        return err;
    }
    let code = err
        .downcast_ref::<rusqlite::Error>()
        .and_then(|e| e.sqlite_error_code());
    match code {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            err.wrap_err(EngineError::TransactionConflict(op.to_string()))
        }
        Some(_) => err.wrap_err(EngineError::StoreUnavailable(op.to_string())),
        None => err,
    }
}

/// Format a timestamp so that text order equals time order.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Keyed accessors, usable inside or outside a transaction.
pub struct Db<'c> {
    conn: &'c Connection,
}

impl Db<'_> {
    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.conn.execute(
            "INSERT INTO users (user_id, display_name, email, created_at) VALUES (?, ?, ?, ?)",
            params![user.user_id, user.display_name, user.email, ts(user.created_at)],
        )?;
        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT user_id, display_name, email, created_at FROM users WHERE user_id = ?",
                params![user_id],
                Self::row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn user_exists(&self, user_id: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM users WHERE user_id = ?",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn update_display_name(&self, user_id: &str, display_name: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE users SET display_name = ? WHERE user_id = ?",
            params![display_name, user_id],
        )?;
        Ok(())
    }

    /// Keys-only lookup of the user registered under `email`.
    pub fn user_id_by_email(&self, email: &str) -> Result<Option<String>> {
        let id = self
            .conn
            .query_row(
                "SELECT user_id FROM users WHERE email = ? ORDER BY created_at, user_id LIMIT 1",
                params![email],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Delete a user; foreign keys cascade to everything they own.
    pub fn delete_user(&self, user_id: &str) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM users WHERE user_id = ?", params![user_id])?;
        Ok(n > 0)
    }

    fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
        let created_at: String = row.get(3)?;
        Ok(User {
            user_id: row.get(0)?,
            display_name: row.get(1)?,
            email: row.get(2)?,
            created_at: parse_ts(&created_at),
        })
    }

    // ------------------------------------------------------------------
    // Follow edges
    // ------------------------------------------------------------------

    /// Record `follower -> followed`. Returns false if the edge already existed.
    pub fn insert_follow(&self, follower_id: &str, followed_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let n = self.conn.execute(
            "INSERT OR IGNORE INTO follows (follower_id, followed_id, created_at) VALUES (?, ?, ?)",
            params![follower_id, followed_id, ts(now)],
        )?;
        Ok(n > 0)
    }

    pub fn is_following(&self, follower_id: &str, followed_id: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM follows WHERE follower_id = ? AND followed_id = ?",
            params![follower_id, followed_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Ids this user follows, in the order they were followed.
    pub fn following_ids(&self, user_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT followed_id FROM follows WHERE follower_id = ? ORDER BY seq")?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Ids following this user, in the order they followed.
    pub fn follower_ids(&self, user_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT follower_id FROM follows WHERE followed_id = ? ORDER BY seq")?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    pub fn following_users(&self, user_id: &str) -> Result<Vec<User>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT u.user_id, u.display_name, u.email, u.created_at
            FROM follows f JOIN users u ON u.user_id = f.followed_id
            WHERE f.follower_id = ?
            ORDER BY f.seq
            "#,
        )?;
        let users = stmt
            .query_map(params![user_id], Self::row_to_user)?
            .collect::<rusqlite::Result<Vec<User>>>()?;
        Ok(users)
    }

    pub fn follower_users(&self, user_id: &str) -> Result<Vec<User>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT u.user_id, u.display_name, u.email, u.created_at
            FROM follows f JOIN users u ON u.user_id = f.follower_id
            WHERE f.followed_id = ?
            ORDER BY f.seq
            "#,
        )?;
        let users = stmt
            .query_map(params![user_id], Self::row_to_user)?
            .collect::<rusqlite::Result<Vec<User>>>()?;
        Ok(users)
    }

    pub fn count_following(&self, user_id: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM follows WHERE follower_id = ?",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn count_followers(&self, user_id: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM follows WHERE followed_id = ?",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Follow intents
    // ------------------------------------------------------------------

    /// Record a wish to follow `email`. Returns false if an unresolved
    /// intent for the same address already exists; a resolved one is reopened.
    pub fn insert_intent(&self, user_id: &str, email: &str, now: DateTime<Utc>) -> Result<bool> {
        let n = self.conn.execute(
            r#"
            INSERT INTO follow_intents (user_id, email, created_at, resolved_at)
            VALUES (?1, ?2, ?3, NULL)
            ON CONFLICT (user_id, email) DO UPDATE
                SET created_at = excluded.created_at, resolved_at = NULL
                WHERE follow_intents.resolved_at IS NOT NULL
            "#,
            params![user_id, email, ts(now)],
        )?;
        Ok(n > 0)
    }

    pub fn intents_for(&self, user_id: &str) -> Result<Vec<FollowIntent>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT user_id, email, created_at, resolved_at
            FROM follow_intents WHERE user_id = ?
            ORDER BY created_at, email
            "#,
        )?;
        let intents = stmt
            .query_map(params![user_id], |row| {
                let created_at: String = row.get(2)?;
                let resolved_at: Option<String> = row.get(3)?;
                Ok(FollowIntent {
                    user_id: row.get(0)?,
                    email: row.get(1)?,
                    created_at: parse_ts(&created_at),
                    resolved_at: resolved_at.as_deref().map(parse_ts),
                })
            })?
            .collect::<rusqlite::Result<Vec<FollowIntent>>>()?;
        Ok(intents)
    }

    /// Keys-only: users with an unresolved intent to follow `email`.
    pub fn users_wanting(&self, email: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT user_id FROM follow_intents
            WHERE email = ? AND resolved_at IS NULL
            ORDER BY created_at, user_id
            "#,
        )?;
        let ids = stmt
            .query_map(params![email], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    pub fn resolve_intents(&self, email: &str, now: DateTime<Utc>) -> Result<usize> {
        let n = self.conn.execute(
            "UPDATE follow_intents SET resolved_at = ? WHERE email = ? AND resolved_at IS NULL",
            params![ts(now), email],
        )?;
        Ok(n)
    }

    pub fn delete_resolved_intents_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let n = self.conn.execute(
            "DELETE FROM follow_intents WHERE resolved_at IS NOT NULL AND resolved_at < ?",
            params![ts(cutoff)],
        )?;
        Ok(n)
    }

    // ------------------------------------------------------------------
    // Photos
    // ------------------------------------------------------------------

    /// Insert a photo. Returns false if the id was already taken.
    pub fn insert_photo(&self, photo: &Photo) -> Result<bool> {
        let n = self.conn.execute(
            "INSERT OR IGNORE INTO photos (photo_id, owner_id, date, flagged) VALUES (?, ?, ?, ?)",
            params![photo.photo_id, photo.owner_id, photo.date, photo.flagged],
        )?;
        Ok(n > 0)
    }

    pub fn get_photo(&self, photo_id: &str) -> Result<Option<Photo>> {
        let photo = self
            .conn
            .query_row(
                "SELECT photo_id, owner_id, date, flagged FROM photos WHERE photo_id = ?",
                params![photo_id],
                Self::row_to_photo,
            )
            .optional()?;
        Ok(photo)
    }

    pub fn set_flagged(&self, photo_id: &str, flagged: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE photos SET flagged = ? WHERE photo_id = ?",
            params![flagged, photo_id],
        )?;
        Ok(())
    }

    /// Unflagged photos of one owner, newest first, strictly older than `before`.
    pub fn profile_page(&self, owner_id: &str, before: Option<i64>, limit: usize) -> Result<Vec<Photo>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT photo_id, owner_id, date, flagged
            FROM photos
            WHERE owner_id = ?1
              AND flagged = 0
              AND (?2 IS NULL OR date < ?2)
            ORDER BY date DESC, photo_id DESC
            LIMIT ?3
            "#,
        )?;
        let photos = stmt
            .query_map(params![owner_id, before, limit as i64], Self::row_to_photo)?
            .collect::<rusqlite::Result<Vec<Photo>>>()?;
        Ok(photos)
    }

    /// Feed for `viewer`: their own photos plus those of everyone they
    /// follow, ordered by (date, photo_id) descending, strictly after `after`.
    pub fn timeline_page(
        &self,
        viewer_id: &str,
        after: Option<(i64, &str)>,
        limit: usize,
    ) -> Result<Vec<TimelineEntry>> {
        let (after_date, after_id) = match after {
            Some((date, id)) => (Some(date), Some(id)),
            None => (None, None),
        };
        let mut stmt = self.conn.prepare(
            r#"
            SELECT p.date, p.owner_id, u.display_name, p.photo_id,
                   (SELECT COUNT(*) FROM likes l WHERE l.photo_id = p.photo_id),
                   EXISTS (SELECT 1 FROM likes l WHERE l.photo_id = p.photo_id AND l.user_id = ?1)
            FROM photos p JOIN users u ON u.user_id = p.owner_id
            WHERE p.flagged = 0
              AND (p.owner_id = ?1
                   OR p.owner_id IN (SELECT followed_id FROM follows WHERE follower_id = ?1))
              AND (?2 IS NULL OR p.date < ?2 OR (p.date = ?2 AND p.photo_id < ?3))
            ORDER BY p.date DESC, p.photo_id DESC
            LIMIT ?4
            "#,
        )?;
        let entries = stmt
            .query_map(params![viewer_id, after_date, after_id, limit as i64], |row| {
                Ok(TimelineEntry {
                    created: row.get(0)?,
                    user_id: row.get(1)?,
                    name: row.get(2)?,
                    photo_id: row.get(3)?,
                    likes: row.get(4)?,
                    i_like: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<TimelineEntry>>>()?;
        Ok(entries)
    }

    fn row_to_photo(row: &rusqlite::Row) -> rusqlite::Result<Photo> {
        Ok(Photo {
            photo_id: row.get(0)?,
            owner_id: row.get(1)?,
            date: row.get(2)?,
            flagged: row.get(3)?,
        })
    }

    // ------------------------------------------------------------------
    // Likes
    // ------------------------------------------------------------------

    /// Returns false if the user already liked the photo.
    pub fn insert_like(&self, photo_id: &str, user_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let n = self.conn.execute(
            "INSERT OR IGNORE INTO likes (photo_id, user_id, created_at) VALUES (?, ?, ?)",
            params![photo_id, user_id, ts(now)],
        )?;
        Ok(n > 0)
    }

    /// Returns false if there was nothing to remove.
    pub fn delete_like(&self, photo_id: &str, user_id: &str) -> Result<bool> {
        let n = self.conn.execute(
            "DELETE FROM likes WHERE photo_id = ? AND user_id = ?",
            params![photo_id, user_id],
        )?;
        Ok(n > 0)
    }

    pub fn count_likes(&self, photo_id: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM likes WHERE photo_id = ?",
            params![photo_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn has_liked(&self, photo_id: &str, user_id: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM likes WHERE photo_id = ? AND user_id = ?",
            params![photo_id, user_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // ------------------------------------------------------------------
    // Comments
    // ------------------------------------------------------------------

    pub fn last_comment_time(&self, photo_id: &str) -> Result<Option<i64>> {
        let time = self.conn.query_row(
            "SELECT MAX(time) FROM comments WHERE photo_id = ?",
            params![photo_id],
            |row| row.get(0),
        )?;
        Ok(time)
    }

    pub fn insert_comment(&self, photo_id: &str, comment: &Comment) -> Result<()> {
        self.conn.execute(
            "INSERT INTO comments (photo_id, time, person_id, text) VALUES (?, ?, ?, ?)",
            params![photo_id, comment.time, comment.person_id, comment.text],
        )?;
        Ok(())
    }

    pub fn comments_for(&self, photo_id: &str) -> Result<Vec<Comment>> {
        let mut stmt = self
            .conn
            .prepare("SELECT person_id, text, time FROM comments WHERE photo_id = ? ORDER BY time")?;
        let comments = stmt
            .query_map(params![photo_id], |row| {
                Ok(Comment {
                    person_id: row.get(0)?,
                    text: row.get(1)?,
                    time: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<Comment>>>()?;
        Ok(comments)
    }

    // ------------------------------------------------------------------
    // Moderation
    // ------------------------------------------------------------------

    pub fn insert_flag(&self, photo_id: &str, user_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let n = self.conn.execute(
            "INSERT OR IGNORE INTO flags (photo_id, user_id, created_at) VALUES (?, ?, ?)",
            params![photo_id, user_id, ts(now)],
        )?;
        Ok(n > 0)
    }

    pub fn insert_approval(&self, photo_id: &str, moderator_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let n = self.conn.execute(
            "INSERT OR IGNORE INTO approvals (photo_id, moderator_id, created_at) VALUES (?, ?, ?)",
            params![photo_id, moderator_id, ts(now)],
        )?;
        Ok(n > 0)
    }

    pub fn count_approvals(&self, photo_id: &str) -> Result<u32> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM approvals WHERE photo_id = ?",
            params![photo_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn clear_approvals(&self, photo_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM approvals WHERE photo_id = ?", params![photo_id])?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Activity
    // ------------------------------------------------------------------

    /// Returns false if the same activity was already recorded.
    pub fn insert_activity(&self, activity: &Activity) -> Result<bool> {
        let n = self.conn.execute(
            "INSERT OR IGNORE INTO activity (user_id, kind, actor_id, created_at) VALUES (?, ?, ?, ?)",
            params![
                activity.user_id,
                activity.kind,
                activity.actor_id,
                ts(activity.created_at)
            ],
        )?;
        Ok(n > 0)
    }

    pub fn activity_for(&self, user_id: &str) -> Result<Vec<Activity>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT user_id, kind, actor_id, created_at
            FROM activity WHERE user_id = ?
            ORDER BY created_at DESC, actor_id
            "#,
        )?;
        let activity = stmt
            .query_map(params![user_id], |row| {
                let created_at: String = row.get(3)?;
                Ok(Activity {
                    user_id: row.get(0)?,
                    kind: row.get(1)?,
                    actor_id: row.get(2)?,
                    created_at: parse_ts(&created_at),
                })
            })?
            .collect::<rusqlite::Result<Vec<Activity>>>()?;
        Ok(activity)
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    pub fn enqueue_task(&self, payload: &str, now_ms: i64) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO tasks (payload, attempts, status, not_before, created_ms)
            VALUES (?, 0, 'pending', ?, ?)
            "#,
            params![payload, now_ms, now_ms],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn due_tasks(&self, now_ms: i64, limit: usize) -> Result<Vec<TaskRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, payload, attempts, status, not_before, last_error
            FROM tasks
            WHERE status = 'pending' AND not_before <= ?
            ORDER BY id
            LIMIT ?
            "#,
        )?;
        let tasks = stmt
            .query_map(params![now_ms, limit as i64], Self::row_to_task)?
            .collect::<rusqlite::Result<Vec<TaskRecord>>>()?;
        Ok(tasks)
    }

    pub fn list_tasks(&self, status: TaskStatus) -> Result<Vec<TaskRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, payload, attempts, status, not_before, last_error
            FROM tasks WHERE status = ?
            ORDER BY id
            "#,
        )?;
        let tasks = stmt
            .query_map(params![status.as_str()], Self::row_to_task)?
            .collect::<rusqlite::Result<Vec<TaskRecord>>>()?;
        Ok(tasks)
    }

    pub fn delete_task(&self, id: i64) -> Result<()> {
        self.conn.execute("DELETE FROM tasks WHERE id = ?", params![id])?;
        Ok(())
    }

    pub fn reschedule_task(&self, id: i64, attempts: u32, not_before: i64, error: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE tasks SET attempts = ?, not_before = ?, last_error = ? WHERE id = ?",
            params![attempts, not_before, error, id],
        )?;
        Ok(())
    }

    pub fn fail_task(&self, id: i64, attempts: u32, error: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE tasks SET status = 'failed', attempts = ?, last_error = ? WHERE id = ?",
            params![attempts, error, id],
        )?;
        Ok(())
    }

    pub fn delete_failed_tasks_before(&self, cutoff_ms: i64) -> Result<usize> {
        let n = self.conn.execute(
            "DELETE FROM tasks WHERE status = 'failed' AND created_ms < ?",
            params![cutoff_ms],
        )?;
        Ok(n)
    }

    fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<TaskRecord> {
        let status: String = row.get(3)?;
        Ok(TaskRecord {
            id: row.get(0)?,
            payload: row.get(1)?,
            attempts: row.get(2)?,
            status: match status.as_str() {
                "failed" => TaskStatus::Failed,
                _ => TaskStatus::Pending,
            },
            not_before: row.get(4)?,
            last_error: row.get(5)?,
        })
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    pub fn count_users(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM users")
    }

    pub fn count_photos(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM photos")
    }

    pub fn count_follows(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM follows")
    }

    fn count(&self, sql: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_storage() -> (TempDir, Storage) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::init(temp_dir.path()).unwrap();
        (temp_dir, storage)
    }

    fn user(id: &str) -> User {
        User {
            user_id: id.to_string(),
            display_name: id.to_uppercase(),
            email: format!("{}@example.com", id),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_init_creates_files() {
        let temp_dir = TempDir::new().unwrap();
        let _storage = Storage::init(temp_dir.path()).unwrap();

        assert!(temp_dir.path().join(ABELANA_DIR).exists());
        assert!(temp_dir.path().join(ABELANA_DIR).join(DB_FILE).exists());
    }

    #[test]
    fn test_open_without_init_fails() {
        let temp_dir = TempDir::new().unwrap();
        assert!(Storage::open(temp_dir.path()).is_err());
    }

    #[test]
    fn test_insert_and_get_user() {
        let (_temp_dir, mut storage) = setup_test_storage();

        storage.transaction("test", |db| db.insert_user(&user("alice"))).unwrap();

        let alice = storage.db().get_user("alice").unwrap().unwrap();
        assert_eq!(alice.display_name, "ALICE");
        assert_eq!(
            storage.db().user_id_by_email("alice@example.com").unwrap(),
            Some("alice".to_string())
        );
        assert!(storage.db().get_user("bob").unwrap().is_none());
    }

    #[test]
    fn test_follow_edge_is_unique() {
        let (_temp_dir, mut storage) = setup_test_storage();
        let now = Utc::now();

        storage
            .transaction("test", |db| {
                db.insert_user(&user("alice"))?;
                db.insert_user(&user("bob"))?;
                assert!(db.insert_follow("alice", "bob", now)?);
                assert!(!db.insert_follow("alice", "bob", now)?);
                Ok(())
            })
            .unwrap();

        let db = storage.db();
        assert_eq!(db.following_ids("alice").unwrap(), vec!["bob"]);
        assert_eq!(db.follower_ids("bob").unwrap(), vec!["alice"]);
        assert_eq!(db.count_following("alice").unwrap(), 1);
        assert_eq!(db.count_followers("alice").unwrap(), 0);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let (_temp_dir, mut storage) = setup_test_storage();

        let result: Result<()> = storage.transaction("test", |db| {
            db.insert_user(&user("alice"))?;
            eyre::bail!("abort");
        });

        assert!(result.is_err());
        assert!(storage.db().get_user("alice").unwrap().is_none());
    }

    #[test]
    fn test_intent_reopens_after_resolution() {
        let (_temp_dir, mut storage) = setup_test_storage();
        let now = Utc::now();

        storage
            .transaction("test", |db| {
                db.insert_user(&user("alice"))?;
                assert!(db.insert_intent("alice", "x@example.com", now)?);
                assert!(!db.insert_intent("alice", "x@example.com", now)?);
                assert_eq!(db.resolve_intents("x@example.com", now)?, 1);
                assert!(db.users_wanting("x@example.com")?.is_empty());
                assert!(db.insert_intent("alice", "x@example.com", now)?);
                Ok(())
            })
            .unwrap();

        assert_eq!(storage.db().users_wanting("x@example.com").unwrap(), vec!["alice"]);
    }

    #[test]
    fn test_delete_user_cascades() {
        let (_temp_dir, mut storage) = setup_test_storage();
        let now = Utc::now();

        storage
            .transaction("test", |db| {
                db.insert_user(&user("alice"))?;
                db.insert_user(&user("bob"))?;
                db.insert_follow("bob", "alice", now)?;
                db.insert_photo(&Photo {
                    photo_id: "alice.p1".to_string(),
                    owner_id: "alice".to_string(),
                    date: 1,
                    flagged: false,
                })?;
                db.insert_like("alice.p1", "bob", now)?;
                Ok(())
            })
            .unwrap();

        storage.transaction("test", |db| db.delete_user("alice")).unwrap();

        let db = storage.db();
        assert!(db.get_photo("alice.p1").unwrap().is_none());
        assert_eq!(db.count_likes("alice.p1").unwrap(), 0);
        assert_eq!(db.count_following("bob").unwrap(), 0);
    }

    #[test]
    fn test_classify_busy_as_conflict() {
        let busy = rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY), None);
        let report = classify("follow_by_id", busy.into());
        assert_eq!(
            report.downcast_ref::<EngineError>(),
            Some(&EngineError::TransactionConflict("follow_by_id".to_string()))
        );
    }

    #[test]
    fn test_classify_keeps_engine_errors() {
        let report = classify("like", eyre::eyre!(EngineError::photo_not_found("a.b")));
        assert_eq!(
            report.downcast_ref::<EngineError>(),
            Some(&EngineError::photo_not_found("a.b"))
        );
    }

    #[test]
    fn test_timestamps_sort_as_text() {
        let early = DateTime::parse_from_rfc3339("2024-01-01T00:00:05Z").unwrap().with_timezone(&Utc);
        let late = DateTime::parse_from_rfc3339("2024-01-01T00:00:05.500Z").unwrap().with_timezone(&Utc);
        assert!(ts(early) < ts(late));
    }
}
