//! Abelana: a social graph and photo engagement engine.
//!
//! Users follow each other by id or by e-mail address (an address with no
//! account yet is remembered and resolved when its owner signs up). Photos
//! collect likes, comments and moderation flags, and every user gets a
//! paginated timeline of their own photos plus those of everyone they follow.
//!
//! State lives in a SQLite database under `.abelana/`. Follow-up work such
//! as fan-out of pending follows runs through a durable task queue drained
//! by the daemon or by [`Store::drain_tasks`].
//!
//! # Example
//!
//! ```no_run
//! use abelana::{FollowOutcome, Store};
//! use std::path::Path;
//!
//! let mut store = Store::init(Path::new(".")).unwrap();
//!
//! store.register_user("alice", "Alice", "alice@example.com").unwrap();
//!
//! // Bob has not signed up yet: the follow waits for him
//! let outcome = store.follow("alice", "bob@example.com").unwrap();
//! assert!(matches!(outcome, FollowOutcome::Pending { .. }));
//!
//! store.register_user("bob", "Bob", "bob@example.com").unwrap();
//! store.drain_until_idle(10).unwrap();
//!
//! let stats = store.statistics("alice");
//! assert_eq!(stats.following, 1);
//!
//! store.add_photo("bob.p1").unwrap();
//! store.like("alice", "bob.p1").unwrap();
//! let timeline = store.get_timeline("alice", "").unwrap();
//! assert!(timeline[0].i_like);
//! ```

mod engagement;
mod graph;
mod id;
mod reader;
mod storage;
mod store;

pub mod batch;
pub mod client;
pub mod compact;
pub mod config;
pub mod daemon;
pub mod error;
pub mod protocol;
pub mod tasks;
pub mod types;
pub mod vacuum;

// Re-export public API
pub use batch::{BatchFollowResult, StoreBatchExt};
pub use client::Client;
pub use compact::{CompactConfig, CompactResult, StoreCompactExt};
pub use config::Config;
pub use daemon::{Daemon, DaemonConfig, is_daemon_running, start_daemon};
pub use error::{EngineError, engine_error};
pub use protocol::{Request, Response};
pub use storage::ABELANA_DIR;
pub use store::Store;
pub use tasks::{DrainReport, Task, TaskRecord, TaskStatus};
pub use types::{
    Activity, Comment, FollowIntent, FollowOutcome, ModerationState, Person, Photo, PhotoId, Stats, TimelineEntry,
    User, ValidationError,
};
pub use vacuum::{VacuumResult, vacuum};
