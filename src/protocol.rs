//! IPC protocol types for daemon communication.

use crate::tasks::DrainReport;
use crate::types::{Comment, FollowOutcome, ModerationState, Person, Photo, Stats, TimelineEntry, User};
use serde::{Deserialize, Serialize};

/// Request sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Sign up or refresh a user.
    Register {
        user_id: String,
        display_name: String,
        email: String,
    },

    /// Follow a user by ID.
    FollowById { user_id: String, following_id: String },

    /// Follow by e-mail address.
    Follow { user_id: String, email: String },

    /// Follow counts.
    Stats { user_id: String },

    /// Users this user follows.
    Following { user_id: String },

    /// Public view of one user.
    Person { person_id: String },

    /// Ingest an uploaded photo.
    AddPhoto { photo_id: String },

    /// Like a photo.
    Like { user_id: String, photo_id: String },

    /// Remove a like.
    Unlike { user_id: String, photo_id: String },

    /// Flag a photo for review.
    Flag { user_id: String, photo_id: String },

    /// Moderator approval of a flagged photo.
    Approve { moderator_id: String, photo_id: String },

    /// Comment on a photo.
    Comment {
        person_id: String,
        photo_id: String,
        text: String,
    },

    /// Comments on a photo.
    Comments { photo_id: String },

    /// A user's own photos.
    Profile { user_id: String, last_date: String },

    /// A user's feed.
    Timeline { user_id: String, last_id: String },

    /// Delete a user and everything they own.
    Wipeout { user_id: String },

    /// Run due tasks now.
    Drain,

    /// Shutdown the daemon.
    Shutdown,

    /// Ping to check if daemon is alive.
    Ping,
}

/// Response sent from daemon to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    User { user: User },

    Followed { outcome: FollowOutcome },

    /// Whether a follow-by-id or like created something new.
    Changed { changed: bool },

    Stats { stats: Stats },

    Persons { persons: Vec<Person> },

    Person { person: Person },

    Photo { photo: Photo },

    Moderation { state: ModerationState },

    Comment { comment: Comment },

    Comments { comments: Vec<Comment> },

    Timeline { entries: Vec<TimelineEntry> },

    Drained { report: DrainReport },

    /// Entity not found.
    NotFound { id: String },

    /// Operation succeeded.
    Ok,

    /// Pong response to ping.
    Pong,

    /// Error response.
    Error { message: String },
}

impl Response {
    /// Create an error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
