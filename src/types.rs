//! Core data types for the Abelana social graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length of a display name.
const MAX_DISPLAY_NAME_LEN: usize = 100;

/// Maximum length of a comment body.
const MAX_COMMENT_LEN: usize = 500;

/// A registered member of the network. Root of its entity group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    /// Stable identity from the auth provider
    pub user_id: String,

    /// Name shown next to photos and in follower lists
    pub display_name: String,

    /// Address other users can follow by
    pub email: String,

    /// When the user first registered
    pub created_at: DateTime<Utc>,
}

/// Composite photo identifier: `<ownerUserID>.<suffix>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhotoId {
    owner: String,
    suffix: String,
}

impl PhotoId {
    /// Build an id from its two segments.
    pub fn new(owner: impl Into<String>, suffix: impl Into<String>) -> Result<Self, ValidationError> {
        let id = Self {
            owner: owner.into(),
            suffix: suffix.into(),
        };
        if id.owner.is_empty() || id.suffix.is_empty() || id.owner.contains('.') || id.suffix.contains('.') {
            return Err(ValidationError::MalformedPhotoId(id.to_string()));
        }
        Ok(id)
    }

    /// The user that owns this photo.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The random part of the id.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }
}

impl FromStr for PhotoId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [owner, suffix] if !owner.is_empty() && !suffix.is_empty() => Ok(Self {
                owner: owner.to_string(),
                suffix: suffix.to_string(),
            }),
            _ => Err(ValidationError::MalformedPhotoId(s.to_string())),
        }
    }
}

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.suffix)
    }
}

/// A photo, owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Photo {
    pub photo_id: String,
    pub owner_id: String,

    /// Creation time, unix milliseconds
    pub date: i64,

    /// Hidden from every timeline until moderators approve it
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub flagged: bool,
}

/// A user's comment on a photo.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    #[serde(rename = "personid")]
    pub person_id: String,
    pub text: String,

    /// Unix milliseconds, strictly increasing per photo
    pub time: i64,
}

/// Read-time projection of a photo for presentation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineEntry {
    pub created: i64,
    #[serde(rename = "userid")]
    pub user_id: String,
    pub name: String,
    #[serde(rename = "photoid")]
    pub photo_id: String,

    /// Like count, or -1 where it was deliberately not computed
    pub likes: i64,
    #[serde(rename = "ilike")]
    pub i_like: bool,
}

/// Follow counts for a user. `{-1, -1}` signals a failed lookup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stats {
    pub following: i64,
    pub followers: i64,
}

impl Stats {
    /// Degraded response for a user that could not be read.
    pub fn unknown() -> Self {
        Self {
            following: -1,
            followers: -1,
        }
    }
}

/// Public view of a user, as listed among follows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Person {
    #[serde(rename = "personid")]
    pub person_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    pub name: String,
}

impl From<User> for Person {
    fn from(user: User) -> Self {
        Self {
            person_id: user.user_id,
            email: user.email,
            name: user.display_name,
        }
    }
}

/// A pending wish to follow someone who has not joined yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FollowIntent {
    pub user_id: String,
    pub email: String,
    pub created_at: DateTime<Utc>,

    /// Set once the address was matched to a registered user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Result of following by e-mail address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FollowOutcome {
    /// The address belongs to a user; the edge exists now.
    Followed { user_id: String },

    /// Nobody has the address yet; an intent was recorded.
    Pending { email: String },
}

/// Something that happened to a user, e.g. a new follower.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Activity {
    pub user_id: String,
    pub kind: String,
    pub actor_id: String,
    pub created_at: DateTime<Utc>,
}

/// Moderation status of a photo after an approval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModerationState {
    pub flagged: bool,
    pub approvals: u32,
}

/// Validation errors for user-supplied fields.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyUserId,
    InvalidUserId(String),
    EmptyDisplayName,
    DisplayNameTooLong,
    InvalidEmail(String),
    MalformedPhotoId(String),
    EmptyComment,
    CommentTooLong,
    InvalidCharacters,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyUserId => write!(f, "user id cannot be empty"),
            ValidationError::InvalidUserId(id) => {
                write!(f, "invalid user id '{}': must not contain '.' or control characters", id)
            }
            ValidationError::EmptyDisplayName => write!(f, "display name cannot be empty"),
            ValidationError::DisplayNameTooLong => {
                write!(f, "display name exceeds {} characters", MAX_DISPLAY_NAME_LEN)
            }
            ValidationError::InvalidEmail(email) => write!(f, "invalid email address '{}'", email),
            ValidationError::MalformedPhotoId(id) => {
                write!(f, "malformed photo id '{}': expected <owner>.<suffix>", id)
            }
            ValidationError::EmptyComment => write!(f, "comment cannot be empty"),
            ValidationError::CommentTooLong => write!(f, "comment exceeds {} characters", MAX_COMMENT_LEN),
            ValidationError::InvalidCharacters => write!(f, "text contains control characters"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Check a user id: non-empty, no `.` separator, no control characters.
pub fn validate_user_id(user_id: &str) -> Result<(), ValidationError> {
    if user_id.is_empty() {
        return Err(ValidationError::EmptyUserId);
    }
    if user_id.contains('.') || user_id.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(ValidationError::InvalidUserId(user_id.to_string()));
    }
    Ok(())
}

/// Check an address: one `@`, non-empty local part and domain, no whitespace.
pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::InvalidEmail(email.to_string());
    if email.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid());
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => Ok(()),
        _ => Err(invalid()),
    }
}

/// Check a display name: 1-100 chars, no control characters.
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyDisplayName);
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(ValidationError::DisplayNameTooLong);
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(ValidationError::InvalidCharacters);
    }
    Ok(())
}

/// Check a comment body: 1-500 chars, newlines allowed.
pub fn validate_comment(text: &str) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::EmptyComment);
    }
    if text.chars().count() > MAX_COMMENT_LEN {
        return Err(ValidationError::CommentTooLong);
    }
    if text.chars().any(|c| c.is_control() && c != '\n') {
        return Err(ValidationError::InvalidCharacters);
    }
    Ok(())
}
