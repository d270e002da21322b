//! Engagement engine: likes, comments, and moderation flags on photos.

use crate::error::EngineError;
use crate::store::Store;
use crate::types::{Comment, ModerationState, PhotoId, validate_comment};
use chrono::Utc;
use eyre::Result;

/// Parse a photo id, mapping a bad shape to `MalformedInput`.
fn parse_photo_id(photo_id: &str) -> Result<PhotoId> {
    photo_id.parse().map_err(|e| eyre::eyre!(EngineError::from(e)))
}

impl Store {
    /// Record that `user_id` likes the photo. Liking twice counts once;
    /// returns true only when a new like was written.
    pub fn like(&mut self, user_id: &str, photo_id: &str) -> Result<bool> {
        parse_photo_id(photo_id)?;

        let verbose = self.config.verbose;
        self.storage.transaction("like", |db| {
            if db.get_photo(photo_id)?.is_none() {
                return Err(eyre::eyre!(EngineError::photo_not_found(photo_id)));
            }
            if !db.user_exists(user_id)? {
                return Err(eyre::eyre!(EngineError::user_not_found(user_id)));
            }
            let added = db.insert_like(photo_id, user_id, Utc::now())?;
            if verbose {
                log::info!("like: {} likes {} (new: {})", user_id, photo_id, added);
            }
            Ok(added)
        })
    }

    /// Remove a like. Removing a like that does not exist succeeds; returns
    /// true only when something was removed.
    pub fn unlike(&mut self, user_id: &str, photo_id: &str) -> Result<bool> {
        parse_photo_id(photo_id)?;

        let verbose = self.config.verbose;
        self.storage.transaction("unlike", |db| {
            let removed = db.delete_like(photo_id, user_id)?;
            if verbose {
                log::info!("unlike: {} on {} (removed: {})", user_id, photo_id, removed);
            }
            Ok(removed)
        })
    }

    /// Number of likes on a photo.
    pub fn like_count(&self, photo_id: &str) -> Result<i64> {
        parse_photo_id(photo_id)?;
        self.storage.db().count_likes(photo_id)
    }

    pub fn has_liked(&self, user_id: &str, photo_id: &str) -> Result<bool> {
        self.storage.db().has_liked(photo_id, user_id)
    }

    /// Flag a photo for moderation. It disappears from every timeline until
    /// enough moderators approve it; a new flag discards earlier approvals.
    pub fn flag(&mut self, user_id: &str, photo_id: &str) -> Result<()> {
        parse_photo_id(photo_id)?;

        self.storage.transaction("flag", |db| {
            if db.get_photo(photo_id)?.is_none() {
                return Err(eyre::eyre!(EngineError::photo_not_found(photo_id)));
            }
            if !db.user_exists(user_id)? {
                return Err(eyre::eyre!(EngineError::user_not_found(user_id)));
            }
            db.insert_flag(photo_id, user_id, Utc::now())?;
            db.clear_approvals(photo_id)?;
            db.set_flagged(photo_id, true)?;
            Ok(())
        })?;

        log::info!("Photo {} flagged by {}", photo_id, user_id);
        Ok(())
    }

    /// Record a moderator's approval of a flagged photo. Once
    /// `approvals_required` distinct moderators approve, it is shown again.
    pub fn approve(&mut self, moderator_id: &str, photo_id: &str) -> Result<ModerationState> {
        parse_photo_id(photo_id)?;

        let required = self.config.approvals_required;
        let state = self.storage.transaction("approve", |db| {
            let photo = db
                .get_photo(photo_id)?
                .ok_or_else(|| eyre::eyre!(EngineError::photo_not_found(photo_id)))?;
            if !photo.flagged {
                return Ok(ModerationState {
                    flagged: false,
                    approvals: db.count_approvals(photo_id)?,
                });
            }

            db.insert_approval(photo_id, moderator_id, Utc::now())?;
            let approvals = db.count_approvals(photo_id)?;
            let flagged = approvals < required;
            if !flagged {
                db.set_flagged(photo_id, false)?;
            }
            Ok(ModerationState { flagged, approvals })
        })?;

        if !state.flagged {
            log::info!("Photo {} cleared by moderation", photo_id);
        }
        Ok(state)
    }

    /// Add a comment. Its `time` is unique and increasing per photo.
    pub fn add_comment(&mut self, person_id: &str, photo_id: &str, text: &str) -> Result<Comment> {
        parse_photo_id(photo_id)?;
        validate_comment(text).map_err(|e| eyre::eyre!(EngineError::from(e)))?;

        self.storage.transaction("add_comment", |db| {
            if db.get_photo(photo_id)?.is_none() {
                return Err(eyre::eyre!(EngineError::photo_not_found(photo_id)));
            }
            if !db.user_exists(person_id)? {
                return Err(eyre::eyre!(EngineError::user_not_found(person_id)));
            }

            let now = Utc::now().timestamp_millis();
            let time = match db.last_comment_time(photo_id)? {
                Some(last) if last >= now => last + 1,
                _ => now,
            };
            let comment = Comment {
                person_id: person_id.to_string(),
                text: text.to_string(),
                time,
            };
            db.insert_comment(photo_id, &comment)?;
            Ok(comment)
        })
    }

    /// Comments on a photo, oldest first.
    pub fn get_comments(&self, photo_id: &str) -> Result<Vec<Comment>> {
        parse_photo_id(photo_id)?;
        self.storage.db().comments_for(photo_id)
    }
}
