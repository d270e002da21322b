//! Timeline and profile reader: paginated, newest-first photo feeds.

use crate::store::Store;
use crate::types::{PhotoId, TimelineEntry};
use eyre::{Context, Result};

/// Parse a `lastDate` cursor. Empty or "0" means the first page; anything
/// unparseable is logged and treated as the first page too.
fn parse_date_cursor(user_id: &str, last_date: &str) -> Option<i64> {
    let last_date = last_date.trim();
    if last_date.is_empty() || last_date == "0" {
        return None;
    }
    match last_date.parse::<i64>() {
        Ok(date) => Some(date),
        Err(e) => {
            log::warn!("profile_for_user {}: ignoring cursor '{}': {}", user_id, last_date, e);
            None
        }
    }
}

impl Store {
    /// One page of a user's own photos, newest first, strictly older than
    /// `last_date` (unix ms). Like counts are not computed here: entries
    /// carry `likes = -1`.
    pub fn profile_for_user(&self, user_id: &str, last_date: &str) -> Result<Vec<TimelineEntry>> {
        let db = self.storage.db();

        let name = match db.get_user(user_id) {
            Ok(Some(user)) => user.display_name,
            Ok(None) => {
                log::warn!("profile_for_user: user {} not found", user_id);
                String::new()
            }
            Err(e) => {
                log::error!("profile_for_user {}: {:#}", user_id, e);
                String::new()
            }
        };

        let before = parse_date_cursor(user_id, last_date);
        let photos = db
            .profile_page(user_id, before, self.config.timeline_batch_size)
            .wrap_err_with(|| format!("Failed to read profile of {}", user_id))?;

        let entries: Vec<TimelineEntry> = photos
            .into_iter()
            .map(|p| TimelineEntry {
                created: p.date,
                user_id: user_id.to_string(),
                name: name.clone(),
                photo_id: p.photo_id,
                likes: -1,
                i_like: false,
            })
            .collect();

        if self.config.verbose {
            log::info!("profile_for_user: {} -> {} entries", user_id, entries.len());
        }
        Ok(entries)
    }

    /// One page of the user's feed: their photos and those of everyone they
    /// follow, newest first, with live like counts and the caller's own
    /// like flag. `last_id` is the photo id of the previous page's last
    /// entry; empty, "0", or an unknown id starts from the top.
    pub fn get_timeline(&self, user_id: &str, last_id: &str) -> Result<Vec<TimelineEntry>> {
        let db = self.storage.db();

        let last_id = last_id.trim();
        let cursor = if last_id.is_empty() || last_id == "0" {
            None
        } else if last_id.parse::<PhotoId>().is_err() {
            log::warn!("get_timeline {}: ignoring malformed cursor '{}'", user_id, last_id);
            None
        } else {
            match db.get_photo(last_id)? {
                Some(photo) => Some(photo.date),
                None => {
                    log::warn!("get_timeline {}: cursor photo {} not found", user_id, last_id);
                    None
                }
            }
        };

        let after = cursor.map(|date| (date, last_id));
        let entries = db
            .timeline_page(user_id, after, self.config.timeline_batch_size)
            .wrap_err_with(|| format!("Failed to read timeline of {}", user_id))?;

        if self.config.verbose {
            log::info!("get_timeline: {} -> {} entries", user_id, entries.len());
        }
        Ok(entries)
    }
}
