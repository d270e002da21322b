//! Batch operations for bulk follows.

use crate::error::{EngineError, engine_error};
use crate::store::Store;
use crate::types::FollowOutcome;
use eyre::Result;

/// Result of a batch follow operation.
#[derive(Debug, Default)]
pub struct BatchFollowResult {
    /// User IDs now followed.
    pub followed: Vec<String>,
    /// Addresses with no account yet; an intent was recorded.
    pub pending: Vec<String>,
    /// Errors that occurred (email, error message).
    pub errors: Vec<(String, String)>,
}

/// Extension trait for batch operations on Store.
pub trait StoreBatchExt {
    /// Follow every address in `emails`, collecting per-address failures
    /// instead of stopping at the first one.
    fn follow_all(&mut self, user_id: &str, emails: &[&str]) -> Result<BatchFollowResult>;
}

impl StoreBatchExt for Store {
    fn follow_all(&mut self, user_id: &str, emails: &[&str]) -> Result<BatchFollowResult> {
        let mut result = BatchFollowResult::default();

        for email in emails {
            match self.follow(user_id, email) {
                Ok(FollowOutcome::Followed { user_id }) => result.followed.push(user_id),
                Ok(FollowOutcome::Pending { email }) => result.pending.push(email),
                // Storage trouble aborts the batch; bad input only skips one entry.
                Err(e) if engine_error(&e).is_some_and(EngineError::is_store_failure) => return Err(e),
                Err(e) => result.errors.push((email.to_string(), format!("{:#}", e))),
            }
        }

        log::info!(
            "follow_all {}: {} followed, {} pending, {} errors",
            user_id,
            result.followed.len(),
            result.pending.len(),
            result.errors.len()
        );
        Ok(result)
    }
}
