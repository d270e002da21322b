//! Deferred task runner: a durable at-least-once work queue.
//!
//! Tasks live in the `tasks` table next to the entities they touch, so a
//! task enqueued inside a transaction only becomes visible if that
//! transaction commits. Draining deletes a task after its handler
//! succeeds; a crash in between redelivers it, so every handler must be
//! idempotent.
//!
//! A handler that hits store contention stays pending no matter how often
//! it fails. One that fails on the request itself (a deleted user, a
//! self-follow) is dead-lettered on the spot.

use crate::error::{EngineError, engine_error};
use crate::store::Store;
use chrono::Utc;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Work that runs after the request that scheduled it has returned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    /// A user with `email` joined as `user_id`; resolve pending follows.
    FindFollows { user_id: String, email: String },

    /// Establish the edge `user_id -> following_id`.
    FollowById { user_id: String, following_id: String },

    /// Tell `following_id` that `user_id` follows them now.
    NowFollows { user_id: String, following_id: String },
}

impl Task {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Task::FindFollows { .. } => "find_follows",
            Task::FollowById { .. } => "follow_by_id",
            Task::NowFollows { .. } => "now_follows",
        }
    }
}

/// Queue state of a task row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Failed => "failed",
        }
    }
}

/// A task row as stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    pub id: i64,
    pub payload: String,
    pub attempts: u32,
    pub status: TaskStatus,

    /// Earliest run time, unix milliseconds
    pub not_before: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Outcome of one drain round.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrainReport {
    /// Handlers that succeeded.
    pub completed: usize,
    /// Handlers that failed and were rescheduled.
    pub retried: usize,
    /// Tasks moved to the dead-letter state.
    pub failed: usize,
}

impl DrainReport {
    pub fn ran(&self) -> usize {
        self.completed + self.retried + self.failed
    }

    fn absorb(&mut self, other: DrainReport) {
        self.completed += other.completed;
        self.retried += other.retried;
        self.failed += other.failed;
    }
}

impl Store {
    /// Queue a task outside any transaction. Best effort: the caller decides
    /// whether a failure matters.
    pub fn enqueue(&mut self, task: &Task) -> Result<i64> {
        let payload = serde_json::to_string(task).context("Failed to serialize task")?;
        let now = Utc::now().timestamp_millis();
        self.storage.transaction("enqueue", |db| db.enqueue_task(&payload, now))
    }

    /// Run one round of due tasks.
    pub fn drain_tasks(&mut self) -> Result<DrainReport> {
        let now = Utc::now().timestamp_millis();
        let due = self
            .storage
            .db()
            .due_tasks(now, self.config.drain_batch_size)
            .context("Failed to load due tasks")?;

        let mut report = DrainReport::default();
        for record in due {
            let task = match serde_json::from_str::<Task>(&record.payload) {
                Ok(task) => task,
                Err(e) => {
                    log::error!("Task {} has an undecodable payload: {}", record.id, e);
                    let message = format!("undecodable payload: {}", e);
                    self.storage
                        .transaction("fail_task", |db| db.fail_task(record.id, record.attempts + 1, &message))?;
                    report.failed += 1;
                    continue;
                }
            };

            let err = match self.run_task(&task) {
                Ok(()) => {
                    self.storage
                        .transaction("complete_task", |db| db.delete_task(record.id))?;
                    report.completed += 1;
                    continue;
                }
                Err(e) => e,
            };

            let attempts = record.attempts + 1;
            let message = format!("{:#}", err);
            match disposition(&err, attempts, self.config.task_max_attempts) {
                Disposition::DeadLetter => {
                    log::error!(
                        "Task {} ({}) failed permanently after {} attempts: {}",
                        record.id,
                        task.name(),
                        attempts,
                        message
                    );
                    self.storage
                        .transaction("fail_task", |db| db.fail_task(record.id, attempts, &message))?;
                    report.failed += 1;
                }
                Disposition::Retry => {
                    let not_before = Utc::now().timestamp_millis() + self.config.retry_delay_ms(attempts);
                    log::warn!("Task {} ({}) failed, attempt {}: {}", record.id, task.name(), attempts, message);
                    report.retried += 1;
                    let rescheduled = self.storage.transaction("retry_task", |db| {
                        db.reschedule_task(record.id, attempts, not_before, &message)
                    });
                    match rescheduled {
                        Ok(()) => {}
                        Err(e) if engine_error(&e).is_some_and(EngineError::is_store_failure) => {
                            // Row is untouched and still due; end the round.
                            log::warn!("Task {} left as is, store busy: {:#}", record.id, e);
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        Ok(report)
    }

    /// Drain until a round runs nothing, or `max_rounds` is reached.
    pub fn drain_until_idle(&mut self, max_rounds: usize) -> Result<DrainReport> {
        let mut total = DrainReport::default();
        for _ in 0..max_rounds {
            let round = self.drain_tasks()?;
            if round.ran() == 0 {
                break;
            }
            total.absorb(round);
        }
        Ok(total)
    }

    /// List queued tasks in a given state.
    pub fn tasks(&self, status: TaskStatus) -> Result<Vec<TaskRecord>> {
        self.storage.db().list_tasks(status)
    }

    fn run_task(&mut self, task: &Task) -> Result<()> {
        if self.config.verbose {
            log::info!("Running task {:?}", task);
        }
        match task {
            Task::FindFollows { user_id, email } => self.find_follows(user_id, email).map(|_| ()),
            Task::FollowById { user_id, following_id } => self.follow_by_id(user_id, following_id).map(|_| ()),
            Task::NowFollows { user_id, following_id } => self.record_new_follower(user_id, following_id),
        }
    }
}

/// What happens to a task whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Retry,
    DeadLetter,
}

/// Store trouble is always retried. Any other engine error means the task
/// can never succeed. Unclassified errors get `max_attempts` tries.
fn disposition(err: &eyre::Report, attempts: u32, max_attempts: u32) -> Disposition {
    match engine_error(err) {
        Some(e) if e.is_store_failure() => Disposition::Retry,
        Some(_) => Disposition::DeadLetter,
        None if attempts >= max_attempts => Disposition::DeadLetter,
        None => Disposition::Retry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_serialization() {
        let task = Task::FollowById {
            user_id: "alice".to_string(),
            following_id: "bob".to_string(),
        };
        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"task\":\"follow_by_id\""));
        let parsed: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, task);
    }

    #[test]
    fn test_task_names() {
        let task = Task::FindFollows {
            user_id: "bob".to_string(),
            email: "bob@example.com".to_string(),
        };
        assert_eq!(task.name(), "find_follows");
    }

    #[test]
    fn test_store_failures_are_always_retried() {
        let conflict = eyre::eyre!(EngineError::TransactionConflict("follow_by_id".to_string()));
        assert_eq!(disposition(&conflict, 1, 1), Disposition::Retry);
        assert_eq!(disposition(&conflict, 500, 5), Disposition::Retry);

        let unavailable = eyre::eyre!(EngineError::StoreUnavailable("find_follows".to_string()));
        assert_eq!(disposition(&unavailable, 9, 5), Disposition::Retry);
    }

    #[test]
    fn test_permanent_errors_dead_letter_at_once() {
        let gone = eyre::eyre!(EngineError::user_not_found("alice")).wrap_err("follow alice -> bob");
        assert_eq!(disposition(&gone, 1, 5), Disposition::DeadLetter);

        let own = eyre::eyre!(EngineError::SelfFollow("alice".to_string()));
        assert_eq!(disposition(&own, 1, 5), Disposition::DeadLetter);
    }

    #[test]
    fn test_unclassified_errors_use_attempt_limit() {
        let err = eyre::eyre!("disk full");
        assert_eq!(disposition(&err, 1, 3), Disposition::Retry);
        assert_eq!(disposition(&err, 3, 3), Disposition::DeadLetter);
    }

    #[test]
    fn test_drain_report_ran() {
        let report = DrainReport {
            completed: 2,
            retried: 1,
            failed: 1,
        };
        assert_eq!(report.ran(), 4);
    }
}
