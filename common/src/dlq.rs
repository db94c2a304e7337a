// Dead-letter policy for release tasks that exhaust their retries

use crate::models::{TaskRecord, TaskStatus};
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

/// Policy deciding when a failed task stops being retried.
///
/// Dead-lettered tasks are never redelivered automatically; re-running one
/// requires an explicit requeue.
#[derive(Debug, Clone)]
pub struct DeadLetterPolicy {
    max_attempts: u32,
}

impl DeadLetterPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether a failure on `attempt` (1-based) was the final one
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Mark a record as dead-lettered, annotating the stored error
    pub fn dead_letter(&self, record: &mut TaskRecord, reason: impl Into<String>) {
        let reason = reason.into();

        warn!(
            task_id = %record.task_id,
            kind = %record.kind,
            attempt = record.attempt,
            reason = %reason,
            "Moving task to the dead-letter queue"
        );

        record.status = TaskStatus::DeadLettered;
        record.finished_at = Some(Utc::now());

        let annotation = format!(
            " [dead-lettered after {} attempts: {}]",
            record.attempt, reason
        );
        record.error = Some(match &record.error {
            Some(existing) => format!("{}{}", existing, annotation),
            None => annotation,
        });
    }

    /// Whether a record is allowed to run (dead-lettered records are not)
    pub fn allows_execution(&self, record: &TaskRecord) -> bool {
        record.status != TaskStatus::DeadLettered
    }

    /// Build a fresh record for manually requeueing a dead-lettered task
    pub fn requeue(&self, record: &TaskRecord) -> Option<TaskRecord> {
        if record.status != TaskStatus::DeadLettered {
            return None;
        }

        let mut fresh = record.clone();
        fresh.task_id = Uuid::new_v4();
        fresh.status = TaskStatus::Pending;
        fresh.attempt = 0;
        fresh.started_at = None;
        fresh.finished_at = None;
        fresh.error = Some(format!("requeued from dead-letter (was {})", record.task_id));
        Some(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReleaseTask, Repository, TaskMessage};

    fn record_with(status: TaskStatus, attempt: u32) -> TaskRecord {
        let message = TaskMessage::new(
            Repository::new("owner", "project"),
            ReleaseTask::PublishRelease {
                version: "1.0.0".to_string(),
                pr_number: 1,
            },
        );
        let mut record = TaskRecord::from_message(&message);
        record.status = status;
        record.attempt = attempt;
        record
    }

    #[test]
    fn test_exhaustion_boundary() {
        let policy = DeadLetterPolicy::new(10);
        assert!(!policy.is_exhausted(9));
        assert!(policy.is_exhausted(10));
        assert!(policy.is_exhausted(11));
    }

    #[test]
    fn test_zero_max_attempts_is_clamped() {
        let policy = DeadLetterPolicy::new(0);
        assert_eq!(policy.max_attempts(), 1);
        assert!(policy.is_exhausted(1));
    }

    #[test]
    fn test_dead_letter_annotates_error() {
        let policy = DeadLetterPolicy::new(3);
        let mut record = record_with(TaskStatus::Failed, 3);
        record.error = Some("GitHub API returned 502".to_string());

        policy.dead_letter(&mut record, "max attempts exceeded");

        assert_eq!(record.status, TaskStatus::DeadLettered);
        assert!(record.finished_at.is_some());
        let error = record.error.unwrap();
        assert!(error.starts_with("GitHub API returned 502"));
        assert!(error.contains("dead-lettered after 3 attempts"));
    }

    #[test]
    fn test_dead_lettered_records_are_isolated() {
        let policy = DeadLetterPolicy::new(3);
        let record = record_with(TaskStatus::DeadLettered, 3);
        assert!(!policy.allows_execution(&record));

        let record = record_with(TaskStatus::Failed, 2);
        assert!(policy.allows_execution(&record));
    }

    #[test]
    fn test_requeue_resets_attempts() {
        let policy = DeadLetterPolicy::new(3);
        let record = record_with(TaskStatus::DeadLettered, 3);

        let fresh = policy.requeue(&record).unwrap();
        assert_eq!(fresh.status, TaskStatus::Pending);
        assert_eq!(fresh.attempt, 0);
        assert_ne!(fresh.task_id, record.task_id);
        assert!(fresh.error.unwrap().contains("requeued from dead-letter"));
    }

    #[test]
    fn test_requeue_rejects_live_records() {
        let policy = DeadLetterPolicy::new(3);
        let record = record_with(TaskStatus::Failed, 1);
        assert!(policy.requeue(&record).is_none());
    }
}
