// Core domain models shared across the daemon, worker, and API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Repository coordinates on GitHub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub owner: String,
    pub name: String,
}

impl Repository {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl std::fmt::Display for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A unit of release work carried by the broker.
///
/// The daemon enqueues `open_release_pull_request` and `publish_release`
/// after evaluating triggers itself; the webhook gateway enqueues
/// `process_webhook` with the raw payload and leaves classification to the
/// worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReleaseTask {
    ProcessWebhook {
        delivery_id: String,
        payload: serde_json::Value,
    },
    OpenReleasePullRequest {
        version: String,
        issue_number: u64,
    },
    PublishRelease {
        version: String,
        pr_number: u64,
    },
}

impl ReleaseTask {
    /// Short name used for logging, metrics, and task records
    pub fn kind(&self) -> &'static str {
        match self {
            ReleaseTask::ProcessWebhook { .. } => "process_webhook",
            ReleaseTask::OpenReleasePullRequest { .. } => "open_release_pull_request",
            ReleaseTask::PublishRelease { .. } => "publish_release",
        }
    }

    /// Stable deduplication key for broker-level dedup.
    ///
    /// Daemon polls repeat the same key for the same pending release, so
    /// JetStream's duplicate window collapses them; webhook deliveries key
    /// on GitHub's delivery id.
    pub fn idempotency_key(&self, repository: &Repository) -> String {
        match self {
            ReleaseTask::ProcessWebhook { delivery_id, .. } => {
                format!("webhook:{}", delivery_id)
            }
            ReleaseTask::OpenReleasePullRequest { version, .. } => {
                format!("{}:open-pr:{}", repository.full_name(), version)
            }
            ReleaseTask::PublishRelease { version, .. } => {
                format!("{}:publish:{}", repository.full_name(), version)
            }
        }
    }
}

/// Message format for release tasks in the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Unique task ID
    pub task_id: Uuid,
    /// Repository the task operates on
    pub repository: Repository,
    /// The work to perform
    pub task: ReleaseTask,
    /// Deduplication key (see [`ReleaseTask::idempotency_key`])
    pub idempotency_key: String,
    /// Timestamp when the message was enqueued
    pub enqueued_at: DateTime<Utc>,
}

impl TaskMessage {
    pub fn new(repository: Repository, task: ReleaseTask) -> Self {
        let idempotency_key = task.idempotency_key(&repository);
        Self {
            task_id: Uuid::new_v4(),
            repository,
            task,
            idempotency_key,
            enqueued_at: Utc::now(),
        }
    }
}

/// Lifecycle states of a release task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    DeadLettered,
}

/// Execution record kept in the task store for each task attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: Uuid,
    pub kind: String,
    pub repository: String,
    pub idempotency_key: String,
    pub status: TaskStatus,
    pub attempt: u32,
    pub error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn from_message(message: &TaskMessage) -> Self {
        Self {
            task_id: message.task_id,
            kind: message.task.kind().to_string(),
            repository: message.repository.full_name(),
            idempotency_key: message.idempotency_key.clone(),
            status: TaskStatus::Pending,
            attempt: 0,
            error: None,
            enqueued_at: message.enqueued_at,
            started_at: None,
            finished_at: None,
        }
    }
}

/// A merged pull request that carries a release in its title
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedReleasePr {
    pub version: String,
    pub pr_number: u64,
    pub author: Option<String>,
}

/// An open issue requesting a release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseIssue {
    pub version: String,
    pub issue_number: u64,
}

/// Classified webhook event relevant to the release workflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookTrigger {
    IssueOpened {
        repository: Repository,
        issue_number: u64,
        title: String,
    },
    PullRequestMerged {
        repository: Repository,
        pr_number: u64,
        title: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_full_name() {
        let repo = Repository::new("user-cont", "release-bot");
        assert_eq!(repo.full_name(), "user-cont/release-bot");
        assert_eq!(repo.to_string(), "user-cont/release-bot");
    }

    #[test]
    fn test_task_kind_names() {
        let task = ReleaseTask::PublishRelease {
            version: "1.2.3".to_string(),
            pr_number: 42,
        };
        assert_eq!(task.kind(), "publish_release");

        let task = ReleaseTask::OpenReleasePullRequest {
            version: "1.2.3".to_string(),
            issue_number: 7,
        };
        assert_eq!(task.kind(), "open_release_pull_request");
    }

    #[test]
    fn test_idempotency_key_is_stable_across_enqueues() {
        let repo = Repository::new("owner", "project");
        let task = ReleaseTask::PublishRelease {
            version: "0.4.0".to_string(),
            pr_number: 10,
        };

        let first = TaskMessage::new(repo.clone(), task.clone());
        let second = TaskMessage::new(repo, task);

        // Distinct task IDs, identical dedup keys
        assert_ne!(first.task_id, second.task_id);
        assert_eq!(first.idempotency_key, second.idempotency_key);
        assert_eq!(first.idempotency_key, "owner/project:publish:0.4.0");
    }

    #[test]
    fn test_webhook_idempotency_key_uses_delivery_id() {
        let repo = Repository::new("owner", "project");
        let task = ReleaseTask::ProcessWebhook {
            delivery_id: "72d3162e-cc78-11e3".to_string(),
            payload: serde_json::json!({"action": "opened"}),
        };
        assert_eq!(
            task.idempotency_key(&repo),
            "webhook:72d3162e-cc78-11e3"
        );
    }

    #[test]
    fn test_task_message_serialization_round_trip() {
        let message = TaskMessage::new(
            Repository::new("owner", "project"),
            ReleaseTask::OpenReleasePullRequest {
                version: "1.0.0".to_string(),
                issue_number: 3,
            },
        );

        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"kind\":\"open_release_pull_request\""));

        let deserialized: TaskMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.task_id, message.task_id);
        assert_eq!(deserialized.idempotency_key, message.idempotency_key);
    }

    #[test]
    fn test_task_record_from_message() {
        let message = TaskMessage::new(
            Repository::new("owner", "project"),
            ReleaseTask::PublishRelease {
                version: "2.0.0".to_string(),
                pr_number: 5,
            },
        );

        let record = TaskRecord::from_message(&message);
        assert_eq!(record.task_id, message.task_id);
        assert_eq!(record.kind, "publish_release");
        assert_eq!(record.repository, "owner/project");
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.attempt, 0);
        assert!(record.started_at.is_none());
    }
}
