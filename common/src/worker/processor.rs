// Task processor: idempotency, status transitions, dispatch to the release
// workflow, and dead-letter handling

use anyhow::anyhow;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::bot::ReleaseBot;
use crate::config::Settings;
use crate::dlq::DeadLetterPolicy;
use crate::errors::ReleaseError;
use crate::models::{
    ReleaseIssue, ReleaseTask, TaskMessage, TaskRecord, TaskStatus, WebhookTrigger,
};
use crate::queue::TaskDelivery;
use crate::store::TaskStore;
use crate::telemetry;
use crate::version::version_from_title;
use crate::webhook::classify_payload;

/// Processes one task delivery end to end
pub struct TaskProcessor {
    settings: Arc<Settings>,
    store: Arc<dyn TaskStore>,
    dlq: DeadLetterPolicy,
}

impl TaskProcessor {
    pub fn new(settings: Arc<Settings>, store: Arc<dyn TaskStore>) -> Self {
        let dlq = DeadLetterPolicy::new(settings.worker.max_retries);
        Self {
            settings,
            store,
            dlq,
        }
    }

    /// Process a delivery. Ok acknowledges the task (success, duplicate, or
    /// dead-lettered); Err requests a redelivery.
    #[instrument(skip(self, delivery), fields(
        task_id = %delivery.message.task_id,
        kind = delivery.message.task.kind(),
        attempt = delivery.attempt
    ))]
    pub async fn process(&self, delivery: TaskDelivery) -> Result<(), anyhow::Error> {
        let message = &delivery.message;

        // Skip work that already finished under this idempotency key
        if let Some(previous) = self.store.get_by_key(&message.idempotency_key).await? {
            match previous.status {
                TaskStatus::Succeeded => {
                    info!("Task already succeeded, skipping");
                    return Ok(());
                }
                TaskStatus::DeadLettered => {
                    warn!("Task is dead-lettered, skipping");
                    return Ok(());
                }
                _ => {}
            }
        }

        let mut record = TaskRecord::from_message(message);
        record.attempt = delivery.attempt;
        record.status = TaskStatus::Running;
        record.started_at = Some(Utc::now());
        if let Err(e) = self.store.put(&record).await {
            // A broken store must not block a release
            error!(error = %e, "Failed to record task start");
        }

        let started = std::time::Instant::now();
        let result = self.execute(message).await;
        let duration = started.elapsed().as_secs_f64();

        match result {
            Ok(()) => {
                record.status = TaskStatus::Succeeded;
                record.finished_at = Some(Utc::now());
                record.error = None;
                if let Err(e) = self.store.put(&record).await {
                    error!(error = %e, "Failed to record task success");
                }

                telemetry::record_task_success(message.task.kind());
                telemetry::record_task_duration(message.task.kind(), duration);
                Ok(())
            }
            Err(e) => {
                record.status = TaskStatus::Failed;
                record.finished_at = Some(Utc::now());
                record.error = Some(e.to_string());

                telemetry::record_task_failure(message.task.kind());
                telemetry::record_task_duration(message.task.kind(), duration);

                if self.dlq.is_exhausted(delivery.attempt) {
                    self.dlq.dead_letter(&mut record, e.to_string());
                    if let Err(store_err) = self.store.put(&record).await {
                        error!(error = %store_err, "Failed to record dead-lettered task");
                    }
                    if let Err(store_err) = self.store.push_dead_letter(&record).await {
                        error!(error = %store_err, "Failed to push task to dead-letter list");
                    }
                    telemetry::record_task_dead_lettered(message.task.kind());
                    // Acknowledge: the task must not be redelivered
                    Ok(())
                } else {
                    if let Err(store_err) = self.store.put(&record).await {
                        error!(error = %store_err, "Failed to record task failure");
                    }
                    Err(anyhow!(e))
                }
            }
        }
    }

    /// Dispatch a task to the release workflow
    async fn execute(&self, message: &TaskMessage) -> Result<(), ReleaseError> {
        match &message.task {
            ReleaseTask::ProcessWebhook {
                delivery_id,
                payload,
            } => {
                // GitHub retries deliveries too; first writer wins
                match self.store.mark_delivery_seen(delivery_id).await {
                    Ok(false) => {
                        info!(delivery_id = %delivery_id, "Webhook delivery already handled");
                        return Ok(());
                    }
                    Ok(true) => {}
                    Err(e) => warn!(error = %e, "Delivery dedup unavailable, proceeding"),
                }

                match classify_payload(payload) {
                    Some(WebhookTrigger::IssueOpened {
                        issue_number,
                        title,
                        ..
                    }) => self.handle_issue(&title, issue_number).await,
                    Some(WebhookTrigger::PullRequestMerged {
                        pr_number, title, ..
                    }) => self.handle_merged_pr(&title, pr_number).await,
                    None => {
                        debug!("Webhook payload carries no release trigger");
                        Ok(())
                    }
                }
            }
            ReleaseTask::OpenReleasePullRequest {
                version,
                issue_number,
            } => self.open_release_pr(version, *issue_number).await,
            ReleaseTask::PublishRelease { version, pr_number } => {
                self.publish_release(version, Some(*pr_number)).await
            }
        }
    }

    async fn bot(&self) -> Result<ReleaseBot, ReleaseError> {
        ReleaseBot::new(self.settings.clone()).await
    }

    /// Webhook path for a newly opened issue
    async fn handle_issue(&self, title: &str, issue_number: u64) -> Result<(), ReleaseError> {
        info!("Resolving opened issue");
        let mut bot = self.bot().await?;
        let (conf, _) = bot.load_release_conf().await?;

        if !conf.trigger_on_issue {
            debug!("Issue triggers are disabled for this repository");
            return Ok(());
        }

        let (latest, _) = bot.latest_release().await?;
        let Some(version) = version_from_title(title, &latest) else {
            debug!("Issue title is not a release request");
            return Ok(());
        };

        let issue = ReleaseIssue {
            version: version.to_string(),
            issue_number,
        };
        bot.make_release_pull_request(&conf, &issue).await?;
        Ok(())
    }

    /// Webhook path for a merged pull request
    async fn handle_merged_pr(&self, title: &str, pr_number: u64) -> Result<(), ReleaseError> {
        info!("Resolving merged PR");
        let bot = self.bot().await?;
        let (latest, _) = bot.latest_release().await?;

        let Some(version) = version_from_title(title, &latest) else {
            debug!("PR title is not a release");
            return Ok(());
        };

        self.run_publish(bot, &version.to_string(), Some(pr_number))
            .await
    }

    /// Daemon-enqueued issue-triggered release PR
    async fn open_release_pr(&self, version: &str, issue_number: u64) -> Result<(), ReleaseError> {
        let mut bot = self.bot().await?;
        let (conf, _) = bot.load_release_conf().await?;

        if !conf.trigger_on_issue {
            debug!("Issue triggers are disabled for this repository");
            return Ok(());
        }

        let issue = ReleaseIssue {
            version: version.to_string(),
            issue_number,
        };
        bot.make_release_pull_request(&conf, &issue).await?;
        Ok(())
    }

    /// Daemon-enqueued publish for a merged release PR
    async fn publish_release(
        &self,
        version: &str,
        pr_number: Option<u64>,
    ) -> Result<(), ReleaseError> {
        let bot = self.bot().await?;
        self.run_publish(bot, version, pr_number).await
    }

    /// GitHub release, then PyPI, then Fedora. PyPI runs even when the
    /// GitHub release already existed, covering a previous attempt that
    /// failed halfway.
    async fn run_publish(
        &self,
        mut bot: ReleaseBot,
        version: &str,
        pr_number: Option<u64>,
    ) -> Result<(), ReleaseError> {
        let (conf, pypi_project) = bot.load_release_conf().await?;

        let result = async {
            bot.make_github_release(version).await?;
            bot.make_pypi_release(&conf, &pypi_project, version).await?;
            bot.make_fedora_release(&conf, version).await?;
            Ok(())
        }
        .await;

        if let Err(e) = &result {
            error!(error = %e, version, "Release publication failed");
        }
        // Progress comments go out whatever happened
        if let Err(e) = bot.flush_comments(pr_number).await {
            warn!(error = %e, "Failed to post progress comments");
        }

        result
    }
}
