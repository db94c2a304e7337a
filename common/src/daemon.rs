// Release daemon engine: periodically evaluates release triggers and
// enqueues release tasks

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep};
use tracing::{debug, error, info, instrument};

use crate::bot::ReleaseBot;
use crate::config::Settings;
use crate::lock::DistributedLock;
use crate::models::{ReleaseTask, Repository, TaskMessage};
use crate::queue::TaskPublisher;
use crate::version::coerce_version;

/// Configuration for the daemon engine
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// How often release triggers are evaluated (in seconds)
    pub refresh_interval_seconds: u64,
    /// TTL for the poll lock (in seconds)
    pub lock_ttl_seconds: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: 180,
            lock_ttl_seconds: 60,
        }
    }
}

impl DaemonConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            refresh_interval_seconds: settings.daemon.refresh_interval_seconds,
            lock_ttl_seconds: settings.daemon.lock_ttl_seconds,
        }
    }
}

/// Release daemon trait
#[async_trait]
pub trait ReleaseDaemon: Send + Sync {
    /// Start the polling loop; returns after a stop request
    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Stop the daemon gracefully
    async fn stop(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Evaluate triggers once; returns the number of tasks enqueued
    async fn poll_once(&self) -> Result<usize, Box<dyn std::error::Error + Send + Sync>>;
}

/// Main daemon engine implementation
pub struct DaemonEngine {
    config: DaemonConfig,
    settings: Arc<Settings>,
    bot: ReleaseBot,
    lock: Arc<dyn DistributedLock>,
    publisher: Arc<dyn TaskPublisher>,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl DaemonEngine {
    pub fn new(
        config: DaemonConfig,
        settings: Arc<Settings>,
        bot: ReleaseBot,
        lock: Arc<dyn DistributedLock>,
        publisher: Arc<dyn TaskPublisher>,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel(1);

        Self {
            config,
            settings,
            bot,
            lock,
            publisher,
            shutdown_tx,
        }
    }

    pub fn shutdown_receiver(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    fn repository(&self) -> Repository {
        Repository::new(
            self.settings.repository.owner.clone(),
            self.settings.repository.name.clone(),
        )
    }

    async fn enqueue(&self, task: ReleaseTask) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let message = TaskMessage::new(self.repository(), task);
        info!(
            task_id = %message.task_id,
            kind = message.task.kind(),
            idempotency_key = %message.idempotency_key,
            "Enqueueing release task"
        );
        self.publisher.publish_with_retry(&message, 3).await?;
        crate::telemetry::record_task_enqueued(message.task.kind());
        Ok(())
    }

    /// Evaluate both triggers: a merged release PR that has not been
    /// released yet, and (when enabled) an open release issue
    async fn evaluate_triggers(&self) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        let (conf, _pypi_project) = self.bot.load_release_conf().await?;
        let (latest, _) = self.bot.latest_release().await?;
        let mut enqueued = 0;

        match self.bot.find_newest_release_pull_request().await {
            Ok(Some(merged)) => {
                if coerce_version(&merged.version)? > latest {
                    self.enqueue(ReleaseTask::PublishRelease {
                        version: merged.version,
                        pr_number: merged.pr_number,
                    })
                    .await?;
                    enqueued += 1;
                } else {
                    debug!(version = %merged.version, "Release PR already published");
                }
            }
            Ok(None) => {}
            Err(e) => error!(error = %e, "Failed to evaluate merged release PRs"),
        }

        if conf.trigger_on_issue {
            match self.bot.find_open_release_issue().await {
                Ok(Some(issue)) => {
                    if coerce_version(&issue.version)? > latest {
                        self.enqueue(ReleaseTask::OpenReleasePullRequest {
                            version: issue.version,
                            issue_number: issue.issue_number,
                        })
                        .await?;
                        enqueued += 1;
                    } else {
                        debug!(version = %issue.version, "Release issue is stale");
                    }
                }
                Ok(None) => {}
                Err(e) => error!(error = %e, "Failed to evaluate release issues"),
            }
        }

        Ok(enqueued)
    }
}

#[async_trait]
impl ReleaseDaemon for DaemonEngine {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(
            refresh_interval_seconds = self.config.refresh_interval_seconds,
            "Starting release daemon"
        );

        let mut poll_interval = interval(Duration::from_secs(self.config.refresh_interval_seconds));
        let mut shutdown_rx = self.shutdown_receiver();

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    debug!("Evaluating release triggers");

                    match self.poll_once().await {
                        Ok(count) if count > 0 => {
                            info!(tasks_enqueued = count, "Enqueued release tasks");
                        }
                        Ok(_) => debug!("No release triggers fired"),
                        // One bad poll never kills the daemon
                        Err(e) => error!(error = %e, "Error evaluating release triggers"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping daemon");
                    break;
                }
            }
        }

        info!("Release daemon stopped");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("Stopping release daemon");

        let _ = self.shutdown_tx.send(());

        // Give in-flight trigger evaluation a moment to finish
        sleep(Duration::from_secs(2)).await;

        info!("Release daemon stopped gracefully");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn poll_once(&self) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        // Only one daemon instance evaluates triggers at a time
        let lock_ttl = Duration::from_secs(self.config.lock_ttl_seconds);
        let lock_guard = match self.lock.acquire("daemon:poll", lock_ttl).await {
            Ok(guard) => guard,
            Err(e) => {
                debug!(error = %e, "Another daemon instance holds the poll lock");
                return Ok(0);
            }
        };

        let enqueued = self.evaluate_triggers().await?;

        drop(lock_guard);
        Ok(enqueued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        DaemonConfig as DaemonSection, FedoraConfig, GithubConfig, NatsConfig,
        ObservabilityConfig, RedisConfig, RepositoryConfig, ServerConfig, WorkerConfig,
    };
    use crate::errors::QueueError;
    use crate::github::GithubClient;
    use crate::lock::NoopLock;
    use crate::pypi::PypiClient;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Publisher that records messages instead of talking to a broker
    #[derive(Default)]
    struct CollectingPublisher {
        messages: Mutex<Vec<TaskMessage>>,
    }

    #[async_trait]
    impl TaskPublisher for CollectingPublisher {
        async fn publish(&self, message: &TaskMessage) -> Result<(), QueueError> {
            self.messages
                .lock()
                .expect("publisher mutex")
                .push(message.clone());
            Ok(())
        }

        async fn publish_with_retry(
            &self,
            message: &TaskMessage,
            _max_retries: u32,
        ) -> Result<(), QueueError> {
            self.publish(message).await
        }
    }

    fn settings_for(server: &MockServer) -> Arc<Settings> {
        Arc::new(Settings {
            repository: RepositoryConfig {
                owner: "owner".to_string(),
                name: "project".to_string(),
                clone_url: None,
                default_branch: Some("master".to_string()),
                gitchangelog: false,
            },
            github: GithubConfig {
                token: "sometoken".to_string(),
                api_url: server.uri(),
                username: Some("release-bot".to_string()),
                webhook_secret: None,
                app: None,
            },
            redis: RedisConfig::default(),
            nats: NatsConfig::default(),
            daemon: DaemonSection::default(),
            worker: WorkerConfig::default(),
            server: ServerConfig::default(),
            observability: ObservabilityConfig::default(),
            fedora: FedoraConfig::default(),
            dry_run: false,
        })
    }

    fn engine_for(
        server: &MockServer,
        publisher: Arc<CollectingPublisher>,
    ) -> DaemonEngine {
        let settings = settings_for(server);
        let github = GithubClient::new(&settings.github, &settings.repository).unwrap();
        let pypi = PypiClient::new().unwrap().with_index_url(server.uri());
        let bot = ReleaseBot::with_clients(settings.clone(), github, pypi);

        DaemonEngine::new(
            DaemonConfig::default(),
            settings,
            bot,
            Arc::new(NoopLock),
            publisher,
        )
    }

    async fn mount_common_mocks(server: &MockServer, release_conf: &str) {
        Mock::given(method("GET"))
            .and(path("/repos/owner/project/contents/release-conf.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(release_conf))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/owner/project/contents/setup.cfg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/owner/project/releases"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 1, "tag_name": "0.1.0", "name": "0.1.0"}
            ])))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_poll_enqueues_publish_for_new_merged_release_pr() {
        let server = MockServer::start().await;
        mount_common_mocks(&server, "").await;
        Mock::given(method("GET"))
            .and(path("/repos/owner/project/pulls"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "number": 30,
                    "title": "0.2.0 release",
                    "user": {"login": "alice"},
                    "html_url": "https://github.com/owner/project/pull/30",
                    "merged_at": "2024-05-01T00:00:00Z"
                },
            ])))
            .mount(&server)
            .await;

        let publisher = Arc::new(CollectingPublisher::default());
        let engine = engine_for(&server, publisher.clone());

        let enqueued = engine.poll_once().await.unwrap();
        assert_eq!(enqueued, 1);

        let messages = publisher.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(matches!(
            &messages[0].task,
            ReleaseTask::PublishRelease { version, pr_number: 30 } if version == "0.2.0"
        ));
    }

    #[tokio::test]
    async fn test_poll_skips_already_released_pr() {
        let server = MockServer::start().await;
        mount_common_mocks(&server, "").await;
        Mock::given(method("GET"))
            .and(path("/repos/owner/project/pulls"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "number": 28,
                    "title": "0.1.0 release",
                    "user": {"login": "alice"},
                    "html_url": "https://github.com/owner/project/pull/28",
                    "merged_at": "2024-04-01T00:00:00Z"
                },
            ])))
            .mount(&server)
            .await;

        let publisher = Arc::new(CollectingPublisher::default());
        let engine = engine_for(&server, publisher.clone());

        let enqueued = engine.poll_once().await.unwrap();
        assert_eq!(enqueued, 0);
        assert!(publisher.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_poll_enqueues_release_pr_task_when_issue_trigger_enabled() {
        let server = MockServer::start().await;
        mount_common_mocks(&server, "trigger_on_issue: true\n").await;
        Mock::given(method("GET"))
            .and(path("/repos/owner/project/pulls"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/owner/project/issues"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"number": 8, "title": "0.2.0 release", "user": {"login": "release-bot"}},
            ])))
            .mount(&server)
            .await;

        let publisher = Arc::new(CollectingPublisher::default());
        let engine = engine_for(&server, publisher.clone());

        let enqueued = engine.poll_once().await.unwrap();
        assert_eq!(enqueued, 1);

        let messages = publisher.messages.lock().unwrap();
        assert!(matches!(
            &messages[0].task,
            ReleaseTask::OpenReleasePullRequest { version, issue_number: 8 } if version == "0.2.0"
        ));
    }

    #[tokio::test]
    async fn test_poll_ignores_issues_when_trigger_disabled() {
        let server = MockServer::start().await;
        mount_common_mocks(&server, "trigger_on_issue: false\n").await;
        Mock::given(method("GET"))
            .and(path("/repos/owner/project/pulls"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let publisher = Arc::new(CollectingPublisher::default());
        let engine = engine_for(&server, publisher.clone());

        let enqueued = engine.poll_once().await.unwrap();
        assert_eq!(enqueued, 0);
    }

    #[test]
    fn test_daemon_config_default() {
        let config = DaemonConfig::default();
        assert_eq!(config.refresh_interval_seconds, 180);
        assert_eq!(config.lock_ttl_seconds, 60);
    }
}
