// Error handling framework

use thiserror::Error;

/// GitHub API errors
#[derive(Error, Debug)]
pub enum GithubError {
    #[error("GitHub request failed: {0}")]
    Request(String),

    #[error("GitHub API returned {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    #[error("File not found in repository: {0}")]
    FileNotFound(String),

    #[error("Unexpected GitHub response: {0}")]
    UnexpectedResponse(String),

    #[error("GitHub App authentication failed: {0}")]
    AppAuth(String),
}

/// Local git operation errors
#[derive(Error, Debug)]
pub enum GitError {
    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Repository not cloned yet")]
    NotCloned,

    #[error("I/O error during git operation: {0}")]
    Io(String),
}

/// Release workflow errors
#[derive(Error, Debug)]
pub enum ReleaseError {
    #[error(transparent)]
    Github(#[from] GithubError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("Invalid release configuration: {0}")]
    ReleaseConf(String),

    #[error("Invalid version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("Multiple release issues are open ({0}), please reduce them to one")]
    MultipleReleaseIssues(usize),

    #[error("PyPI release failed: {0}")]
    Pypi(String),

    #[error("Fedora release failed: {0}")]
    Fedora(String),
}

/// Task queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to connect to broker: {0}")]
    Connection(String),

    #[error("Failed to create stream: {0}")]
    StreamCreation(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Failed to create consumer: {0}")]
    ConsumerCreation(String),

    #[error("Failed to publish task: {0}")]
    PublishFailed(String),

    #[error("Failed to consume task: {0}")]
    ConsumeFailed(String),

    #[error("Failed to acknowledge task: {0}")]
    AckFailed(String),

    #[error("Task serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Task deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Broker health check failed: {0}")]
    HealthCheck(String),

    #[error("Broker operation timeout: {0}")]
    Timeout(String),
}

/// Task state store errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Redis error: {0}")]
    RedisError(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid JSON in store: {0}")]
    InvalidJson(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Webhook gateway errors
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Missing webhook signature header")]
    MissingSignature,

    #[error("Webhook payload is not JSON")]
    NotJson,

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,
}

/// API response error type for HTTP responses
#[derive(Debug, serde::Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        ApiError::new("QUEUE_ERROR", err.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::new("STORAGE_ERROR", err.to_string())
    }
}

impl From<ReleaseError> for ApiError {
    fn from(err: ReleaseError) -> Self {
        ApiError::new("RELEASE_ERROR", err.to_string())
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        let code = match err {
            WebhookError::InvalidSignature | WebhookError::MissingSignature => "UNAUTHORIZED",
            WebhookError::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            _ => "WEBHOOK_ERROR",
        };
        ApiError::new(code, err.to_string())
    }
}

// Implement From for common external errors
impl From<reqwest::Error> for GithubError {
    fn from(err: reqwest::Error) -> Self {
        GithubError::Request(err.to_string())
    }
}

impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        StorageError::RedisError(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::InvalidJson(err.to_string())
    }
}
