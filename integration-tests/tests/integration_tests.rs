// Integration tests across the broker and the task store.
// The NATS and Redis tests require live services and are ignored by
// default:
//   NATS_URL=nats://localhost:4222 REDIS_URL=redis://localhost:6379 \
//   cargo test -p integration-tests -- --ignored

use common::config::RedisConfig;
use common::models::{ReleaseTask, Repository, TaskMessage, TaskRecord, TaskStatus};
use common::queue::{BrokerConfig, NatsClient, NatsTaskPublisher, TaskPublisher};
use common::store::{RedisPool, RedisTaskStore, TaskStore};
use uuid::Uuid;

fn unique_message() -> TaskMessage {
    // Unique version per run keeps dedup keys from colliding across runs
    let version = format!("0.0.{}", Uuid::new_v4().as_u128() % 1_000_000);
    TaskMessage::new(
        Repository::new("owner", "project"),
        ReleaseTask::PublishRelease {
            version,
            pr_number: 1,
        },
    )
}

async fn broker_client() -> NatsClient {
    let url = std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());
    let config = BrokerConfig {
        url,
        stream_name: "RELEASES_TEST".to_string(),
        subject: "releases-test.>".to_string(),
        consumer_name: "release-workers-test".to_string(),
        ..BrokerConfig::default()
    };
    NatsClient::new(config).await.expect("NATS is reachable")
}

async fn redis_store() -> RedisTaskStore {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let config = RedisConfig { url, pool_size: 4 };
    let pool = RedisPool::new(&config).await.expect("Redis is reachable");
    RedisTaskStore::new(pool)
}

#[tokio::test]
#[ignore] // Requires NATS to be running
async fn test_publish_is_deduplicated_by_idempotency_key() {
    let client = broker_client().await;
    client.initialize_stream().await.unwrap();

    let publisher = NatsTaskPublisher::new(client);
    let message = unique_message();

    // Same message twice: the second publish hits the duplicate window
    publisher.publish(&message).await.unwrap();
    publisher.publish(&message).await.unwrap();

    // A re-enqueue of the same logical task also deduplicates
    let replay = TaskMessage::new(message.repository.clone(), message.task.clone());
    assert_eq!(replay.idempotency_key, message.idempotency_key);
    publisher.publish(&replay).await.unwrap();
}

#[tokio::test]
#[ignore] // Requires NATS to be running
async fn test_stream_health_check() {
    let client = broker_client().await;
    client.initialize_stream().await.unwrap();
    client.health_check().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Redis to be running
async fn test_task_record_lifecycle_in_redis() {
    let store = redis_store().await;
    let message = unique_message();

    let mut record = TaskRecord::from_message(&message);
    store.put(&record).await.unwrap();

    let loaded = store.get(record.task_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Pending);

    record.status = TaskStatus::Succeeded;
    record.attempt = 1;
    store.put(&record).await.unwrap();

    let by_key = store
        .get_by_key(&record.idempotency_key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_key.status, TaskStatus::Succeeded);
    assert_eq!(by_key.attempt, 1);
}

#[tokio::test]
#[ignore] // Requires Redis to be running
async fn test_webhook_delivery_dedup_in_redis() {
    let store = redis_store().await;
    let delivery_id = format!("delivery-{}", Uuid::new_v4());

    assert!(store.mark_delivery_seen(&delivery_id).await.unwrap());
    assert!(!store.mark_delivery_seen(&delivery_id).await.unwrap());
}

#[tokio::test]
#[ignore] // Requires Redis to be running
async fn test_dead_letter_list_in_redis() {
    let store = redis_store().await;
    let message = unique_message();

    let mut record = TaskRecord::from_message(&message);
    record.status = TaskStatus::DeadLettered;
    record.error = Some("exhausted".to_string());
    store.push_dead_letter(&record).await.unwrap();

    let listed = store.dead_letters(100).await.unwrap();
    assert!(listed.iter().any(|r| r.task_id == record.task_id));
}

#[tokio::test]
async fn test_task_message_wire_format_is_stable() {
    // The worker and gateway exchange this format through the broker;
    // field names are part of the contract
    let message = unique_message();
    let value = serde_json::to_value(&message).unwrap();

    assert!(value.get("task_id").is_some());
    assert!(value.get("idempotency_key").is_some());
    assert!(value.get("enqueued_at").is_some());
    assert_eq!(value["repository"]["owner"], "owner");
    assert_eq!(value["task"]["kind"], "publish_release");
}
