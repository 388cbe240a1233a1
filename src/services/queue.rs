use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

const QUEUE_KEY: &str = "profile_review:classify";
const PROCESSING_KEY: &str = "profile_review:classify:processing";
const DELAYED_KEY: &str = "profile_review:classify:delayed";

/// Photo classification request handed from the review worker to the classifier drain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassificationTask {
    pub user_id: Uuid,
    pub bucket: String,
    pub path: String,
    #[serde(default)]
    pub attempts: u32,
}

impl ClassificationTask {
    pub fn new(user_id: Uuid, bucket: &str, path: &str) -> Self {
        Self {
            user_id,
            bucket: bucket.to_string(),
            path: path.to_string(),
            attempts: 0,
        }
    }
}

/// Redis-backed classifier task queue with delayed retries.
pub struct ClassifierQueue {
    client: redis::Client,
}

impl ClassifierQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    /// Enqueue a classification task.
    pub async fn enqueue(&self, task: &ClassificationTask) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(task).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Pop the next task, moving it to the processing list until `complete` is called.
    pub async fn dequeue(&self) -> Result<Option<ClassificationTask>, QueueError> {
        let mut conn = self.connection().await?;
        let result: Option<String> = conn
            .rpoplpush(QUEUE_KEY, PROCESSING_KEY)
            .await
            .map_err(QueueError::Redis)?;

        match result {
            Some(payload) => {
                let task = serde_json::from_str(&payload).map_err(QueueError::Serialize)?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    /// Remove a task from the processing list.
    pub async fn complete(&self, task: &ClassificationTask) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(task).map_err(QueueError::Serialize)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Park a task until `delay` has elapsed. `promote_due` moves it back onto the queue.
    pub async fn schedule_retry(
        &self,
        task: &ClassificationTask,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(task).map_err(QueueError::Serialize)?;
        let ready_at = chrono::Utc::now().timestamp_millis() + delay.as_millis() as i64;
        conn.zadd::<_, _, _, ()>(DELAYED_KEY, &payload, ready_at)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Move retries whose delay has elapsed back onto the queue. Returns how many moved.
    pub async fn promote_due(&self) -> Result<usize, QueueError> {
        let mut conn = self.connection().await?;
        let now = chrono::Utc::now().timestamp_millis();
        let due: Vec<String> = conn
            .zrangebyscore_limit(DELAYED_KEY, 0, now, 0, 100)
            .await
            .map_err(QueueError::Redis)?;

        let mut promoted = 0;
        for payload in due {
            // Only the worker whose ZREM succeeds re-queues the task.
            let removed: i64 = conn
                .zrem(DELAYED_KEY, &payload)
                .await
                .map_err(QueueError::Redis)?;
            if removed == 1 {
                conn.lpush::<_, _, ()>(QUEUE_KEY, &payload)
                    .await
                    .map_err(QueueError::Redis)?;
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Get the current queue depth (tasks waiting for the classifier).
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(QUEUE_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
