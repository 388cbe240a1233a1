//! Photo moderation gateway.
//!
//! Profiles reference photos in three shapes: a bare object path
//! (`<user>/a.jpg`), a public storage URL
//! (`https://cdn.example.com/storage/v1/object/public/profile-photos/<user>/a.jpg`),
//! or a JSON record (`{"path": ...}`, `{"url": ...}`, `{"key": ...}`). They are
//! all reduced to the object path inside the photo bucket before a verdict is
//! looked up or requested.

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::db::store::{ReviewStore, StoreError};
use crate::models::profile::UserProfile;
use crate::models::verdict::{ModerationStatus, PhotoVerdict};
use crate::services::queue::{ClassificationTask, ClassifierQueue, QueueError};

/// Photos moderated per user, primary first.
pub const MAX_PHOTOS_PER_USER: usize = 6;

/// Retries after the first failed classifier call before a task is dropped.
pub const MAX_RETRIES: u32 = 3;

const RETRY_BASE_DELAY_MS: u64 = 2_000;

/// Canonical object paths for a profile's photos: deduplicated, primary photo
/// first, gallery order preserved, capped at [`MAX_PHOTOS_PER_USER`].
pub fn resolve_photo_paths(profile: &UserProfile, bucket: &str) -> Vec<String> {
    let mut references = Vec::new();
    if let Some(primary) = &profile.primary_photo {
        references.push(primary);
    }
    if let Some(gallery) = &profile.gallery {
        match gallery {
            serde_json::Value::Array(items) => references.extend(items.iter()),
            serde_json::Value::Null => {}
            other => references.push(other),
        }
    }

    let mut paths: Vec<String> = Vec::new();
    for reference in references {
        match canonical_path(reference, bucket) {
            Some(path) if !paths.contains(&path) => paths.push(path),
            Some(_) => {}
            None => {
                tracing::debug!(
                    user_id = %profile.user_id,
                    reference = %reference,
                    "Skipping unparseable photo reference"
                );
            }
        }
        if paths.len() == MAX_PHOTOS_PER_USER {
            break;
        }
    }
    paths
}

/// Reduce one stored photo reference to an object path inside `bucket`.
pub fn canonical_path(reference: &serde_json::Value, bucket: &str) -> Option<String> {
    match reference {
        serde_json::Value::String(raw) => canonical_from_str(raw, bucket),
        serde_json::Value::Object(record) => ["path", "key", "object_path", "url", "publicUrl"]
            .iter()
            .filter_map(|field| record.get(*field).and_then(|v| v.as_str()))
            .find_map(|raw| canonical_from_str(raw, bucket)),
        _ => None,
    }
}

fn canonical_from_str(raw: &str, bucket: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let path = if raw.starts_with("http://") || raw.starts_with("https://") {
        let url = Url::parse(raw).ok()?;
        let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
        match segments.iter().position(|segment| *segment == bucket) {
            Some(index) => segments[index + 1..].join("/"),
            None => segments.join("/"),
        }
    } else {
        let trimmed = raw.split(['?', '#']).next().unwrap_or_default();
        let trimmed = trimmed.trim_start_matches('/');
        trimmed
            .strip_prefix(bucket)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(trimmed)
            .to_string()
    };

    if path.is_empty() || path.split('/').any(|segment| segment == "..") {
        None
    } else {
        Some(path)
    }
}

/// Something that gets a photo in front of the classifier.
#[async_trait]
pub trait ModerationTrigger: Send + Sync {
    async fn trigger(&self, task: ClassificationTask) -> Result<(), ModerationError>;
}

#[async_trait]
impl ModerationTrigger for ClassifierQueue {
    async fn trigger(&self, task: ClassificationTask) -> Result<(), ModerationError> {
        self.enqueue(&task).await?;
        Ok(())
    }
}

/// Consumer side of the classifier task queue.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn dequeue(&self) -> Result<Option<ClassificationTask>, QueueError>;
    /// Acknowledge a dequeued task.
    async fn complete(&self, task: &ClassificationTask) -> Result<(), QueueError>;
    async fn schedule_retry(
        &self,
        task: &ClassificationTask,
        delay: Duration,
    ) -> Result<(), QueueError>;
    /// Requeue delayed tasks that are due.
    async fn promote_due(&self) -> Result<usize, QueueError>;
}

#[async_trait]
impl TaskQueue for ClassifierQueue {
    async fn dequeue(&self) -> Result<Option<ClassificationTask>, QueueError> {
        ClassifierQueue::dequeue(self).await
    }

    async fn complete(&self, task: &ClassificationTask) -> Result<(), QueueError> {
        ClassifierQueue::complete(self, task).await
    }

    async fn schedule_retry(
        &self,
        task: &ClassificationTask,
        delay: Duration,
    ) -> Result<(), QueueError> {
        ClassifierQueue::schedule_retry(self, task, delay).await
    }

    async fn promote_due(&self) -> Result<usize, QueueError> {
        ClassifierQueue::promote_due(self).await
    }
}

/// Ensures every photo of a profile has a verdict row and a pending classification.
#[derive(Clone)]
pub struct PhotoModerationGateway {
    store: Arc<dyn ReviewStore>,
    trigger: Arc<dyn ModerationTrigger>,
    bucket: String,
}

impl PhotoModerationGateway {
    pub fn new(
        store: Arc<dyn ReviewStore>,
        trigger: Arc<dyn ModerationTrigger>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            store,
            trigger,
            bucket: bucket.into(),
        }
    }

    pub fn resolve_photo_paths(&self, profile: &UserProfile) -> Vec<String> {
        resolve_photo_paths(profile, &self.bucket)
    }

    /// Make sure a verdict row exists for the photo and, while it is still
    /// pending, that the classifier has been asked for one. Terminal verdicts
    /// are left alone.
    pub async fn ensure_moderated(
        &self,
        user_id: Uuid,
        path: &str,
    ) -> Result<PhotoVerdict, ModerationError> {
        let verdict = self.store.insert_pending_photo_verdict(user_id, path).await?;
        if verdict.status.is_terminal() {
            return Ok(verdict);
        }

        self.trigger
            .trigger(ClassificationTask::new(user_id, &self.bucket, path))
            .await?;
        Ok(verdict)
    }

    /// Best-effort moderation of every resolved photo. Paths are handled
    /// concurrently and failures are logged, not returned.
    pub async fn moderate_profile(&self, profile: &UserProfile) -> usize {
        let paths = self.resolve_photo_paths(profile);
        let results = join_all(
            paths
                .iter()
                .map(|path| self.ensure_moderated(profile.user_id, path)),
        )
        .await;

        for (path, result) in paths.iter().zip(&results) {
            if let Err(e) = result {
                tracing::warn!(
                    user_id = %profile.user_id,
                    path = %path,
                    error = %e,
                    "Photo moderation request failed"
                );
            }
        }
        paths.len()
    }

    /// Every verdict row recorded for the user.
    pub async fn get_verdicts(&self, user_id: Uuid) -> Result<Vec<PhotoVerdict>, StoreError> {
        self.store.photo_verdicts(user_id).await
    }

    /// Verdicts for the photos the profile still links. Rows for removed
    /// photos are ignored.
    pub async fn linked_verdicts(
        &self,
        profile: &UserProfile,
    ) -> Result<Vec<PhotoVerdict>, StoreError> {
        let paths = self.resolve_photo_paths(profile);
        let mut verdicts = self.get_verdicts(profile.user_id).await?;
        verdicts.retain(|verdict| paths.contains(&verdict.object_path));
        Ok(verdicts)
    }
}

/// External photo classifier.
#[async_trait]
pub trait PhotoClassifier: Send + Sync {
    /// Submit a photo. The classifier records its own verdict; when the
    /// response already carries one it is returned as well.
    async fn classify(
        &self,
        task: &ClassificationTask,
    ) -> Result<Option<ModerationStatus>, ModerationError>;

    fn name(&self) -> &str;
}

/// HTTP client for the photo classifier endpoint.
pub struct HttpPhotoClassifier {
    http: Client,
    endpoint: String,
    api_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PhotoClassifierRequest<'a> {
    user_id: Uuid,
    bucket: &'a str,
    path: &'a str,
}

#[derive(Deserialize, Default)]
struct ClassifierResponse {
    #[serde(default)]
    status: Option<ModerationStatus>,
}

impl HttpPhotoClassifier {
    pub fn new(
        endpoint: &str,
        api_token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ModerationError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_token: api_token.map(str::to_string),
        })
    }
}

#[async_trait]
impl PhotoClassifier for HttpPhotoClassifier {
    async fn classify(
        &self,
        task: &ClassificationTask,
    ) -> Result<Option<ModerationStatus>, ModerationError> {
        let mut request = self.http.post(&self.endpoint).json(&PhotoClassifierRequest {
            user_id: task.user_id,
            bucket: &task.bucket,
            path: &task.path,
        });
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?.error_for_status()?;
        // The body is informational; an empty or unexpected body is not an error.
        let body = response.bytes().await?;
        let parsed: ClassifierResponse = serde_json::from_slice(&body).unwrap_or_default();
        Ok(parsed.status)
    }

    fn name(&self) -> &str {
        "photo-classifier"
    }
}

/// Moves classification tasks from the queue to the classifier, retrying with
/// exponential backoff so one slow photo never blocks the review worker.
pub struct ClassifierDrain {
    queue: Arc<dyn TaskQueue>,
    classifier: Arc<dyn PhotoClassifier>,
    store: Arc<dyn ReviewStore>,
}

impl ClassifierDrain {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        classifier: Arc<dyn PhotoClassifier>,
        store: Arc<dyn ReviewStore>,
    ) -> Self {
        Self {
            queue,
            classifier,
            store,
        }
    }

    /// Process one task. Returns `Ok(false)` when the queue is empty.
    pub async fn run_once(&self) -> Result<bool, QueueError> {
        self.queue.promote_due().await?;

        let Some(task) = self.queue.dequeue().await? else {
            return Ok(false);
        };

        match self.classifier.classify(&task).await {
            Ok(Some(status)) if status.is_terminal() => {
                if let Err(e) = self
                    .store
                    .upsert_photo_verdict(task.user_id, &task.path, status, Some(self.classifier.name()))
                    .await
                {
                    tracing::warn!(
                        user_id = %task.user_id,
                        path = %task.path,
                        error = %e,
                        "Failed to record classifier verdict"
                    );
                }
                metrics::counter!("photo_classifications_total", "outcome" => status.to_string())
                    .increment(1);
            }
            Ok(_) => {
                metrics::counter!("photo_classifications_total", "outcome" => "submitted")
                    .increment(1);
            }
            Err(e) => {
                let mut retry = task.clone();
                retry.attempts += 1;
                if retry.attempts > MAX_RETRIES {
                    // The verdict stays pending; the next review of this user triggers it again.
                    tracing::warn!(
                        user_id = %task.user_id,
                        path = %task.path,
                        attempts = retry.attempts,
                        error = %e,
                        "Dropping classification task after max retries"
                    );
                    metrics::counter!("photo_classifications_total", "outcome" => "dropped")
                        .increment(1);
                } else {
                    let delay = retry_delay(retry.attempts);
                    tracing::info!(
                        user_id = %task.user_id,
                        path = %task.path,
                        attempts = retry.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Classification failed, scheduling retry"
                    );
                    self.queue.schedule_retry(&retry, delay).await?;
                }
            }
        }

        self.queue.complete(&task).await?;
        Ok(true)
    }
}

/// Backoff before retry number `attempt` (1-based): 2s, 4s, 8s, ...
pub fn retry_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(10);
    Duration::from_millis(RETRY_BASE_DELAY_MS * 2u64.pow(exponent))
}

#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse classifier response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    const BUCKET: &str = "profile-photos";

    fn profile(primary: Option<serde_json::Value>, gallery: Option<serde_json::Value>) -> UserProfile {
        UserProfile {
            user_id: Uuid::new_v4(),
            display_name: Some("Ada".to_string()),
            email: None,
            phone: None,
            bio: None,
            profession: None,
            primary_photo: primary,
            gallery,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_bare_paths_are_kept() {
        assert_eq!(
            canonical_path(&json!("u1/a.jpg"), BUCKET).as_deref(),
            Some("u1/a.jpg")
        );
        assert_eq!(
            canonical_path(&json!("/profile-photos/u1/a.jpg"), BUCKET).as_deref(),
            Some("u1/a.jpg")
        );
    }

    #[test]
    fn test_public_url_is_reduced_to_bucket_path() {
        let url = "https://cdn.example.com/storage/v1/object/public/profile-photos/u1/a.jpg?width=200";
        assert_eq!(canonical_path(&json!(url), BUCKET).as_deref(), Some("u1/a.jpg"));
    }

    #[test]
    fn test_structured_records() {
        assert_eq!(
            canonical_path(&json!({"path": "u1/b.jpg", "order": 2}), BUCKET).as_deref(),
            Some("u1/b.jpg")
        );
        assert_eq!(
            canonical_path(
                &json!({"url": "https://x.test/object/public/profile-photos/u1/c.jpg"}),
                BUCKET
            )
            .as_deref(),
            Some("u1/c.jpg")
        );
    }

    #[test]
    fn test_unparseable_references_are_skipped() {
        assert_eq!(canonical_path(&json!(""), BUCKET), None);
        assert_eq!(canonical_path(&json!(42), BUCKET), None);
        assert_eq!(canonical_path(&json!({"caption": "hi"}), BUCKET), None);
        assert_eq!(canonical_path(&json!("https://"), BUCKET), None);
        assert_eq!(canonical_path(&json!("u1/../u2/a.jpg"), BUCKET), None);
    }

    #[test]
    fn test_resolution_dedupes_in_order() {
        let p = profile(
            Some(json!("u1/a.jpg")),
            Some(json!([
                "https://x.test/object/public/profile-photos/u1/a.jpg",
                {"path": "u1/b.jpg"},
                null,
                "u1/c.jpg",
                "u1/b.jpg"
            ])),
        );
        assert_eq!(
            resolve_photo_paths(&p, BUCKET),
            vec!["u1/a.jpg", "u1/b.jpg", "u1/c.jpg"]
        );
    }

    #[test]
    fn test_resolution_is_capped() {
        let gallery: Vec<String> = (0..10).map(|i| format!("u1/{i}.jpg")).collect();
        let p = profile(Some(json!("u1/main.jpg")), Some(json!(gallery)));
        let paths = resolve_photo_paths(&p, BUCKET);
        assert_eq!(paths.len(), MAX_PHOTOS_PER_USER);
        assert_eq!(paths[0], "u1/main.jpg");
        assert_eq!(paths[5], "u1/4.jpg");
    }

    #[test]
    fn test_no_photos() {
        assert!(resolve_photo_paths(&profile(None, None), BUCKET).is_empty());
    }

    #[test]
    fn test_retry_delay_grows() {
        assert_eq!(retry_delay(1), Duration::from_secs(2));
        assert_eq!(retry_delay(2), Duration::from_secs(4));
        assert_eq!(retry_delay(3), Duration::from_secs(8));
    }
}
