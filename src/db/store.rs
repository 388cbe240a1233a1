use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{profile_queries, queries};
use crate::models::job::{RequeueReport, ReviewEvent, ReviewJob};
use crate::models::profile::UserProfile;
use crate::models::verdict::{ModerationStatus, PhotoVerdict, TextVerdict};
use crate::models::verification::{NotificationTemplate, RuleSnapshot, UserVerificationState};

/// Persistence used by the review pipeline.
#[async_trait]
pub trait ReviewStore: Send + Sync {
    // Queue
    async fn enqueue(&self, user_id: Uuid, event: ReviewEvent)
        -> Result<Option<ReviewJob>, StoreError>;
    async fn claim_batch(&self, limit: i64) -> Result<Vec<ReviewJob>, StoreError>;
    async fn complete(&self, job_id: Uuid) -> Result<(), StoreError>;
    async fn fail(&self, job_id: Uuid, error: &str) -> Result<(), StoreError>;
    async fn requeue_stale(
        &self,
        claimed_before: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<RequeueReport, StoreError>;

    // Profiles and upstream signals
    async fn profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, StoreError>;
    async fn pending_profiles(&self, limit: i64) -> Result<Vec<UserProfile>, StoreError>;
    async fn rule_snapshot(&self, user_id: Uuid) -> Result<Option<RuleSnapshot>, StoreError>;

    // Moderation verdicts
    async fn insert_pending_photo_verdict(
        &self,
        user_id: Uuid,
        object_path: &str,
    ) -> Result<PhotoVerdict, StoreError>;
    async fn upsert_photo_verdict(
        &self,
        user_id: Uuid,
        object_path: &str,
        status: ModerationStatus,
        provider: Option<&str>,
    ) -> Result<(), StoreError>;
    async fn photo_verdicts(&self, user_id: Uuid) -> Result<Vec<PhotoVerdict>, StoreError>;
    async fn append_text_verdict(
        &self,
        user_id: Uuid,
        status: ModerationStatus,
    ) -> Result<TextVerdict, StoreError>;
    async fn latest_text_verdict(&self, user_id: Uuid) -> Result<Option<TextVerdict>, StoreError>;

    // Verification state
    async fn verification(&self, user_id: Uuid)
        -> Result<Option<UserVerificationState>, StoreError>;
    async fn save_verification(&self, state: &UserVerificationState) -> Result<(), StoreError>;
    async fn mark_notified(
        &self,
        user_id: Uuid,
        template: NotificationTemplate,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgReviewStore {
    pool: PgPool,
}

impl PgReviewStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReviewStore for PgReviewStore {
    async fn enqueue(
        &self,
        user_id: Uuid,
        event: ReviewEvent,
    ) -> Result<Option<ReviewJob>, StoreError> {
        Ok(queries::enqueue_job(&self.pool, user_id, event).await?)
    }

    async fn claim_batch(&self, limit: i64) -> Result<Vec<ReviewJob>, StoreError> {
        Ok(queries::claim_batch(&self.pool, limit).await?)
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), StoreError> {
        Ok(queries::complete_job(&self.pool, job_id).await?)
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<(), StoreError> {
        Ok(queries::fail_job(&self.pool, job_id, error).await?)
    }

    async fn requeue_stale(
        &self,
        claimed_before: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<RequeueReport, StoreError> {
        Ok(queries::requeue_stale_jobs(&self.pool, claimed_before, max_attempts).await?)
    }

    async fn profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, StoreError> {
        Ok(profile_queries::get_profile(&self.pool, user_id).await?)
    }

    async fn pending_profiles(&self, limit: i64) -> Result<Vec<UserProfile>, StoreError> {
        Ok(profile_queries::pending_profiles(&self.pool, limit).await?)
    }

    async fn rule_snapshot(&self, user_id: Uuid) -> Result<Option<RuleSnapshot>, StoreError> {
        Ok(profile_queries::get_rule_snapshot(&self.pool, user_id).await?)
    }

    async fn insert_pending_photo_verdict(
        &self,
        user_id: Uuid,
        object_path: &str,
    ) -> Result<PhotoVerdict, StoreError> {
        Ok(profile_queries::insert_pending_photo_verdict(&self.pool, user_id, object_path).await?)
    }

    async fn upsert_photo_verdict(
        &self,
        user_id: Uuid,
        object_path: &str,
        status: ModerationStatus,
        provider: Option<&str>,
    ) -> Result<(), StoreError> {
        Ok(
            profile_queries::upsert_photo_verdict(&self.pool, user_id, object_path, status, provider)
                .await?,
        )
    }

    async fn photo_verdicts(&self, user_id: Uuid) -> Result<Vec<PhotoVerdict>, StoreError> {
        Ok(profile_queries::photo_verdicts(&self.pool, user_id).await?)
    }

    async fn append_text_verdict(
        &self,
        user_id: Uuid,
        status: ModerationStatus,
    ) -> Result<TextVerdict, StoreError> {
        Ok(profile_queries::append_text_verdict(&self.pool, user_id, status).await?)
    }

    async fn latest_text_verdict(&self, user_id: Uuid) -> Result<Option<TextVerdict>, StoreError> {
        Ok(profile_queries::latest_text_verdict(&self.pool, user_id).await?)
    }

    async fn verification(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserVerificationState>, StoreError> {
        Ok(profile_queries::get_verification(&self.pool, user_id).await?)
    }

    async fn save_verification(&self, state: &UserVerificationState) -> Result<(), StoreError> {
        Ok(profile_queries::save_verification(&self.pool, state).await?)
    }

    async fn mark_notified(
        &self,
        user_id: Uuid,
        template: NotificationTemplate,
    ) -> Result<(), StoreError> {
        Ok(profile_queries::mark_notified(&self.pool, user_id, template).await?)
    }
}
