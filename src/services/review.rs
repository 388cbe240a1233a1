use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::db::store::{ReviewStore, StoreError};
use crate::models::job::{RequeueReport, ReviewJob};
use crate::models::profile::UserProfile;
use crate::services::decision::{Decision, DecisionInput, DecisionPolicy};
use crate::services::notification::{DispatchOutcome, NotificationDispatcher, NotificationRequest};
use crate::services::photo_moderation::PhotoModerationGateway;
use crate::services::text_moderation::TextModerationGateway;

/// Run both moderation gateways best-effort, then read back the current
/// verdicts and rule snapshot. Only store reads can fail here.
///
/// Only photos still linked from the profile count. The bio counts only when
/// it was classified in this pass; an empty bio or a classifier outage leaves
/// it unknown.
pub(crate) async fn collect_decision_input(
    store: &dyn ReviewStore,
    photos: &PhotoModerationGateway,
    text: &TextModerationGateway,
    profile: &UserProfile,
) -> Result<DecisionInput, StoreError> {
    let (_, fresh_text) = futures::join!(photos.moderate_profile(profile), text.moderate(profile));

    let photo_statuses = photos
        .linked_verdicts(profile)
        .await?
        .into_iter()
        .map(|verdict| verdict.status)
        .collect();

    Ok(DecisionInput {
        rules: store.rule_snapshot(profile.user_id).await?,
        photo_statuses,
        text_status: fresh_text.map(|verdict| verdict.status),
        bio_length: profile.bio_length(),
        has_profession: profile.has_profession(),
    })
}

/// What happened to one claimed job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed {
        decision: Decision,
        notification: DispatchOutcome,
    },
    /// The user no longer exists; the job was marked failed.
    MissingProfile,
}

/// Summary of one worker poll.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct BatchReport {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    /// Jobs left in `processing` for the recovery sweep.
    pub errored: usize,
}

/// Drives claimed review jobs through moderation, decisioning, persistence and notification.
pub struct ReviewWorker {
    store: Arc<dyn ReviewStore>,
    photos: PhotoModerationGateway,
    text: TextModerationGateway,
    notifier: Arc<NotificationDispatcher>,
}

impl ReviewWorker {
    pub fn new(
        store: Arc<dyn ReviewStore>,
        photos: PhotoModerationGateway,
        text: TextModerationGateway,
        notifier: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            photos,
            text,
            notifier,
        }
    }

    /// Claim up to `limit` jobs and process them in creation order.
    pub async fn process_batch(&self, limit: i64) -> Result<BatchReport, StoreError> {
        let jobs = self.store.claim_batch(limit).await?;
        let mut report = BatchReport {
            claimed: jobs.len(),
            ..Default::default()
        };
        if jobs.is_empty() {
            return Ok(report);
        }
        metrics::counter!("review_jobs_claimed_total").increment(jobs.len() as u64);

        for job in &jobs {
            match self.process_job(job).await {
                Ok(JobOutcome::Completed { .. }) => report.completed += 1,
                Ok(JobOutcome::MissingProfile) => report.failed += 1,
                Err(e) => {
                    // Left in `processing`; the recovery sweep requeues it.
                    tracing::error!(
                        job_id = %job.id,
                        user_id = %job.user_id,
                        attempts = job.attempts,
                        error = %e,
                        "Review job failed, leaving for retry"
                    );
                    metrics::counter!("review_jobs_errored_total").increment(1);
                    report.errored += 1;
                }
            }
        }
        Ok(report)
    }

    /// Process one claimed job. Only store errors are returned; external
    /// failures are absorbed by the gateways and the dispatcher.
    pub async fn process_job(&self, job: &ReviewJob) -> Result<JobOutcome, ReviewError> {
        let start = Instant::now();
        tracing::info!(
            job_id = %job.id,
            user_id = %job.user_id,
            event = %job.event,
            attempts = job.attempts,
            "Processing review job"
        );

        let Some(profile) = self.store.profile(job.user_id).await? else {
            tracing::warn!(job_id = %job.id, user_id = %job.user_id, "Profile not found");
            self.store.fail(job.id, "profile not found").await?;
            metrics::counter!("review_jobs_failed_total").increment(1);
            return Ok(JobOutcome::MissingProfile);
        };

        let input =
            collect_decision_input(self.store.as_ref(), &self.photos, &self.text, &profile).await?;
        let decision = DecisionPolicy::Strict.decide(&input);

        tracing::info!(
            job_id = %job.id,
            user_id = %job.user_id,
            category = %decision.category,
            status = %decision.verification_status,
            photos = input.photo_statuses.len(),
            rejected_photo = decision.has_rejected_photo,
            "Decision reached"
        );

        let previous = self.store.verification(job.user_id).await?;
        let state = decision.to_state(job.user_id, previous.as_ref(), Utc::now());
        self.store
            .save_verification(&state)
            .await
            .map_err(ReviewError::Persist)?;

        let notification = self
            .notifier
            .notify(NotificationRequest {
                profile: &profile,
                decision: &decision,
                event: job.event,
                last_notified: previous
                    .as_ref()
                    .filter(|p| p.review_notified)
                    .and_then(|p| p.notified_template),
            })
            .await;

        if let DispatchOutcome::Attempted { template, .. } = notification {
            if let Err(e) = self.store.mark_notified(job.user_id, template).await {
                tracing::warn!(
                    job_id = %job.id,
                    user_id = %job.user_id,
                    error = %e,
                    "Failed to record notification"
                );
            }
        }

        self.store.complete(job.id).await?;

        metrics::counter!("review_jobs_completed_total").increment(1);
        metrics::histogram!("review_processing_seconds").record(start.elapsed().as_secs_f64());
        tracing::info!(
            job_id = %job.id,
            user_id = %job.user_id,
            duration_ms = start.elapsed().as_millis() as u64,
            "Review job completed"
        );

        Ok(JobOutcome::Completed {
            decision,
            notification,
        })
    }

    /// Return jobs stuck in `processing` for longer than `timeout` to the queue.
    pub async fn recover_stale(
        &self,
        timeout: Duration,
        max_attempts: i32,
    ) -> Result<RequeueReport, StoreError> {
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(timeout)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let report = self.store.requeue_stale(cutoff, max_attempts).await?;
        if report.requeued > 0 || report.failed > 0 {
            tracing::warn!(
                requeued = report.requeued,
                failed = report.failed,
                "Recovered stale review jobs"
            );
        }
        Ok(report)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("Failed to persist decision: {0}")]
    Persist(StoreError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
