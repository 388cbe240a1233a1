use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::db::store::{ReviewStore, StoreError};
use crate::models::profile::UserProfile;
use crate::models::verdict::ModerationStatus;
use crate::models::verification::VerificationStatus;
use crate::services::decision::{DecisionInput, DecisionPolicy};
use crate::services::photo_moderation::PhotoModerationGateway;
use crate::services::review::collect_decision_input;
use crate::services::text_moderation::TextModerationGateway;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct SweepReport {
    pub processed: u64,
    pub verified: u64,
    pub kept_pending: u64,
    pub dry_run: bool,
}

/// Silent bulk reclassification of pending profiles with the lenient policy.
/// Never notifies anyone.
pub struct ReverificationSweep {
    store: Arc<dyn ReviewStore>,
    photos: PhotoModerationGateway,
    text: TextModerationGateway,
}

impl ReverificationSweep {
    pub fn new(
        store: Arc<dyn ReviewStore>,
        photos: PhotoModerationGateway,
        text: TextModerationGateway,
    ) -> Self {
        Self {
            store,
            photos,
            text,
        }
    }

    /// Re-evaluate up to `limit` pending profiles. With `dry_run` nothing is
    /// written: moderation is not requested and outcomes are only tallied.
    pub async fn run(&self, limit: i64, dry_run: bool) -> Result<SweepReport, StoreError> {
        let profiles = self.store.pending_profiles(limit).await?;
        let mut report = SweepReport {
            dry_run,
            ..Default::default()
        };

        tracing::info!(candidates = profiles.len(), dry_run, "Starting reverification sweep");

        for profile in &profiles {
            let input = if dry_run {
                self.read_only_input(profile).await?
            } else {
                collect_decision_input(self.store.as_ref(), &self.photos, &self.text, profile)
                    .await?
            };
            let decision = DecisionPolicy::Lenient.decide(&input);
            report.processed += 1;

            if !dry_run {
                let previous = self.store.verification(profile.user_id).await?;
                let state = decision.to_state(profile.user_id, previous.as_ref(), Utc::now());
                if let Err(e) = self.store.save_verification(&state).await {
                    // One bad row should not abort the sweep; the profile stays pending.
                    tracing::warn!(user_id = %profile.user_id, error = %e, "Failed to persist sweep decision");
                    continue;
                }
                tracing::debug!(
                    user_id = %profile.user_id,
                    category = %decision.category,
                    status = %decision.verification_status,
                    "Sweep decision persisted"
                );
            }

            // Unsaved profiles are neither verified nor kept pending.
            match decision.verification_status {
                VerificationStatus::Verified => report.verified += 1,
                _ => report.kept_pending += 1,
            }
        }

        metrics::counter!("reverify_sweep_total", "dry_run" => dry_run.to_string()).increment(1);
        tracing::info!(
            processed = report.processed,
            verified = report.verified,
            kept_pending = report.kept_pending,
            dry_run,
            "Reverification sweep finished"
        );
        Ok(report)
    }

    /// Decision input from stored state only, for dry runs. Linked photos
    /// without a verdict row count as pending, as they would after moderation
    /// was requested. The newest stored bio verdict stands in for the
    /// classifier call a live run would make; an empty bio has none.
    async fn read_only_input(&self, profile: &UserProfile) -> Result<DecisionInput, StoreError> {
        let verdicts = self.photos.linked_verdicts(profile).await?;
        let unseen = self
            .photos
            .resolve_photo_paths(profile)
            .into_iter()
            .filter(|path| !verdicts.iter().any(|v| &v.object_path == path))
            .count();

        let mut photo_statuses: Vec<ModerationStatus> =
            verdicts.into_iter().map(|verdict| verdict.status).collect();
        photo_statuses.extend(std::iter::repeat(ModerationStatus::Pending).take(unseen));

        let text_status = if profile.bio_length() == 0 {
            None
        } else {
            self.text.latest(profile.user_id).await?.map(|v| v.status)
        };

        Ok(DecisionInput {
            rules: self.store.rule_snapshot(profile.user_id).await?,
            photo_statuses,
            text_status,
            bio_length: profile.bio_length(),
            has_profession: profile.has_profession(),
        })
    }
}
