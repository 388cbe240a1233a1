use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::models::job::{ReviewEvent, ReviewJob};

/// Reviewer-facing classification of a profile.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReviewCategory {
    Exceptional,
    Eligible,
    NeedsMoreDetails,
    RedFlags,
}

/// Verification status exposed to the rest of the platform.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Rejected,
}

/// Outcome notice sent to a user. Exactly one is chosen per decision.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationTemplate {
    Verified,
    NeedsMoreInfo,
    Rejected,
    PhotosIssue,
}

/// Rule-based signal computed upstream of this pipeline. Read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSnapshot {
    pub user_id: Uuid,
    pub category_suggested: Option<ReviewCategory>,
    pub suspicious_score: Option<f64>,
    pub missing_fields: Vec<String>,
}

/// Persisted verification outcome for a user. This pipeline is its only writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserVerificationState {
    pub user_id: Uuid,
    pub verification_status: VerificationStatus,
    pub is_verified: bool,
    pub review_category: ReviewCategory,
    pub review_reason: String,
    pub review_notified: bool,
    /// Template the user was last notified with.
    pub notified_template: Option<NotificationTemplate>,
    pub last_reviewed_at: DateTime<Utc>,
    pub profile_score: Option<i32>,
}

/// Request to queue a profile for review.
#[derive(Debug, Deserialize, Validate)]
pub struct EnqueueRequest {
    #[garde(skip)]
    pub user_id: Uuid,

    #[garde(skip)]
    pub event: ReviewEvent,
}

/// Response after a queue request.
#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub queued: bool,
    pub job: Option<ReviewJob>,
    pub message: String,
}

/// Request to run the lenient reverification sweep.
#[derive(Debug, Deserialize, Validate)]
pub struct ReverifyRequest {
    #[garde(range(min = 1, max = 1000))]
    #[serde(default = "default_sweep_limit")]
    pub limit: i64,

    #[garde(skip)]
    #[serde(default)]
    pub dry_run: bool,
}

fn default_sweep_limit() -> i64 {
    200
}
