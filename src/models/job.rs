use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Status of a review job. Only ever advances
/// pending -> processing -> done (or failed); the stale-job recovery sweep is
/// the one path that moves processing back to pending.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

/// What caused a profile to be queued for review.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReviewEvent {
    Signup,
    Edit,
    Backfill,
}

/// A unit of work: "this user's profile needs a verification decision".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewJob {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event: ReviewEvent,
    pub status: JobStatus,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Result of a stale-job recovery pass.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct RequeueReport {
    pub requeued: u64,
    pub failed: u64,
}
