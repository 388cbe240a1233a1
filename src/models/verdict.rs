use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Outcome of a moderation check on a photo or a bio.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModerationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ModerationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ModerationStatus::Pending)
    }
}

/// Moderation verdict for one photo, unique per (user_id, object_path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoVerdict {
    pub user_id: Uuid,
    pub object_path: String,
    pub status: ModerationStatus,
    pub provider: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Moderation verdict for a bio. Rows are append-only; the newest wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextVerdict {
    pub user_id: Uuid,
    pub status: ModerationStatus,
    pub created_at: DateTime<Utc>,
}
