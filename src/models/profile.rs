use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The slice of a user's profile the review pipeline reads.
///
/// Photo references are stored upstream in whatever shape the client sent
/// them: a bare object path, a public URL, or a JSON record. They are kept raw
/// here and canonicalized by the photo moderation gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub profession: Option<String>,
    pub primary_photo: Option<serde_json::Value>,
    pub gallery: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    /// Bio length in characters, ignoring surrounding whitespace.
    pub fn bio_length(&self) -> usize {
        self.bio
            .as_deref()
            .map(|bio| bio.trim().chars().count())
            .unwrap_or(0)
    }

    pub fn has_profession(&self) -> bool {
        self.profession
            .as_deref()
            .is_some_and(|p| !p.trim().is_empty())
    }

    /// Phone number usable as a messaging recipient, if any.
    pub fn contact_phone(&self) -> Option<&str> {
        non_blank(self.phone.as_deref())
    }

    /// Email address usable as a transactional-email recipient, if any.
    pub fn contact_email(&self) -> Option<&str> {
        non_blank(self.email.as_deref())
    }

    /// Name used in notification templates.
    pub fn greeting_name(&self) -> &str {
        non_blank(self.display_name.as_deref()).unwrap_or("there")
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
