use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Upper bound on pooled PostgreSQL connections per process
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    /// Redis connection string for the classifier task queue
    pub redis_url: String,

    /// Storage bucket that holds profile photos
    #[serde(default = "default_photo_bucket")]
    pub photo_bucket: String,

    /// Photo classifier endpoint
    pub photo_classifier_url: String,

    /// Text classifier endpoint
    pub text_classifier_url: String,

    /// Bearer token shared by both classifiers
    pub classifier_api_token: Option<String>,

    /// Template-messaging provider endpoint and token. Either missing disables the channel.
    pub messaging_api_url: Option<String>,
    pub messaging_api_token: Option<String>,

    /// Transactional-email provider. A missing key or sender disables the channel.
    #[serde(default = "default_email_api_url")]
    pub email_api_url: String,
    pub email_api_key: Option<String>,
    pub email_from: Option<String>,

    /// Email template ids per outcome
    pub email_template_verified: Option<String>,
    pub email_template_needs_more_info: Option<String>,
    pub email_template_rejected: Option<String>,
    pub email_template_photos_issue: Option<String>,

    /// Messaging template names per outcome
    #[serde(default = "default_message_template_verified")]
    pub message_template_verified: String,
    #[serde(default = "default_message_template_needs_more_info")]
    pub message_template_needs_more_info: String,
    #[serde(default = "default_message_template_rejected")]
    pub message_template_rejected: String,
    #[serde(default = "default_message_template_photos_issue")]
    pub message_template_photos_issue: String,

    /// Suppress every outcome notification while still persisting decisions
    #[serde(default)]
    pub pause_notifications: bool,

    /// Send notifications for jobs queued by a backfill
    #[serde(default)]
    pub notify_on_backfill: bool,

    /// Jobs claimed per worker poll
    #[serde(default = "default_worker_batch_size")]
    pub worker_batch_size: i64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Jobs left in `processing` longer than this are requeued
    #[serde(default = "default_stale_job_timeout_secs")]
    pub stale_job_timeout_secs: u64,

    /// Stale jobs that already used this many attempts are failed instead
    #[serde(default = "default_max_job_attempts")]
    pub max_job_attempts: i32,

    /// Timeout applied to every outbound provider call
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

/// Gating flags evaluated by the notification dispatcher before any send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationSettings {
    pub pause_notifications: bool,
    pub notify_on_backfill: bool,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_database_max_connections() -> u32 {
    10
}

fn default_photo_bucket() -> String {
    "profile-photos".to_string()
}

fn default_email_api_url() -> String {
    "https://api.sendgrid.com/v3/mail/send".to_string()
}

fn default_message_template_verified() -> String {
    "profile_verified".to_string()
}

fn default_message_template_needs_more_info() -> String {
    "profile_needs_more_info".to_string()
}

fn default_message_template_rejected() -> String {
    "profile_rejected".to_string()
}

fn default_message_template_photos_issue() -> String {
    "profile_photos_issue".to_string()
}

fn default_worker_batch_size() -> i64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_stale_job_timeout_secs() -> u64 {
    900
}

fn default_max_job_attempts() -> i32 {
    5
}

fn default_http_timeout_secs() -> u64 {
    10
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn notification_settings(&self) -> NotificationSettings {
        NotificationSettings {
            pause_notifications: self.pause_notifications,
            notify_on_backfill: self.notify_on_backfill,
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stale_job_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_job_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> Vec<(String, String)> {
        [
            ("DATABASE_URL", "postgres://localhost/review"),
            ("REDIS_URL", "redis://localhost"),
            ("PHOTO_CLASSIFIER_URL", "http://classifier/photo"),
            ("TEXT_CLASSIFIER_URL", "http://classifier/text"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = envy::from_iter(required()).unwrap();
        assert_eq!(config.photo_bucket, "profile-photos");
        assert_eq!(config.worker_batch_size, 10);
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.notification_settings(), NotificationSettings::default());
        assert!(config.messaging_api_url.is_none());
    }

    #[test]
    fn test_notification_flags() {
        let mut vars = required();
        vars.push(("PAUSE_NOTIFICATIONS".to_string(), "true".to_string()));
        vars.push(("NOTIFY_ON_BACKFILL".to_string(), "true".to_string()));

        let config: AppConfig = envy::from_iter(vars).unwrap();
        let settings = config.notification_settings();
        assert!(settings.pause_notifications);
        assert!(settings.notify_on_backfill);
    }
}
