//! Outcome notifications.
//!
//! Every decision maps to exactly one template, sent over two independent
//! channels: a phone-keyed template-messaging provider and a transactional
//! email provider. A failing or unconfigured channel never affects the other
//! channel or the review job.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use strum::{AsRefStr, Display};

use crate::config::{AppConfig, NotificationSettings};
use crate::models::job::ReviewEvent;
use crate::models::profile::UserProfile;
use crate::models::verification::ReviewCategory;
pub use crate::models::verification::NotificationTemplate;
use crate::services::decision::Decision;

/// Pick the single template for a decision. A rejected photo always selects
/// `PhotosIssue`, whatever the category.
pub fn select_template(decision: &Decision) -> NotificationTemplate {
    if decision.has_rejected_photo {
        return NotificationTemplate::PhotosIssue;
    }
    match decision.category {
        ReviewCategory::Exceptional | ReviewCategory::Eligible => NotificationTemplate::Verified,
        ReviewCategory::NeedsMoreDetails => NotificationTemplate::NeedsMoreInfo,
        ReviewCategory::RedFlags => NotificationTemplate::Rejected,
    }
}

/// Provider-side identifiers of one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRef {
    pub message_template: String,
    /// Email template id; `None` disables email for this template.
    pub email_template_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateCatalog {
    pub verified: TemplateRef,
    pub needs_more_info: TemplateRef,
    pub rejected: TemplateRef,
    pub photos_issue: TemplateRef,
}

impl TemplateCatalog {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            verified: TemplateRef {
                message_template: config.message_template_verified.clone(),
                email_template_id: config.email_template_verified.clone(),
            },
            needs_more_info: TemplateRef {
                message_template: config.message_template_needs_more_info.clone(),
                email_template_id: config.email_template_needs_more_info.clone(),
            },
            rejected: TemplateRef {
                message_template: config.message_template_rejected.clone(),
                email_template_id: config.email_template_rejected.clone(),
            },
            photos_issue: TemplateRef {
                message_template: config.message_template_photos_issue.clone(),
                email_template_id: config.email_template_photos_issue.clone(),
            },
        }
    }

    pub fn get(&self, template: NotificationTemplate) -> &TemplateRef {
        match template {
            NotificationTemplate::Verified => &self.verified,
            NotificationTemplate::NeedsMoreInfo => &self.needs_more_info,
            NotificationTemplate::Rejected => &self.rejected,
            NotificationTemplate::PhotosIssue => &self.photos_issue,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateParameter {
    pub name: String,
    pub value: String,
}

/// Template-messaging provider payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateMessage {
    pub template_name: String,
    pub parameters: Vec<TemplateParameter>,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailTemplateData {
    pub name: String,
}

/// Transactional email; the provider adds the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateEmail {
    pub to: Vec<String>,
    pub template_id: String,
    pub dynamic_template_data: EmailTemplateData,
}

#[async_trait]
pub trait MessagingProvider: Send + Sync {
    async fn send_template(&self, message: &TemplateMessage) -> Result<(), NotificationError>;
}

#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_email(&self, email: &TemplateEmail) -> Result<(), NotificationError>;
}

/// HTTP template-messaging provider.
pub struct HttpMessagingProvider {
    http: Client,
    endpoint: String,
    api_token: String,
}

impl HttpMessagingProvider {
    /// `Ok(None)` when the endpoint or token is not configured.
    pub fn from_config(config: &AppConfig) -> Result<Option<Self>, NotificationError> {
        let (Some(endpoint), Some(api_token)) = (
            config.messaging_api_url.as_deref(),
            config.messaging_api_token.as_deref(),
        ) else {
            return Ok(None);
        };
        let http = Client::builder().timeout(config.http_timeout()).build()?;
        Ok(Some(Self {
            http,
            endpoint: endpoint.to_string(),
            api_token: api_token.to_string(),
        }))
    }
}

#[async_trait]
impl MessagingProvider for HttpMessagingProvider {
    async fn send_template(&self, message: &TemplateMessage) -> Result<(), NotificationError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_token)
            .json(message)
            .send()
            .await?;
        ensure_accepted(response).await
    }
}

/// HTTP transactional-email provider.
pub struct HttpEmailProvider {
    http: Client,
    endpoint: String,
    api_key: String,
    from: String,
}

#[derive(Serialize)]
struct EmailEnvelope<'a> {
    from: &'a str,
    #[serde(flatten)]
    email: &'a TemplateEmail,
}

impl HttpEmailProvider {
    /// `Ok(None)` when the API key or sender address is not configured.
    pub fn from_config(config: &AppConfig) -> Result<Option<Self>, NotificationError> {
        let (Some(api_key), Some(from)) =
            (config.email_api_key.as_deref(), config.email_from.as_deref())
        else {
            return Ok(None);
        };
        let http = Client::builder().timeout(config.http_timeout()).build()?;
        Ok(Some(Self {
            http,
            endpoint: config.email_api_url.clone(),
            api_key: api_key.to_string(),
            from: from.to_string(),
        }))
    }
}

#[async_trait]
impl EmailProvider for HttpEmailProvider {
    async fn send_email(&self, email: &TemplateEmail) -> Result<(), NotificationError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmailEnvelope {
                from: &self.from,
                email,
            })
            .send()
            .await?;
        ensure_accepted(response).await
    }
}

async fn ensure_accepted(response: reqwest::Response) -> Result<(), NotificationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(NotificationError::Rejected(format!("{status}: {body}")))
}

/// Why no notification was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SuppressReason {
    Paused,
    Backfill,
    AlreadyNotified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    NoRecipient,
    NotConfigured,
}

/// Result of one channel send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    Sent,
    Skipped(SkipReason),
    Failed(String),
}

impl ChannelOutcome {
    fn label(&self) -> &'static str {
        match self {
            ChannelOutcome::Sent => "sent",
            ChannelOutcome::Skipped(_) => "skipped",
            ChannelOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Suppressed(SuppressReason),
    Attempted {
        template: NotificationTemplate,
        messaging: ChannelOutcome,
        email: ChannelOutcome,
    },
}

impl DispatchOutcome {
    /// Whether a send was attempted (gating passed), regardless of channel results.
    pub fn attempted(&self) -> bool {
        matches!(self, DispatchOutcome::Attempted { .. })
    }
}

/// Input of one dispatch.
#[derive(Debug, Clone, Copy)]
pub struct NotificationRequest<'a> {
    pub profile: &'a UserProfile,
    pub decision: &'a Decision,
    pub event: ReviewEvent,
    /// Template the user was last notified with, if any.
    pub last_notified: Option<NotificationTemplate>,
}

pub struct NotificationDispatcher {
    settings: NotificationSettings,
    catalog: TemplateCatalog,
    messaging: Option<Arc<dyn MessagingProvider>>,
    email: Option<Arc<dyn EmailProvider>>,
}

impl NotificationDispatcher {
    pub fn new(settings: NotificationSettings, catalog: TemplateCatalog) -> Self {
        Self {
            settings,
            catalog,
            messaging: None,
            email: None,
        }
    }

    pub fn with_messaging(mut self, provider: Arc<dyn MessagingProvider>) -> Self {
        self.messaging = Some(provider);
        self
    }

    pub fn with_email(mut self, provider: Arc<dyn EmailProvider>) -> Self {
        self.email = Some(provider);
        self
    }

    /// Gating evaluated before any send.
    pub fn suppression(&self, request: &NotificationRequest<'_>) -> Option<SuppressReason> {
        if self.settings.pause_notifications {
            return Some(SuppressReason::Paused);
        }
        if request.event == ReviewEvent::Backfill && !self.settings.notify_on_backfill {
            return Some(SuppressReason::Backfill);
        }
        if request.last_notified == Some(select_template(request.decision)) {
            return Some(SuppressReason::AlreadyNotified);
        }
        None
    }

    /// Send the outcome notification over both channels. Never fails.
    pub async fn notify(&self, request: NotificationRequest<'_>) -> DispatchOutcome {
        let user_id = request.profile.user_id;
        if let Some(reason) = self.suppression(&request) {
            tracing::info!(user_id = %user_id, reason = %reason, "Notification suppressed");
            metrics::counter!("review_notifications_suppressed_total", "reason" => reason.to_string())
                .increment(1);
            return DispatchOutcome::Suppressed(reason);
        }

        let template = select_template(request.decision);
        let template_ref = self.catalog.get(template);
        let name = request.profile.greeting_name();

        let (messaging, email) = futures::join!(
            self.send_message(request.profile, template_ref, name),
            self.send_email(request.profile, template_ref, name),
        );

        for (channel, outcome) in [("messaging", &messaging), ("email", &email)] {
            match outcome {
                ChannelOutcome::Failed(error) => tracing::warn!(
                    user_id = %user_id,
                    channel,
                    template = %template,
                    error = %error,
                    "Notification channel failed"
                ),
                other => tracing::debug!(
                    user_id = %user_id,
                    channel,
                    template = %template,
                    outcome = other.label(),
                    "Notification channel finished"
                ),
            }
            metrics::counter!(
                "review_notifications_total",
                "channel" => channel,
                "outcome" => outcome.label()
            )
            .increment(1);
        }

        DispatchOutcome::Attempted {
            template,
            messaging,
            email,
        }
    }

    async fn send_message(
        &self,
        profile: &UserProfile,
        template: &TemplateRef,
        name: &str,
    ) -> ChannelOutcome {
        let Some(provider) = &self.messaging else {
            return ChannelOutcome::Skipped(SkipReason::NotConfigured);
        };
        let Some(phone) = profile.contact_phone() else {
            return ChannelOutcome::Skipped(SkipReason::NoRecipient);
        };

        let message = TemplateMessage {
            template_name: template.message_template.clone(),
            parameters: vec![TemplateParameter {
                name: "name".to_string(),
                value: name.to_string(),
            }],
            recipients: vec![phone.to_string()],
        };
        match provider.send_template(&message).await {
            Ok(()) => ChannelOutcome::Sent,
            Err(e) => ChannelOutcome::Failed(e.to_string()),
        }
    }

    async fn send_email(
        &self,
        profile: &UserProfile,
        template: &TemplateRef,
        name: &str,
    ) -> ChannelOutcome {
        let (Some(provider), Some(template_id)) = (&self.email, &template.email_template_id)
        else {
            return ChannelOutcome::Skipped(SkipReason::NotConfigured);
        };
        let Some(address) = profile.contact_email() else {
            return ChannelOutcome::Skipped(SkipReason::NoRecipient);
        };

        let email = TemplateEmail {
            to: vec![address.to_string()],
            template_id: template_id.clone(),
            dynamic_template_data: EmailTemplateData {
                name: name.to_string(),
            },
        };
        match provider.send_email(&email).await {
            Ok(()) => ChannelOutcome::Sent,
            Err(e) => ChannelOutcome::Failed(e.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider rejected the request: {0}")]
    Rejected(String),
}

/// Build the dispatcher from configuration. Channels without credentials are left out.
pub fn dispatcher_from_config(config: &AppConfig) -> Result<NotificationDispatcher, NotificationError> {
    let mut dispatcher = NotificationDispatcher::new(
        config.notification_settings(),
        TemplateCatalog::from_config(config),
    );
    match HttpMessagingProvider::from_config(config)? {
        Some(provider) => dispatcher = dispatcher.with_messaging(Arc::new(provider)),
        None => tracing::warn!("Messaging provider not configured, channel disabled"),
    }
    match HttpEmailProvider::from_config(config)? {
        Some(provider) => dispatcher = dispatcher.with_email(Arc::new(provider)),
        None => tracing::warn!("Email provider not configured, channel disabled"),
    }
    Ok(dispatcher)
}
