use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::db::store::{ReviewStore, StoreError};
use crate::models::profile::UserProfile;
use crate::models::verdict::{ModerationStatus, TextVerdict};
use crate::services::photo_moderation::ModerationError;

/// External bio classifier.
#[async_trait]
pub trait TextClassifier: Send + Sync {
    async fn classify_bio(&self, user_id: Uuid) -> Result<ModerationStatus, ModerationError>;
}

/// HTTP client for the text classifier endpoint. The classifier loads the bio itself.
pub struct HttpTextClassifier {
    http: Client,
    endpoint: String,
    api_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TextClassifierRequest {
    user_id: Uuid,
}

#[derive(Deserialize)]
struct TextClassifierResponse {
    status: ModerationStatus,
}

impl HttpTextClassifier {
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
impl TextClassifier for HttpTextClassifier {
    async fn classify_bio(&self, user_id: Uuid) -> Result<ModerationStatus, ModerationError> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .json(&TextClassifierRequest { user_id });
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?.error_for_status()?;
        let body = response.bytes().await?;
        let parsed: TextClassifierResponse = serde_json::from_slice(&body)?;
        Ok(parsed.status)
    }
}

/// Best-effort bio moderation. Verdicts are appended; the newest row is authoritative.
#[derive(Clone)]
pub struct TextModerationGateway {
    store: Arc<dyn ReviewStore>,
    classifier: Arc<dyn TextClassifier>,
}

impl TextModerationGateway {
    pub fn new(store: Arc<dyn ReviewStore>, classifier: Arc<dyn TextClassifier>) -> Self {
        Self { store, classifier }
    }

    /// Classify the bio and append the verdict. Returns `None` when there is
    /// no bio or the classifier (or the append) fails; callers carry on
    /// without a fresh verdict.
    pub async fn moderate(&self, profile: &UserProfile) -> Option<TextVerdict> {
        if profile.bio_length() == 0 {
            return None;
        }

        let status = match self.classifier.classify_bio(profile.user_id).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(user_id = %profile.user_id, error = %e, "Text moderation failed");
                return None;
            }
        };

        match self.store.append_text_verdict(profile.user_id, status).await {
            Ok(verdict) => Some(verdict),
            Err(e) => {
                tracing::warn!(
                    user_id = %profile.user_id,
                    error = %e,
                    "Failed to record text verdict"
                );
                None
            }
        }
    }

    /// Latest recorded bio verdict.
    pub async fn latest(&self, user_id: Uuid) -> Result<Option<TextVerdict>, StoreError> {
        self.store.latest_text_verdict(user_id).await
    }
}
