use sqlx::PgPool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::store::{PgReviewStore, ReviewStore};
use crate::services::{
    notification::{self, NotificationDispatcher, NotificationError},
    photo_moderation::{
        ClassifierDrain, HttpPhotoClassifier, ModerationError, PhotoModerationGateway,
    },
    queue::{ClassifierQueue, QueueError},
    review::ReviewWorker,
    sweep::ReverificationSweep,
    text_moderation::{HttpTextClassifier, TextModerationGateway},
};

/// Shared application state passed to all route handlers and the worker.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub store: Arc<dyn ReviewStore>,
    pub queue: Arc<ClassifierQueue>,
    pub photos: PhotoModerationGateway,
    pub text: TextModerationGateway,
    pub notifier: Arc<NotificationDispatcher>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Build every client from configuration. Notification channels without
    /// credentials are disabled rather than treated as errors.
    pub fn from_config(db: PgPool, config: AppConfig) -> Result<Self, StateError> {
        let store: Arc<dyn ReviewStore> = Arc::new(PgReviewStore::new(db.clone()));
        let queue = Arc::new(ClassifierQueue::new(&config.redis_url)?);

        let photos = PhotoModerationGateway::new(store.clone(), queue.clone(), &config.photo_bucket);
        let text_classifier = HttpTextClassifier::new(
            &config.text_classifier_url,
            config.classifier_api_token.as_deref(),
            config.http_timeout(),
        )?;
        let text = TextModerationGateway::new(store.clone(), Arc::new(text_classifier));
        let notifier = Arc::new(notification::dispatcher_from_config(&config)?);

        Ok(Self {
            db,
            store,
            queue,
            photos,
            text,
            notifier,
            config: Arc::new(config),
        })
    }

    pub fn review_worker(&self) -> ReviewWorker {
        ReviewWorker::new(
            self.store.clone(),
            self.photos.clone(),
            self.text.clone(),
            self.notifier.clone(),
        )
    }

    pub fn sweep(&self) -> ReverificationSweep {
        ReverificationSweep::new(self.store.clone(), self.photos.clone(), self.text.clone())
    }

    pub fn classifier_drain(&self) -> Result<ClassifierDrain, StateError> {
        let classifier = HttpPhotoClassifier::new(
            &self.config.photo_classifier_url,
            self.config.classifier_api_token.as_deref(),
            self.config.http_timeout(),
        )?;
        Ok(ClassifierDrain::new(
            self.queue.clone(),
            Arc::new(classifier),
            self.store.clone(),
        ))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Moderation(#[from] ModerationError),

    #[error(transparent)]
    Notification(#[from] NotificationError),
}
