//! Test doubles for pipeline tests: an in-memory store that mirrors the
//! PostgreSQL semantics, and recording classifiers/providers.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use profile_review::config::NotificationSettings;
use profile_review::db::store::{ReviewStore, StoreError};
use profile_review::models::job::{JobStatus, RequeueReport, ReviewEvent, ReviewJob};
use profile_review::models::profile::UserProfile;
use profile_review::models::verdict::{ModerationStatus, PhotoVerdict, TextVerdict};
use profile_review::models::verification::{
    NotificationTemplate, ReviewCategory, RuleSnapshot, UserVerificationState, VerificationStatus,
};
use profile_review::services::notification::{
    EmailProvider, NotificationDispatcher, NotificationError, MessagingProvider, TemplateCatalog,
    TemplateEmail, TemplateMessage, TemplateRef,
};
use profile_review::services::photo_moderation::{
    ClassifierDrain, ModerationError, ModerationTrigger, PhotoClassifier, PhotoModerationGateway,
    TaskQueue,
};
use profile_review::services::queue::{ClassificationTask, QueueError};
use profile_review::services::review::ReviewWorker;
use profile_review::services::sweep::ReverificationSweep;
use profile_review::services::text_moderation::{TextClassifier, TextModerationGateway};

pub const BUCKET: &str = "profile-photos";

#[derive(Default)]
struct Tables {
    jobs: Vec<ReviewJob>,
    profiles: HashMap<Uuid, UserProfile>,
    rules: HashMap<Uuid, RuleSnapshot>,
    photo_verdicts: Vec<PhotoVerdict>,
    text_verdicts: Vec<TextVerdict>,
    verification: HashMap<Uuid, UserVerificationState>,
}

/// In-memory [`ReviewStore`]. Every write through the trait bumps `mutations`;
/// the `seed_*` helpers do not.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    mutations: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Make `save_verification` fail until reset.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn seed_profile(&self, profile: UserProfile) {
        self.tables
            .lock()
            .unwrap()
            .profiles
            .insert(profile.user_id, profile);
    }

    pub fn seed_rules(&self, user_id: Uuid, category: Option<ReviewCategory>) {
        self.tables.lock().unwrap().rules.insert(
            user_id,
            RuleSnapshot {
                user_id,
                category_suggested: category,
                suspicious_score: None,
                missing_fields: Vec::new(),
            },
        );
    }

    pub fn seed_photo_verdict(&self, user_id: Uuid, path: &str, status: ModerationStatus) {
        let now = Utc::now();
        self.tables.lock().unwrap().photo_verdicts.push(PhotoVerdict {
            user_id,
            object_path: path.to_string(),
            status,
            provider: Some("seed".to_string()),
            created_at: now,
            updated_at: now,
        });
    }

    pub fn seed_text_verdict(&self, user_id: Uuid, status: ModerationStatus) {
        self.tables.lock().unwrap().text_verdicts.push(TextVerdict {
            user_id,
            status,
            created_at: Utc::now(),
        });
    }

    pub fn job(&self, job_id: Uuid) -> Option<ReviewJob> {
        self.tables
            .lock()
            .unwrap()
            .jobs
            .iter()
            .find(|job| job.id == job_id)
            .cloned()
    }

    pub fn photo_rows(&self, user_id: Uuid) -> Vec<PhotoVerdict> {
        self.tables
            .lock()
            .unwrap()
            .photo_verdicts
            .iter()
            .filter(|v| v.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn state(&self, user_id: Uuid) -> Option<UserVerificationState> {
        self.tables.lock().unwrap().verification.get(&user_id).cloned()
    }

    fn touch(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReviewStore for MemoryStore {
    async fn enqueue(
        &self,
        user_id: Uuid,
        event: ReviewEvent,
    ) -> Result<Option<ReviewJob>, StoreError> {
        let mut tables = self.tables.lock().unwrap();
        let live = tables.jobs.iter().any(|job| {
            job.user_id == user_id
                && matches!(job.status, JobStatus::Pending | JobStatus::Processing)
        });
        if live {
            return Ok(None);
        }
        let job = ReviewJob {
            id: Uuid::new_v4(),
            user_id,
            event,
            status: JobStatus::Pending,
            attempts: 0,
            created_at: Utc::now(),
            claimed_at: None,
            completed_at: None,
            error: None,
        };
        tables.jobs.push(job.clone());
        self.touch();
        Ok(Some(job))
    }

    async fn claim_batch(&self, limit: i64) -> Result<Vec<ReviewJob>, StoreError> {
        let mut tables = self.tables.lock().unwrap();
        let mut pending: Vec<usize> = tables
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| job.status == JobStatus::Pending)
            .map(|(index, _)| index)
            .collect();
        pending.sort_by_key(|&index| tables.jobs[index].created_at);

        let now = Utc::now();
        let mut claimed = Vec::new();
        for index in pending.into_iter().take(limit.max(0) as usize) {
            let job = &mut tables.jobs[index];
            job.status = JobStatus::Processing;
            job.attempts += 1;
            job.claimed_at = Some(now);
            claimed.push(job.clone());
        }
        if !claimed.is_empty() {
            self.touch();
        }
        Ok(claimed)
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(job) = tables
            .jobs
            .iter_mut()
            .find(|job| job.id == job_id && job.status == JobStatus::Processing)
        {
            job.status = JobStatus::Done;
            job.completed_at = Some(Utc::now());
        }
        self.touch();
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(job) = tables
            .jobs
            .iter_mut()
            .find(|job| job.id == job_id && job.status == JobStatus::Processing)
        {
            job.status = JobStatus::Failed;
            job.error = Some(error.to_string());
            job.completed_at = Some(Utc::now());
        }
        self.touch();
        Ok(())
    }

    async fn requeue_stale(
        &self,
        claimed_before: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<RequeueReport, StoreError> {
        let mut tables = self.tables.lock().unwrap();
        let mut report = RequeueReport::default();
        for job in tables.jobs.iter_mut().filter(|job| {
            job.status == JobStatus::Processing
                && job.claimed_at.is_some_and(|at| at < claimed_before)
        }) {
            if job.attempts >= max_attempts {
                job.status = JobStatus::Failed;
                job.error = Some("exceeded max attempts while processing".to_string());
                report.failed += 1;
            } else {
                job.status = JobStatus::Pending;
                job.claimed_at = None;
                report.requeued += 1;
            }
        }
        self.touch();
        Ok(report)
    }

    async fn profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.tables.lock().unwrap().profiles.get(&user_id).cloned())
    }

    async fn pending_profiles(&self, limit: i64) -> Result<Vec<UserProfile>, StoreError> {
        let tables = self.tables.lock().unwrap();
        let mut profiles: Vec<UserProfile> = tables
            .profiles
            .values()
            .filter(|profile| {
                tables.verification.get(&profile.user_id).map_or(true, |state| {
                    state.verification_status == VerificationStatus::Pending
                })
            })
            .cloned()
            .collect();
        // Never reviewed first (None sorts first), then least recently reviewed.
        profiles.sort_by_key(|profile| {
            (
                tables
                    .verification
                    .get(&profile.user_id)
                    .map(|state| state.last_reviewed_at),
                profile.created_at,
            )
        });
        profiles.truncate(limit.max(0) as usize);
        Ok(profiles)
    }

    async fn rule_snapshot(&self, user_id: Uuid) -> Result<Option<RuleSnapshot>, StoreError> {
        Ok(self.tables.lock().unwrap().rules.get(&user_id).cloned())
    }

    async fn insert_pending_photo_verdict(
        &self,
        user_id: Uuid,
        object_path: &str,
    ) -> Result<PhotoVerdict, StoreError> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = tables
            .photo_verdicts
            .iter()
            .find(|v| v.user_id == user_id && v.object_path == object_path)
        {
            return Ok(existing.clone());
        }
        let now = Utc::now();
        let verdict = PhotoVerdict {
            user_id,
            object_path: object_path.to_string(),
            status: ModerationStatus::Pending,
            provider: None,
            created_at: now,
            updated_at: now,
        };
        tables.photo_verdicts.push(verdict.clone());
        self.touch();
        Ok(verdict)
    }

    async fn upsert_photo_verdict(
        &self,
        user_id: Uuid,
        object_path: &str,
        status: ModerationStatus,
        provider: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().unwrap();
        let now = Utc::now();
        match tables
            .photo_verdicts
            .iter_mut()
            .find(|v| v.user_id == user_id && v.object_path == object_path)
        {
            Some(existing) => {
                if status.is_terminal() {
                    existing.status = status;
                    if let Some(provider) = provider {
                        existing.provider = Some(provider.to_string());
                    }
                    existing.updated_at = now;
                }
            }
            None => tables.photo_verdicts.push(PhotoVerdict {
                user_id,
                object_path: object_path.to_string(),
                status,
                provider: provider.map(str::to_string),
                created_at: now,
                updated_at: now,
            }),
        }
        self.touch();
        Ok(())
    }

    async fn photo_verdicts(&self, user_id: Uuid) -> Result<Vec<PhotoVerdict>, StoreError> {
        Ok(self.photo_rows(user_id))
    }

    async fn append_text_verdict(
        &self,
        user_id: Uuid,
        status: ModerationStatus,
    ) -> Result<TextVerdict, StoreError> {
        let verdict = TextVerdict {
            user_id,
            status,
            created_at: Utc::now(),
        };
        self.tables.lock().unwrap().text_verdicts.push(verdict.clone());
        self.touch();
        Ok(verdict)
    }

    async fn latest_text_verdict(&self, user_id: Uuid) -> Result<Option<TextVerdict>, StoreError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .text_verdicts
            .iter()
            .rev()
            .find(|v| v.user_id == user_id)
            .cloned())
    }

    async fn verification(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserVerificationState>, StoreError> {
        Ok(self.state(user_id))
    }

    async fn save_verification(&self, state: &UserVerificationState) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        let mut tables = self.tables.lock().unwrap();
        let mut next = state.clone();
        if let Some(existing) = tables.verification.get(&state.user_id) {
            next.review_notified = existing.review_notified;
            next.notified_template = existing.notified_template;
            next.profile_score = state.profile_score.or(existing.profile_score);
        }
        tables.verification.insert(state.user_id, next);
        self.touch();
        Ok(())
    }

    async fn mark_notified(
        &self,
        user_id: Uuid,
        template: NotificationTemplate,
    ) -> Result<(), StoreError> {
        if let Some(state) = self.tables.lock().unwrap().verification.get_mut(&user_id) {
            state.review_notified = true;
            state.notified_template = Some(template);
        }
        self.touch();
        Ok(())
    }
}

/// Records classification requests instead of queueing them.
#[derive(Default)]
pub struct RecordingTrigger {
    pub tasks: Mutex<Vec<ClassificationTask>>,
}

impl RecordingTrigger {
    pub fn count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

#[async_trait]
impl ModerationTrigger for RecordingTrigger {
    async fn trigger(&self, task: ClassificationTask) -> Result<(), ModerationError> {
        self.tasks.lock().unwrap().push(task);
        Ok(())
    }
}

/// In-memory classifier task queue with the Redis queue's processing list
/// and delayed set. Delayed tasks are due immediately once `release_delayed`
/// is called.
#[derive(Default)]
pub struct MemoryQueue {
    pub ready: Mutex<Vec<ClassificationTask>>,
    pub processing: Mutex<Vec<ClassificationTask>>,
    pub delayed: Mutex<Vec<(ClassificationTask, Duration)>>,
    scheduled: Mutex<Vec<Duration>>,
    release: AtomicBool,
}

impl MemoryQueue {
    pub fn push(&self, task: ClassificationTask) {
        self.ready.lock().unwrap().push(task);
    }

    /// Let `promote_due` requeue every delayed task.
    pub fn release_delayed(&self) {
        self.release.store(true, Ordering::SeqCst);
    }

    /// Every retry delay requested so far, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.scheduled.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn dequeue(&self) -> Result<Option<ClassificationTask>, QueueError> {
        let mut ready = self.ready.lock().unwrap();
        if ready.is_empty() {
            return Ok(None);
        }
        let task = ready.remove(0);
        self.processing.lock().unwrap().push(task.clone());
        Ok(Some(task))
    }

    async fn complete(&self, task: &ClassificationTask) -> Result<(), QueueError> {
        let mut processing = self.processing.lock().unwrap();
        if let Some(index) = processing.iter().position(|t| t == task) {
            processing.remove(index);
        }
        Ok(())
    }

    async fn schedule_retry(
        &self,
        task: &ClassificationTask,
        delay: Duration,
    ) -> Result<(), QueueError> {
        self.delayed.lock().unwrap().push((task.clone(), delay));
        self.scheduled.lock().unwrap().push(delay);
        Ok(())
    }

    async fn promote_due(&self) -> Result<usize, QueueError> {
        if !self.release.load(Ordering::SeqCst) {
            return Ok(0);
        }
        let due: Vec<ClassificationTask> = self
            .delayed
            .lock()
            .unwrap()
            .drain(..)
            .map(|(task, _)| task)
            .collect();
        let count = due.len();
        self.ready.lock().unwrap().extend(due);
        Ok(count)
    }
}

/// Photo classifier replaying scripted responses; `Err` entries simulate an
/// outage. Once the script runs out every call fails.
#[derive(Default)]
pub struct StubPhotoClassifier {
    script: Mutex<Vec<Result<Option<ModerationStatus>, ()>>>,
    calls: AtomicUsize,
}

impl StubPhotoClassifier {
    pub fn respond(&self, responses: Vec<Result<Option<ModerationStatus>, ()>>) {
        *self.script.lock().unwrap() = responses;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PhotoClassifier for StubPhotoClassifier {
    async fn classify(
        &self,
        _task: &ClassificationTask,
    ) -> Result<Option<ModerationStatus>, ModerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        let next = if script.is_empty() {
            Err(())
        } else {
            script.remove(0)
        };
        next.map_err(|_| outage())
    }

    fn name(&self) -> &str {
        "stub-photo-classifier"
    }
}

fn outage() -> ModerationError {
    ModerationError::Parse(serde_json::from_str::<serde_json::Value>("<html>").unwrap_err())
}

/// Text classifier returning a fixed verdict; `None` simulates an outage.
pub struct StubTextClassifier {
    verdict: Mutex<Option<ModerationStatus>>,
    calls: AtomicUsize,
}

impl Default for StubTextClassifier {
    fn default() -> Self {
        Self {
            verdict: Mutex::new(Some(ModerationStatus::Approved)),
            calls: AtomicUsize::new(0),
        }
    }
}

impl StubTextClassifier {
    pub fn respond_with(&self, verdict: Option<ModerationStatus>) {
        *self.verdict.lock().unwrap() = verdict;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextClassifier for StubTextClassifier {
    async fn classify_bio(&self, _user_id: Uuid) -> Result<ModerationStatus, ModerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let verdict = *self.verdict.lock().unwrap();
        verdict.ok_or_else(outage)
    }
}

#[derive(Default)]
pub struct RecordingMessaging {
    pub sent: Mutex<Vec<TemplateMessage>>,
}

#[async_trait]
impl MessagingProvider for RecordingMessaging {
    async fn send_template(&self, message: &TemplateMessage) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEmail {
    pub sent: Mutex<Vec<TemplateEmail>>,
}

#[async_trait]
impl EmailProvider for RecordingEmail {
    async fn send_email(&self, email: &TemplateEmail) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

pub fn catalog() -> TemplateCatalog {
    let template = |name: &str| TemplateRef {
        message_template: format!("profile_{name}"),
        email_template_id: Some(format!("d-{name}")),
    };
    TemplateCatalog {
        verified: template("verified"),
        needs_more_info: template("needs_more_info"),
        rejected: template("rejected"),
        photos_issue: template("photos_issue"),
    }
}

/// A full pipeline wired to test doubles.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub trigger: Arc<RecordingTrigger>,
    pub text_classifier: Arc<StubTextClassifier>,
    pub messaging: Arc<RecordingMessaging>,
    pub email: Arc<RecordingEmail>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::default()),
            trigger: Arc::new(RecordingTrigger::default()),
            text_classifier: Arc::new(StubTextClassifier::default()),
            messaging: Arc::new(RecordingMessaging::default()),
            email: Arc::new(RecordingEmail::default()),
        }
    }

    pub fn photos(&self) -> PhotoModerationGateway {
        PhotoModerationGateway::new(self.store.clone(), self.trigger.clone(), BUCKET)
    }

    pub fn text(&self) -> TextModerationGateway {
        TextModerationGateway::new(self.store.clone(), self.text_classifier.clone())
    }

    pub fn worker(&self, settings: NotificationSettings) -> ReviewWorker {
        let dispatcher = NotificationDispatcher::new(settings, catalog())
            .with_messaging(self.messaging.clone())
            .with_email(self.email.clone());
        ReviewWorker::new(self.store.clone(), self.photos(), self.text(), Arc::new(dispatcher))
    }

    pub fn sweep(&self) -> ReverificationSweep {
        ReverificationSweep::new(self.store.clone(), self.photos(), self.text())
    }

    pub fn drain(
        &self,
        queue: Arc<MemoryQueue>,
        classifier: Arc<StubPhotoClassifier>,
    ) -> ClassifierDrain {
        ClassifierDrain::new(queue, classifier, self.store.clone())
    }

    pub fn provider_calls(&self) -> usize {
        self.messaging.sent.lock().unwrap().len() + self.email.sent.lock().unwrap().len()
    }

    pub fn sent_templates(&self) -> Vec<String> {
        self.messaging
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.template_name.clone())
            .collect()
    }
}

/// A profile with contact details and the given photos and bio.
pub fn profile(photos: &[&str], bio: &str) -> UserProfile {
    let user_id = Uuid::new_v4();
    let mut references = photos.iter().map(|p| serde_json::json!(p));
    let primary = references.next();
    let gallery: Vec<serde_json::Value> = references.collect();
    UserProfile {
        user_id,
        display_name: Some("Sam".to_string()),
        email: Some("sam@example.com".to_string()),
        phone: Some("+15550123".to_string()),
        bio: Some(bio.to_string()),
        profession: None,
        primary_photo: primary,
        gallery: Some(serde_json::Value::Array(gallery)),
        created_at: Utc::now(),
    }
}
