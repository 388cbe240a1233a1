use profile_review::{
    app_state::AppState,
    config::AppConfig,
    db,
    services::{photo_moderation::ClassifierDrain, review::ReviewWorker},
};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

/// How often the stale-job recovery pass runs.
const RECOVERY_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting profile review worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config)
        .await
        .expect("Failed to connect to database");

    // Initialize services
    tracing::info!("Initializing services");
    let state = AppState::from_config(db_pool, config).expect("Failed to initialize services");
    let drain = state
        .classifier_drain()
        .expect("Failed to initialize photo classifier");

    let poll_interval = state.config.poll_interval();
    tokio::spawn(run_classifier_drain(drain, poll_interval));

    tracing::info!(
        batch_size = state.config.worker_batch_size,
        pause_notifications = state.config.pause_notifications,
        notify_on_backfill = state.config.notify_on_backfill,
        "Worker ready, starting job processing loop"
    );

    run_review_loop(&state, state.review_worker()).await;
}

/// Claim and process review batches forever, with periodic stale-job recovery.
async fn run_review_loop(state: &AppState, worker: ReviewWorker) {
    let config = &state.config;
    let mut last_recovery: Option<Instant> = None;

    loop {
        if last_recovery.map_or(true, |at| at.elapsed() >= RECOVERY_INTERVAL) {
            if let Err(e) = worker
                .recover_stale(config.stale_job_timeout(), config.max_job_attempts)
                .await
            {
                tracing::error!(error = %e, "Stale job recovery failed");
            }
            last_recovery = Some(Instant::now());
        }

        match worker.process_batch(config.worker_batch_size).await {
            Ok(report) if report.claimed > 0 => {
                // Batch processed, continue immediately
                tracing::debug!(
                    claimed = report.claimed,
                    completed = report.completed,
                    failed = report.failed,
                    errored = report.errored,
                    "Batch processed, checking for more jobs"
                );
            }
            Ok(_) => {
                // No job available, sleep before next poll
                tracing::trace!("No jobs available, sleeping");
                sleep(config.poll_interval()).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to claim review jobs, will retry");
                sleep(config.poll_interval()).await;
            }
        }
    }
}

/// Feed queued photos to the classifier, independent of the review loop.
async fn run_classifier_drain(drain: ClassifierDrain, poll_interval: Duration) {
    loop {
        match drain.run_once().await {
            Ok(true) => {}
            Ok(false) => sleep(poll_interval).await,
            Err(e) => {
                tracing::error!(error = %e, "Classifier queue error, will retry");
                sleep(poll_interval).await;
            }
        }
    }
}
