use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::job::{RequeueReport, ReviewEvent, ReviewJob};

const JOB_COLUMNS: &str =
    "id, user_id, event, status, attempts, error, created_at, claimed_at, completed_at";

/// Parse a text column into one of the strum-backed enums.
pub(crate) fn parse_column<T: FromStr>(row: &PgRow, column: &str) -> Result<T, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    T::from_str(&raw).map_err(|_| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("unexpected value {raw:?}").into(),
    })
}

fn job_from_row(row: &PgRow) -> Result<ReviewJob, sqlx::Error> {
    Ok(ReviewJob {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        event: parse_column(row, "event")?,
        status: parse_column(row, "status")?,
        attempts: row.try_get("attempts")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        claimed_at: row.try_get("claimed_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

/// Insert a pending review job.
///
/// Returns `None` when the user already has a pending or processing job; the
/// partial unique index `review_jobs_one_live_per_user` enforces that.
pub async fn enqueue_job(
    pool: &PgPool,
    user_id: Uuid,
    event: ReviewEvent,
) -> Result<Option<ReviewJob>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO review_jobs (user_id, event, status)
        VALUES ($1, $2, 'pending')
        ON CONFLICT (user_id) WHERE status IN ('pending', 'processing') DO NOTHING
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(event.as_ref())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Atomically claim up to `limit` pending jobs, oldest first.
///
/// `FOR UPDATE SKIP LOCKED` lets concurrent workers claim disjoint batches.
pub async fn claim_batch(pool: &PgPool, limit: i64) -> Result<Vec<ReviewJob>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        r#"
        UPDATE review_jobs
        SET status = 'processing',
            attempts = attempts + 1,
            claimed_at = NOW()
        WHERE id IN (
            SELECT id
            FROM review_jobs
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut jobs = rows.iter().map(job_from_row).collect::<Result<Vec<_>, _>>()?;
    // RETURNING does not preserve the subquery order.
    jobs.sort_by_key(|job| job.created_at);
    Ok(jobs)
}

/// Mark a processing job as done.
pub async fn complete_job(pool: &PgPool, job_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE review_jobs
        SET status = 'done',
            completed_at = NOW()
        WHERE id = $1 AND status = 'processing'
        "#,
    )
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark a processing job as permanently failed.
pub async fn fail_job(pool: &PgPool, job_id: Uuid, error: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE review_jobs
        SET status = 'failed',
            error = $2,
            completed_at = NOW()
        WHERE id = $1 AND status = 'processing'
        "#,
    )
    .bind(job_id)
    .bind(error)
    .execute(pool)
    .await?;

    Ok(())
}

/// Recover jobs stuck in `processing` since before `claimed_before`.
///
/// Jobs that still have attempts left go back to `pending`; the rest are failed.
pub async fn requeue_stale_jobs(
    pool: &PgPool,
    claimed_before: DateTime<Utc>,
    max_attempts: i32,
) -> Result<RequeueReport, sqlx::Error> {
    let failed = sqlx::query(
        r#"
        UPDATE review_jobs
        SET status = 'failed',
            error = 'exceeded max attempts while processing',
            completed_at = NOW()
        WHERE status = 'processing'
          AND claimed_at < $1
          AND attempts >= $2
        "#,
    )
    .bind(claimed_before)
    .bind(max_attempts)
    .execute(pool)
    .await?
    .rows_affected();

    let requeued = sqlx::query(
        r#"
        UPDATE review_jobs
        SET status = 'pending',
            claimed_at = NULL
        WHERE status = 'processing'
          AND claimed_at < $1
          AND attempts < $2
        "#,
    )
    .bind(claimed_before)
    .bind(max_attempts)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(RequeueReport { requeued, failed })
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<ReviewJob>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM review_jobs WHERE id = $1"
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Number of jobs waiting to be claimed.
pub async fn pending_job_count(pool: &PgPool) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS depth FROM review_jobs WHERE status = 'pending'")
        .fetch_one(pool)
        .await?;
    row.try_get("depth")
}
