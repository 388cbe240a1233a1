use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use super::queries::parse_column;
use crate::models::profile::UserProfile;
use crate::models::verdict::{ModerationStatus, PhotoVerdict, TextVerdict};
use crate::models::verification::{NotificationTemplate, RuleSnapshot, UserVerificationState};

const PROFILE_COLUMNS: &str = "p.id, p.display_name, p.email, p.phone, p.bio, p.profession, \
                               p.primary_photo, p.gallery, p.created_at";

fn profile_from_row(row: &PgRow) -> Result<UserProfile, sqlx::Error> {
    Ok(UserProfile {
        user_id: row.try_get("id")?,
        display_name: row.try_get("display_name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        bio: row.try_get("bio")?,
        profession: row.try_get("profession")?,
        primary_photo: row.try_get("primary_photo")?,
        gallery: row.try_get("gallery")?,
        created_at: row.try_get("created_at")?,
    })
}

fn photo_verdict_from_row(row: &PgRow) -> Result<PhotoVerdict, sqlx::Error> {
    Ok(PhotoVerdict {
        user_id: row.try_get("user_id")?,
        object_path: row.try_get("object_path")?,
        status: parse_column(row, "status")?,
        provider: row.try_get("provider")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn optional_enum<T: FromStr>(row: &PgRow, column: &str) -> Result<Option<T>, sqlx::Error> {
    let raw: Option<String> = row.try_get(column)?;
    // Upstream may write values this pipeline does not know; treat them as absent.
    Ok(raw.and_then(|value| value.parse().ok()))
}

/// Load a profile by user id.
pub async fn get_profile(pool: &PgPool, user_id: Uuid) -> Result<Option<UserProfile>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {PROFILE_COLUMNS} FROM profiles p WHERE p.id = $1"
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(profile_from_row).transpose()
}

/// Profiles whose verification is still pending (or that were never reviewed).
/// Never-reviewed profiles come first, then the least recently reviewed, so
/// repeated sweeps rotate through the whole backlog.
pub async fn pending_profiles(pool: &PgPool, limit: i64) -> Result<Vec<UserProfile>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {PROFILE_COLUMNS}
        FROM profiles p
        LEFT JOIN user_verification v ON v.user_id = p.id
        WHERE COALESCE(v.verification_status, 'pending') = 'pending'
        ORDER BY v.last_reviewed_at ASC NULLS FIRST, p.created_at ASC
        LIMIT $1
        "#
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(profile_from_row).collect()
}

/// Upstream rule snapshot for a user.
pub async fn get_rule_snapshot(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Option<RuleSnapshot>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT user_id, category_suggested, suspicious_score, missing_fields
        FROM rule_snapshots
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| {
        Ok(RuleSnapshot {
            user_id: r.try_get("user_id")?,
            category_suggested: optional_enum(&r, "category_suggested")?,
            suspicious_score: r.try_get("suspicious_score")?,
            missing_fields: r.try_get("missing_fields")?,
        })
    })
    .transpose()
}

/// Insert a pending photo verdict unless one already exists for the key.
///
/// Returns the current verdict for the key either way.
pub async fn insert_pending_photo_verdict(
    pool: &PgPool,
    user_id: Uuid,
    object_path: &str,
) -> Result<PhotoVerdict, sqlx::Error> {
    // The no-op update makes RETURNING yield the existing row on conflict.
    let row = sqlx::query(
        r#"
        INSERT INTO photo_verdicts (user_id, object_path, status)
        VALUES ($1, $2, 'pending')
        ON CONFLICT (user_id, object_path) DO UPDATE
            SET status = photo_verdicts.status
        RETURNING user_id, object_path, status, provider, created_at, updated_at
        "#,
    )
    .bind(user_id)
    .bind(object_path)
    .fetch_one(pool)
    .await?;

    photo_verdict_from_row(&row)
}

/// Record a classifier verdict. A terminal verdict is never replaced by `pending`.
pub async fn upsert_photo_verdict(
    pool: &PgPool,
    user_id: Uuid,
    object_path: &str,
    status: ModerationStatus,
    provider: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO photo_verdicts (user_id, object_path, status, provider)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id, object_path) DO UPDATE
            SET status = EXCLUDED.status,
                provider = COALESCE(EXCLUDED.provider, photo_verdicts.provider),
                updated_at = NOW()
            WHERE EXCLUDED.status <> 'pending'
        "#,
    )
    .bind(user_id)
    .bind(object_path)
    .bind(status.as_ref())
    .bind(provider)
    .execute(pool)
    .await?;

    Ok(())
}

/// Current photo verdicts for a user.
pub async fn photo_verdicts(pool: &PgPool, user_id: Uuid) -> Result<Vec<PhotoVerdict>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT user_id, object_path, status, provider, created_at, updated_at
        FROM photo_verdicts
        WHERE user_id = $1
        ORDER BY created_at ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(photo_verdict_from_row).collect()
}

/// Append a bio moderation verdict.
pub async fn append_text_verdict(
    pool: &PgPool,
    user_id: Uuid,
    status: ModerationStatus,
) -> Result<TextVerdict, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO text_verdicts (user_id, status)
        VALUES ($1, $2)
        RETURNING user_id, status, created_at
        "#,
    )
    .bind(user_id)
    .bind(status.as_ref())
    .fetch_one(pool)
    .await?;

    Ok(TextVerdict {
        user_id: row.try_get("user_id")?,
        status: parse_column(&row, "status")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Most recent bio verdict for a user.
pub async fn latest_text_verdict(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Option<TextVerdict>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT user_id, status, created_at
        FROM text_verdicts
        WHERE user_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| {
        Ok(TextVerdict {
            user_id: r.try_get("user_id")?,
            status: parse_column(&r, "status")?,
            created_at: r.try_get("created_at")?,
        })
    })
    .transpose()
}

/// Persisted verification state for a user.
pub async fn get_verification(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Option<UserVerificationState>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT user_id, verification_status, is_verified, review_category, review_reason,
               review_notified, notified_template, last_reviewed_at, profile_score
        FROM user_verification
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| {
        Ok(UserVerificationState {
            user_id: r.try_get("user_id")?,
            verification_status: parse_column(&r, "verification_status")?,
            is_verified: r.try_get("is_verified")?,
            review_category: parse_column(&r, "review_category")?,
            review_reason: r.try_get("review_reason")?,
            review_notified: r.try_get("review_notified")?,
            notified_template: optional_enum(&r, "notified_template")?,
            last_reviewed_at: r.try_get("last_reviewed_at")?,
            profile_score: r.try_get("profile_score")?,
        })
    })
    .transpose()
}

/// Write a decision. Notification bookkeeping is left untouched and a missing
/// profile score keeps the previous one.
pub async fn save_verification(
    pool: &PgPool,
    state: &UserVerificationState,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO user_verification (
            user_id, verification_status, is_verified, review_category, review_reason,
            review_notified, notified_template, last_reviewed_at, profile_score
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (user_id) DO UPDATE
            SET verification_status = EXCLUDED.verification_status,
                is_verified = EXCLUDED.is_verified,
                review_category = EXCLUDED.review_category,
                review_reason = EXCLUDED.review_reason,
                last_reviewed_at = EXCLUDED.last_reviewed_at,
                profile_score = COALESCE(EXCLUDED.profile_score, user_verification.profile_score)
        "#,
    )
    .bind(state.user_id)
    .bind(state.verification_status.as_ref())
    .bind(state.is_verified)
    .bind(state.review_category.as_ref())
    .bind(&state.review_reason)
    .bind(state.review_notified)
    .bind(state.notified_template.map(|t| t.as_ref().to_string()))
    .bind(state.last_reviewed_at)
    .bind(state.profile_score)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record that the user was sent `template`.
pub async fn mark_notified(
    pool: &PgPool,
    user_id: Uuid,
    template: NotificationTemplate,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE user_verification
        SET review_notified = TRUE,
            notified_template = $2
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .bind(template.as_ref())
    .execute(pool)
    .await?;

    Ok(())
}
