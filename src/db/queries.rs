use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::image::ImageRecord;
use crate::models::job::{AnalysisJob, JobStatus};

const JOB_COLUMNS: &str = "id, image_id, status, queue_position, result_json, boxed_image_path, \
                           error_message, created_at, started_at, completed_at";

fn job_from_row(row: &PgRow) -> Result<AnalysisJob, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str).map_err(|e| sqlx::Error::ColumnDecode {
        index: "status".to_string(),
        source: Box::new(e),
    })?;

    Ok(AnalysisJob {
        id: row.try_get("id")?,
        image_id: row.try_get("image_id")?,
        status,
        queue_position: row.try_get("queue_position")?,
        result_json: row.try_get("result_json")?,
        boxed_image_path: row.try_get("boxed_image_path")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

/// Get an image by ID
pub async fn get_image(pool: &PgPool, image_id: i64) -> Result<Option<ImageRecord>, sqlx::Error> {
    sqlx::query_as::<_, ImageRecord>(
        "SELECT id, inspection_id, file_path FROM images WHERE id = $1",
    )
    .bind(image_id)
    .fetch_optional(pool)
    .await
}

/// Get the job for an image, if one exists
pub async fn get_job_by_image(
    pool: &PgPool,
    image_id: i64,
) -> Result<Option<AnalysisJob>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM analysis_jobs WHERE image_id = $1"
    ))
    .bind(image_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<AnalysisJob>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM analysis_jobs WHERE id = $1"
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Jobs for every image of an inspection
pub async fn get_jobs_by_inspection(
    pool: &PgPool,
    inspection_id: i64,
) -> Result<Vec<AnalysisJob>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT j.id, j.image_id, j.status, j.queue_position, j.result_json, j.boxed_image_path,
               j.error_message, j.created_at, j.started_at, j.completed_at
        FROM analysis_jobs j
        JOIN images i ON i.id = j.image_id
        WHERE i.inspection_id = $1
        ORDER BY j.created_at ASC, j.seq ASC
        "#,
    )
    .bind(inspection_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Insert a QUEUED job positioned behind the current queue.
///
/// Returns `None` when the image already has a job.
pub async fn insert_queued_job(
    pool: &PgPool,
    job_id: Uuid,
    image_id: i64,
) -> Result<Option<AnalysisJob>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO analysis_jobs (id, image_id, status, queue_position)
        SELECT $1, $2, 'QUEUED', (COUNT(*) + 1)::INTEGER
        FROM analysis_jobs
        WHERE status = 'QUEUED'
        ON CONFLICT (image_id) DO NOTHING
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(job_id)
    .bind(image_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Count jobs in a given status
pub async fn count_by_status(pool: &PgPool, status: JobStatus) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM analysis_jobs WHERE status = $1")
        .bind(status.as_ref())
        .fetch_one(pool)
        .await?;

    row.try_get("n")
}

/// Oldest QUEUED job
pub async fn next_queued_job(pool: &PgPool) -> Result<Option<AnalysisJob>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM analysis_jobs
        WHERE status = 'QUEUED'
        ORDER BY created_at ASC, seq ASC
        LIMIT 1
        "#
    ))
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Renumber all QUEUED jobs 1..N by creation order.
pub async fn recompute_queue_positions<'e, E>(executor: E) -> Result<u64, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        WITH ranked AS (
            SELECT id, (ROW_NUMBER() OVER (ORDER BY created_at ASC, seq ASC))::INTEGER AS pos
            FROM analysis_jobs
            WHERE status = 'QUEUED'
        )
        UPDATE analysis_jobs j
        SET queue_position = ranked.pos
        FROM ranked
        WHERE j.id = ranked.id
          AND j.queue_position IS DISTINCT FROM ranked.pos
        "#,
    )
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Claim a QUEUED job and renumber the remaining queue.
///
/// Returns 0 when the job is no longer QUEUED.
pub async fn mark_processing(
    pool: &PgPool,
    job_id: Uuid,
    started_at: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = 'PROCESSING',
            started_at = $1,
            queue_position = NULL
        WHERE id = $2
          AND status = 'QUEUED'
        "#,
    )
    .bind(started_at)
    .bind(job_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if updated == 0 {
        tx.rollback().await?;
        return Ok(0);
    }

    recompute_queue_positions(&mut *tx).await?;
    tx.commit().await?;

    Ok(updated)
}

/// Complete a PROCESSING job and repoint its image at the boxed artifact.
///
/// Returns 0, leaving the image untouched, when the job is no longer
/// PROCESSING.
pub async fn mark_completed(
    pool: &PgPool,
    job_id: Uuid,
    image_id: i64,
    result_json: &str,
    boxed_image_path: &str,
    completed_at: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = 'COMPLETED',
            result_json = $1,
            boxed_image_path = $2,
            error_message = NULL,
            queue_position = NULL,
            completed_at = $3
        WHERE id = $4
          AND status = 'PROCESSING'
        "#,
    )
    .bind(result_json)
    .bind(boxed_image_path)
    .bind(completed_at)
    .bind(job_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if updated == 0 {
        tx.rollback().await?;
        return Ok(0);
    }

    sqlx::query("UPDATE images SET file_path = $1 WHERE id = $2")
        .bind(boxed_image_path)
        .bind(image_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(updated)
}

/// Fail a PROCESSING job with a diagnostic message
pub async fn mark_failed(
    pool: &PgPool,
    job_id: Uuid,
    error_message: &str,
    completed_at: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = 'FAILED',
            error_message = $1,
            queue_position = NULL,
            completed_at = $2
        WHERE id = $3
          AND status = 'PROCESSING'
        "#,
    )
    .bind(error_message)
    .bind(completed_at)
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// PROCESSING jobs started at or before the cutoff
pub async fn get_stale_processing(
    pool: &PgPool,
    started_before: DateTime<Utc>,
) -> Result<Vec<AnalysisJob>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM analysis_jobs
        WHERE status = 'PROCESSING'
          AND (started_at IS NULL OR started_at <= $1)
        ORDER BY created_at ASC, seq ASC
        "#
    ))
    .bind(started_before)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}
