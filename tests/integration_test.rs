use std::sync::Arc;

use anomaly_queue::{
    config::AppConfig,
    db::{self, CompletedAnalysis, JobStore, PgJobStore},
    models::job::JobStatus,
    services::queue::QueueManager,
};

/// Integration test: queue bookkeeping against PostgreSQL
///
/// Covers migrations, idempotent enqueue, position numbering and the
/// completion transaction that rewrites the image path.
///
/// Note: This requires a running PostgreSQL instance configured via
/// DATABASE_URL.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_postgres_queue_lifecycle() {
    let config = AppConfig::from_env().expect("Failed to load config");

    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run migrations");

    // Unique inspection id so reruns do not collide.
    let inspection_id = chrono::Utc::now().timestamp_micros();
    let mut image_ids = Vec::new();
    for name in ["a.jpg", "b.jpg", "c.jpg"] {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO images (inspection_id, file_path) VALUES ($1, $2) RETURNING id",
        )
        .bind(inspection_id)
        .bind(format!("/uploads/{inspection_id}/{name}"))
        .fetch_one(&db_pool)
        .await
        .expect("Failed to insert image");
        image_ids.push(id);
    }

    let store = Arc::new(PgJobStore::new(db_pool.clone()));
    let queue = QueueManager::new(store.clone());

    let before = queue.queue_status().await.unwrap().queued_count;

    let first = queue.enqueue(image_ids[0]).await.unwrap();
    let again = queue.enqueue(image_ids[0]).await.unwrap();
    assert_eq!(first.id, again.id);

    queue.enqueue(image_ids[1]).await.unwrap();
    queue.enqueue(image_ids[2]).await.unwrap();

    let jobs = queue.get_by_inspection(inspection_id).await.unwrap();
    assert_eq!(jobs.len(), 3);
    let positions: Vec<i32> = jobs.iter().filter_map(|j| j.queue_position).collect();
    let base = before as i32;
    assert_eq!(positions, vec![base + 1, base + 2, base + 3]);

    // Drive the first job to completion by hand.
    assert!(store
        .mark_processing(first.id, chrono::Utc::now())
        .await
        .unwrap());
    // A second claim of the same job is refused.
    assert!(!store
        .mark_processing(first.id, chrono::Utc::now())
        .await
        .unwrap());
    let outcome = CompletedAnalysis {
        result_json: r#"{"label":"normal","boxes":[]}"#.to_string(),
        boxed_image_path: "/analysis/a_boxed.png".to_string(),
    };
    assert!(store
        .mark_completed(first.id, image_ids[0], &outcome, chrono::Utc::now())
        .await
        .unwrap());
    store.recompute_queue_positions().await.unwrap();

    // Terminal jobs cannot be rewritten.
    assert!(!store
        .mark_failed(first.id, "late failure", chrono::Utc::now())
        .await
        .unwrap());

    let done = queue.get_by_id(first.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.queue_position, None);

    let image = store.get_image(image_ids[0]).await.unwrap().unwrap();
    assert_eq!(image.file_path, "/analysis/a_boxed.png");

    let rest = queue.get_by_inspection(inspection_id).await.unwrap();
    let positions: Vec<i32> = rest.iter().filter_map(|j| j.queue_position).collect();
    assert_eq!(positions, vec![base + 1, base + 2]);

    // Cleanup
    sqlx::query("DELETE FROM analysis_jobs WHERE image_id = ANY($1)")
        .bind(&image_ids)
        .execute(&db_pool)
        .await
        .ok();
    sqlx::query("DELETE FROM images WHERE inspection_id = $1")
        .bind(inspection_id)
        .execute(&db_pool)
        .await
        .ok();

    println!("✓ PostgreSQL queue lifecycle verified");
}
