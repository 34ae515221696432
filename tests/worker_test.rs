mod helpers;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use anomaly_queue::db::JobStore;
use anomaly_queue::models::job::{JobStatus, QueueStatus};
use anomaly_queue::services::inference::MockInferenceBackend;
use anomaly_queue::services::queue::QueueError;
use anomaly_queue::services::worker::INTERRUPTED_MESSAGE;

use helpers::{eventually, Harness, ScriptedStore, INSPECTION_ID};

#[tokio::test]
async fn enqueue_twice_returns_same_job() {
    let h = Harness::new();
    h.add_image(1, "a.jpg");

    let first = h.queue.enqueue(1).await.unwrap();
    let second = h.queue.enqueue(1).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(h.queue.get_by_inspection(INSPECTION_ID).await.unwrap().len(), 1);
    assert_eq!(h.queue.queue_status().await.unwrap().queued_count, 1);
}

#[tokio::test]
async fn enqueue_unknown_image_is_rejected() {
    let h = Harness::new();
    let err = h.queue.enqueue(404).await.unwrap_err();
    assert!(matches!(err, QueueError::ImageNotFound(404)));
}

#[tokio::test]
async fn positions_follow_creation_order_and_renumber_after_completion() {
    let h = Harness::new();
    for (id, name) in [(1, "a.jpg"), (2, "b.jpg"), (3, "c.jpg")] {
        h.add_image(id, name);
    }

    let a = h.queue.enqueue(1).await.unwrap();
    let b = h.queue.enqueue(2).await.unwrap();
    let c = h.queue.enqueue(3).await.unwrap();
    assert_eq!(
        [a.queue_position, b.queue_position, c.queue_position],
        [Some(1), Some(2), Some(3)]
    );

    let worker = h.worker(MockInferenceBackend::new());
    let outcome = worker.process_next_job().await.unwrap().unwrap();
    assert_eq!(outcome.job_id, a.id);
    assert_eq!(outcome.status, JobStatus::Completed);

    let a = h.queue.get_by_id(a.id).await.unwrap().unwrap();
    let b = h.queue.get_by_id(b.id).await.unwrap().unwrap();
    let c = h.queue.get_by_id(c.id).await.unwrap().unwrap();
    assert_eq!(a.queue_position, None);
    assert_eq!(b.queue_position, Some(1));
    assert_eq!(c.queue_position, Some(2));
}

#[tokio::test]
async fn thermal_image_is_published_and_image_path_rewritten() {
    let h = Harness::new();
    h.add_image(10, "thermal_01.jpg");
    let job = h.queue.enqueue(10).await.unwrap();

    let backend = MockInferenceBackend::new().with_label("hotspot").with_ext(".jpg");
    let worker = h.worker(backend.clone());
    worker.process_next_job().await.unwrap().unwrap();

    let job = h.queue.get_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.boxed_image_path.as_deref(), Some("/analysis/thermal_01_boxed.jpg"));
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());
    assert!(job.error_message.is_none());

    let result: serde_json::Value =
        serde_json::from_str(job.result_json.as_deref().unwrap()).unwrap();
    assert_eq!(result, serde_json::json!({"label": "hotspot", "boxes": []}));

    let image = h.image(10).await;
    assert_eq!(Some(image.file_path.as_str()), job.boxed_image_path.as_deref());

    let boxed = h.root().join("analysis/thermal_01_boxed.jpg");
    let json = h.root().join("analysis/thermal_01.json");
    assert_eq!(std::fs::read(&boxed).unwrap(), b"boxed:thermal_01");
    assert!(json.exists());
    // Original stays on disk.
    assert!(h.root().join(format!("inspections/{INSPECTION_ID}/thermal_01.jpg")).exists());

    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].filename, "thermal_01.jpg");
    assert_eq!(calls[0].sensitivity, 0.5);
    assert!(calls[0].feedback_json.contains("\"learning_rate\":0.1"));
}

#[tokio::test]
async fn backend_failure_marks_job_failed_and_keeps_image_path() {
    let h = Harness::new();
    let original = h.add_image(1, "a.jpg");
    h.add_image(2, "b.jpg");
    let a = h.queue.enqueue(1).await.unwrap();
    let b = h.queue.enqueue(2).await.unwrap();

    let worker = h.worker(MockInferenceBackend::new().failing_for("a.jpg", "model crashed"));
    let outcome = worker.process_next_job().await.unwrap().unwrap();
    assert_eq!(outcome.status, JobStatus::Failed);

    let a = h.queue.get_by_id(a.id).await.unwrap().unwrap();
    assert_eq!(a.status, JobStatus::Failed);
    assert_eq!(a.queue_position, None);
    assert!(a.error_message.as_deref().unwrap().contains("model crashed"));
    assert!(a.boxed_image_path.is_none());
    assert_eq!(h.image(1).await.file_path, original.file_path);
    assert!(!h.root().join("analysis/a.json").exists());

    let b = h.queue.get_by_id(b.id).await.unwrap().unwrap();
    assert_eq!(b.queue_position, Some(1));
    assert_eq!(h.queue.queue_status().await.unwrap().queued_count, 1);
}

#[tokio::test]
async fn missing_source_file_fails_job() {
    let h = Harness::new();
    h.add_image_record(1, "gone.jpg");
    let job = h.queue.enqueue(1).await.unwrap();

    let backend = MockInferenceBackend::new();
    let worker = h.worker(backend.clone());
    worker.process_next_job().await.unwrap().unwrap();

    let job = h.queue.get_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job
        .error_message
        .unwrap()
        .starts_with("Original image file not found"));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn empty_queue_yields_nothing() {
    let h = Harness::new();
    let worker = h.worker(MockInferenceBackend::new());
    assert!(worker.process_next_job().await.unwrap().is_none());
}

#[tokio::test]
async fn failed_job_does_not_stop_the_loop() {
    let h = Harness::new();
    h.add_image(1, "a.jpg");
    h.add_image(2, "b.jpg");

    let worker = Arc::new(h.worker(MockInferenceBackend::new().failing_for("a.jpg", "boom")));
    let cancel = CancellationToken::new();
    let handle = worker.clone().spawn(cancel.clone());

    let queue = &h.queue;
    let a = queue.enqueue(1).await.unwrap().id;
    assert!(
        eventually(|| async move {
            queue.get_by_id(a).await.unwrap().unwrap().status == JobStatus::Failed
        })
        .await
    );

    let b = queue.enqueue(2).await.unwrap().id;
    assert!(
        eventually(|| async move {
            queue.get_by_id(b).await.unwrap().unwrap().status == JobStatus::Completed
        })
        .await
    );

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker stops after cancel")
        .unwrap();
}

#[tokio::test]
async fn loop_survives_store_outage() {
    let h = Harness::new();
    h.add_image(1, "a.jpg");
    let job = h.queue.enqueue(1).await.unwrap();

    h.store.set_unavailable(true);
    let worker = Arc::new(h.worker(MockInferenceBackend::new()));
    assert!(worker.process_next_job().await.is_err());

    let cancel = CancellationToken::new();
    let handle = worker.clone().spawn(cancel.clone());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_finished());

    h.store.set_unavailable(false);
    let queue = &h.queue;
    let job_id = job.id;
    assert!(
        eventually(|| async move {
            queue.get_by_id(job_id).await.unwrap().unwrap().status == JobStatus::Completed
        })
        .await
    );

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn jobs_run_one_at_a_time_in_creation_order() {
    let h = Harness::new();
    for (id, name) in [(1, "a.jpg"), (2, "b.jpg"), (3, "c.jpg")] {
        h.add_image(id, name);
        h.queue.enqueue(id).await.unwrap();
    }

    let backend = MockInferenceBackend::new().with_latency(Duration::from_millis(10));
    let worker = Arc::new(h.worker(backend.clone()));
    let cancel = CancellationToken::new();
    let handle = worker.clone().spawn(cancel.clone());

    let queue = &h.queue;
    let calls = &backend;
    assert!(
        eventually(|| async move {
            queue.queue_status().await.unwrap() == QueueStatus::default()
                && calls.calls().len() == 3
        })
        .await
    );
    cancel.cancel();
    handle.await.unwrap();

    let order: Vec<i64> = backend.calls().iter().map(|c| c.image_id).collect();
    assert_eq!(order, vec![1, 2, 3]);
}

#[tokio::test]
async fn reconciliation_fails_orphaned_processing_jobs() {
    let h = Harness::new();
    h.add_image(1, "a.jpg");
    h.add_image(2, "b.jpg");
    let a = h.queue.enqueue(1).await.unwrap();
    let b = h.queue.enqueue(2).await.unwrap();

    // Simulate a crash after the job was claimed.
    h.store.mark_processing(a.id, chrono::Utc::now()).await.unwrap();

    let worker = h.worker(MockInferenceBackend::new());
    let failed = worker.reconcile_stale_jobs(Duration::ZERO).await.unwrap();
    assert_eq!(failed, 1);

    let a = h.queue.get_by_id(a.id).await.unwrap().unwrap();
    assert_eq!(a.status, JobStatus::Failed);
    assert_eq!(a.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));

    let b = h.queue.get_by_id(b.id).await.unwrap().unwrap();
    assert_eq!(b.status, JobStatus::Queued);
    assert_eq!(b.queue_position, Some(1));
}

#[tokio::test]
async fn reconciliation_skips_recent_processing_jobs() {
    let h = Harness::new();
    h.add_image(1, "a.jpg");
    let a = h.queue.enqueue(1).await.unwrap();
    h.store.mark_processing(a.id, chrono::Utc::now()).await.unwrap();

    let worker = h.worker(MockInferenceBackend::new());
    let failed = worker
        .reconcile_stale_jobs(Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(failed, 0);
    assert_eq!(
        h.queue.get_by_id(a.id).await.unwrap().unwrap().status,
        JobStatus::Processing
    );
}

#[tokio::test]
async fn job_claimed_elsewhere_is_skipped() {
    let h = Harness::new();
    h.add_image(1, "a.jpg");
    h.add_image(2, "b.jpg");
    let a = h.queue.enqueue(1).await.unwrap();
    let b = h.queue.enqueue(2).await.unwrap();

    // Another worker claims A after this one has already read it as next.
    assert!(h.store.mark_processing(a.id, chrono::Utc::now()).await.unwrap());
    let store = Arc::new(ScriptedStore::new(h.store.clone()));
    store.serve_stale_next(a.clone());

    let backend = MockInferenceBackend::new();
    let worker = h.worker_over(store, Arc::new(backend.clone()), 0.5);
    let outcome = worker.process_next_job().await.unwrap().unwrap();

    assert_eq!(outcome.job_id, b.id);
    assert_eq!(outcome.status, JobStatus::Completed);
    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].image_id, 2);
    assert_eq!(
        h.queue.get_by_id(a.id).await.unwrap().unwrap().status,
        JobStatus::Processing
    );
}

#[tokio::test]
async fn image_read_outage_leaves_job_queued() {
    let h = Harness::new();
    h.add_image(1, "a.jpg");
    let job = h.queue.enqueue(1).await.unwrap();

    let store = Arc::new(ScriptedStore::new(h.store.clone()));
    store.fail_image_reads(true);
    let backend = MockInferenceBackend::new();
    let worker = h.worker_over(store.clone(), Arc::new(backend.clone()), 0.5);

    assert!(worker.process_next_job().await.is_err());
    let queued = h.queue.get_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(queued.status, JobStatus::Queued);
    assert_eq!(queued.queue_position, Some(1));
    assert!(backend.calls().is_empty());

    store.fail_image_reads(false);
    let outcome = worker.process_next_job().await.unwrap().unwrap();
    assert_eq!(outcome.status, JobStatus::Completed);
}

#[tokio::test]
async fn late_completion_does_not_override_reconciled_failure() {
    let h = Harness::new();
    let original = h.add_image(1, "a.jpg");
    let job_id = h.queue.enqueue(1).await.unwrap().id;

    let slow = Arc::new(h.worker(
        MockInferenceBackend::new().with_latency(Duration::from_millis(300)),
    ));
    let in_flight = tokio::spawn({
        let slow = slow.clone();
        async move { slow.process_next_job().await }
    });

    let queue = &h.queue;
    assert!(
        eventually(|| async move {
            queue.get_by_id(job_id).await.unwrap().unwrap().status == JobStatus::Processing
        })
        .await
    );

    // A restarted process fails the in-flight job as orphaned.
    let restarted = h.worker(MockInferenceBackend::new());
    assert_eq!(restarted.reconcile_stale_jobs(Duration::ZERO).await.unwrap(), 1);

    let outcome = in_flight.await.unwrap().unwrap().unwrap();
    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));

    let job = h.queue.get_by_id(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.boxed_image_path.is_none());
    assert_eq!(h.image(1).await.file_path, original.file_path);
}
