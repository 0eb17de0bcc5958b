mod helpers;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use helpers::{OfflineQueue, UnavailableRecords};
use photobot_pipeline::{
    app_state::AppState,
    models::{
        api::{ResultNotification, ResultResponse, SubmitResponse},
        detection::{BoundingBox, Detection},
        job::{JobDescriptor, JobResult},
    },
    routes,
    services::{
        memory::{MemoryBlobStore, MemoryRecordStore, MemoryTaskQueue},
        queue::TaskQueue,
        records::RecordStore,
        submitter::Submitter,
    },
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

const BOUNDARY: &str = "photobot-test-boundary";
const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

struct Gateway {
    app: Router,
    queue: Arc<MemoryTaskQueue>,
    storage: Arc<MemoryBlobStore>,
    records: Arc<MemoryRecordStore>,
}

fn gateway() -> Gateway {
    let queue = Arc::new(MemoryTaskQueue::new(Duration::from_secs(30)));
    let storage = Arc::new(MemoryBlobStore::new());
    let records = Arc::new(MemoryRecordStore::new());
    let submitter = Submitter::new(storage.clone(), queue.clone());
    let app = routes::router(AppState::new(submitter, records.clone(), queue.clone()));
    Gateway {
        app,
        queue,
        storage,
        records,
    }
}

fn multipart_body(image: Option<&[u8]>, chat_id: Option<&str>) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(image) = image {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"photo.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(image);
        body.extend_from_slice(b"\r\n");
    }
    if let Some(chat_id) = chat_id {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"chat_id\"\r\n\r\n{chat_id}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn submit_request(image: Option<&[u8]>, chat_id: Option<&str>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/jobs")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(image, chat_id)))
        .unwrap()
}

async fn read_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_submit_photo_is_accepted_and_enqueued() {
    let gw = gateway();

    let response = gw
        .app
        .oneshot(submit_request(Some(PNG_HEADER), Some("C1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: SubmitResponse = read_json(response).await;
    assert_eq!(body.status, "queued");

    let messages = gw.queue.poll(10, Duration::ZERO).await.unwrap();
    assert_eq!(messages.len(), 1);
    let descriptor = messages[0].descriptor().unwrap();
    assert_eq!(descriptor.job_id, body.job_id);
    assert_eq!(descriptor.origin_chat_id, "C1");
    assert!(gw.storage.contains(&descriptor.image_key).await);
}

#[tokio::test]
async fn test_submit_without_chat_id_is_rejected() {
    let gw = gateway();

    let response = gw
        .app
        .oneshot(submit_request(Some(PNG_HEADER), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(gw.queue.is_empty().await);
    assert!(gw.storage.is_empty().await);
}

#[tokio::test]
async fn test_submit_without_image_is_rejected() {
    let gw = gateway();

    let response = gw
        .app
        .oneshot(submit_request(None, Some("C1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(gw.queue.is_empty().await);
}

#[tokio::test]
async fn test_submit_non_image_is_unsupported() {
    let gw = gateway();

    let response = gw
        .app
        .oneshot(submit_request(Some(b"just some text"), Some("C1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert!(gw.queue.is_empty().await);
}

#[tokio::test]
async fn test_submit_with_queue_down_is_unavailable() {
    let storage = Arc::new(MemoryBlobStore::new());
    let queue: Arc<dyn TaskQueue> = Arc::new(OfflineQueue);
    let submitter = Submitter::new(storage.clone(), queue.clone());
    let app = routes::router(AppState::new(
        submitter,
        Arc::new(MemoryRecordStore::new()),
        queue,
    ));

    let response = app
        .oneshot(submit_request(Some(PNG_HEADER), Some("C1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(storage.is_empty().await);
}

#[tokio::test]
async fn test_result_can_be_pulled_by_job_id() {
    let gw = gateway();
    let descriptor = JobDescriptor::new(Uuid::new_v4(), "photos/C1/a".into(), "C1".into());
    let stored = JobResult::new(
        &descriptor,
        vec![Detection {
            label: "dog".into(),
            confidence: 0.88,
            bbox: BoundingBox {
                x0: 5.0,
                y0: 5.0,
                x1: 50.0,
                y1: 60.0,
            },
        }],
    );
    gw.records.insert(&stored).await.unwrap();

    let response = gw
        .app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/jobs/{}", descriptor.job_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: ResultResponse = read_json(response).await;
    assert_eq!(body.job_id, descriptor.job_id);
    assert_eq!(body.status, "completed");
    assert_eq!(body.result.origin_chat_id, "C1");
    assert_eq!(body.result.detections, stored.detections);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let gw = gateway();

    let response = gw
        .app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/jobs/{}", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pushed_result_is_accepted() {
    let gw = gateway();
    let notification = ResultNotification::failed(Uuid::new_v4(), "C1", "photo was lost");

    let response = gw
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/results")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&notification).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_ok_with_in_memory_backends() {
    let gw = gateway();

    let response = gw
        .app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = read_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["checks"]["queue"]["queue_depth"], 0);
}

#[tokio::test]
async fn test_health_degraded_when_record_store_down() {
    let queue = Arc::new(MemoryTaskQueue::new(Duration::from_secs(30)));
    let submitter = Submitter::new(Arc::new(MemoryBlobStore::new()), queue.clone());
    let app = routes::router(AppState::new(
        submitter,
        Arc::new(UnavailableRecords),
        queue,
    ));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = read_json(response).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["checks"]["record_store"]["status"], "error");
}

#[tokio::test]
async fn test_health_degraded_when_queue_down() {
    let queue: Arc<dyn TaskQueue> = Arc::new(OfflineQueue);
    let submitter = Submitter::new(Arc::new(MemoryBlobStore::new()), queue.clone());
    let app = routes::router(AppState::new(
        submitter,
        Arc::new(MemoryRecordStore::new()),
        queue,
    ));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
