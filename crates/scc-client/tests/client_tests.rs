//! Client tests against an in-process mock of the SCC web service.

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::{Path as FsPath, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_TYPE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Form, Json, Router};
use chrono::NaiveDate;
use netcdf_classic::{DatasetBuilder, Values};
use regex::Regex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use scc_client::{
    ClientConfig, Credentials, MeasurementState, Page, SccClient, SccError, SearchCriteria,
    Session,
};

const CSRF: &str = "csrftoken=token123; Path=/";

#[derive(Default)]
struct MockState {
    measurements: Mutex<HashMap<String, Value>>,
    uploads: AtomicUsize,
    soundings_uploaded: AtomicUsize,
    reruns: AtomicUsize,
    deletes: AtomicUsize,
    flaky_calls: AtomicUsize,
    bad_request_calls: AtomicUsize,
    upload_posts: AtomicUsize,
}

impl MockState {
    fn insert(&self, measurement: Value) {
        let id = measurement["id"].as_str().unwrap_or_default().to_string();
        self.measurements.lock().unwrap().insert(id, measurement);
    }
}

type Shared = Arc<MockState>;

fn done(id: &str) -> Value {
    json!({"id": id, "station_id": "abc", "upload": 127, "elpp": 127, "elda": 127, "is_running": false})
}

fn running(id: &str) -> Value {
    json!({"id": id, "station_id": "abc", "upload": 127, "is_running": true})
}

fn submitted(id: &str) -> Value {
    json!({"id": id, "station_id": "abc", "upload": 0, "is_running": false})
}

// ============================================================================
// Mock handlers
// ============================================================================

async fn csrf_page() -> impl IntoResponse {
    ([(SET_COOKIE, CSRF)], "<form></form>")
}

async fn login_submit(headers: HeaderMap, Form(form): Form<HashMap<String, String>>) -> Response {
    if headers.get("X-CSRFToken").and_then(|v| v.to_str().ok()) != Some("token123") {
        return (StatusCode::FORBIDDEN, "CSRF verification failed").into_response();
    }
    match form.get("password").map(String::as_str) {
        Some("secret") => "<p>Welcome</p>".into_response(),
        _ => "<p>Wrong username or password</p>".into_response(),
    }
}

async fn list_measurements(Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    if query.get("station_id").map(String::as_str) == Some("LOOP") {
        return Json(json!({
            "meta": {"next": "/api/v1/measurements/?station_id=LOOP&offset=0", "total_count": 1},
            "objects": []
        }));
    }

    let total = 30;
    let limit = 10;
    let offset: usize = query.get("offset").and_then(|v| v.parse().ok()).unwrap_or(0);
    let objects: Vec<Value> = (offset..(offset + limit).min(total))
        .map(|i| done(&format!("ABC202305{:02}08000830", i + 1)))
        .collect();
    let next = (offset + limit < total)
        .then(|| format!("/api/v1/measurements/?offset={}&limit={}", offset + limit, limit));
    Json(json!({"meta": {"next": next, "total_count": total}, "objects": objects}))
}

async fn measurement_detail(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    if id == "FLAKY" && state.flaky_calls.fetch_add(1, Ordering::SeqCst) == 0 {
        return (StatusCode::SERVICE_UNAVAILABLE, "maintenance").into_response();
    }
    if id == "MALFORMED" {
        state.bad_request_calls.fetch_add(1, Ordering::SeqCst);
        return (StatusCode::BAD_REQUEST, "invalid measurement id").into_response();
    }
    let mut measurements = state.measurements.lock().unwrap();
    match measurements.get_mut(&id) {
        Some(measurement) => {
            let current = measurement.clone();
            // Fresh uploads finish processing after the first poll.
            if current["upload"] == 0 {
                *measurement = done(&id);
            }
            Json(current).into_response()
        }
        None => (StatusCode::NOT_FOUND, "{}").into_response(),
    }
}

async fn quick_upload(State(state): State<Shared>, body: Bytes) -> Response {
    state.upload_posts.fetch_add(1, Ordering::SeqCst);
    let text = String::from_utf8_lossy(&body);
    if text.contains("name=\"system\"\r\n\r\n503") {
        return (StatusCode::SERVICE_UNAVAILABLE, "upload queue full").into_response();
    }
    if text.contains("name=\"system\"\r\n\r\n999") {
        return "<form><ul class=\"errorlist\"><li>Unknown system</li></ul></form>".into_response();
    }
    if text.contains("name=\"sounding_file\"") {
        state.soundings_uploaded.fetch_add(1, Ordering::SeqCst);
    }
    let id = match Regex::new(r"[A-Z]{3}\d{16}").unwrap().find(&text) {
        Some(m) => m.as_str().to_string(),
        None => return (StatusCode::BAD_REQUEST, "no data file").into_response(),
    };
    state.uploads.fetch_add(1, Ordering::SeqCst);
    state.insert(submitted(&id));
    Redirect::to(&format!("/data_processing/measurements/{}/", id)).into_response()
}

async fn measurement_page(Path(id): Path<String>) -> String {
    format!("<h3>Measurement {} <small>uploaded</small></h3>", id)
}

async fn sounding_files(Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    let objects = match query.get("filename").map(String::as_str) {
        Some("rs_known.nc") => json!([{"id": 7, "filename": "rs_known.nc", "status": "ok"}]),
        _ => json!([]),
    };
    Json(json!({"meta": {"next": null}, "objects": objects}))
}

fn product_archive(id: &str, product: &str) -> Response {
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buffer);
        writer
            .start_file(
                format!("{}/{}_{}.nc", product, id, product),
                zip::write::FileOptions::default(),
            )
            .unwrap();
        writer.write_all(product.as_bytes()).unwrap();
        writer.finish().unwrap();
    }
    ([(CONTENT_TYPE, "application/zip")], buffer.into_inner()).into_response()
}

async fn download_preprocessed(Path(id): Path<String>) -> Response {
    product_archive(&id, "preprocessed")
}

async fn download_optical(Path(id): Path<String>) -> Response {
    product_archive(&id, "optical")
}

async fn rerun(State(state): State<Shared>, Path(id): Path<String>) -> &'static str {
    state.reruns.fetch_add(1, Ordering::SeqCst);
    state.insert(running(&id));
    "rerun started"
}

async fn delete_submit(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if form.get("post").map(String::as_str) != Some("yes") {
        return (StatusCode::BAD_REQUEST, "not confirmed").into_response();
    }
    state.deletes.fetch_add(1, Ordering::SeqCst);
    state.measurements.lock().unwrap().remove(&id);
    "deleted".into_response()
}

async fn spawn_mock() -> (String, Shared) {
    let state = Shared::default();
    let app = Router::new()
        .route("/accounts/login/", get(csrf_page).post(login_submit))
        .route("/accounts/logout/", get(|| async { "bye" }))
        .route("/api/v1/measurements/", get(list_measurements))
        .route("/api/v1/measurements/:id/", get(measurement_detail))
        .route("/api/v1/sounding_files/", get(sounding_files))
        .route("/data_processing/measurements/quick/", get(csrf_page).post(quick_upload))
        .route("/data_processing/measurements/:id/", get(measurement_page))
        .route(
            "/data_processing/measurements/:id/download-preprocessed/",
            get(download_preprocessed),
        )
        .route(
            "/data_processing/measurements/:id/download-optical/",
            get(download_optical),
        )
        .route("/data_processing/measurements/:id/rerun-all/", get(rerun))
        .route(
            "/admin/database/measurements/:id/delete/",
            get(csrf_page).post(delete_submit),
        )
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/", addr), state)
}

// ============================================================================
// Helpers
// ============================================================================

fn test_config(base_url: &str) -> ClientConfig {
    ClientConfig {
        base_url: base_url.to_string(),
        request_timeout: Duration::from_secs(10),
        connect_timeout: Duration::from_secs(5),
        max_retries: 2,
        initial_retry_delay: Duration::from_millis(10),
        max_retry_delay: Duration::from_millis(50),
        max_concurrent_uploads: 2,
        poll_interval: Duration::from_millis(10),
        max_polls: 5,
    }
}

fn client(base_url: &str) -> SccClient {
    let config = test_config(base_url);
    let session = Session::new(&config, None).unwrap();
    SccClient::new(Arc::new(session), config)
}

async fn logged_in() -> (SccClient, Shared) {
    let (url, state) = spawn_mock().await;
    let client = client(&url);
    client
        .login(&Credentials::new("operator", "secret"))
        .await
        .unwrap();
    (client, state)
}

fn write_artifact(dir: &FsPath, id: &str, system: i32, sounding: Option<&str>) -> PathBuf {
    let mut builder = DatasetBuilder::new();
    builder.add_dimension("time", 1).unwrap();
    builder
        .add_variable("Laser_Pointing_Angle", &["time"], Values::Double(vec![0.0]))
        .unwrap();
    builder.add_attribute("Measurement_ID", Values::text(id));
    builder.add_attribute("X_System_ID", Values::Int(vec![system]));
    if let Some(name) = sounding {
        builder.add_attribute("Sounding_File_Name", Values::text(name));
        std::fs::write(dir.join(name), b"sounding").unwrap();
    }
    let path = dir.join(format!("{}.nc", id));
    std::fs::write(&path, builder.encode().unwrap()).unwrap();
    path
}

fn may_2023() -> SearchCriteria {
    SearchCriteria::new(
        NaiveDate::from_ymd_opt(2023, 5, 1).unwrap(),
        NaiveDate::from_ymd_opt(2023, 5, 31).unwrap(),
    )
}

// ============================================================================
// Session
// ============================================================================

#[tokio::test]
async fn test_operations_require_login() {
    let (url, state) = spawn_mock().await;
    let client = client(&url);
    let dir = tempfile::tempdir().unwrap();
    let artifact = write_artifact(dir.path(), "ABC2023050108000830", 590, None);

    assert!(matches!(
        client.search(&may_2023(), Page::default()).await,
        Err(SccError::Authentication(_))
    ));
    assert!(matches!(
        client.upload(&artifact).await,
        Err(SccError::Authentication(_))
    ));
    assert!(matches!(
        client.get_measurement("ABC2023050108000830").await,
        Err(SccError::Authentication(_))
    ));
    assert_eq!(state.uploads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_wrong_password() {
    let (url, _state) = spawn_mock().await;
    let client = client(&url);

    let result = client.login(&Credentials::new("operator", "nope")).await;
    assert!(matches!(result, Err(SccError::Authentication(_))));
    assert!(!client.session().is_authenticated());
}

#[tokio::test]
async fn test_logout_ends_session() {
    let (client, _state) = logged_in().await;
    assert!(client.session().is_authenticated());

    client.logout().await.unwrap();
    assert!(!client.session().is_authenticated());
    assert!(matches!(
        client.search(&may_2023(), Page::default()).await,
        Err(SccError::Authentication(_))
    ));
}

// ============================================================================
// Queries
// ============================================================================

#[tokio::test]
async fn test_search_follows_all_pages() {
    let (client, _state) = logged_in().await;

    let results = client.search(&may_2023(), Page::default()).await.unwrap();
    assert_eq!(results.len(), 30);
    assert_eq!(results[0].id, "ABC2023050108000830");
    assert_eq!(results[29].id, "ABC2023053008000830");
    assert_eq!(
        client.state("ABC2023051508000830"),
        Some(MeasurementState::Done)
    );
}

#[tokio::test]
async fn test_search_rejects_repeating_pagination() {
    let (client, _state) = logged_in().await;

    let result = client
        .search(&may_2023().station("LOOP"), Page::default())
        .await;
    assert!(matches!(result, Err(SccError::Rejected { .. })));
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let (client, state) = logged_in().await;
    state.insert(done("FLAKY"));

    let info = client.get_measurement("FLAKY").await.unwrap().unwrap();
    assert_eq!(info.state(), MeasurementState::Done);
    assert_eq!(state.flaky_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unknown_measurement() {
    let (client, _state) = logged_in().await;

    assert!(client.get_measurement("NOPE").await.unwrap().is_none());
    assert!(matches!(
        client.poll("NOPE").await,
        Err(SccError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let (client, state) = logged_in().await;

    assert!(matches!(
        client.poll("MALFORMED").await,
        Err(SccError::Rejected { status: Some(400), .. })
    ));
    assert_eq!(state.bad_request_calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Upload
// ============================================================================

#[tokio::test]
async fn test_second_upload_rejected_without_request() {
    let (client, state) = logged_in().await;
    let dir = tempfile::tempdir().unwrap();
    let artifact = write_artifact(dir.path(), "ABC2023050108000830", 590, None);

    let id = client.upload(&artifact).await.unwrap();
    assert_eq!(id, "ABC2023050108000830");
    assert_eq!(client.state(&id), Some(MeasurementState::Submitted));

    assert!(matches!(
        client.upload(&artifact).await,
        Err(SccError::DuplicateUpload(_))
    ));
    assert_eq!(state.uploads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rejected_upload_leaves_measurement_unsubmitted() {
    let (client, state) = logged_in().await;
    let dir = tempfile::tempdir().unwrap();
    let artifact = write_artifact(dir.path(), "ABC2023050108000830", 999, None);

    match client.upload(&artifact).await {
        Err(SccError::Rejected { message, .. }) => assert!(message.contains("Unknown system")),
        other => panic!("expected rejection, got {:?}", other),
    }
    assert_eq!(client.state("ABC2023050108000830"), None);
    assert_eq!(state.uploads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_upload_post_is_not_retried_on_server_error() {
    let (client, state) = logged_in().await;
    let dir = tempfile::tempdir().unwrap();
    let artifact = write_artifact(dir.path(), "ABC2023050108000830", 503, None);

    assert!(matches!(
        client.upload(&artifact).await,
        Err(SccError::Transient(_))
    ));
    // A retried POST could create a second remote entry.
    assert_eq!(state.upload_posts.load(Ordering::SeqCst), 1);
    assert_eq!(client.state("ABC2023050108000830"), None);

    // The reservation was released, so a later attempt is allowed.
    assert!(!matches!(
        client.upload(&artifact).await,
        Err(SccError::DuplicateUpload(_))
    ));
}

#[tokio::test]
async fn test_sounding_uploaded_unless_known() {
    let (client, state) = logged_in().await;
    let dir = tempfile::tempdir().unwrap();
    let fresh = write_artifact(
        dir.path(),
        "ABC2023050108000830",
        590,
        Some("rs_ABC2023050108000830.nc"),
    );
    let known = write_artifact(dir.path(), "ABC2023050108300900", 590, Some("rs_known.nc"));

    client.upload(&fresh).await.unwrap();
    client.upload(&known).await.unwrap();
    assert_eq!(state.uploads.load(Ordering::SeqCst), 2);
    assert_eq!(state.soundings_uploaded.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_artifact() {
    let (client, _state) = logged_in().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.nc");
    std::fs::write(&path, b"not netcdf").unwrap();

    assert!(matches!(
        client.upload(&path).await,
        Err(SccError::InvalidArtifact { .. })
    ));
}

#[tokio::test]
async fn test_upload_all_preserves_order() {
    let (client, state) = logged_in().await;
    let dir = tempfile::tempdir().unwrap();
    let ids = [
        "ABC2023050108000830",
        "ABC2023050108300900",
        "ABC2023050109000930",
    ];
    let paths: Vec<PathBuf> = ids
        .iter()
        .map(|id| write_artifact(dir.path(), id, 590, None))
        .collect();

    let outcomes = client.upload_all(&paths, &CancellationToken::new()).await;
    assert_eq!(outcomes.len(), 3);
    for (outcome, id) in outcomes.iter().zip(ids) {
        assert_eq!(outcome.result.as_deref().unwrap(), id);
    }
    assert_eq!(state.uploads.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_upload_all_cancelled() {
    let (client, state) = logged_in().await;
    let dir = tempfile::tempdir().unwrap();
    let paths = vec![
        write_artifact(dir.path(), "ABC2023050108000830", 590, None),
        write_artifact(dir.path(), "ABC2023050108300900", 590, None),
    ];
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcomes = client.upload_all(&paths, &cancel).await;
    assert!(outcomes
        .iter()
        .all(|o| matches!(o.result, Err(SccError::Cancelled))));
    assert_eq!(state.uploads.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Lifecycle and products
// ============================================================================

#[tokio::test]
async fn test_process_uploads_waits_and_downloads() {
    let (client, _state) = logged_in().await;
    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let artifact = write_artifact(dir.path(), "ABC2023050108000830", 590, None);

    let (id, files) = client.process(&artifact, out.path()).await.unwrap();
    assert_eq!(id, "ABC2023050108000830");
    assert_eq!(files.len(), 2);
    assert_eq!(client.state(&id), Some(MeasurementState::Done));

    let preprocessed = out
        .path()
        .join(&id)
        .join("scc_preprocessed")
        .join(format!("{}_preprocessed.nc", id));
    assert_eq!(std::fs::read(preprocessed).unwrap(), b"preprocessed");
    assert!(out
        .path()
        .join(&id)
        .join("scc_optical")
        .join(format!("{}_optical.nc", id))
        .exists());
}

#[tokio::test]
async fn test_download_requires_done() {
    let (client, state) = logged_in().await;
    state.insert(running("BUSY"));
    let out = tempfile::tempdir().unwrap();

    assert!(matches!(
        client.download("BUSY", out.path()).await,
        Err(SccError::NotReady {
            state: MeasurementState::Processing,
            ..
        })
    ));
}

#[tokio::test]
async fn test_rerun_then_delete() {
    let (client, state) = logged_in().await;
    state.insert(done("ABC2023050108000830"));
    state.insert(running("BUSY"));

    assert!(matches!(
        client.rerun("BUSY").await,
        Err(SccError::InvalidTransition { .. })
    ));
    assert_eq!(state.reruns.load(Ordering::SeqCst), 0);

    let after_rerun = client.rerun("ABC2023050108000830").await.unwrap();
    assert_eq!(after_rerun, MeasurementState::Processing);
    assert_eq!(state.reruns.load(Ordering::SeqCst), 1);

    client.delete("ABC2023050108000830").await.unwrap();
    assert_eq!(
        client.state("ABC2023050108000830"),
        Some(MeasurementState::Deleted)
    );
    assert_eq!(state.deletes.load(Ordering::SeqCst), 1);

    assert!(matches!(
        client.delete("ABC2023050108000830").await,
        Err(SccError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_wait_gives_up_after_max_polls() {
    let (client, state) = logged_in().await;
    state.insert(running("BUSY"));

    match client
        .wait_for_completion("BUSY", Duration::from_millis(5), 3)
        .await
    {
        Err(SccError::NotReady { state, .. }) => assert_eq!(state, MeasurementState::Processing),
        other => panic!("expected NotReady, got {:?}", other),
    }
}
