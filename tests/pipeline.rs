use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tempfile::TempDir;

use callscribe::config::Config;
use callscribe::remote::RemoteTranscriber;
use callscribe::store::{AudioStore, TenantKey};
use callscribe::worker::Batch;

/// Serve a router on an ephemeral port from a dedicated runtime thread.
fn spawn_server(app: Router) -> SocketAddr {
    let (addr_tx, addr_rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            addr_tx.send(listener.local_addr().unwrap()).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });
    addr_rx.recv_timeout(Duration::from_secs(5)).unwrap()
}

fn write_wav_bytes() -> Vec<u8> {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("fixture.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for _ in 0..1600 {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
    std::fs::read(&path).unwrap()
}

// --- Poll protocol against a scripted status endpoint ---

#[derive(Clone)]
struct StubState {
    calls: Arc<AtomicU32>,
    /// Number of "still processing" responses before completing. `None`
    /// means the job never completes.
    complete_after: Option<u32>,
}

async fn stub_status(State(state): State<StubState>) -> Response {
    let call = state.calls.fetch_add(1, Ordering::SeqCst) + 1;
    let done = state
        .complete_after
        .map(|n| call > n)
        .unwrap_or(false);
    if done {
        let result = serde_json::json!({
            "transcription": "Speaker 1: done.",
            "overall_score": 7.4,
        });
        let bytes = rmp_serde::to_vec_named(&result).unwrap();
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/x-msgpack")],
            bytes,
        )
            .into_response()
    } else {
        let snapshot = serde_json::json!({"status": "processing"});
        let bytes = rmp_serde::to_vec_named(&snapshot).unwrap();
        (
            StatusCode::ACCEPTED,
            [(header::CONTENT_TYPE, "application/x-msgpack")],
            bytes,
        )
            .into_response()
    }
}

fn stub_service(complete_after: Option<u32>) -> (SocketAddr, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let state = StubState {
        calls: calls.clone(),
        complete_after,
    };
    let app = Router::new()
        .route("/status/:job_id", get(stub_status))
        .with_state(state);
    (spawn_server(app), calls)
}

#[test]
fn test_poll_completes_on_fifth_attempt() {
    let (addr, calls) = stub_service(Some(4));
    let remote = RemoteTranscriber::new(
        &format!("http://{}", addr),
        10,
        Duration::from_millis(10),
    );

    let started = std::time::Instant::now();
    let result = remote.poll("job-1").expect("poll should return a result");
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    // Four "still processing" responses mean four intervening delays.
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert_eq!(
        result.get("transcription").and_then(|v| v.as_str()),
        Some("Speaker 1: done.")
    );
    assert_eq!(result.get("overall_score").and_then(|v| v.as_f64()), Some(7.4));
}

#[test]
fn test_poll_exhausts_attempts_without_result() {
    let (addr, calls) = stub_service(None);
    let remote = RemoteTranscriber::new(
        &format!("http://{}", addr),
        3,
        Duration::from_millis(10),
    );

    assert!(remote.poll("job-2").is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_poll_aborts_on_unexpected_status() {
    async fn gone() -> StatusCode {
        StatusCode::GONE
    }
    let app = Router::new().route("/status/:job_id", get(gone));
    let addr = spawn_server(app);
    let remote = RemoteTranscriber::new(
        &format!("http://{}", addr),
        5,
        Duration::from_millis(10),
    );
    assert!(remote.poll("job-3").is_none());
}

#[test]
fn test_submit_rejection_returns_none() {
    // No /transcribe route at all: submission must come back as None.
    let app = Router::new();
    let addr = spawn_server(app);
    let remote = RemoteTranscriber::new(
        &format!("http://{}", addr),
        1,
        Duration::from_millis(10),
    );

    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("call.wav");
    std::fs::write(&path, write_wav_bytes()).unwrap();
    assert!(remote.submit(&path).is_none());
}

// --- Worker temp file cleanup when write-back fails ---

#[derive(Clone)]
struct VanishingTenantState {
    db_path: std::path::PathBuf,
    table: String,
}

async fn accept_submission() -> impl IntoResponse {
    (
        StatusCode::ACCEPTED,
        axum::Json(serde_json::json!({"job_id": "j1"})),
    )
}

/// Completes the job, but first drops the tenant table so the worker's
/// analysis write-back fails.
async fn complete_after_dropping_table(State(state): State<VanishingTenantState>) -> Response {
    let conn = rusqlite::Connection::open(&state.db_path).unwrap();
    conn.execute(&format!("DROP TABLE \"{}\"", state.table), [])
        .unwrap();
    let result = serde_json::json!({"transcription": "Speaker 1: done."});
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/x-msgpack")],
        rmp_serde::to_vec_named(&result).unwrap(),
    )
        .into_response()
}

#[test]
fn test_worker_removes_temp_file_when_write_back_fails() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("audio.db");
    let store = Arc::new(AudioStore::open(&db_path).unwrap());
    let tenant = TenantKey::generate();
    store.create_tenant_table(&tenant).unwrap();
    let record_id = store.store_audio(&tenant, "call.wav", b"bytes").unwrap();

    let table = format!("audio_{}", tenant.to_string().replace('-', ""));
    let app = Router::new()
        .route("/transcribe", post(accept_submission))
        .route("/status/:job_id", get(complete_after_dropping_table))
        .with_state(VanishingTenantState {
            db_path: db_path.clone(),
            table,
        });
    let addr = spawn_server(app);

    let remote = RemoteTranscriber::new(
        &format!("http://{}", addr),
        3,
        Duration::from_millis(10),
    );
    let work_dir = tmp.path().join("work");
    let batch = Batch {
        tenant,
        record_ids: vec![record_id],
    };
    callscribe::worker::process_batch(&store, &remote, &work_dir, &batch);

    // The write-back had no table left to update; the temp file is gone anyway.
    assert!(std::fs::read_dir(&work_dir).unwrap().next().is_none());
}

// --- Job status endpoint through the service router ---

#[test]
fn test_job_status_branches_over_msgpack() {
    let mut config = Config::default();
    config.stt_service.speech_endpoint = "http://127.0.0.1:9".to_string();
    config.stt_service.speech_api_key = "test-key".to_string();
    config.pipeline.llm_api_key = "test-key".to_string();

    let state = callscribe::stt::service::SttState::from_config(config).unwrap();
    let jobs = state.jobs.clone();
    let addr = spawn_server(callscribe::stt::service::router(state));

    let client = reqwest::blocking::Client::new();
    let fetch = |job_id: &str| {
        let response = client
            .get(format!("http://{}/status/{}", addr, job_id))
            .send()
            .unwrap();
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body: serde_json::Value =
            rmp_serde::from_slice(&response.bytes().unwrap()).unwrap();
        (status, content_type, body)
    };

    // Unknown id.
    let (status, content_type, body) = fetch(&uuid::Uuid::new_v4().to_string());
    assert_eq!(status, 404);
    assert_eq!(content_type, "application/x-msgpack");
    assert_eq!(body["error"], "Job not found");

    // Queued job: snapshot body.
    let job_id = jobs.create(None);
    let (status, _, body) = fetch(&job_id.to_string());
    assert_eq!(status, 202);
    assert_eq!(body["status"], "queued");

    // Completed job: flattened result payload only.
    let mut result = serde_json::Map::new();
    result.insert(
        "transcription".to_string(),
        serde_json::Value::from("Speaker 1: done."),
    );
    jobs.mark_complete(&job_id, result);
    let (status, content_type, body) = fetch(&job_id.to_string());
    assert_eq!(status, 200);
    assert_eq!(content_type, "application/x-msgpack");
    assert_eq!(body["transcription"], "Speaker 1: done.");
    assert!(body.get("status").is_none());
}

// --- Upload and listing through the backend router ---

fn backend(
    upload_dir: &std::path::Path,
) -> (SocketAddr, Arc<AudioStore>, TenantKey, crossbeam_channel::Receiver<Batch>) {
    let store = Arc::new(AudioStore::open_in_memory().unwrap());
    let tenant = TenantKey::generate();
    store.create_tenant_table(&tenant).unwrap();

    let (batch_tx, batch_rx) = crossbeam_channel::unbounded();
    let mut config = Config::default();
    config.server.upload_dir = upload_dir.to_path_buf();

    let state = callscribe::server::AppState {
        store: store.clone(),
        batch_tx,
        config: Arc::new(config),
    };
    (spawn_server(callscribe::server::router(state)), store, tenant, batch_rx)
}

#[test]
fn test_upload_stores_and_enqueues_batch() {
    let tmp = TempDir::new().unwrap();
    let (addr, store, tenant, batch_rx) = backend(tmp.path());

    let form = reqwest::blocking::multipart::Form::new()
        .part(
            "files",
            reqwest::blocking::multipart::Part::bytes(write_wav_bytes())
                .file_name("call.wav"),
        )
        .part(
            "files",
            reqwest::blocking::multipart::Part::bytes(b"skip me".to_vec())
                .file_name("notes.txt"),
        );

    let client = reqwest::blocking::Client::new();
    let response = client
        .post(format!("http://{}/upload", addr))
        .header("X-Tenant-Key", tenant.to_string())
        .multipart(form)
        .send()
        .unwrap();

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["files"], serde_json::json!(["call.wav"]));
    assert_eq!(body["file_ids"].as_array().unwrap().len(), 1);

    // Exactly one batch, naming the stored record.
    let batch = batch_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(batch.record_ids, vec![body["file_ids"][0].as_i64().unwrap()]);

    let (total, _) = store.list_page(&tenant, 1, 10).unwrap();
    assert_eq!(total, 1);
}

#[test]
fn test_upload_corrupt_file_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let (addr, store, tenant, batch_rx) = backend(tmp.path());

    let form = reqwest::blocking::multipart::Form::new().part(
        "files",
        reqwest::blocking::multipart::Part::bytes(b"not really audio".to_vec())
            .file_name("broken.mp3"),
    );

    let client = reqwest::blocking::Client::new();
    let response = client
        .post(format!("http://{}/upload", addr))
        .header("X-Tenant-Key", tenant.to_string())
        .multipart(form)
        .send()
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: serde_json::Value = response.json().unwrap();
    assert!(body["error"].as_str().unwrap().contains("broken.mp3"));

    // Nothing stored, nothing enqueued.
    let (total, _) = store.list_page(&tenant, 1, 10).unwrap();
    assert_eq!(total, 0);
    assert!(batch_rx.try_recv().is_err());
}

#[test]
fn test_listing_pagination_shape() {
    let tmp = TempDir::new().unwrap();
    let (addr, store, tenant, _batch_rx) = backend(tmp.path());

    for i in 0..25 {
        store
            .store_audio(&tenant, &format!("call{}.wav", i), b"bytes")
            .unwrap();
    }

    let client = reqwest::blocking::Client::new();
    let fetch = |page: u32| -> serde_json::Value {
        client
            .get(format!("http://{}/api/transcriptions?page={}", addr, page))
            .header("X-Tenant-Key", tenant.to_string())
            .send()
            .unwrap()
            .json()
            .unwrap()
    };

    let page1 = fetch(1);
    assert_eq!(page1["total_count"], 25);
    assert_eq!(page1["total_pages"], 3);
    assert_eq!(page1["current_page"], 1);
    assert_eq!(page1["table_data"].as_array().unwrap().len(), 10);

    let page3 = fetch(3);
    assert_eq!(page3["table_data"].as_array().unwrap().len(), 5);

    let page4 = fetch(4);
    assert_eq!(page4["table_data"].as_array().unwrap().len(), 0);
    assert_eq!(page4["total_count"], 25);
}

#[test]
fn test_listing_requires_tenant_key() {
    let tmp = TempDir::new().unwrap();
    let (addr, _store, _tenant, _batch_rx) = backend(tmp.path());

    let client = reqwest::blocking::Client::new();
    let response = client
        .get(format!("http://{}/api/transcriptions", addr))
        .send()
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}
