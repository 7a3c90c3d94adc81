//! Tenant-facing backend API: multipart upload ingestion and paginated
//! analysis listings. Authentication is an external collaborator; its
//! boundary here is the `X-Tenant-Key` header.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::ValidationError;
use crate::ingest::{is_supported_extension, probe_duration};
use crate::remote::RemoteTranscriber;
use crate::store::{AudioStore, TenantKey, ANALYSIS_FIELDS};
use crate::worker::{Batch, Dispatcher};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<AudioStore>,
    pub batch_tx: crossbeam_channel::Sender<Batch>,
    pub config: Arc<Config>,
}

/// Call recordings run long; the default 2 MB body limit is far too small.
const MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/upload", post(upload))
        .route("/api/transcriptions", get(list_transcriptions))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Run the backend API and its worker pool until shutdown.
pub fn run(config: Config) -> anyhow::Result<()> {
    let store = Arc::new(AudioStore::open(&config.storage.db_path)?);
    let remote = Arc::new(RemoteTranscriber::from_config(&config.worker));
    let dispatcher = Dispatcher::spawn(
        store.clone(),
        remote,
        config.server.upload_dir.clone(),
        config.worker.concurrency,
    );

    let bind_addr = config.server.bind_addr.clone();
    let state = AppState {
        store,
        batch_tx: dispatcher.sender(),
        config: Arc::new(config),
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
        tracing::info!("Backend API listening on {}", bind_addr);
        axum::serve(listener, router(state)).await?;
        Ok(())
    })
}

fn tenant_from_headers(headers: &HeaderMap) -> Result<TenantKey, Response> {
    let raw = headers
        .get("x-tenant-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "missing X-Tenant-Key header"})),
            )
                .into_response()
        })?;
    raw.parse::<TenantKey>().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid tenant key"})),
        )
            .into_response()
    })
}

/// POST /upload: validate and persist each uploaded file, then enqueue one
/// batch for background processing.
async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let tenant = match tenant_from_headers(&headers) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };

    // Drain the multipart body before any blocking work.
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let Some(filename) = field.file_name().map(|n| n.to_string()) else {
                    continue;
                };
                match field.bytes().await {
                    Ok(bytes) => files.push((filename, bytes.to_vec())),
                    Err(e) => {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(json!({"error": format!("failed to read upload: {}", e)})),
                        )
                            .into_response();
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": format!("malformed multipart body: {}", e)})),
                )
                    .into_response();
            }
        }
    }

    let store = state.store.clone();
    let upload_dir = state.config.server.upload_dir.clone();
    let ingest = tokio::task::spawn_blocking(move || {
        ingest_files(&store, &upload_dir, &tenant, files)
    })
    .await;

    let outcome = match ingest {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("Upload task panicked: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match outcome {
        Ok(saved) => {
            if !saved.file_ids.is_empty() {
                let batch = Batch {
                    tenant,
                    record_ids: saved.file_ids.clone(),
                };
                if let Err(e) = state.batch_tx.send(batch) {
                    tracing::error!("Failed to enqueue batch: {}", e);
                }
            }
            Json(json!({
                "message": format!("Successfully uploaded {} files", saved.files.len()),
                "files": saved.files,
                "file_ids": saved.file_ids,
            }))
            .into_response()
        }
        Err((status, message)) => {
            (status, Json(json!({"error": message}))).into_response()
        }
    }
}

#[derive(Debug)]
struct SavedFiles {
    files: Vec<String>,
    file_ids: Vec<i64>,
}

/// Validate and store each file in request order. A corrupt file aborts the
/// whole request; records stored earlier in the same request remain (with
/// null analysis, never enqueued) and are logged as orphans.
fn ingest_files(
    store: &AudioStore,
    upload_dir: &std::path::Path,
    tenant: &TenantKey,
    files: Vec<(String, Vec<u8>)>,
) -> Result<SavedFiles, (StatusCode, String)> {
    let tenant_dir = upload_dir.join(tenant.to_string());
    if let Err(e) = std::fs::create_dir_all(&tenant_dir) {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to create upload directory: {}", e),
        ));
    }

    let mut saved_files: Vec<String> = Vec::new();
    let mut saved_ids: Vec<i64> = Vec::new();
    let mut temp_files: Vec<PathBuf> = Vec::new();

    let mut abort: Option<(StatusCode, String)> = None;
    for (filename, bytes) in &files {
        // Unsupported extension: skip the file, not the request.
        if !is_supported_extension(filename) {
            tracing::info!("Skipping unsupported file: {}", filename);
            continue;
        }

        let temp_path = tenant_dir.join(filename.replace(['/', '\\'], "_"));
        if let Err(e) = std::fs::write(&temp_path, bytes) {
            abort = Some((
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to save {}: {}", filename, e),
            ));
            break;
        }
        temp_files.push(temp_path.clone());

        match probe_duration(&temp_path) {
            Ok(duration) => {
                tracing::debug!("{}: {:.2}s", filename, duration);
            }
            Err(ValidationError::CorruptAudio(_)) | Err(ValidationError::UnsupportedExtension(_)) => {
                abort = Some((
                    StatusCode::BAD_REQUEST,
                    format!(
                        "Invalid or corrupted audio file: {}. Please ensure the file is a valid audio file.",
                        filename
                    ),
                ));
                break;
            }
        }

        match store.store_audio(tenant, filename, bytes) {
            Ok(id) => {
                saved_files.push(filename.clone());
                saved_ids.push(id);
            }
            Err(e) => {
                abort = Some((
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("failed to store {}: {}", filename, e),
                ));
                break;
            }
        }
    }

    // Temp files are removed on success and error paths alike.
    for temp_file in &temp_files {
        if let Err(e) = std::fs::remove_file(temp_file) {
            tracing::warn!("Failed to remove temp file {}: {}", temp_file.display(), e);
        }
    }

    if let Some((status, message)) = abort {
        if !saved_ids.is_empty() {
            // Known behavior: records stored before the failing file stay in
            // the tenant table and are never enqueued.
            tracing::warn!(
                "Aborting upload for tenant {}; orphaned record ids: {:?}",
                tenant,
                saved_ids
            );
        }
        return Err((status, message));
    }

    Ok(SavedFiles {
        files: saved_files,
        file_ids: saved_ids,
    })
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default = "default_page")]
    page: u32,
}

fn default_page() -> u32 {
    1
}

/// GET /api/transcriptions?page=N: paginated analysis listing.
async fn list_transcriptions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    let tenant = match tenant_from_headers(&headers) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };

    let page = query.page.max(1);
    let page_size = state.config.server.page_size;
    let store = state.store.clone();
    let listed = tokio::task::spawn_blocking(move || store.list_page(&tenant, page, page_size)).await;

    let (total_count, records) = match listed {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            tracing::error!("Listing failed for tenant {}: {}", tenant, e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response();
        }
        Err(e) => {
            tracing::error!("Listing task panicked: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut header_row: Vec<String> = vec!["ID".into(), "Name".into(), "Time".into()];
    header_row.extend(ANALYSIS_FIELDS.iter().map(|f| f.to_string()));

    let table_data: Vec<Vec<Value>> = records
        .into_iter()
        .map(|record| {
            let mut row = vec![
                Value::from(record.id),
                Value::from(record.name),
                Value::from(record.created_at),
            ];
            row.extend(record.analysis);
            row
        })
        .collect();

    let total_pages = (total_count + page_size as u64 - 1) / page_size as u64;
    Json(json!({
        "headers": header_row,
        "table_data": table_data,
        "total_count": total_count,
        "current_page": page,
        "total_pages": total_pages,
    }))
    .into_response()
}
