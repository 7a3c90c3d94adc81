//! Transcription job service.
//!
//! Accepts one audio file per submission, runs diarized speech-to-text and
//! the language pipeline in a background task, and exposes job status with
//! MessagePack-encoded bodies. The job store lives in memory only.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::config::Config;
use crate::pipeline::llm::LlmClient;
use crate::pipeline::runner::run_pipeline;
use crate::stt::jobs::{JobStatus, JobStore};
use crate::stt::speech::{format_transcript, SpeechClient};

#[derive(Clone)]
pub struct SttState {
    pub jobs: Arc<JobStore>,
    speech: Arc<SpeechClient>,
    llm: Arc<LlmClient>,
    config: Arc<Config>,
}

impl SttState {
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        // Credential resolution is fatal here: run degraded is not an option.
        let speech = SpeechClient::from_config(&config.stt_service)?;
        let llm = LlmClient::from_config(&config.pipeline)?;
        Ok(Self {
            jobs: Arc::new(JobStore::new()),
            speech: Arc::new(speech),
            llm: Arc::new(llm),
            config: Arc::new(config),
        })
    }
}

/// Matches the backend's upload limit; one audio file per submission.
const MAX_SUBMISSION_BYTES: usize = 200 * 1024 * 1024;

pub fn router(state: SttState) -> Router {
    Router::new()
        .route("/transcribe", post(submit_job))
        .route("/status/:job_id", get(job_status))
        .layer(DefaultBodyLimit::max(MAX_SUBMISSION_BYTES))
        .with_state(state)
}

/// Run the transcription job service until shutdown.
pub fn run(config: Config) -> anyhow::Result<()> {
    let bind_addr = config.stt_service.bind_addr.clone();
    let state = SttState::from_config(config)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
        tracing::info!("Transcription job service listening on {}", bind_addr);
        axum::serve(listener, router(state)).await?;
        Ok(())
    })
}

/// POST /transcribe: accept one audio file plus optional webhook URL and
/// schedule background processing.
async fn submit_job(
    State(state): State<SttState>,
    mut multipart: Multipart,
) -> Response {
    let mut audio: Option<(String, Vec<u8>)> = None;
    let mut webhook_url: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": format!("malformed multipart body: {}", e)})),
                )
                    .into_response();
            }
        };
        match field.name() {
            Some("audio") => {
                let filename = field
                    .file_name()
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "audio.wav".to_string());
                match field.bytes().await {
                    Ok(bytes) => audio = Some((filename, bytes.to_vec())),
                    Err(e) => {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(json!({"error": format!("failed to read audio field: {}", e)})),
                        )
                            .into_response();
                    }
                }
            }
            Some("webhook_url") => {
                webhook_url = field.text().await.ok().filter(|s| !s.is_empty());
            }
            _ => {}
        }
    }

    let Some((filename, bytes)) = audio else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "missing audio field"})),
        )
            .into_response();
    };

    let job_id = state.jobs.create(webhook_url);
    let audio_path = job_file_path(&state.config.stt_service.work_dir, &job_id, &filename);
    if let Err(e) = tokio::fs::write(&audio_path, &bytes).await {
        tracing::error!("[{}] Failed to persist upload: {}", job_id, e);
        state.jobs.mark_failed(&job_id, format!("failed to persist upload: {}", e));
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "failed to persist upload"})),
        )
            .into_response();
    }

    let task_state = state.clone();
    tokio::task::spawn_blocking(move || {
        process_job(&task_state, job_id, &audio_path);
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({"job_id": job_id.to_string(), "status": "queued"})),
    )
        .into_response()
}

fn job_file_path(work_dir: &Path, job_id: &Uuid, filename: &str) -> PathBuf {
    let ext = Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "wav".to_string());
    work_dir.join(format!("{}.{}", job_id, ext))
}

/// Background execution: transcription, formatting, language pipeline,
/// state transition, best-effort webhook. The temp file is removed on every
/// exit path.
fn process_job(state: &SttState, job_id: Uuid, audio_path: &Path) {
    state.jobs.mark_processing(&job_id);
    tracing::info!("[{}] Starting transcription", job_id);

    let outcome = run_job(state, &job_id, audio_path);

    match outcome {
        Ok(result) => {
            state.jobs.mark_complete(&job_id, result.clone());
            tracing::info!("[{}] Job completed", job_id);
            if let Some(job) = state.jobs.get(&job_id) {
                if let Some(url) = &job.webhook_url {
                    deliver_webhook(&job_id, url, &result);
                }
            }
        }
        Err(e) => {
            tracing::error!("[{}] Job failed: {:#}", job_id, e);
            state.jobs.mark_failed(&job_id, format!("{:#}", e));
        }
    }

    if let Err(e) = std::fs::remove_file(audio_path) {
        if audio_path.exists() {
            tracing::warn!("[{}] Failed to remove temp file: {}", job_id, e);
        }
    }
}

fn run_job(state: &SttState, job_id: &Uuid, audio_path: &Path) -> anyhow::Result<Map<String, Value>> {
    let words = state.speech.transcribe(audio_path)?;
    let transcript = format_transcript(&words);
    tracing::info!("[{}] Formatted transcript ({} chars)", job_id, transcript.len());

    let result = run_pipeline(state.llm.as_ref(), &state.config.pipeline, &transcript)?;
    Ok(result)
}

/// One delivery attempt; failure is logged and never retried.
fn deliver_webhook(job_id: &Uuid, url: &str, result: &Map<String, Value>) {
    tracing::info!("[{}] Sending webhook callback", job_id);
    let payload = json!({
        "job_id": job_id.to_string(),
        "status": "complete",
        "result": result,
    });
    let client = reqwest::blocking::Client::new();
    match client.post(url).json(&payload).send() {
        Ok(response) if response.status().is_success() => {}
        Ok(response) => {
            tracing::warn!("[{}] Webhook returned HTTP {}", job_id, response.status());
        }
        Err(e) => {
            tracing::warn!("[{}] Webhook failed: {}", job_id, e);
        }
    }
}

/// GET /status/:job_id, MessagePack body throughout.
async fn job_status(
    State(state): State<SttState>,
    UrlPath(job_id): UrlPath<String>,
) -> Response {
    let job = Uuid::parse_str(&job_id)
        .ok()
        .and_then(|id| state.jobs.get(&id));

    let Some(job) = job else {
        let body = json!({"error": "Job not found"});
        return msgpack_response(StatusCode::NOT_FOUND, &body);
    };

    if job.status == JobStatus::Complete {
        // Result payload only, flattened.
        let result = job.result.clone().unwrap_or_default();
        return msgpack_response(StatusCode::OK, &Value::Object(result));
    }

    // Queued / processing / failed: full job snapshot.
    msgpack_response(StatusCode::ACCEPTED, &*job)
}

fn msgpack_response<T: serde::Serialize>(status: StatusCode, value: &T) -> Response {
    match rmp_serde::to_vec_named(value) {
        Ok(bytes) => (
            status,
            [(header::CONTENT_TYPE, "application/x-msgpack")],
            bytes,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode msgpack response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_file_path_keeps_extension() {
        let id = Uuid::new_v4();
        let path = job_file_path(Path::new("/tmp"), &id, "call recording.mp3");
        assert_eq!(path, PathBuf::from(format!("/tmp/{}.mp3", id)));
    }

    #[test]
    fn test_job_file_path_defaults_to_wav() {
        let id = Uuid::new_v4();
        let path = job_file_path(Path::new("/tmp"), &id, "noext");
        assert_eq!(path, PathBuf::from(format!("/tmp/{}.wav", id)));
    }

    #[test]
    fn test_status_body_roundtrips_msgpack() {
        let body = json!({"error": "Job not found"});
        let bytes = rmp_serde::to_vec_named(&body).unwrap();
        let decoded: Value = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded["error"], "Job not found");
    }
}
