//! Client for the transcription job service, used by the batch worker.
//!
//! Both operations are deliberately soft: any rejection or transport error
//! comes back as `None` and the caller decides what to do with the record.

use std::path::Path;
use std::time::Duration;

use reqwest::blocking::multipart;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::WorkerConfig;

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: String,
}

pub struct RemoteTranscriber {
    base_url: String,
    max_attempts: u32,
    delay: Duration,
    client: reqwest::blocking::Client,
}

impl RemoteTranscriber {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            base_url: config.stt_endpoint.trim_end_matches('/').to_string(),
            max_attempts: config.poll_max_attempts,
            delay: Duration::from_secs(config.poll_delay_secs),
            client: reqwest::blocking::Client::new(),
        }
    }

    /// Direct constructor for tests and non-default endpoints.
    pub fn new(base_url: &str, max_attempts: u32, delay: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            max_attempts,
            delay,
            client: reqwest::blocking::Client::new(),
        }
    }

    /// Submit an audio file for transcription. Returns the job id on a 202,
    /// `None` on any other response or transport error.
    pub fn submit(&self, file_path: &Path) -> Option<String> {
        let filename = file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio".to_string());
        let bytes = match std::fs::read(file_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("[{}] Failed to read file: {}", file_path.display(), e);
                return None;
            }
        };

        let form =
            multipart::Form::new().part("audio", multipart::Part::bytes(bytes).file_name(filename));

        let response = self
            .client
            .post(format!("{}/transcribe", self.base_url))
            .multipart(form)
            .send();

        match response {
            Ok(response) if response.status() == reqwest::StatusCode::ACCEPTED => {
                match response.json::<SubmitResponse>() {
                    Ok(body) => {
                        tracing::info!(
                            "[{}] Job submitted: {}",
                            file_path.display(),
                            body.job_id
                        );
                        Some(body.job_id)
                    }
                    Err(e) => {
                        tracing::error!("Submission response unreadable: {}", e);
                        None
                    }
                }
            }
            Ok(response) => {
                tracing::error!(
                    "[{}] Submission failed: HTTP {}",
                    file_path.display(),
                    response.status()
                );
                None
            }
            Err(e) => {
                tracing::error!("[{}] Submission error: {}", file_path.display(), e);
                None
            }
        }
    }

    /// Poll a job until completion. 202 sleeps a fixed interval and retries;
    /// 200 returns the decoded payload immediately; any other status or
    /// transport error aborts; exhausting all attempts returns `None`.
    /// Worst-case wall-clock wait is `max_attempts * delay`.
    pub fn poll(&self, job_id: &str) -> Option<Map<String, Value>> {
        tracing::info!(
            "[{}] Polling for up to {} attempts",
            job_id,
            self.max_attempts
        );
        for attempt in 1..=self.max_attempts {
            let response = self
                .client
                .get(format!("{}/status/{}", self.base_url, job_id))
                .header("Accept", "application/x-msgpack")
                .send();

            match response {
                Ok(response) if response.status() == reqwest::StatusCode::OK => {
                    let bytes = match response.bytes() {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            tracing::error!("[{}] Failed to read status body: {}", job_id, e);
                            return None;
                        }
                    };
                    match rmp_serde::from_slice::<Map<String, Value>>(&bytes) {
                        Ok(decoded) => {
                            tracing::info!(
                                "[{}] Transcription complete on attempt {}",
                                job_id,
                                attempt
                            );
                            return Some(decoded);
                        }
                        Err(e) => {
                            tracing::error!("[{}] Failed to decode status body: {}", job_id, e);
                            return None;
                        }
                    }
                }
                Ok(response) if response.status() == reqwest::StatusCode::ACCEPTED => {
                    tracing::debug!("[{}] Attempt {}: still processing", job_id, attempt);
                }
                Ok(response) => {
                    tracing::error!(
                        "[{}] Unexpected status: HTTP {}",
                        job_id,
                        response.status()
                    );
                    return None;
                }
                Err(e) => {
                    tracing::error!("[{}] Polling error on attempt {}: {}", job_id, attempt, e);
                    return None;
                }
            }

            std::thread::sleep(self.delay);
        }

        tracing::warn!("[{}] Max polling attempts reached; job may still be running", job_id);
        None
    }
}
