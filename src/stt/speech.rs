use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use reqwest::blocking::multipart;
use serde::Deserialize;

use crate::config::SttServiceConfig;

/// One word-level item from the diarized speech-to-text response.
#[derive(Debug, Clone, Deserialize)]
pub struct Word {
    #[serde(default)]
    pub text: String,
    /// "word", "spacing", or "audio_event".
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub speaker_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpeechResponse {
    words: Vec<Word>,
}

/// Client for the external diarized speech-to-text API.
pub struct SpeechClient {
    endpoint: String,
    api_key: String,
    model: String,
    num_speakers: u32,
    client: reqwest::blocking::Client,
}

impl SpeechClient {
    pub fn from_config(config: &SttServiceConfig) -> Result<Self> {
        let api_key = config.resolve_api_key()?;
        if config.speech_endpoint.is_empty() {
            anyhow::bail!(
                "Speech endpoint not configured. Set [stt_service] speech_endpoint"
            );
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(600))
            .build()?;
        Ok(Self {
            endpoint: config.speech_endpoint.trim_end_matches('/').to_string(),
            api_key,
            model: config.speech_model.clone(),
            num_speakers: config.num_speakers,
            client,
        })
    }

    /// Upload an audio file for diarized word-level transcription.
    pub fn transcribe(&self, audio_path: &Path) -> Result<Vec<Word>> {
        let file_bytes = std::fs::read(audio_path)
            .with_context(|| format!("failed to read {}", audio_path.display()))?;
        let filename = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio".to_string());

        let form = multipart::Form::new()
            .part("file", multipart::Part::bytes(file_bytes).file_name(filename))
            .text("model_id", self.model.clone())
            .text("num_speakers", self.num_speakers.to_string())
            .text("diarize", "true")
            .text("timestamps_granularity", "word")
            .text("tag_audio_events", "true");

        let response = self
            .client
            .post(format!("{}/speech-to-text", self.endpoint))
            .header("xi-api-key", &self.api_key)
            .multipart(form)
            .send()
            .context("speech-to-text request failed")?;

        let response = response.error_for_status()?;
        let body: SpeechResponse = response
            .json()
            .context("failed to parse speech-to-text response")?;
        Ok(body.words)
    }
}

/// Render word-level diarized output as speaker-tagged lines. Raw speaker
/// ids are mapped to `Speaker 1..N` in order of first appearance; items
/// that are neither words nor spacing are skipped.
pub fn format_transcript(words: &[Word]) -> String {
    let mut output: Vec<String> = Vec::new();
    let mut current_line: Vec<&str> = Vec::new();
    let mut speaker_map: HashMap<&str, String> = HashMap::new();
    let mut speaker_count = 0;
    let mut current_speaker: Option<&str> = None;

    for word in words {
        if word.kind != "word" && word.kind != "spacing" {
            continue;
        }
        let speaker_id = word.speaker_id.as_deref().unwrap_or("");
        if !speaker_map.contains_key(speaker_id) {
            speaker_count += 1;
            speaker_map.insert(speaker_id, format!("Speaker {}", speaker_count));
        }

        if Some(speaker_id) == current_speaker {
            current_line.push(&word.text);
        } else {
            if let (Some(prev), false) = (current_speaker, current_line.is_empty()) {
                output.push(format!(
                    "{}: {}",
                    speaker_map[prev],
                    current_line.concat().trim()
                ));
            }
            current_line = vec![&word.text];
            current_speaker = Some(speaker_id);
        }
    }

    if let (Some(prev), false) = (current_speaker, current_line.is_empty()) {
        output.push(format!(
            "{}: {}",
            speaker_map[prev],
            current_line.concat().trim()
        ));
    }

    output.join("\n")
}
