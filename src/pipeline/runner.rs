//! Three-pass language pipeline: correction, translation, analysis.
//!
//! Each pass is a single best-effort remote call per group; a failed pass
//! aborts the remaining passes for that job, with no retries and no reuse
//! of partial results.

use serde_json::{Map, Value};

use crate::chunk::{group_chunks, split_speaker_sentences};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::llm::LlmClient;
use crate::pipeline::prompts;

/// Completion seam so the pipeline can be exercised without a network.
pub trait Completions {
    fn complete(&self, model: &str, prompt: &str) -> anyhow::Result<String>;
}

impl Completions for LlmClient {
    fn complete(&self, model: &str, prompt: &str) -> anyhow::Result<String> {
        LlmClient::complete(self, model, prompt)
    }
}

/// Run all three passes over a raw speaker-tagged transcript and flatten the
/// outcome into one record: `transcription` plus every analysis field. A
/// malformed analysis response becomes an `error`/`raw_analysis` pair inside
/// the result rather than a pipeline failure.
pub fn run_pipeline(
    llm: &dyn Completions,
    config: &PipelineConfig,
    raw_transcript: &str,
) -> Result<Map<String, Value>, PipelineError> {
    // 1. Correction pass: per group, blank-line separated.
    let groups = group_chunks(&split_speaker_sentences(raw_transcript), config.max_chars);
    tracing::info!("Correction pass over {} group(s)", groups.len());
    let mut corrected_parts = Vec::with_capacity(groups.len());
    for group in &groups {
        let cleaned = llm
            .complete(&config.correction_model, &prompts::correction_prompt(group))
            .map_err(|e| PipelineError::Correction(e.to_string()))?;
        corrected_parts.push(cleaned);
    }
    let corrected = corrected_parts.join("\n\n");

    // 2. Translation pass: re-chunk the corrected text, newline separated.
    let groups = group_chunks(&split_speaker_sentences(&corrected), config.max_chars);
    tracing::info!("Translation pass over {} group(s)", groups.len());
    let mut translated_parts = Vec::with_capacity(groups.len());
    for group in &groups {
        let translated = llm
            .complete(&config.analysis_model, &prompts::translation_prompt(group))
            .map_err(|e| PipelineError::Translation(e.to_string()))?;
        translated_parts.push(translated);
    }
    let translated = translated_parts.join("\n");

    // 3. Analysis pass: once over the whole translated transcript.
    tracing::info!("Analysis pass over translated transcript");
    let analysis_text = llm
        .complete(&config.analysis_model, &prompts::analysis_prompt(&translated))
        .map_err(|e| PipelineError::Analysis(e.to_string()))?;

    let mut result = parse_analysis(&analysis_text);
    result.insert("transcription".to_string(), Value::String(translated));
    Ok(result)
}

/// Parse the analysis response. The JSON payload is located structurally
/// (first `{` to last `}`) so formatting fences around it do not matter.
/// Malformed JSON yields an `error`/`raw_analysis` map; callers must check
/// for the `error` key.
pub fn parse_analysis(text: &str) -> Map<String, Value> {
    let payload = extract_json_object(text).unwrap_or(text);
    match serde_json::from_str::<Map<String, Value>>(payload) {
        Ok(mut map) => {
            if let Some(score) = derive_overall_score(&map).and_then(serde_json::Number::from_f64) {
                map.insert("overall_score".to_string(), Value::Number(score));
            }
            map
        }
        Err(e) => {
            tracing::warn!("Failed to parse analysis JSON: {}", e);
            let mut map = Map::new();
            map.insert(
                "error".to_string(),
                Value::String("Failed to parse analysis JSON".to_string()),
            );
            map.insert("raw_analysis".to_string(), Value::String(text.to_string()));
            map
        }
    }
}

/// Slice from the first `{` to the last `}`, if both exist.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Arithmetic mean of the five category scores, rounded to one decimal.
/// Overrides whatever the model emitted so the derivation cannot drift.
fn derive_overall_score(analysis: &Map<String, Value>) -> Option<f64> {
    const CATEGORIES: &[&str] = &[
        "pitch_followed_score",
        "confidence_score",
        "tonality_score",
        "energy_score",
        "objection_handling_score",
    ];
    let mut sum = 0.0;
    for category in CATEGORIES {
        sum += analysis.get(*category)?.as_f64()?;
    }
    Some((sum / CATEGORIES.len() as f64 * 10.0).round() / 10.0)
}
