use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub stt_service: SttServiceConfig,
    pub pipeline: PipelineConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub upload_dir: PathBuf,
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttServiceConfig {
    pub bind_addr: String,
    /// Directory for per-job temporary audio files.
    pub work_dir: PathBuf,
    /// Diarized speech-to-text endpoint.
    pub speech_endpoint: String,
    /// API key (or set CALLSCRIBE_SPEECH_KEY).
    pub speech_api_key: String,
    pub speech_model: String,
    pub num_speakers: u32,
}

impl fmt::Debug for SttServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SttServiceConfig")
            .field("bind_addr", &self.bind_addr)
            .field("work_dir", &self.work_dir)
            .field("speech_endpoint", &self.speech_endpoint)
            .field("speech_api_key", &"[REDACTED]")
            .field("speech_model", &self.speech_model)
            .field("num_speakers", &self.num_speakers)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Chat-completions endpoint base URL.
    pub llm_endpoint: String,
    /// API key (or set CALLSCRIBE_OPENAI_KEY).
    pub llm_api_key: String,
    /// Model for the correction pass.
    pub correction_model: String,
    /// Model for the translation and analysis passes.
    pub analysis_model: String,
    pub temperature: f32,
    /// Character budget for chunk groups.
    pub max_chars: usize,
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("llm_endpoint", &self.llm_endpoint)
            .field("llm_api_key", &"[REDACTED]")
            .field("correction_model", &self.correction_model)
            .field("analysis_model", &self.analysis_model)
            .field("temperature", &self.temperature)
            .field("max_chars", &self.max_chars)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of batch worker threads.
    pub concurrency: usize,
    /// Base URL of the transcription job service.
    pub stt_endpoint: String,
    pub poll_max_attempts: u32,
    pub poll_delay_secs: u64,
}

// --- Default implementations ---

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            upload_dir: PathBuf::from("uploads"),
            page_size: 10,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("callscribe")
            .join("audio.db");
        Self { db_path }
    }
}

impl Default for SttServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8001".to_string(),
            work_dir: std::env::temp_dir(),
            speech_endpoint: String::new(),
            speech_api_key: String::new(),
            speech_model: "scribe_v1".to_string(),
            num_speakers: 2,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            llm_endpoint: "https://api.openai.com/v1".to_string(),
            llm_api_key: String::new(),
            correction_model: "gpt-4".to_string(),
            analysis_model: "gpt-4o".to_string(),
            temperature: 0.3,
            max_chars: 1500,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            stt_endpoint: "http://127.0.0.1:8001".to_string(),
            poll_max_attempts: 10,
            poll_delay_secs: 60,
        }
    }
}

// --- Config loading ---

impl Config {
    /// Load config, resolving in order: explicit path, beside the executable,
    /// platform config directory. Falls back to defaults when nothing exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(p) = path {
            let content = std::fs::read_to_string(p).map_err(|e| {
                anyhow::anyhow!("Failed to read config file {}: {}", p.display(), e)
            })?;
            return Ok(toml::from_str(&content)?);
        }

        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(p) = exe_path.parent().map(|p| p.join("callscribe.toml")) {
                if p.exists() {
                    let content = std::fs::read_to_string(&p)?;
                    return Ok(toml::from_str(&content)?);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let p = config_dir.join("callscribe").join("config.toml");
            if p.exists() {
                let content = std::fs::read_to_string(&p)?;
                return Ok(toml::from_str(&content)?);
            }
        }

        Ok(Config::default())
    }
}

impl PipelineConfig {
    /// Resolve the LLM API key from config or environment. Missing
    /// credentials are fatal at service startup.
    pub fn resolve_api_key(&self) -> anyhow::Result<String> {
        if !self.llm_api_key.is_empty() {
            return Ok(self.llm_api_key.clone());
        }
        std::env::var("CALLSCRIBE_OPENAI_KEY").map_err(|_| {
            anyhow::anyhow!(
                "LLM API key not configured. Set [pipeline] llm_api_key or CALLSCRIBE_OPENAI_KEY"
            )
        })
    }
}

impl SttServiceConfig {
    /// Resolve the speech-to-text API key from config or environment.
    pub fn resolve_api_key(&self) -> anyhow::Result<String> {
        if !self.speech_api_key.is_empty() {
            return Ok(self.speech_api_key.clone());
        }
        std::env::var("CALLSCRIBE_SPEECH_KEY").map_err(|_| {
            anyhow::anyhow!(
                "Speech API key not configured. Set [stt_service] speech_api_key or CALLSCRIBE_SPEECH_KEY"
            )
        })
    }
}
