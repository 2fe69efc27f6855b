//! Transcription collaborator
//!
//! The recorder hands a finalized utterance to a [`Transcriber`]; the HTTP
//! implementation posts WAV audio to an OpenAI-compatible
//! `/v1/audio/transcriptions` endpoint.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::audio::recorder::CapturedUtterance;
use crate::audio::wav::encode_wav;
use crate::{MurmurError, Result};

pub trait Transcriber: Send + Sync {
    fn transcribe(&self, utterance: &CapturedUtterance) -> Result<String>;
}

/// Configuration for the HTTP transcriber.
#[derive(Clone, Debug)]
pub struct TranscriberConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub language: String,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: String::new(),
            model: "whisper-1".to_string(),
            language: "en".to_string(),
        }
    }
}

/// HTTP transcription client.
pub struct HttpTranscriber {
    config: TranscriberConfig,
    client: reqwest::blocking::Client,
}

impl HttpTranscriber {
    pub fn new(config: TranscriberConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| MurmurError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl Transcriber for HttpTranscriber {
    fn transcribe(&self, utterance: &CapturedUtterance) -> Result<String> {
        if utterance.is_empty() {
            return Err(MurmurError::CaptureError(
                "nothing to transcribe".to_string(),
            ));
        }

        debug!(
            "Transcribing {:.2}s of audio",
            utterance.duration_secs()
        );

        let wav = encode_wav(&utterance.samples, utterance.sample_rate)?;
        let part = reqwest::blocking::multipart::Part::bytes(wav)
            .file_name("speech.wav")
            .mime_str("audio/wav")
            .map_err(|e| MurmurError::TranscriptionError(format!("Invalid payload: {}", e)))?;
        let form = reqwest::blocking::multipart::Form::new()
            .text("model", self.config.model.clone())
            .text("language", self.config.language.clone())
            .part("file", part);

        let url = format!(
            "{}/v1/audio/transcriptions",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                MurmurError::TranscriptionError(format!("Transcription request failed: {}", e))
            })?;

        let parsed: TranscriptionResponse = response.json().map_err(|e| {
            MurmurError::TranscriptionError(format!("Invalid transcription response: {}", e))
        })?;

        Ok(parsed.text)
    }
}
