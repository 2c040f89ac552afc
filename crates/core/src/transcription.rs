//! Turns the model's synthesized speech back into text.
//!
//! The speech engine is a blocking batch call, so the adapter moves it onto
//! Tokio's blocking pool and reports every failure as a value.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// The upstream model always speaks 16-bit PCM at this rate.
pub const SAMPLE_RATE_HERTZ: u32 = 24_000;
pub const LANGUAGE_CODE: &str = "en-US";

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudioEncoding {
    Linear16,
}

/// Recognition parameters sent with every request.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionConfig {
    pub encoding: AudioEncoding,
    pub sample_rate_hertz: u32,
    pub language_code: String,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            encoding: AudioEncoding::Linear16,
            sample_rate_hertz: SAMPLE_RATE_HERTZ,
            language_code: LANGUAGE_CODE.to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RecognitionResult {
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Alternative {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// A blocking, batch speech-to-text engine.
#[cfg_attr(test, mockall::automock)]
pub trait SpeechRecognizer: Send + Sync {
    fn recognize(
        &self,
        audio: &[u8],
        config: &RecognitionConfig,
    ) -> anyhow::Result<Vec<RecognitionResult>>;
}

#[derive(Debug, thiserror::Error)]
pub enum TranscriptionError {
    #[error("speech recognition failed: {0:#}")]
    Recognizer(anyhow::Error),
    #[error("transcription worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// `bytes -> text` wrapper around a [`SpeechRecognizer`] with fixed parameters.
#[derive(Clone)]
pub struct TranscriptionAdapter {
    recognizer: Arc<dyn SpeechRecognizer>,
    config: RecognitionConfig,
}

impl TranscriptionAdapter {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        Self {
            recognizer,
            config: RecognitionConfig::default(),
        }
    }

    /// Transcribes one turn of 24 kHz PCM16 audio.
    ///
    /// The first alternative of every result is kept; results are joined with a
    /// single space. No results means an empty transcript.
    pub async fn transcribe(&self, pcm: Vec<u8>) -> Result<String, TranscriptionError> {
        let recognizer = self.recognizer.clone();
        let config = self.config.clone();
        let bytes = pcm.len();
        let results =
            tokio::task::spawn_blocking(move || recognizer.recognize(&pcm, &config))
                .await?
                .map_err(TranscriptionError::Recognizer)?;
        debug!(bytes, results = results.len(), "Transcription finished");
        Ok(first_alternatives(&results))
    }
}

fn first_alternatives(results: &[RecognitionResult]) -> String {
    results
        .iter()
        .filter_map(|result| result.alternatives.first())
        .map(|alternative| alternative.transcript.trim())
        .filter(|transcript| !transcript.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
