//! Google Cloud Speech-to-Text client for batch recognition.

use crate::transcription::{RecognitionConfig, RecognitionResult, SpeechRecognizer};
use anyhow::{Context, Result, anyhow};
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SPEECH_ENDPOINT: &str = "https://speech.googleapis.com/v1/speech:recognize";

/// Keeps the key out of the request URL, which reqwest errors echo.
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Serialize)]
struct RecognizeRequest<'a> {
    config: &'a RecognitionConfig,
    audio: RecognitionAudio,
}

#[derive(Serialize)]
struct RecognitionAudio {
    content: String,
}

#[derive(Deserialize, Debug, Default)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<RecognitionResult>,
}

/// Calls the `speech:recognize` REST method with an API key.
///
/// A blocking HTTP client is built per call, so this must only be invoked from
/// a blocking context (the transcription adapter takes care of that).
#[derive(Debug, Clone)]
pub struct GoogleSpeechRecognizer {
    api_key: SecretString,
    endpoint: String,
    timeout: Duration,
}

impl GoogleSpeechRecognizer {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            endpoint: DEFAULT_SPEECH_ENDPOINT.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl SpeechRecognizer for GoogleSpeechRecognizer {
    fn recognize(
        &self,
        audio: &[u8],
        config: &RecognitionConfig,
    ) -> Result<Vec<RecognitionResult>> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .context("Failed to build Speech-to-Text HTTP client")?;

        let request = RecognizeRequest {
            config,
            audio: RecognitionAudio {
                content: base64::engine::general_purpose::STANDARD.encode(audio),
            },
        };
        let response = client
            .post(&self.endpoint)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(&request)
            .send()
            .map_err(reqwest::Error::without_url)
            .context("Speech-to-Text request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(anyhow!("Speech-to-Text returned {}: {}", status, body));
        }

        let parsed: RecognizeResponse = response
            .json()
            .map_err(reqwest::Error::without_url)
            .context("Failed to parse Speech-to-Text response")?;
        Ok(parsed.results)
    }
}
