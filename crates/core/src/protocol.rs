//! Defines the JSON message protocol between the browser client and the relay.

use crate::persona::SCREEN_ASSISTANT_PERSONA;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const AUDIO_PCM: &str = "audio/pcm";
pub const IMAGE_JPEG: &str = "image/jpeg";

const SYSTEM_INSTRUCTION_KEYS: [&str; 2] = ["system_instruction", "systemInstruction"];

/// Failure to turn the first client frame into a session configuration.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("setup frame is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("setup frame must be a JSON object")]
    NotAnObject,
    #[error("`setup` must be a JSON object")]
    SetupNotAnObject,
}

/// The effective configuration of one upstream session.
///
/// Built from the client's `setup` object with the system instruction replaced
/// by the relay's persona.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSetup {
    system_instruction: String,
    options: Map<String, Value>,
}

impl SessionSetup {
    /// Parses the mandatory first frame of a client connection.
    ///
    /// A missing `setup` member is treated as an empty configuration.
    pub fn from_first_frame(raw: &[u8]) -> Result<Self, SetupError> {
        let frame: Value = serde_json::from_slice(raw)?;
        let Value::Object(mut frame) = frame else {
            return Err(SetupError::NotAnObject);
        };
        match frame.remove("setup") {
            None | Some(Value::Null) => Ok(Self::from_client_setup(Map::new())),
            Some(Value::Object(setup)) => Ok(Self::from_client_setup(setup)),
            Some(_) => Err(SetupError::SetupNotAnObject),
        }
    }

    /// Applies the persona override to a client supplied `setup` object.
    pub fn from_client_setup(mut setup: Map<String, Value>) -> Self {
        for key in SYSTEM_INSTRUCTION_KEYS {
            setup.remove(key);
        }
        Self {
            system_instruction: SCREEN_ASSISTANT_PERSONA.to_string(),
            options: setup,
        }
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    /// Client supplied options, never containing a system instruction.
    pub fn options(&self) -> &Map<String, Value> {
        &self.options
    }

    /// The configuration as a single JSON object, `system_instruction` included.
    pub fn to_value(&self) -> Value {
        let mut config = self.options.clone();
        config.insert(
            "system_instruction".to_string(),
            Value::String(self.system_instruction.clone()),
        );
        Value::Object(config)
    }
}

/// Media kinds the relay forwards upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Image,
}

impl MediaKind {
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        match mime_type {
            AUDIO_PCM => Some(Self::Audio),
            IMAGE_JPEG => Some(Self::Image),
            _ => None,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Audio => AUDIO_PCM,
            Self::Image => IMAGE_JPEG,
        }
    }
}

/// One classified unit of client media. The payload stays in the encoded form
/// the client sent it in and is forwarded untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChunk {
    kind: MediaKind,
    data: String,
}

impl MediaChunk {
    pub fn new(kind: MediaKind, data: impl Into<String>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn mime_type(&self) -> &'static str {
        self.kind.mime_type()
    }

    pub fn data(&self) -> &str {
        &self.data
    }
}

/// Any frame sent by the client after setup.
///
/// Only `realtime_input.media_chunks` is acted on. Any other shape, including
/// JSON that is not an object, is valid and carries nothing to relay.
#[derive(Debug, Default)]
pub struct ClientFrame {
    media_chunks: Vec<RawMediaChunk>,
}

/// A media chunk as it appears on the wire, before mime type classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMediaChunk {
    pub mime_type: Option<String>,
    pub data: Option<String>,
}

/// A chunk of a forwarded media kind that cannot be forwarded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("{0} media chunk has no string `data`")]
    MissingData(&'static str),
}

impl RawMediaChunk {
    fn from_value(chunk: &Value) -> Self {
        let field = |name: &str| chunk.get(name).and_then(Value::as_str).map(str::to_owned);
        Self {
            mime_type: field("mime_type"),
            data: field("data"),
        }
    }

    /// Returns `Ok(None)` for mime types the relay does not forward. Only
    /// chunks of a forwarded kind need `data`.
    pub fn classify(self) -> Result<Option<MediaChunk>, ChunkError> {
        let Some(kind) = self.mime_type.as_deref().and_then(MediaKind::from_mime_type) else {
            return Ok(None);
        };
        match self.data {
            Some(data) => Ok(Some(MediaChunk::new(kind, data))),
            None => Err(ChunkError::MissingData(kind.mime_type())),
        }
    }
}

impl ClientFrame {
    /// Fails only when the frame is not JSON at all.
    pub fn parse(raw: &[u8]) -> Result<Self, serde_json::Error> {
        let frame: Value = serde_json::from_slice(raw)?;
        let media_chunks = frame
            .pointer("/realtime_input/media_chunks")
            .and_then(Value::as_array)
            .map(|chunks| chunks.iter().map(RawMediaChunk::from_value).collect())
            .unwrap_or_default();
        Ok(Self { media_chunks })
    }

    pub fn into_media_chunks(self) -> Vec<RawMediaChunk> {
        self.media_chunks
    }
}

/// Status attached to error messages sent to the client.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStatus {
    /// The session keeps running.
    Error,
    /// The session has been torn down.
    SessionClosed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TextFragment {
    pub text: String,
}

/// Messages sent from the relay to the client. Each variant serializes to a
/// bare JSON object with no type tag.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum OutboundMessage {
    /// An incremental chunk of model audio, base64 encoded.
    Audio { audio: String },
    /// The transcript of a completed turn's audio.
    AudioText {
        #[serde(rename = "audioText")]
        audio_text: String,
    },
    /// All text fragments of a completed turn.
    Text { text: Vec<TextFragment> },
    Error { error: String, status: ErrorStatus },
}

impl OutboundMessage {
    pub fn audio(data: &[u8]) -> Self {
        Self::Audio {
            audio: base64::engine::general_purpose::STANDARD.encode(data),
        }
    }

    pub fn audio_text(transcript: impl Into<String>) -> Self {
        Self::AudioText {
            audio_text: transcript.into(),
        }
    }

    pub fn text_batch(texts: Vec<String>) -> Self {
        Self::Text {
            text: texts.into_iter().map(|text| TextFragment { text }).collect(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
            status: ErrorStatus::Error,
        }
    }

    pub fn session_closed(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
            status: ErrorStatus::SessionClosed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_setup_overrides_client_system_instruction() {
        let frames = [
            json!({"setup": {}}),
            json!({"setup": {"system_instruction": "be a pirate"}}),
            json!({"setup": {"systemInstruction": {"parts": [{"text": "x"}]}}}),
            json!({"setup": {"generation_config": {"response_modalities": ["AUDIO"]}}}),
            json!({}),
        ];
        for frame in frames {
            let setup = SessionSetup::from_first_frame(frame.to_string().as_bytes()).unwrap();
            assert_eq!(setup.system_instruction(), SCREEN_ASSISTANT_PERSONA);
            assert!(!setup.options().contains_key("system_instruction"));
            assert!(!setup.options().contains_key("systemInstruction"));
            assert_eq!(
                setup.to_value()["system_instruction"],
                json!(SCREEN_ASSISTANT_PERSONA)
            );
        }
    }

    #[test]
    fn test_setup_keeps_other_client_options() {
        let frame = json!({
            "setup": {
                "generation_config": {"response_modalities": ["AUDIO"]},
                "system_instruction": "ignored"
            }
        });
        let setup = SessionSetup::from_first_frame(frame.to_string().as_bytes()).unwrap();
        assert_eq!(
            setup.options().get("generation_config"),
            Some(&json!({"response_modalities": ["AUDIO"]}))
        );
        assert_eq!(setup.options().len(), 1);
    }

    #[test]
    fn test_setup_rejects_malformed_frames() {
        assert!(matches!(
            SessionSetup::from_first_frame(b"not json"),
            Err(SetupError::InvalidJson(_))
        ));
        assert!(matches!(
            SessionSetup::from_first_frame(b"[1, 2]"),
            Err(SetupError::NotAnObject)
        ));
        assert!(matches!(
            SessionSetup::from_first_frame(br#"{"setup": "nope"}"#),
            Err(SetupError::SetupNotAnObject)
        ));
    }

    #[test]
    fn test_media_kind_classification() {
        assert_eq!(MediaKind::from_mime_type("audio/pcm"), Some(MediaKind::Audio));
        assert_eq!(MediaKind::from_mime_type("image/jpeg"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_mime_type("image/png"), None);
        assert_eq!(MediaKind::from_mime_type("audio/pcm;rate=16000"), None);
        assert_eq!(MediaKind::Image.mime_type(), "image/jpeg");
    }

    fn classified(raw: serde_json::Value) -> Vec<Result<Option<MediaChunk>, ChunkError>> {
        ClientFrame::parse(raw.to_string().as_bytes())
            .unwrap()
            .into_media_chunks()
            .into_iter()
            .map(RawMediaChunk::classify)
            .collect()
    }

    #[test]
    fn test_client_frame_extracts_media_chunks() {
        let chunks = classified(json!({
            "realtime_input": {
                "media_chunks": [
                    {"mime_type": "audio/pcm", "data": "QUJD"},
                    {"mime_type": "video/mp4", "data": "AAAA"},
                    {"mime_type": "image/jpeg", "data": "/9j/"}
                ]
            }
        }));

        assert_eq!(
            chunks,
            vec![
                Ok(Some(MediaChunk::new(MediaKind::Audio, "QUJD"))),
                Ok(None),
                Ok(Some(MediaChunk::new(MediaKind::Image, "/9j/"))),
            ]
        );
    }

    #[test]
    fn test_unrecognized_chunks_need_no_data() {
        let chunks = classified(json!({
            "realtime_input": {
                "media_chunks": [
                    {"mime_type": "audio/pcm", "data": "QUJD"},
                    {"mime_type": "text/plain"},
                    {"data": "AAAA"},
                    "not a chunk",
                    {"mime_type": "image/jpeg", "data": 42}
                ]
            }
        }));

        assert_eq!(
            chunks,
            vec![
                Ok(Some(MediaChunk::new(MediaKind::Audio, "QUJD"))),
                Ok(None),
                Ok(None),
                Ok(None),
                Err(ChunkError::MissingData("image/jpeg")),
            ]
        );
    }

    #[test]
    fn test_other_frame_shapes_are_accepted() {
        let frames: [&[u8]; 6] = [
            br#"{"client_content": {"turns": []}}"#,
            br#"{"realtime_input": {}}"#,
            br#"{"realtime_input": {"media_chunks": "nope"}}"#,
            b"[1]",
            br#""x""#,
            b"null",
        ];
        for raw in frames {
            let frame = ClientFrame::parse(raw).unwrap();
            assert!(frame.into_media_chunks().is_empty());
        }
    }

    #[test]
    fn test_client_frame_parse_failures() {
        assert!(ClientFrame::parse(b"{oops").is_err());
        assert!(ClientFrame::parse(b"").is_err());
    }

    #[test]
    fn test_outbound_message_shapes() {
        assert_eq!(
            serde_json::to_value(OutboundMessage::audio(&[0x01, 0x02])).unwrap(),
            json!({"audio": "AQI="})
        );
        assert_eq!(
            serde_json::to_value(OutboundMessage::audio_text("ok")).unwrap(),
            json!({"audioText": "ok"})
        );
        assert_eq!(
            serde_json::to_value(OutboundMessage::text_batch(vec!["hello".into()])).unwrap(),
            json!({"text": [{"text": "hello"}]})
        );
        assert_eq!(
            serde_json::to_value(OutboundMessage::text_batch(vec![])).unwrap(),
            json!({"text": []})
        );
        assert_eq!(
            serde_json::to_value(OutboundMessage::error("bad frame")).unwrap(),
            json!({"error": "bad frame", "status": "error"})
        );
        assert_eq!(
            serde_json::to_value(OutboundMessage::session_closed("gone")).unwrap(),
            json!({"error": "gone", "status": "session_closed"})
        );
    }

    #[test]
    fn test_outbound_message_deserializes_by_shape() {
        let msg: OutboundMessage =
            serde_json::from_str(r#"{"error": "x", "status": "session_closed"}"#).unwrap();
        assert_eq!(msg, OutboundMessage::session_closed("x"));

        let msg: OutboundMessage = serde_json::from_str(r#"{"audioText": "hi"}"#).unwrap();
        assert_eq!(msg, OutboundMessage::audio_text("hi"));
    }
}
