//! Wire types of the Gemini Live `BidiGenerateContent` protocol.

use base64::Engine;
use relay_core::{
    protocol::{MediaChunk, SessionSetup},
    upstream::{ModelTurn, Part, ServerContent, UpstreamEvent},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) enum ClientMessage<'a> {
    Setup(Map<String, Value>),
    RealtimeInput(BidiGenerateContentRealtimeInput<'a>),
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BidiGenerateContentRealtimeInput<'a> {
    pub media_chunks: Vec<Blob<'a>>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Blob<'a> {
    pub mime_type: &'a str,
    pub data: &'a str,
}

/// Builds the first message of a session. Client options are passed through
/// verbatim; the model and the system instruction always come from the relay.
pub(crate) fn setup_message(model: &str, setup: &SessionSetup) -> ClientMessage<'static> {
    let mut body = setup.options().clone();
    let model = if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    };
    body.insert("model".to_string(), Value::String(model));
    body.insert(
        "systemInstruction".to_string(),
        json!({ "parts": [{ "text": setup.system_instruction() }] }),
    );
    ClientMessage::Setup(body)
}

pub(crate) fn realtime_input(chunk: &MediaChunk) -> ClientMessage<'_> {
    ClientMessage::RealtimeInput(BidiGenerateContentRealtimeInput {
        media_chunks: vec![Blob {
            mime_type: chunk.mime_type(),
            data: chunk.data(),
        }],
    })
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServerMessage {
    pub setup_complete: Option<Value>,
    pub server_content: Option<LiveServerContent>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LiveServerContent {
    pub model_turn: Option<ServerContentTurn>,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ServerContentTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServerPart {
    pub text: Option<String>,
    pub inline_data: Option<ServerBlob>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServerBlob {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

impl ServerMessage {
    /// Converts to the relay's event model, decoding inline data. Parts that are
    /// neither text nor inline data are dropped.
    pub(crate) fn into_event(self) -> Result<UpstreamEvent, base64::DecodeError> {
        let Some(content) = self.server_content else {
            return Ok(UpstreamEvent::default());
        };
        let model_turn = match content.model_turn {
            Some(turn) => {
                let mut parts = Vec::with_capacity(turn.parts.len());
                for part in turn.parts {
                    if let Some(text) = part.text {
                        parts.push(Part::Text(text));
                    } else if let Some(blob) = part.inline_data {
                        let data = base64::engine::general_purpose::STANDARD.decode(&blob.data)?;
                        parts.push(Part::InlineData {
                            mime_type: blob.mime_type,
                            data: data.into(),
                        });
                    }
                }
                Some(ModelTurn { parts })
            }
            None => None,
        };
        Ok(UpstreamEvent {
            server_content: Some(ServerContent {
                model_turn,
                turn_complete: content.turn_complete,
            }),
        })
    }
}
