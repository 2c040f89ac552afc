use futures_util::{SinkExt, StreamExt};
use gemini_realtime::{GeminiLiveClient, GeminiLiveConfig};
use relay_core::{
    persona::SCREEN_ASSISTANT_PERSONA,
    protocol::{MediaChunk, MediaKind, SessionSetup},
    upstream::{Part, UpstreamConnector},
};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};

fn client_for(addr: std::net::SocketAddr) -> GeminiLiveClient {
    GeminiLiveClient::new(
        GeminiLiveConfig::new(SecretString::from("test-key".to_string()))
            .with_base_url(format!("ws://{addr}")),
    )
}

fn setup() -> SessionSetup {
    SessionSetup::from_first_frame(br#"{"setup": {"generation_config": {"response_modalities": ["AUDIO"]}}}"#)
        .unwrap()
}

async fn next_json(
    ws: &mut tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
) -> Value {
    loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Binary(data) => return serde_json::from_slice(&data).unwrap(),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_session_round_trip_against_local_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        let setup = next_json(&mut ws).await;
        assert_eq!(setup["setup"]["model"], json!("models/gemini-2.0-flash-exp"));
        assert_eq!(
            setup["setup"]["systemInstruction"]["parts"][0]["text"],
            json!(SCREEN_ASSISTANT_PERSONA)
        );
        ws.send(Message::Binary(br#"{"setupComplete": {}}"#.to_vec().into()))
            .await
            .unwrap();

        let input = next_json(&mut ws).await;
        assert_eq!(
            input,
            json!({"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm", "data": "QUJD"}]}})
        );

        let content = json!({
            "serverContent": {
                "modelTurn": {"parts": [
                    {"text": "hello"},
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AQI="}}
                ]}
            }
        });
        ws.send(Message::Text(content.to_string().into())).await.unwrap();
        ws.send(Message::Text("not json".into())).await.unwrap();
        ws.send(Message::Text(json!({"serverContent": {"turnComplete": true}}).to_string().into()))
            .await
            .unwrap();

        // Wait for the client to close its side.
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
    });

    let session = client_for(addr).connect(&setup()).await.unwrap();
    let mut sender = session.sender;
    let mut receiver = session.receiver;

    sender
        .send(MediaChunk::new(MediaKind::Audio, "QUJD"))
        .await
        .unwrap();

    let first = receiver.next_event().await.unwrap().unwrap();
    let parts = first.server_content.unwrap().model_turn.unwrap().parts;
    assert_eq!(parts[0], Part::Text("hello".into()));
    assert_eq!(
        parts[1],
        Part::InlineData {
            mime_type: "audio/pcm;rate=24000".into(),
            data: vec![1u8, 2].into(),
        }
    );

    // The unparseable frame is skipped.
    let second = receiver.next_event().await.unwrap().unwrap();
    assert!(second.server_content.unwrap().turn_complete);

    sender.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_handshake_rejects_unexpected_first_message() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let _ = next_json(&mut ws).await;
        ws.send(Message::Text(json!({"serverContent": {"turnComplete": true}}).to_string().into()))
            .await
            .unwrap();
    });

    let err = client_for(addr).connect(&setup()).await.err().unwrap();
    assert!(err.to_string().contains("unexpected message during Gemini setup"));
}

#[tokio::test]
async fn test_handshake_fails_when_server_closes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let _ = next_json(&mut ws).await;
        ws.close(None).await.unwrap();
    });

    assert!(client_for(addr).connect(&setup()).await.is_err());
}
