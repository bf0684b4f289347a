mod common;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use common::{FakeLanguageModel, registry_with, test_config, test_state};
use copilot_server::{AppState, Config, create_app, config_manager::UpdateConfigRequest};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error as WsError, Message},
};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn spawn_server(config: Config) -> (SocketAddr, AppState) {
    let lm = Arc::new(FakeLanguageModel::new("cloudera", &["llama"], &["Hel", "lo"]));
    let state = test_state(config, registry_with(lm, None));
    state
        .config_manager
        .update_config(UpdateConfigRequest {
            model_provider_id: Some("cloudera:llama".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_app(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for a message")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn test_chat_over_websocket() {
    let (addr, state) = spawn_server(test_config()).await;
    let (mut socket, _) = connect_async(format!("ws://{}/api/ai/chats", addr)).await.unwrap();

    let greeting = next_json(&mut socket).await;
    assert_eq!(greeting["type"], "connection");
    assert_eq!(greeting["client_id"].as_str().unwrap().len(), 32);

    socket
        .send(Message::Text(json!({ "prompt": "Hi" }).to_string().into()))
        .await
        .unwrap();

    let human = next_json(&mut socket).await;
    assert_eq!(human["type"], "human");
    assert_eq!(human["body"], "Hi");
    assert_eq!(human["client"]["id"], greeting["client_id"]);

    let stream = next_json(&mut socket).await;
    assert_eq!(stream["type"], "agent-stream");
    let mut content = String::new();
    loop {
        let chunk = next_json(&mut socket).await;
        assert_eq!(chunk["type"], "agent-stream-chunk");
        assert_eq!(chunk["id"], stream["id"]);
        content.push_str(chunk["content"].as_str().unwrap());
        if chunk["stream_complete"] == true {
            break;
        }
    }
    assert_eq!(content, "Hello");

    socket.close(None).await.unwrap();
    let mut saw_close = false;
    while let Ok(Some(frame)) = tokio::time::timeout(Duration::from_secs(5), socket.next()).await {
        match frame {
            Ok(Message::Close(_)) => saw_close = true,
            Ok(_) => {}
            Err(_) => break,
        }
    }
    assert!(saw_close, "server should answer with a close frame");

    for _ in 0..50 {
        if state.hub.client_count().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state.hub.client_count().await, 0);
}

#[tokio::test]
async fn test_websocket_requires_token() {
    let mut config = test_config();
    config.security.token = Some("0123456789abcdef-token".to_string());
    let (addr, _state) = spawn_server(config).await;

    match connect_async(format!("ws://{}/api/ai/chats?token=wrong", addr)).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 403),
        other => panic!("expected a rejected handshake, got {:?}", other.map(|(_, r)| r.status())),
    }

    let (mut socket, _) = connect_async(format!("ws://{}/api/ai/chats?token=0123456789abcdef-token", addr))
        .await
        .unwrap();
    assert_eq!(next_json(&mut socket).await["type"], "connection");
}
