use std::{net::SocketAddr, sync::Arc, time::Duration};

use chatrelay::{AppState, MessageStore, SqliteStore, codec::parse_timestamp, router};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start() -> (SocketAddr, SqliteStore) {
    let store = SqliteStore::in_memory().await.unwrap();
    let app = router(AppState::new(Arc::new(store.clone())));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, store)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    client
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send(client: &mut Client, frame: Value) {
    client.send(Message::Text(frame.to_string().into())).await.unwrap();
}

#[tokio::test]
async fn chat_round_trip() {
    let (addr, store) = start().await;

    let mut alice = connect(addr).await;
    assert_eq!(next_json(&mut alice).await, json!({"type": "history", "messages": []}));

    send(&mut alice, json!({"type": "chat", "username": "alice", "message": "hi"})).await;
    let echoed = next_json(&mut alice).await;
    assert_eq!(echoed["type"], "chat");
    assert_eq!(echoed["username"], "alice");
    assert_eq!(echoed["message"], "hi");
    assert_eq!(echoed["image"], "");
    let stamp = parse_timestamp(echoed["timestamp"].as_str().unwrap()).unwrap();

    let persisted = store.read_all_ordered().await.unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].timestamp, stamp);

    let mut bob = connect(addr).await;
    let history = next_json(&mut bob).await;
    assert_eq!(history["type"], "history");
    assert_eq!(history["messages"], json!([echoed]));
}

#[tokio::test]
async fn broadcast_reaches_everyone() {
    let (addr, _store) = start().await;

    let mut clients = Vec::new();
    for _ in 0..3 {
        let mut client = connect(addr).await;
        next_json(&mut client).await;
        clients.push(client);
    }

    send(&mut clients[1], json!({"type": "location", "username": "b", "message": "52.37,4.89"})).await;
    for client in &mut clients {
        let frame = next_json(client).await;
        assert_eq!(frame["type"], "location");
        assert_eq!(frame["message"], "52.37,4.89");
    }
}

#[tokio::test]
async fn bad_frames_keep_the_connection_open() {
    let (addr, store) = start().await;

    let mut client = connect(addr).await;
    next_json(&mut client).await;

    send(&mut client, json!({"type": "poke"})).await;
    client.send(Message::Text("definitely not json".into())).await.unwrap();
    client
        .send(Message::Binary(br#"{"type":"image","username":"c","image":"AAAA"}"#.to_vec().into()))
        .await
        .unwrap();

    let frame = next_json(&mut client).await;
    assert_eq!(frame["type"], "image");
    assert_eq!(frame["image"], "AAAA");
    assert_eq!(store.read_all_ordered().await.unwrap().len(), 1);
}

#[tokio::test]
async fn own_messages_arrive_in_order() {
    let (addr, _store) = start().await;

    let mut client = connect(addr).await;
    next_json(&mut client).await;

    for i in 0..20 {
        send(&mut client, json!({"type": "chat", "username": "a", "message": i.to_string()})).await;
    }
    for i in 0..20 {
        assert_eq!(next_json(&mut client).await["message"], i.to_string());
    }
}
