use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::debug;

use crate::hub::Hub;

#[debug_handler(state = crate::AppState)]
pub async fn relay_ws(State(hub): State<Arc<Hub>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve(hub, socket))
}

/// Runs one connection until the client goes away.
///
/// The history frame is written first, then queued broadcasts in order.
/// Inbound frames are handed to the hub strictly one after another.
pub async fn serve(hub: Arc<Hub>, socket: WebSocket) {
    let mut session = hub.connect().await;
    let id = session.id();
    let (mut sender, mut receiver) = socket.split();

    let mut write_task = tokio::spawn(async move {
        if sender
            .send(Message::Text(session.history_frame().into()))
            .await
            .is_err()
        {
            return;
        }
        while let Some(outbound) = session.recv().await {
            if sender.send(Message::Text(outbound.frame.as_str().into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        let msg = tokio::select! {
            msg = receiver.next() => msg,
            // writer gone means the socket is unusable
            _ = &mut write_task => break,
        };
        let data = match msg {
            Some(Ok(Message::Text(text))) => text.as_str().as_bytes().to_vec(),
            Some(Ok(Message::Binary(bytes))) => bytes.to_vec(),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(conn = %id, error = %e, "read failed");
                break;
            }
        };

        // failures are logged by the hub and never close the connection
        let _ = hub.ingest(id, &data).await;
    }

    hub.disconnect(id).await;
    write_task.abort();
}
