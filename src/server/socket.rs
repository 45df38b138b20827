//! WebSocket transport.
//!
//! Each socket is split in two halves. A writer task drains the connection's
//! outbox into the sink and pings the client every `heartbeat_interval`; the
//! reader loop decodes text frames and hands them to the [`Connection`].
//! When either side ends, the connection leaves every room it joined.

use super::connection::Connection;
use super::AppState;
use crate::protocol::parse_client_event;
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// `GET /ws`: upgrade to a WebSocket and serve one [`Connection`] on it.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();
    let (outbox, inbox) = mpsc::unbounded_channel::<Arc<str>>();
    let mut connection = Connection::new(outbox);
    let id = connection.id();
    tracing::info!("WebSocket connection {} opened", id);

    let heartbeat = state.registry.config().heartbeat_interval;
    let mut writer = tokio::spawn(write_frames(sink, inbox, heartbeat));

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match parse_client_event(text.as_str()) {
                    Ok(event) => connection.handle(&state.registry, event).await,
                    Err(e) => connection.reject_frame(&e),
                },
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!("Ignoring binary frame ({} bytes) on {}", data.len(), id);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("WebSocket error on {}: {}", id, e);
                    break;
                }
            },
            _ = &mut writer => break,
        }
    }

    connection.close();
    writer.abort();
    tracing::info!("WebSocket connection {} closed", id);
}

async fn write_frames(
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    inbox: mpsc::UnboundedReceiver<Arc<str>>,
    heartbeat: Duration,
) {
    let mut frames = UnboundedReceiverStream::new(inbox);
    let mut ticker = tokio::time::interval(heartbeat.max(Duration::from_millis(100)));
    ticker.tick().await;

    loop {
        let message = tokio::select! {
            frame = frames.next() => match frame {
                Some(frame) => Message::Text((&*frame).into()),
                None => break,
            },
            _ = ticker.tick() => Message::Ping(Bytes::new()),
        };

        if let Err(e) = sink.send(message).await {
            tracing::debug!("Failed to write to WebSocket: {}", e);
            break;
        }
    }

    let _ = sink.close().await;
}
