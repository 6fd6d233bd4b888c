//! Per-connection realtime endpoint loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::extract::State;
use axum::extract::WebSocketUpgrade;
use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use axum::response::IntoResponse;
use classdeck_core::engine::EndpointCtx;
use classdeck_core::engine::SessionEngine;
use classdeck_core::registry::CHANNEL_CAPACITY;
use classdeck_protocol::ClientOp;
use classdeck_protocol::ErrorEvent;
use classdeck_protocol::ServerEvent;
use futures::FutureExt;
use futures::SinkExt;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::warn;

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(engine): State<Arc<SessionEngine>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, engine))
}

async fn handle_socket(socket: WebSocket, engine: Arc<SessionEngine>) {
    debug!("websocket connected");
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(CHANNEL_CAPACITY);
    let mut ctx = EndpointCtx::new(tx);

    // Outbound events drain to the socket in production order, one JSON text
    // frame per event.
    let sink_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!("failed to serialize outbound event: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let idle_timeout = engine.config().idle_timeout;
    loop {
        // Every inbound frame rearms the idle timer; expiry forces a
        // disconnect.
        let frame = match tokio::time::timeout(idle_timeout, stream.next()).await {
            Err(_) => {
                debug!("endpoint {} idled out", ctx.id);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!("websocket error on {}: {e}", ctx.id);
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => {
                let op = match serde_json::from_str::<ClientOp>(&text) {
                    Ok(op) => op,
                    // Invalid shape: report and keep the connection; no
                    // state changes.
                    Err(e) => {
                        ctx.send(ServerEvent::Error(ErrorEvent {
                            message: format!("invalid event: {e}"),
                        }))
                        .await;
                        continue;
                    }
                };
                let closing = matches!(op, ClientOp::Disconnect);
                dispatch(&engine, &mut ctx, op).await;
                if closing {
                    break;
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    engine.handle_disconnect(&mut ctx).await;
    sink_task.abort();
    debug!("websocket disconnected");
}

/// A panicking handler must not take the session down with it: log, send an
/// `error` event, keep serving.
async fn dispatch(engine: &Arc<SessionEngine>, ctx: &mut EndpointCtx, op: ClientOp) {
    let outcome = AssertUnwindSafe(engine.handle_event(ctx, op))
        .catch_unwind()
        .await;
    if outcome.is_err() {
        warn!("event handler panicked for endpoint {}", ctx.id);
        ctx.send(ServerEvent::Error(ErrorEvent {
            message: "internal error".to_string(),
        }))
        .await;
    }
}
