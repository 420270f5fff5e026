//! HTTP and WebSocket handlers.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::session::CallSession;
use crate::AppState;

/// Outbound frames buffered per call before the session waits on the socket.
const OUTBOUND_CAPACITY: usize = 256;
const INBOUND_CAPACITY: usize = 256;

/// Returns `200 OK` with server status and version.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn readyz() -> Json<Value> {
    Json(json!({ "status": "ready" }))
}

/// Answers an incoming call with instructions to open a media stream back to
/// this server.
pub async fn incoming_call(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let host = header_str(&headers, "x-forwarded-host")
        .or_else(|| header_str(&headers, header::HOST.as_str()))
        .or_else(|| Some(state.public_host.as_str()).filter(|h| !h.is_empty()));

    let Some(host) = host else {
        tracing::error!("no host available for the media stream url");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "failed_to_generate_twiml" })),
        )
            .into_response();
    };

    ([(header::CONTENT_TYPE, "text/xml")], stream_twiml(host)).into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// TwiML connecting the call to the media-stream endpoint on `host`.
pub fn stream_twiml(host: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
<Response><Connect><Stream url=\"wss://{}/connection\"/></Connect></Response>",
        escape_attr(host)
    )
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Upgrades the media-stream connection and hands it to a new call session.
pub async fn connection_handler(
    ws: WebSocketUpgrade,
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
    let (in_tx, in_rx) = mpsc::channel::<String>(INBOUND_CAPACITY);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    let session = CallSession::new(Arc::clone(&state.services), out_tx);
    let session_task = tokio::spawn(session.run(in_rx));
    tracing::debug!("media stream connection opened");

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                if in_tx.send(text.as_str().to_owned()).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    drop(in_tx);
    if let Err(e) = session_task.await {
        tracing::error!(error = %e, "call session task failed");
    }
    send_task.abort();
}
