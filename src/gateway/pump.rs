//! Bidirectional WebSocket relay between a client and an upstream service
//!
//! The pump is two concurrent relay tasks, one per direction, each
//! preserving frame kind and per-direction FIFO order. When either side
//! closes or errors, the close is forwarded and the peer task is aborted so
//! neither endpoint is left hanging. Frames cross the seam as a neutral
//! [`Frame`], which keeps the relay loop testable without sockets.

use std::fmt;

use axum::extract::ws;
use axum::http::{HeaderMap, HeaderValue};
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as UpstreamCloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message as UpstreamMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

/// Close code sent to the client when the upstream connect fails
pub const UPSTREAM_FAILED_CLOSE: u16 = 1011;

/// Handshake headers that must not be forwarded to the upstream; the
/// upstream connector generates its own.
const HANDSHAKE_HEADERS: &[&str] = &["host", "connection", "upgrade"];

/// Transport-neutral relay frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame
    Text(String),
    /// Binary frame
    Binary(Vec<u8>),
    /// Close, with an optional close code
    Close(Option<u16>),
}

/// Failure to establish the upstream leg
#[derive(Debug, Error)]
pub enum PumpError {
    /// The upstream WebSocket connect failed
    #[error("upstream connect failed: {0}")]
    Connect(String),
}

/// An established upstream WebSocket
pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Convert an HTTP(S) base URL plus path and query into a ws(s) URL.
#[must_use]
pub fn build_ws_url(base: &str, path: &str, query: Option<&str>) -> String {
    let base = base.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    match query {
        Some(q) if !q.is_empty() => format!("{base}{path}?{q}"),
        _ => format!("{base}{path}"),
    }
}

/// Whether a client handshake header should be forwarded upstream.
#[must_use]
pub fn is_forwardable_handshake(name: &str) -> bool {
    let name = name.to_lowercase();
    !HANDSHAKE_HEADERS.contains(&name.as_str()) && !name.starts_with("sec-websocket-")
}

/// Subprotocols the client offered, in offer order.
#[must_use]
pub fn offered_protocols(headers: &HeaderMap) -> Vec<String> {
    headers
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Connect the upstream leg, forwarding filtered client headers and offered
/// subprotocols. Returns the socket and the subprotocol the upstream
/// actually accepted, which must be echoed to the client.
pub async fn connect_upstream(
    url: &str,
    client_headers: &HeaderMap,
    protocols: &[String],
) -> Result<(UpstreamSocket, Option<String>), PumpError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| PumpError::Connect(e.to_string()))?;

    for (name, value) in client_headers {
        if !is_forwardable_handshake(name.as_str()) {
            continue;
        }
        request.headers_mut().insert(name.clone(), value.clone());
    }
    if !protocols.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&protocols.join(", ")) {
            request.headers_mut().insert("sec-websocket-protocol", value);
        }
    }

    let (socket, response) = connect_async(request)
        .await
        .map_err(|e| PumpError::Connect(e.to_string()))?;
    let accepted = response
        .headers()
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    Ok((socket, accepted))
}

fn from_client(message: ws::Message) -> Option<Frame> {
    match message {
        ws::Message::Text(text) => Some(Frame::Text(text.to_string())),
        ws::Message::Binary(bytes) => Some(Frame::Binary(bytes.to_vec())),
        ws::Message::Close(frame) => Some(Frame::Close(frame.map(|f| f.code))),
        // The WebSocket stack answers pings itself
        ws::Message::Ping(_) | ws::Message::Pong(_) => None,
    }
}

fn to_client(frame: Frame) -> ws::Message {
    match frame {
        Frame::Text(text) => ws::Message::Text(text.into()),
        Frame::Binary(bytes) => ws::Message::Binary(bytes.into()),
        Frame::Close(code) => ws::Message::Close(code.map(|code| ws::CloseFrame {
            code,
            reason: ws::Utf8Bytes::from_static(""),
        })),
    }
}

fn from_upstream(message: UpstreamMessage) -> Option<Frame> {
    match message {
        UpstreamMessage::Text(text) => Some(Frame::Text(text.to_string())),
        UpstreamMessage::Binary(bytes) => Some(Frame::Binary(bytes.to_vec())),
        UpstreamMessage::Close(frame) => Some(Frame::Close(frame.map(|f| f.code.into()))),
        UpstreamMessage::Ping(_) | UpstreamMessage::Pong(_) | UpstreamMessage::Frame(_) => None,
    }
}

fn to_upstream(frame: Frame) -> UpstreamMessage {
    match frame {
        Frame::Text(text) => UpstreamMessage::Text(text.into()),
        Frame::Binary(bytes) => UpstreamMessage::Binary(bytes.into()),
        Frame::Close(code) => UpstreamMessage::Close(code.map(|code| UpstreamCloseFrame {
            code: CloseCode::from(code),
            reason: tungstenite::Utf8Bytes::from_static(""),
        })),
    }
}

/// Relay frames from `from` into `to` until close, read error or send
/// failure. A close frame is forwarded before the loop ends.
pub async fn relay<S, K, E>(mut from: S, mut to: K, direction: &'static str)
where
    S: Stream<Item = Result<Frame, E>> + Unpin,
    K: Sink<Frame> + Unpin,
    E: fmt::Display,
{
    while let Some(item) = from.next().await {
        match item {
            Ok(Frame::Close(code)) => {
                let _ = to.send(Frame::Close(code)).await;
                debug!(direction = direction, code = ?code, "Relay closed by peer");
                return;
            }
            Ok(frame) => {
                if to.send(frame).await.is_err() {
                    debug!(direction = direction, "Relay send side gone");
                    return;
                }
            }
            Err(error) => {
                warn!(direction = direction, error = %error, "Relay read failed");
                return;
            }
        }
    }
    debug!(direction = direction, "Relay stream ended");
}

/// Run two opposing relays until either finishes, then abort the peer so
/// no relay task outlives the other.
pub async fn pump_pair<CS, CK, US, UK, E1, E2>(
    client_stream: CS,
    client_sink: CK,
    upstream_stream: US,
    upstream_sink: UK,
) where
    CS: Stream<Item = Result<Frame, E1>> + Unpin + Send + 'static,
    CK: Sink<Frame> + Unpin + Send + 'static,
    US: Stream<Item = Result<Frame, E2>> + Unpin + Send + 'static,
    UK: Sink<Frame> + Unpin + Send + 'static,
    E1: fmt::Display + Send + 'static,
    E2: fmt::Display + Send + 'static,
{
    let mut client_to_upstream =
        tokio::spawn(relay(client_stream, upstream_sink, "client->upstream"));
    let mut upstream_to_client =
        tokio::spawn(relay(upstream_stream, client_sink, "upstream->client"));

    tokio::select! {
        _ = &mut client_to_upstream => upstream_to_client.abort(),
        _ = &mut upstream_to_client => client_to_upstream.abort(),
    }
}

/// Run the pump until either side finishes.
pub async fn pump(client: ws::WebSocket, upstream: UpstreamSocket) {
    let (client_sink, client_stream) = client.split();
    let (upstream_sink, upstream_stream) = upstream.split();

    pump_pair(
        client_stream.filter_map(|item| {
            future::ready(match item {
                Ok(message) => from_client(message).map(Ok),
                Err(error) => Some(Err(error)),
            })
        }),
        client_sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(to_client(frame)))),
        upstream_stream.filter_map(|item| {
            future::ready(match item {
                Ok(message) => from_upstream(message).map(Ok),
                Err(error) => Some(Err(error)),
            })
        }),
        upstream_sink.with(|frame: Frame| {
            future::ready(Ok::<_, tungstenite::Error>(to_upstream(frame)))
        }),
    )
    .await;
}

/// Close the client socket with an error code after a failed upstream
/// connect; the client is never left hanging on a half-open tunnel.
pub async fn close_unavailable(mut client: ws::WebSocket) {
    let _ = client
        .send(ws::Message::Close(Some(ws::CloseFrame {
            code: UPSTREAM_FAILED_CLOSE,
            reason: ws::Utf8Bytes::from_static("upstream connect failed"),
        })))
        .await;
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use futures::channel::mpsc;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn http_bases_become_ws() {
        assert_eq!(
            build_ws_url("http://orchestrator:8006", "/api/chat/ws", None),
            "ws://orchestrator:8006/api/chat/ws"
        );
        assert_eq!(
            build_ws_url("https://svc", "/ws", Some("room=1")),
            "wss://svc/ws?room=1"
        );
        // Already-ws bases pass through
        assert_eq!(
            build_ws_url("ws://conversation:8010/", "/api/chat/ws", None),
            "ws://conversation:8010/api/chat/ws"
        );
    }

    #[test]
    fn query_string_is_forwarded_verbatim() {
        // Order, duplicate keys and percent escapes must survive untouched
        let url = build_ws_url(
            "ws://conversation:8010",
            "/api/chat/ws",
            Some("b=2&a=1&a=3&msg=a%26b%3Dc"),
        );
        assert_eq!(
            url,
            "ws://conversation:8010/api/chat/ws?b=2&a=1&a=3&msg=a%26b%3Dc"
        );
    }

    #[test]
    fn handshake_headers_are_not_forwarded() {
        for name in ["host", "Connection", "upgrade", "Sec-WebSocket-Key", "sec-websocket-version"] {
            assert!(!is_forwardable_handshake(name), "{name} must be filtered");
        }
        for name in ["authorization", "cookie", "x-request-id"] {
            assert!(is_forwardable_handshake(name), "{name} must pass");
        }
    }

    #[test]
    fn offered_protocols_are_split_and_trimmed() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "sec-websocket-protocol",
            HeaderValue::from_static("chat.v2, chat.v1"),
        );
        assert_eq!(offered_protocols(&headers), vec!["chat.v2", "chat.v1"]);
        assert!(offered_protocols(&HeaderMap::new()).is_empty());
    }

    #[tokio::test]
    async fn relay_preserves_kind_and_order() {
        let (tx_in, rx_in) = mpsc::unbounded::<Result<Frame, Infallible>>();
        let (tx_out, rx_out) = mpsc::unbounded::<Frame>();

        tx_in.unbounded_send(Ok(Frame::Text("one".to_string()))).unwrap();
        tx_in.unbounded_send(Ok(Frame::Binary(vec![1, 2]))).unwrap();
        tx_in.unbounded_send(Ok(Frame::Text("two".to_string()))).unwrap();
        drop(tx_in);

        relay(rx_in, tx_out, "test").await;
        let forwarded: Vec<Frame> = rx_out.collect().await;
        assert_eq!(
            forwarded,
            vec![
                Frame::Text("one".to_string()),
                Frame::Binary(vec![1, 2]),
                Frame::Text("two".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn close_is_forwarded_and_ends_the_relay() {
        let (tx_in, rx_in) = mpsc::unbounded::<Result<Frame, Infallible>>();
        let (tx_out, rx_out) = mpsc::unbounded::<Frame>();

        tx_in.unbounded_send(Ok(Frame::Close(Some(1000)))).unwrap();
        // Anything after close must never be forwarded
        tx_in.unbounded_send(Ok(Frame::Text("late".to_string()))).unwrap();
        drop(tx_in);

        relay(rx_in, tx_out, "test").await;
        let forwarded: Vec<Frame> = rx_out.collect().await;
        assert_eq!(forwarded, vec![Frame::Close(Some(1000))]);
    }

    #[tokio::test]
    async fn read_error_ends_the_relay() {
        #[derive(Debug)]
        struct Boom;
        impl fmt::Display for Boom {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "boom")
            }
        }

        let (tx_in, rx_in) = mpsc::unbounded::<Result<Frame, Boom>>();
        let (tx_out, rx_out) = mpsc::unbounded::<Frame>();

        tx_in.unbounded_send(Ok(Frame::Text("ok".to_string()))).unwrap();
        tx_in.unbounded_send(Err(Boom)).unwrap();
        tx_in.unbounded_send(Ok(Frame::Text("after".to_string()))).unwrap();
        drop(tx_in);

        relay(rx_in, tx_out, "test").await;
        let forwarded: Vec<Frame> = rx_out.collect().await;
        assert_eq!(forwarded, vec![Frame::Text("ok".to_string())]);
    }

    #[tokio::test]
    async fn dropped_sink_ends_the_relay() {
        let (tx_in, rx_in) = mpsc::unbounded::<Result<Frame, Infallible>>();
        let (tx_out, rx_out) = mpsc::unbounded::<Frame>();
        drop(rx_out);

        tx_in.unbounded_send(Ok(Frame::Text("lost".to_string()))).unwrap();
        tx_in.unbounded_send(Ok(Frame::Text("also lost".to_string()))).unwrap();
        drop(tx_in);

        // Completes instead of hanging
        relay(rx_in, tx_out, "test").await;
    }

    #[tokio::test]
    async fn neither_relay_outlives_its_peer() {
        let (client_tx, client_rx) = mpsc::unbounded::<Result<Frame, Infallible>>();
        let (client_out_tx, _client_out_rx) = mpsc::unbounded::<Frame>();
        let (upstream_tx, upstream_rx) = mpsc::unbounded::<Result<Frame, Infallible>>();
        let (upstream_out_tx, upstream_out_rx) = mpsc::unbounded::<Frame>();

        client_tx.unbounded_send(Ok(Frame::Close(Some(1000)))).unwrap();
        drop(client_tx);

        // The upstream read side stays open the whole time, so the pump can
        // only finish by cancelling that relay after the client side closes.
        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            pump_pair(client_rx, client_out_tx, upstream_rx, upstream_out_tx),
        )
        .await
        .expect("upstream relay kept running after its peer finished");
        drop(upstream_tx);

        let forwarded: Vec<Frame> = upstream_out_rx.collect().await;
        assert_eq!(forwarded, vec![Frame::Close(Some(1000))]);
    }
}
