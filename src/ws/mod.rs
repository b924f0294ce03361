// SPDX-License-Identifier: MIT
//! WebSocket transport — accepts connections, performs the identity
//! handshake, and shuttles frames between sockets and the hub.
//!
//! The same port also answers two plain HTTP GETs (`/health`, `/presence`)
//! so the hosting CRUD API can poll liveness and the online roster without
//! a WebSocket client.

pub mod frame;

use crate::collab::presence::ConnectionId;
use crate::ws::frame::FrameError;
use crate::AppContext;
use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::handshake::server::{Request, Response},
    tungstenite::protocol::frame::coding::CloseCode,
    tungstenite::protocol::CloseFrame,
    tungstenite::Message,
};
use tracing::{debug, error, info, warn};

/// Fixed path clients connect to, e.g.
/// `ws://host:4310/collab?userId=u1&userName=Alice`.
pub const WS_PATH: &str = "/collab";

// ─── Server ──────────────────────────────────────────────────────────────────

pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    let addr = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, path = WS_PATH, "collab server listening (WebSocket + HTTP health on same port)");

    // Graceful shutdown: resolve on SIGTERM (Unix) or Ctrl-C (all platforms).
    let shutdown = make_shutdown_future();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("shutdown signal received — stopping collab server");
                break;
            }

            conn = listener.accept() => {
                let (stream, peer) = match conn {
                    Ok(c) => c,
                    Err(e) => {
                        error!(err = %e, "accept error");
                        continue;
                    }
                };
                debug!(peer = %peer, "new connection");
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, ctx).await {
                        warn!(peer = %peer, err = %e, "connection error");
                    }
                });
            }
        }
    }

    info!("collab server stopped");
    Ok(())
}

/// Returns a future that resolves when a shutdown signal is received.
///
/// On Unix we listen for SIGTERM *and* Ctrl-C.
/// On other platforms we listen for Ctrl-C only.
async fn make_shutdown_future() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

// ─── HTTP peek endpoints ─────────────────────────────────────────────────────

/// Respond to a plain HTTP GET with a JSON document and close.
async fn respond_json(mut stream: tokio::net::TcpStream, body: serde_json::Value) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    // Consume the request — we don't inspect anything beyond the path peek.
    let mut req_buf = vec![0u8; 2048];
    let _ = stream.read(&mut req_buf).await;

    let body_str = body.to_string();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body_str.len(),
        body_str
    );
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

async fn handle_health_check(stream: tokio::net::TcpStream, ctx: &AppContext) -> Result<()> {
    let stats = ctx.hub.stats().await;
    let body = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": ctx.started_at.elapsed().as_secs(),
        "onlineUsers": stats.online_users,
        "activeChannels": stats.active_channels,
        "port": ctx.config.port,
    });
    respond_json(stream, body).await
}

async fn handle_presence_query(stream: tokio::net::TcpStream, ctx: &AppContext) -> Result<()> {
    let roster = ctx.hub.roster().await;
    respond_json(stream, serde_json::json!({ "onlineUsers": roster })).await
}

// ─── Handshake ───────────────────────────────────────────────────────────────

/// Decode `key=value&...` query pairs, percent-decoded, `+` as space.
fn parse_query(query: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let decode = |s: &str| {
            percent_encoding::percent_decode_str(&s.replace('+', " "))
                .decode_utf8()
                .map(|c| c.into_owned())
                .ok()
        };
        if let (Some(key), Some(value)) = (decode(key), decode(value)) {
            out.insert(key, value);
        }
    }
    out
}

async fn handle_connection(stream: tokio::net::TcpStream, ctx: Arc<AppContext>) -> Result<()> {
    // Peek at the first bytes to pick off plain HTTP dashboard requests.
    // WebSocket upgrades also start with "GET " but use a different path,
    // so falling through to the WS handshake is always safe.
    let mut peek_buf = [0u8; 16];
    let n = stream.peek(&mut peek_buf).await.unwrap_or(0);
    if n >= 11 && &peek_buf[..11] == b"GET /health" {
        return handle_health_check(stream, &ctx).await;
    }
    if n >= 13 && &peek_buf[..13] == b"GET /presence" {
        return handle_presence_query(stream, &ctx).await;
    }

    // Capture the request URI during the WS handshake — the identity rides
    // in the query string.
    let mut request_uri = None;
    let ws = accept_hdr_async(stream, |req: &Request, resp: Response| {
        request_uri = Some(req.uri().clone());
        Ok(resp)
    })
    .await?;
    let (mut sink, mut stream) = ws.split();

    let uri = request_uri.unwrap_or_default();
    let params = uri.query().map(parse_query).unwrap_or_default();
    let user_id = params.get("userId").cloned().unwrap_or_default();
    let user_name = params.get("userName").cloned().unwrap_or_default();

    // Wrong path or missing identity: close immediately with a policy
    // violation, before any state is created.
    let admitted = if uri.path() != WS_PATH {
        None
    } else {
        ctx.hub.connect(&user_id, &user_name).await.ok()
    };
    let Some((connection_id, outbox)) = admitted else {
        debug!(uri = %uri, "handshake rejected");
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: "userId and userName are required".into(),
            })))
            .await;
        return Ok(());
    };

    // One writer task per connection drains the outbound queue into the
    // sink. It ends when the hub drops the queue's sender (disconnect or
    // reconnect-supersede) or the socket dies.
    let writer = tokio::spawn(drain_outbox(outbox, sink, connection_id));

    // Inbound loop — one command at a time, run to completion.
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                match frame::decode_command(&text) {
                    Ok(command) => ctx.hub.handle_command(connection_id, command).await,
                    Err(FrameError::Malformed(reason)) => {
                        debug!(conn = %connection_id, reason = %reason, "malformed frame");
                        ctx.hub
                            .send_error(connection_id, format!("invalid frame: {reason}"))
                            .await;
                    }
                    Err(FrameError::UnknownType(tag)) => {
                        debug!(conn = %connection_id, tag = %tag, "unknown command type — ignored");
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {
                // Binary/ping/pong — the protocol layer answers pings itself.
            }
            Err(e) => {
                debug!(conn = %connection_id, err = %e, "ws error");
                break;
            }
        }
    }

    ctx.hub.disconnect(connection_id).await;
    // Disconnect dropped the queue's sender, so the writer winds down on
    // its own; await it to keep the close frame ordered after final sends.
    let _ = writer.await;
    Ok(())
}

async fn drain_outbox(
    mut outbox: mpsc::Receiver<String>,
    mut sink: futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
        Message,
    >,
    connection_id: ConnectionId,
) {
    while let Some(json) = outbox.recv().await {
        if let Err(e) = sink.send(Message::Text(json)).await {
            debug!(conn = %connection_id, err = %e, "send error — stopping writer");
            break;
        }
    }
    let _ = sink.close().await;
}
