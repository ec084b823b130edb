//! HTTP and WebSocket front end.
//!
//! Serves the browser terminal's static files, redirects `/` to the terminal
//! page and upgrades connections on the terminal path. Every upgraded
//! connection gets its own process and [`SessionBridge`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::future::{self, Ready};
use futures_util::{SinkExt, StreamExt};
use protocol::OutboundFrame;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;

use crate::config::Config;
use crate::session::{BridgeConfig, SessionBridge, SpawnOptions, TransportEvent};

/// State shared by all connections.
struct AppState {
    config: Config,
    spawn_options: SpawnOptions,
    bridge_config: BridgeConfig,
    shutdown: CancellationToken,
    active_sessions: AtomicUsize,
}

/// Web server for browser terminals.
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    /// Create a new web server. Cancelling `shutdown` stops accepting
    /// connections and ends every live session.
    pub fn new(config: Config, shutdown: CancellationToken) -> Self {
        let state = AppState {
            spawn_options: SpawnOptions::from_config(&config.session),
            bridge_config: BridgeConfig::from_config(&config),
            config,
            shutdown,
            active_sessions: AtomicUsize::new(0),
        };
        Self {
            state: Arc::new(state),
        }
    }

    /// Number of sessions currently bridged.
    pub fn active_sessions(&self) -> usize {
        self.state.active_sessions.load(Ordering::SeqCst)
    }

    /// Builds the router.
    pub fn router(&self) -> Router {
        let server = &self.state.config.server;
        let static_files =
            ServeDir::new(&server.static_dir).append_index_html_on_directories(false);

        Router::new()
            .route("/", get(index_redirect))
            .route(&server.ws_path, get(terminal))
            .fallback_service(static_files)
            .with_state(Arc::clone(&self.state))
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = self.state.config.server.socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        self.serve(listener).await
    }

    /// Serves on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        let server = &self.state.config.server;

        tracing::info!(
            addr = %addr,
            static_dir = %server.static_dir.display(),
            ws_path = %server.ws_path,
            "Web server listening on http://{}",
            addr
        );

        let shutdown = self.state.shutdown.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("Web server failed")?;

        tracing::info!(active = self.active_sessions(), "Web server stopped");
        Ok(())
    }
}

/// `GET /` sends the browser to the terminal page.
async fn index_redirect(State(state): State<Arc<AppState>>) -> Response {
    let location = format!("/{}", state.config.server.index_page);
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

/// Upgrades the terminal path to a WebSocket.
async fn terminal(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let bridge = match SessionBridge::spawn(&state.spawn_options, state.bridge_config.clone()) {
        Ok(bridge) => bridge,
        Err(e) => {
            tracing::error!(
                command = %state.spawn_options.command,
                error = %e,
                "Failed to start terminal session"
            );
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let active = state.active_sessions.fetch_add(1, Ordering::SeqCst) + 1;
    tracing::info!(
        session_id = %bridge.id(),
        state = ?bridge.state(),
        active = active,
        "Terminal session started"
    );

    let (sink, stream) = socket.split();
    let sink = sink.with(outbound_message);
    let stream = stream.filter_map(|msg| future::ready(transport_event(msg)));

    let report = bridge.run(sink, stream, state.shutdown.clone()).await;

    let active = state.active_sessions.fetch_sub(1, Ordering::SeqCst) - 1;
    tracing::info!(
        session_id = %report.id,
        reason = %report.reason,
        exit_status = ?report.exit_status,
        bytes_in = report.bytes_in,
        bytes_out = report.bytes_out,
        resizes = report.resizes,
        dropped_inputs = report.dropped_inputs,
        cols = report.terminal_size.0,
        rows = report.terminal_size.1,
        pings_sent = report.pings_sent,
        dropped_sends = report.dropped_sends,
        active = active,
        "Terminal session ended"
    );
}

fn outbound_message(frame: OutboundFrame) -> Ready<Result<Message, axum::Error>> {
    let message = match frame {
        OutboundFrame::Text(text) => Message::Text(text.into()),
        OutboundFrame::Binary(data) => Message::Binary(data.into()),
        OutboundFrame::Ping(data) => Message::Ping(data.into()),
        OutboundFrame::Close => Message::Close(None),
    };
    future::ready(Ok(message))
}

/// Maps a WebSocket message to a bridge event. Pings are answered by axum.
fn transport_event(msg: Result<Message, axum::Error>) -> Option<TransportEvent> {
    match msg {
        Ok(Message::Text(text)) => Some(TransportEvent::Message(text.as_str().as_bytes().to_vec())),
        Ok(Message::Binary(data)) => Some(TransportEvent::Message(data.to_vec())),
        Ok(Message::Pong(_)) => Some(TransportEvent::Pong),
        Ok(Message::Ping(_)) => None,
        Ok(Message::Close(_)) => Some(TransportEvent::Closed),
        Err(e) => {
            tracing::debug!(error = %e, "WebSocket receive failed");
            Some(TransportEvent::Closed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_message_mapping() {
        let msg = outbound_message(OutboundFrame::Text("hi".into())).into_inner().unwrap();
        assert_eq!(msg, Message::Text("hi".into()));

        let msg = outbound_message(OutboundFrame::Binary(vec![0xC3])).into_inner().unwrap();
        assert_eq!(msg, Message::Binary(vec![0xC3].into()));

        let msg = outbound_message(OutboundFrame::Ping(Vec::new())).into_inner().unwrap();
        assert!(matches!(msg, Message::Ping(_)));

        let msg = outbound_message(OutboundFrame::Close).into_inner().unwrap();
        assert_eq!(msg, Message::Close(None));
    }

    #[test]
    fn test_transport_event_mapping() {
        assert_eq!(
            transport_event(Ok(Message::Text("ls\n".into()))),
            Some(TransportEvent::Message(b"ls\n".to_vec()))
        );
        assert_eq!(
            transport_event(Ok(Message::Binary(vec![1, 2].into()))),
            Some(TransportEvent::Message(vec![1, 2]))
        );
        assert_eq!(
            transport_event(Ok(Message::Pong(Vec::new().into()))),
            Some(TransportEvent::Pong)
        );
        assert_eq!(transport_event(Ok(Message::Ping(Vec::new().into()))), None);
        assert_eq!(
            transport_event(Ok(Message::Close(None))),
            Some(TransportEvent::Closed)
        );
    }

    #[tokio::test]
    async fn test_new_server_has_no_sessions() {
        let server = WebServer::new(Config::default(), CancellationToken::new());
        assert_eq!(server.active_sessions(), 0);
        let _router = server.router();
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let shutdown = CancellationToken::new();
        let server = WebServer::new(Config::default(), shutdown.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let handle = tokio::spawn(async move { server.serve(listener).await });
        shutdown.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
