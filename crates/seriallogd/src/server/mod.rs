//! HTTP and WebSocket surface of the daemon.
//!
//! Routes:
//! - `GET /subscribe` - WebSocket upgrade, then a live subscriber session
//! - `GET /ports` - `{"ports": N}`, the number of device ingestors
//! - `GET /data/{index}` - the persisted log of one device
//! - `POST /delete/{index}` - asks the ingestor of `index` to delete its log
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   HttpServer    │
//! │  TcpListener    │
//! └───────┬─────────┘
//!         │ axum::serve
//!         ▼
//! ┌─────────────────┐   subscribe   ┌──────────────┐
//! │     Router      │──────────────▶│ BroadcastHub │
//! │   (AppState)    │               └──────────────┘
//! │                 │   request     ┌───────────────────┐
//! │                 │──────────────▶│ DeleteCoordinator │
//! └─────────────────┘               └───────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Handler failures become status codes, never task panics
//! - Shutdown is driven by a CancellationToken

mod websocket;

pub use websocket::WsTransport;

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::delete::DeleteCoordinator;
use crate::hub::BroadcastHub;
use crate::persist::{LogStore, PersistError};

/// Errors that can occur while running the HTTP server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Server failed: {0}")]
    Serve(#[source] std::io::Error),
}

/// Errors returned by route handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

impl From<PersistError> for ApiError {
    fn from(err: PersistError) -> Self {
        match err {
            PersistError::NotFound { index } => Self::NotFound(format!("no log for device {index}")),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub hub: BroadcastHub,
    pub deletes: DeleteCoordinator,
    pub store: LogStore,
    /// Number of device ingestors started
    pub active_ports: usize,
    pub send_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct PortsResponse {
    ports: usize,
}

/// Builds the router for `state`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/subscribe", get(subscribe))
        .route("/ports", get(ports))
        .route("/data/:index", get(data))
        .route("/delete/:index", post(delete))
        .with_state(state)
}

async fn subscribe(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| websocket::handle_socket(socket, state))
}

async fn ports(State(state): State<AppState>) -> Json<PortsResponse> {
    Json(PortsResponse {
        ports: state.active_ports,
    })
}

async fn data(
    State(state): State<AppState>,
    Path(index): Path<String>,
) -> Result<Response, ApiError> {
    let index = parse_index(&index)?;
    let bytes = state.store.read(index).await?;
    Ok(([(header::CONTENT_TYPE, content_type(&state.store))], bytes).into_response())
}

async fn delete(
    State(state): State<AppState>,
    Path(index): Path<String>,
) -> Result<StatusCode, ApiError> {
    let index = parse_index(&index)?;
    let delivered = state.deletes.request_delete(index);
    debug!(index, delivered, "Delete requested over HTTP");
    Ok(StatusCode::OK)
}

fn parse_index(raw: &str) -> Result<usize, ApiError> {
    raw.parse::<usize>()
        .map_err(|_| ApiError::BadRequest(format!("invalid device index {raw:?}")))
}

fn content_type(store: &LogStore) -> &'static str {
    match store.encoding() {
        seriallog_core::LogEncoding::Utf8 => "text/plain; charset=utf-8",
        seriallog_core::LogEncoding::Latin1 => "text/plain; charset=iso-8859-1",
    }
}

/// HTTP server bound to one address.
pub struct HttpServer {
    listener: TcpListener,
    state: AppState,
    cancel_token: CancellationToken,
}

impl HttpServer {
    /// Binds the listening socket.
    pub async fn bind(
        addr: SocketAddr,
        state: AppState,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        Ok(Self {
            listener,
            state,
            cancel_token,
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::Serve)
    }

    /// Serves requests until the cancellation token fires.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.local_addr()?;
        info!(addr = %addr, "HTTP server listening");

        let router = build_router(self.state);
        let cancel_token = self.cancel_token;

        axum::serve(self.listener, router)
            .with_graceful_shutdown(async move { cancel_token.cancelled().await })
            .await
            .map_err(ServerError::Serve)?;

        info!("HTTP server stopped");
        Ok(())
    }
}
