//! HTTP signaling endpoint
//!
//! `POST /connect` takes `{"offer": ...}` and answers with
//! `{"answer": ..., "success": true}`. `GET /stats` reports relay counters.
//! Every other path is served from the configured public directory.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::relay::Relay;
use crate::error::Result;

/// Error body returned to signaling clients
#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

/// Relay server
pub struct RelayServer {
    relay: Arc<Relay>,
}

impl RelayServer {
    pub fn new(relay: Relay) -> Self {
        Self {
            relay: Arc::new(relay),
        }
    }

    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    /// Build the HTTP router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/connect", post(handle_connect))
            .route("/stats", get(handle_stats))
            .fallback_service(ServeDir::new(&self.relay.config().public_dir))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.relay))
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.relay.config().bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(
            addr = %addr,
            mode = %self.relay.config().mode,
            public_dir = %self.relay.config().public_dir.display(),
            "Relay listening"
        );

        self.relay.start()?;

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Shutdown signal received");
            })
            .await;

        self.relay.shutdown().await;
        result.map_err(Into::into)
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.relay.config().bind_addr
    }
}

async fn handle_connect(State(relay): State<Arc<Relay>>, body: Bytes) -> Response {
    match relay.accept_offer(&body).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            let status = if e.is_client_error() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            tracing::warn!(status = %status, error = %e, "Offer rejected");

            let body = ErrorResponse {
                success: false,
                error: e.to_string(),
            };
            (status, Json(body)).into_response()
        }
    }
}

async fn handle_stats(State(relay): State<Arc<Relay>>) -> Response {
    Json(relay.report().await).into_response()
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    use super::*;
    use crate::peer::sdp::tests::{offer, VIDEO_H264_ONLY};
    use crate::server::config::RelayConfig;

    struct TestServer {
        addr: SocketAddr,
        stop: Option<oneshot::Sender<()>>,
        handle: tokio::task::JoinHandle<Result<()>>,
    }

    impl TestServer {
        async fn start(config: RelayConfig) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let server = RelayServer::new(Relay::new(config).unwrap());
            let (stop, stopped) = oneshot::channel::<()>();

            let handle = tokio::spawn(async move {
                server
                    .serve(listener, async move {
                        let _ = stopped.await;
                    })
                    .await
            });

            Self {
                addr,
                stop: Some(stop),
                handle,
            }
        }

        async fn request(&self, method: &str, path: &str, body: &str) -> (u16, String) {
            let mut stream = TcpStream::connect(self.addr).await.unwrap();
            let request = format!(
                "{} {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                method,
                path,
                body.len(),
                body
            );
            stream.write_all(request.as_bytes()).await.unwrap();

            let mut response = String::new();
            stream.read_to_string(&mut response).await.unwrap();

            let status = response
                .split_whitespace()
                .nth(1)
                .and_then(|code| code.parse().ok())
                .unwrap();
            let body = response
                .split_once("\r\n\r\n")
                .map(|(_, body)| body.to_string())
                .unwrap_or_default();
            (status, body)
        }

        async fn stop(mut self) {
            if let Some(stop) = self.stop.take() {
                let _ = stop.send(());
            }
            self.handle.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_unsupported_offer_returns_400() {
        let server = TestServer::start(RelayConfig::default()).await;

        let body = serde_json::json!({
            "offer": { "type": "offer", "sdp": offer(&[VIDEO_H264_ONLY]) }
        })
        .to_string();
        let (status, response) = server.request("POST", "/connect", &body).await;

        assert_eq!(status, 400);
        assert!(response.contains(r#""success":false"#));
        assert!(response.contains("unsupported media"));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_offer_returns_400() {
        let server = TestServer::start(RelayConfig::default()).await;

        let (status, response) = server.request("POST", "/connect", "{}").await;
        assert_eq!(status, 400);
        assert!(response.contains("malformed offer"));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let server = TestServer::start(RelayConfig::default()).await;

        let (status, response) = server.request("GET", "/stats", "").await;
        assert_eq!(status, 200);
        assert!(response.contains(r#""mode":"broadcast""#));
        assert!(response.contains(r#""active_sessions":0"#));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_serves_public_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>relay</h1>").unwrap();

        let server = TestServer::start(RelayConfig::default().public_dir(dir.path())).await;

        let (status, response) = server.request("GET", "/index.html", "").await;
        assert_eq!(status, 200);
        assert!(response.contains("<h1>relay</h1>"));

        let (status, _) = server.request("GET", "/missing.js", "").await;
        assert_eq!(status, 404);
        server.stop().await;
    }
}
