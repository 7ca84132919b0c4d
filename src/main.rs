// src/main.rs
use anyhow::Result;
use async_trait::async_trait;
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use raw_socket_server::{
    config::{self, Config},
    metrics::MetricsRegistry,
    server::{bind_tcp, CloseReason, ConnectionHandler, ConnectionId, ServerBuilder},
};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Logs what the server sees: accepted peers and decoded messages.
struct LoggingHandler;

#[async_trait]
impl ConnectionHandler for LoggingHandler {
    async fn on_accept(&mut self, id: ConnectionId, address: &str, port: u16) {
        info!(%id, "Accepted: {}:{}", address, port);
    }

    async fn on_data(&mut self, id: ConnectionId, data: Vec<u8>) {
        info!(%id, "Read {} bytes", data.len());
        info!(%id, "message -> {}", String::from_utf8_lossy(&data));
    }

    async fn on_close(&mut self, id: ConnectionId, reason: &CloseReason) {
        info!(%id, %reason, "Disconnected");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("raw_socket_server=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    let config = load(std::env::args().nth(1)).await?;

    let socket = bind_tcp(config.listen_port())?;
    let mut builder = ServerBuilder::from_config(socket, &config.server);

    if config.metrics.enabled {
        let registry = MetricsRegistry::new()?;
        builder = builder.with_metrics(registry.collector());
        let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        start_metrics_server(metrics_addr, registry, config.metrics.path.clone());
    }

    let handle = builder.start()?;
    if let Some(vertex) = config.own_vertex() {
        info!("Serving as node '{}' on {}", vertex.name, handle.local_addr());
    } else {
        info!("Serving on {}", handle.local_addr());
    }

    let trigger = handle.shutdown_trigger();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.shutdown();
    });

    handle.run(LoggingHandler).await;
    info!("Server stopped");
    Ok(())
}

async fn load(path: Option<String>) -> Result<Config> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            config::load_config(&path).await
        }
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            info!("Loading configuration from: {}", DEFAULT_CONFIG_PATH);
            config::load_config(DEFAULT_CONFIG_PATH).await
        }
        None => {
            info!("No configuration file, using defaults");
            Ok(Config::default())
        }
    }
}

fn start_metrics_server(addr: SocketAddr, registry: MetricsRegistry, path: String) {
    let registry = Arc::new(registry);
    let metrics_path = Arc::new(path);
    let service_path = metrics_path.clone();

    let make_service = hyper::service::make_service_fn(move |_| {
        let registry = registry.clone();
        let path = service_path.clone();

        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                let path = path.clone();

                async move { Ok::<_, Infallible>(metrics_response(&req, &registry, &path)) }
            }))
        }
    });

    tokio::spawn(async move {
        let server = match Server::try_bind(&addr) {
            Ok(builder) => builder.serve(make_service),
            Err(e) => {
                error!("Failed to bind metrics server on {}: {}", addr, e);
                return;
            }
        };
        info!(
            "Metrics server listening on http://{}{}",
            addr,
            metrics_path.as_str()
        );
        if let Err(e) = server.await {
            error!("Metrics server error: {}", e);
        }
    });
}

fn metrics_response(req: &Request<Body>, registry: &MetricsRegistry, path: &str) -> Response<Body> {
    if req.uri().path() != path {
        return status_response(StatusCode::NOT_FOUND, "Not Found");
    }
    match registry.gather() {
        Ok(metrics) => {
            let mut response = Response::new(Body::from(metrics));
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(e) => {
            warn!("Failed to encode metrics: {}", e);
            status_response(StatusCode::INTERNAL_SERVER_ERROR, "Metrics unavailable")
        }
    }
}

fn status_response(status: StatusCode, message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
