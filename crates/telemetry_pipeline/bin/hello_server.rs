//! # Hello Server
//!
//! Minimal HTTP service instrumented with the telemetry pipeline. Every
//! `GET /hello` produces one server span, one `hello.requests` counter
//! point and one correlated log record, exported to the collector at
//! `OTEL_EXPORTER_OTLP_ENDPOINT`.
//!
//! ## Running
//!
//! ```bash
//! # Export to a local collector on :4318
//! cargo run -p telemetry_pipeline --bin hello_server
//!
//! # Print batches instead of sending them
//! TELEMETRY_EXPORTER=stdout cargo run -p telemetry_pipeline --bin hello_server
//!
//! curl localhost:3001/hello
//! ```

use anyhow::Context as _;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use telemetry_pipeline::{
    Counter, KeyValue, LogBridgeLayer, Logger, PipelineConfig, ProviderRegistry, Severity,
    SpanContext, SpanKind, SpanStatus, Tracer, TRACEPARENT_HEADER,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const SCOPE: &str = "hello_server";
const DEFAULT_PORT: u16 = 3001;

#[derive(Clone)]
struct AppState {
    tracer: Tracer,
    requests: Counter<u64>,
    logger: Logger,
}

#[derive(Serialize)]
struct HelloResponse {
    message: &'static str,
}

async fn hello(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Json<HelloResponse> {
    let mut builder = state
        .tracer
        .span_builder("GET /hello")
        .with_kind(SpanKind::Server)
        .with_attribute("http.method", "GET")
        .with_attribute("http.route", "/hello");

    if let Some(parent) = headers
        .get(TRACEPARENT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| SpanContext::from_traceparent(value).ok())
    {
        builder = builder.with_parent(parent);
    }

    let mut span = builder.start();
    state
        .requests
        .add(1, &[KeyValue::new("endpoint", "/hello")]);
    state.logger.emit_in_context(
        &span.context(),
        Severity::Info,
        "Hello endpoint called",
        &[KeyValue::new("endpoint", "/hello")],
    );

    span.set_attribute("http.status_code", 200i64);
    span.set_status(SpanStatus::Ok);
    span.end();

    Json(HelloResponse {
        message: "Hello from Rust!",
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

fn listen_port() -> anyhow::Result<u16> {
    match std::env::var("PORT") {
        Ok(port) => port
            .trim()
            .parse()
            .with_context(|| format!("invalid PORT {:?}", port)),
        Err(_) => Ok(DEFAULT_PORT),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let registry = Arc::new(ProviderRegistry::new());

    // installed before initialize so its startup events reach the console
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(LogBridgeLayer::for_registry(Arc::clone(&registry), SCOPE))
        .init();

    let config = PipelineConfig::from_env().context("invalid telemetry configuration")?;
    registry
        .initialize(&config)
        .context("failed to initialize telemetry pipeline")?;

    for kind in telemetry_pipeline::SignalKind::ALL {
        tracing::info!(signal = %kind, url = %config.signal_url(kind), "export target");
    }

    let state = Arc::new(AppState {
        tracer: registry.tracer(SCOPE),
        requests: registry
            .meter(SCOPE)
            .u64_counter("hello.requests")
            .with_description("Number of /hello requests")
            .build(),
        logger: registry.logger(SCOPE),
    });
    let app = Router::new()
        .route("/hello", get(hello))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], listen_port()?));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(%addr, service = %config.service_name, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Err(e) = registry.shutdown_all().await {
        tracing::warn!(error = %e, "telemetry shutdown incomplete");
    }
    Ok(())
}
