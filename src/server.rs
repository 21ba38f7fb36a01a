use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::adb::DeviceControl;
use crate::bridge::{BridgeOptions, WirelessBridge};
use crate::connection::current_status;
use crate::device::list_devices;

pub struct ServerConfig {
    pub adb: DeviceControl,
    pub bridge: BridgeOptions,
    pub port: u16,
}

struct AppState {
    config: ServerConfig,
    // One bridge or teardown at a time; the tcpip switch is not reentrant.
    bridge_lock: Mutex<()>,
}

pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let addr = format!("127.0.0.1:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, adb = %config.adb.tool().display(), "serving device status");
    println!("Listening on http://{}", addr);

    axum::serve(listener, router(config)).await?;

    Ok(())
}

pub fn router(config: ServerConfig) -> Router {
    let state = Arc::new(AppState {
        config,
        bridge_lock: Mutex::new(()),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/status", get(status_handler))
        .route("/devices", get(devices_handler))
        .route("/wireless", post(wireless_handler))
        .route("/disconnect", post(disconnect_handler))
        .layer(cors)
        .with_state(state)
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Response {
    let adb = state.config.adb.clone();
    blocking_json(move || current_status(&adb)).await
}

async fn devices_handler(State(state): State<Arc<AppState>>) -> Response {
    let adb = state.config.adb.clone();
    blocking_json(move || list_devices(&adb)).await
}

async fn wireless_handler(State(state): State<Arc<AppState>>) -> Response {
    let _guard = state.bridge_lock.lock().await;
    let bridge = WirelessBridge::new(state.config.adb.clone());
    let options = state.config.bridge.clone();
    blocking_json(move || bridge.bridge(&options)).await
}

async fn disconnect_handler(State(state): State<Arc<AppState>>) -> Response {
    let _guard = state.bridge_lock.lock().await;
    let bridge = WirelessBridge::new(state.config.adb.clone());
    blocking_json(move || bridge.disconnect()).await
}

async fn blocking_json<T, F>(work: F) -> Response
where
    T: Serialize + Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(value) => Json(value).into_response(),
        Err(e) => {
            warn!(error = %e, "engine task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("engine task failed: {}", e)).into_response()
        }
    }
}
