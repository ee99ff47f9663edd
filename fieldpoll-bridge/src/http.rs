//! HTTP management interface.
//!
//! Edits the device list, triggers batches and serves the last report.
//! A small HTML page at `/` lists the devices and adds new ones from a form.
//!
//! Registry edits are answered with `409 Conflict` while a batch runs. An
//! edit is applied and saved under the station lock on a blocking thread; if
//! the save fails the edit is rolled back and the request fails with `500`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{delete, get, post};
use axum::{Form, Json, Router};
use fieldpoll_core::{DeviceDescriptor, Phase, RegistryError, StartError};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::{BusStation, SharedStation};
use crate::error::BridgeError;
use crate::store::RegistryStore;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    station: SharedStation,
    store: Arc<RegistryStore>,
}

/// Body of `POST /devices`.
#[derive(Debug, Deserialize)]
struct DeviceList {
    devices: Vec<DeviceDescriptor>,
}

/// Error answered as `{ "error": message }`.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let status = match err {
            RegistryError::BatchRunning => StatusCode::CONFLICT,
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<StartError> for ApiError {
    fn from(err: StartError) -> Self {
        let status = match err {
            StartError::NotIdle(_) => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Registry(e) => e.into(),
            other => Self::internal(other.to_string()),
        }
    }
}

type ApiResult = std::result::Result<Response, ApiError>;

/// Create the HTTP router.
fn create_router(station: SharedStation, store: Arc<RegistryStore>) -> Router {
    let state = AppState { station, store };

    Router::new()
        .route("/", get(device_page))
        .route("/addSlave", get(device_page).post(add_device_form))
        .route("/devices", get(list_devices).post(replace_devices))
        .route("/devices/add", post(add_device))
        .route("/devices/save", post(save_devices))
        .route("/devices/reload", post(reload_devices))
        .route("/devices/:id", delete(remove_device))
        .route("/batch", get(batch_status))
        .route("/batch/start", post(start_batch))
        .route("/report", get(last_report))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run blocking work (file access, the station lock) off the async workers.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::internal(format!("Worker failed: {}", e)))?
}

/// Apply a registry edit and save the resulting list before the station
/// lock is released.
///
/// The host cannot start a batch on an unsaved list, and concurrent edits
/// reach the file in the order they were applied. A failed save puts the
/// previous list back.
async fn apply_edit<T, F>(state: &AppState, edit: F) -> Result<(T, Vec<DeviceDescriptor>), ApiError>
where
    T: Send + 'static,
    F: FnOnce(&mut BusStation) -> Result<T, RegistryError> + Send + 'static,
{
    let station = state.station.clone();
    let store = state.store.clone();

    blocking(move || {
        let mut station = station.lock();
        let before = station.devices();
        let outcome = edit(&mut *station)?;
        let devices = station.devices();

        if let Err(e) = store.save(&devices) {
            warn!(
                error = %e,
                path = %store.path().display(),
                "Device list not saved, edit rolled back"
            );
            if let Err(restore) = station.replace_devices(before) {
                error!(error = %restore, "Previous device list could not be restored");
            }
            return Err(ApiError::internal(format!(
                "Device list could not be saved, edit not applied: {}",
                e
            )));
        }

        Ok((outcome, devices))
    })
    .await
}

async fn list_devices(State(state): State<AppState>) -> Response {
    let devices = state.station.lock().devices();
    Json(devices).into_response()
}

async fn replace_devices(State(state): State<AppState>, Json(body): Json<DeviceList>) -> ApiResult {
    let ((), devices) =
        apply_edit(&state, move |station| station.replace_devices(body.devices)).await?;
    info!(devices = devices.len(), "Device list replaced");
    Ok(Json(devices).into_response())
}

async fn add_device(
    State(state): State<AppState>,
    Json(device): Json<DeviceDescriptor>,
) -> ApiResult {
    let added = device.clone();
    apply_edit(&state, move |station| station.add_device(added)).await?;
    info!(id = device.id, name = %device.name, "Device added");
    Ok((StatusCode::CREATED, Json(device)).into_response())
}

async fn remove_device(State(state): State<AppState>, Path(id): Path<u8>) -> ApiResult {
    let (removed, _) = apply_edit(&state, move |station| station.remove_device(id)).await?;
    info!(id, name = %removed.name, "Device removed");
    Ok(Json(removed).into_response())
}

async fn save_devices(State(state): State<AppState>) -> ApiResult {
    let station = state.station.clone();
    let store = state.store.clone();

    let saved = blocking(move || {
        let station = station.lock();
        let devices = station.devices();
        store.save(&devices)?;
        Ok(devices.len())
    })
    .await?;

    Ok(Json(json!({ "saved": saved })).into_response())
}

async fn reload_devices(State(state): State<AppState>) -> ApiResult {
    let station = state.station.clone();
    let store = state.store.clone();

    let devices = blocking(move || {
        let mut station = station.lock();
        let loaded = store.load(station.registry().capacity())?;
        station.replace_devices(loaded)?;
        Ok(station.devices())
    })
    .await?;

    info!(devices = devices.len(), "Device list reloaded");
    Ok(Json(devices).into_response())
}

/// Device list page with the add form.
async fn device_page(State(state): State<AppState>) -> Html<String> {
    let (devices, phase) = {
        let station = state.station.lock();
        (station.devices(), station.phase())
    };
    Html(render_device_page(&devices, phase))
}

/// Form post from the device page; fields `id`, `regStart`, `regCount`, `name`.
async fn add_device_form(
    State(state): State<AppState>,
    Form(device): Form<DeviceDescriptor>,
) -> ApiResult {
    let added = device.clone();
    apply_edit(&state, move |station| station.add_device(added)).await?;
    info!(id = device.id, name = %device.name, "Device added from form");
    Ok(Redirect::to("/").into_response())
}

fn render_device_page(devices: &[DeviceDescriptor], phase: Phase) -> String {
    let rows: String = devices
        .iter()
        .map(|device| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                device.id,
                device.register_start,
                device.register_count,
                escape_html(&device.name)
            )
        })
        .collect();

    let notice = if phase == Phase::Running {
        "<p>A batch is running; changes are refused until it finishes.</p>\n"
    } else {
        ""
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>fieldpoll devices</title></head>
<body>
<h1>Devices</h1>
{notice}<table>
<tr><th>ID</th><th>Register start</th><th>Register count</th><th>Name</th></tr>
{rows}</table>
<h2>Add device</h2>
<form action="/addSlave" method="post">
<label>ID <input type="number" name="id" min="1" max="247" required></label>
<label>Register start <input type="number" name="regStart" min="0" max="65535" required></label>
<label>Register count <input type="number" name="regCount" min="1" required></label>
<label>Name <input type="text" name="name" required></label>
<button type="submit">Add</button>
</form>
</body>
</html>
"#
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

async fn start_batch(State(state): State<AppState>) -> ApiResult {
    let total = state.station.lock().start_batch(Instant::now())?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "started": true, "devices": total }))).into_response())
}

async fn batch_status(State(state): State<AppState>) -> Response {
    let (phase, progress) = {
        let station = state.station.lock();
        (station.phase(), station.progress())
    };
    Json(json!({ "phase": phase, "progress": progress })).into_response()
}

async fn last_report(State(state): State<AppState>) -> Response {
    match state.station.lock().last_report().cloned() {
        Some(report) => Json(report).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No batch has concluded yet" })),
        )
            .into_response(),
    }
}

async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Management HTTP server.
pub struct HttpServer {
    station: SharedStation,
    store: Arc<RegistryStore>,
    listen_addr: SocketAddr,
}

impl HttpServer {
    pub fn new(station: SharedStation, store: Arc<RegistryStore>, listen_addr: SocketAddr) -> Self {
        Self {
            station,
            store,
            listen_addr,
        }
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let router = create_router(self.station, self.store);

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        info!(addr = %self.listen_addr, "HTTP server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
