//! HTTP API over the instance registry.
//!
//! Every route is a `GET` with query parameters. Successful calls answer
//! `{"result": ...}`, failures answer `{"error": "..."}` with the status owned
//! by the `DaemonError` variant. `POST /mcp` exposes the same routes as MCP
//! tools.

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use log::{error, info, warn};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::task;

use crate::config::ServerConfig;
use crate::error::DaemonError;
use crate::instance::DecompilerInstance;
use crate::manifest::ComponentKind;
use crate::mcp;
use crate::registry::InstanceRegistry;
use crate::signature;
use crate::version;

type Params = Query<HashMap<String, String>>;
pub(crate) type ApiResult = std::result::Result<Json<Value>, DaemonError>;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<InstanceRegistry>,
    pub base_url: String,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            registry: Arc::new(InstanceRegistry::new(config.max_instances)),
            base_url: config.base_url(),
        }
    }
}

impl IntoResponse for DaemonError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{self}");
        } else {
            warn!("{self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/version", get(handle_version))
        .route("/instances", get(handle_instances))
        .route("/load", get(handle_load))
        .route("/load_dir", get(handle_load_dir))
        .route("/unload", get(handle_unload))
        .route("/unload_all", get(handle_unload_all))
        .route("/get_manifest", get(handle_manifest))
        .route("/get_all_exported_activities", get(handle_exported_activities))
        .route("/get_all_exported_services", get(handle_exported_services))
        .route("/get_all_exported_receivers", get(handle_exported_receivers))
        .route("/get_all_exported_providers", get(handle_exported_providers))
        .route("/get_method_decompiled_code", get(handle_method_code))
        .route("/get_class_decompiled_code", get(handle_class_code))
        .route("/get_class_smali_code", get(handle_class_smali))
        .route("/get_superclass", get(handle_superclass))
        .route("/get_interfaces", get(handle_interfaces))
        .route("/get_class_methods", get(handle_class_methods))
        .route("/get_class_fields", get(handle_class_fields))
        .route("/get_method_callers", get(handle_method_callers))
        .route("/get_class_callers", get(handle_class_callers))
        .route("/get_method_overrides", get(handle_method_overrides))
        .route("/update_max_instance_count", get(handle_update_max))
        .route("/mcp", post(mcp::handle_mcp))
        .with_state(state)
}

/// Runs the handler behind `/{route}` with `params` as its query string.
/// `None` when no such route exists.
pub(crate) async fn dispatch(state: AppState, route: &str, params: HashMap<String, String>) -> Option<ApiResult> {
    let (state, query) = (State(state), Query(params));
    let result = match route {
        "health" => handle_health(state).await,
        "version" => handle_version().await,
        "instances" => handle_instances(state).await,
        "load" => handle_load(state, query).await,
        "load_dir" => handle_load_dir(state, query).await,
        "unload" => handle_unload(state, query).await,
        "unload_all" => handle_unload_all(state).await,
        "get_manifest" => handle_manifest(state, query).await,
        "get_all_exported_activities" => handle_exported_activities(state, query).await,
        "get_all_exported_services" => handle_exported_services(state, query).await,
        "get_all_exported_receivers" => handle_exported_receivers(state, query).await,
        "get_all_exported_providers" => handle_exported_providers(state, query).await,
        "get_method_decompiled_code" => handle_method_code(state, query).await,
        "get_class_decompiled_code" => handle_class_code(state, query).await,
        "get_class_smali_code" => handle_class_smali(state, query).await,
        "get_superclass" => handle_superclass(state, query).await,
        "get_interfaces" => handle_interfaces(state, query).await,
        "get_class_methods" => handle_class_methods(state, query).await,
        "get_class_fields" => handle_class_fields(state, query).await,
        "get_method_callers" => handle_method_callers(state, query).await,
        "get_class_callers" => handle_class_callers(state, query).await,
        "get_method_overrides" => handle_method_overrides(state, query).await,
        "update_max_instance_count" => handle_update_max(state, query).await,
        _ => return None,
    };
    Some(result)
}

/// Binds, serves until Ctrl+C, then drains in-flight requests.
pub async fn serve(config: ServerConfig) -> Result<()> {
    let bind = config.bind_addr();
    let state = AppState::new(&config);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind HTTP server to {bind}"))?;
    let addr = listener.local_addr().context("resolve bound address")?;
    info!(
        "dex-daemon {} listening on http://{addr} (max instances: {})",
        version::build_version(),
        config.max_instances
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {err}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

fn ok<T: Serialize>(value: T) -> ApiResult {
    Ok(Json(json!({ "result": value })))
}

fn require<'a>(params: &'a HashMap<String, String>, name: &'static str) -> std::result::Result<&'a str, DaemonError> {
    params
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or(DaemonError::MissingParameter(name))
}

async fn blocking<T, F>(f: F) -> std::result::Result<T, DaemonError>
where
    F: FnOnce() -> std::result::Result<T, DaemonError> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|err| DaemonError::Task(err.to_string()))?
}

/// Looks up `instanceId` and runs `f` against it on the blocking pool.
async fn with_instance<T, F>(state: &AppState, params: &HashMap<String, String>, f: F) -> ApiResult
where
    F: FnOnce(&DecompilerInstance) -> std::result::Result<T, DaemonError> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let id = require(params, "instanceId")?;
    let instance = state.registry.get(id)?;
    let value = blocking(move || f(&instance)).await?;
    ok(value)
}

/// Class name and Java display form of a JVM method signature.
fn method_target(raw: &str) -> std::result::Result<(String, String), DaemonError> {
    let class = signature::extract_class_fqn(raw)?;
    let method = signature::to_java_method_signature(raw)?;
    Ok((class, method))
}

async fn handle_health(State(state): State<AppState>) -> ApiResult {
    ok(state.base_url)
}

async fn handle_version() -> ApiResult {
    ok(version::build_version())
}

async fn handle_instances(State(state): State<AppState>) -> ApiResult {
    ok(state.registry.summaries())
}

async fn load(state: AppState, params: HashMap<String, String>, path_param: &'static str, dir: bool) -> ApiResult {
    let id = require(&params, "instanceId")?.to_string();
    let path = require(&params, path_param)?.to_string();
    let registry = state.registry.clone();
    let loaded_id = id.clone();
    blocking(move || {
        let target = PathBuf::from(&path);
        registry.load_with(&loaded_id, &path, || {
            if dir {
                DecompilerInstance::load_dir(&target)
            } else {
                DecompilerInstance::load(&target)
            }
        })
    })
    .await?;
    ok(id)
}

async fn handle_load(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    load(state, params, "filePath", false).await
}

async fn handle_load_dir(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    load(state, params, "dirPath", true).await
}

async fn handle_unload(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    let id = require(&params, "instanceId")?;
    state.registry.unload(id)?;
    ok(id)
}

async fn handle_unload_all(State(state): State<AppState>) -> ApiResult {
    ok(state.registry.unload_all())
}

async fn handle_update_max(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    let count = match params.get("count").map(|v| v.trim()) {
        None | Some("") => 1,
        Some(raw) => raw.parse::<i64>().map_err(|_| DaemonError::InvalidCount)?,
    };
    if count <= 0 {
        return Err(DaemonError::InvalidCount);
    }
    let count = usize::try_from(count).map_err(|_| DaemonError::InvalidCount)?;
    ok(state.registry.set_max(count)?)
}

async fn handle_manifest(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    with_instance(&state, &params, |inst| {
        inst.manifest()
            .map(str::to_string)
            .ok_or(DaemonError::ManifestNotFound)
    })
    .await
}

async fn exported(state: AppState, params: HashMap<String, String>, kind: ComponentKind) -> ApiResult {
    with_instance(&state, &params, move |inst| {
        inst.exported_components(kind)
            .ok_or(DaemonError::ManifestNotFound)
    })
    .await
}

async fn handle_exported_activities(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    exported(state, params, ComponentKind::Activity).await
}

async fn handle_exported_services(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    exported(state, params, ComponentKind::Service).await
}

async fn handle_exported_receivers(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    exported(state, params, ComponentKind::Receiver).await
}

async fn handle_exported_providers(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    exported(state, params, ComponentKind::Provider).await
}

async fn handle_method_code(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    let raw = require(&params, "methodName")?.to_string();
    let (class, method) = method_target(&raw)?;
    with_instance(&state, &params, move |inst| {
        inst.method_code(&class, &method)
            .ok_or(DaemonError::MethodNotFound(raw))
    })
    .await
}

/// Shared shape of the `className` queries.
async fn class_query<T, F>(state: AppState, params: HashMap<String, String>, f: F) -> ApiResult
where
    F: FnOnce(&DecompilerInstance, &str) -> Option<T> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let raw = require(&params, "className")?.to_string();
    let class = signature::to_java_class_signature(&raw)?;
    with_instance(&state, &params, move |inst| {
        f(inst, &class).ok_or(DaemonError::ClassNotFound(raw))
    })
    .await
}

async fn handle_class_code(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    class_query(state, params, |inst, class| inst.class_code(class)).await
}

async fn handle_class_smali(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    class_query(state, params, |inst, class| inst.class_smali(class)).await
}

async fn handle_superclass(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    class_query(state, params, |inst, class| inst.super_class(class)).await
}

async fn handle_interfaces(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    class_query(state, params, |inst, class| inst.interfaces(class)).await
}

async fn handle_class_methods(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    class_query(state, params, |inst, class| inst.class_methods(class)).await
}

async fn handle_class_fields(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    class_query(state, params, |inst, class| inst.class_fields(class)).await
}

async fn handle_method_callers(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    let raw = require(&params, "methodName")?.to_string();
    let (class, method) = method_target(&raw)?;
    with_instance(&state, &params, move |inst| {
        inst.method_callers(&class, &method)
            .ok_or(DaemonError::MethodCallersNotFound(raw))
    })
    .await
}

async fn handle_class_callers(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    let raw = require(&params, "className")?.to_string();
    let class = signature::to_java_class_signature(&raw)?;
    with_instance(&state, &params, move |inst| {
        inst.class_callers(&class)
            .ok_or(DaemonError::ClassCallersNotFound(raw))
    })
    .await
}

async fn handle_method_overrides(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    let raw = require(&params, "methodName")?.to_string();
    let (class, method) = method_target(&raw)?;
    with_instance(&state, &params, move |inst| {
        inst.method_overrides(&class, &method)
            .ok_or(DaemonError::OverridesNotFound(raw))
    })
    .await
}
