//! The sandbox runtime server: the HTTP side of the contract the
//! [`SandboxClient`](crate::sandbox::SandboxClient) consumes. One binary
//! can therefore act as the remote runtime for another instance.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use codeact_core::action::{Action, ActionResult};
use codeact_core::config::CoreConfig;
use codeact_workspace::UserWorkspace;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;

use crate::context::RuntimeContext;
use crate::dispatcher::Dispatcher;
use crate::handler::ToolRegistry;

#[derive(Clone, Debug)]
pub struct SandboxServerConfig {
    pub port: u16,
    pub workspace_root: PathBuf,
    pub core: CoreConfig,
}

#[derive(Clone)]
struct AppState {
    registry: ToolRegistry,
    config: Arc<SandboxServerConfig>,
    started: Instant,
}

#[derive(Deserialize)]
struct ExecuteRequest {
    action: Action,
    uuid: String,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Serialize)]
struct ExecuteResponse {
    message: String,
    data: ActionResult,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
}

pub fn router(registry: ToolRegistry, config: SandboxServerConfig) -> Router {
    let state = AppState {
        registry,
        config: Arc::new(config),
        started: Instant::now(),
    };
    Router::new()
        .route("/execute_action", post(execute_action))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Bind and serve until the task is dropped.
pub async fn serve_sandbox(
    registry: ToolRegistry,
    config: SandboxServerConfig,
) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "sandbox runtime listening");
    let app = router(registry, config);
    axum::serve(listener, app).await
}

async fn execute_action(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> Json<ExecuteResponse> {
    let user_id = request.user_id.as_deref().unwrap_or("0");
    let prefix = conversation_prefix(&request.uuid);

    let workspace = UserWorkspace::new(state.config.workspace_root.clone(), user_id);
    let ctx = RuntimeContext::new(workspace, prefix).with_config(state.config.core.clone());
    let dispatcher = Dispatcher::new(state.registry.clone(), ctx, request.uuid.clone());

    let result = dispatcher.execute(&request.action).await;
    Json(ExecuteResponse {
        message: "ok".into(),
        data: result,
    })
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

/// The conversation directory token derived from a conversation uuid.
fn conversation_prefix(uuid: &str) -> String {
    let tail = uuid.strip_prefix("conv_").unwrap_or(uuid);
    tail.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect()
}
