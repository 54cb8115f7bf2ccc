//! HTTP tool server for out-of-process voice hosts.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/tools/list` | List tools with parameter schemas |
//! | `POST` | `/tools/{name}` | Call a tool; body is the JSON parameter object |
//! | `GET`  | `/health` | Version and knowledge-base state |
//!
//! # Response Contract
//!
//! Tool calls always answer `200 OK` with `{ "result": "<text>" }`. Unknown
//! tools, malformed bodies and tool failures are reported in-band, in the
//! same text the agent would speak.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! voice clients.

use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::engine::{EngineState, KnowledgeEngine};
use crate::error::ToolError;
use crate::gateway::ToolGateway;
use crate::traits::ToolInfo;

#[derive(Clone)]
struct AppState {
    gateway: ToolGateway,
    engine: Arc<KnowledgeEngine>,
}

pub fn router(gateway: ToolGateway, engine: Arc<KnowledgeEngine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { gateway, engine })
}

/// Bind `server.bind` and serve until the process is stopped.
pub async fn run_server(
    config: &Config,
    gateway: ToolGateway,
    engine: Arc<KnowledgeEngine>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&config.server.bind).await?;
    serve(listener, gateway, engine).await
}

pub async fn serve(
    listener: TcpListener,
    gateway: ToolGateway,
    engine: Arc<KnowledgeEngine>,
) -> anyhow::Result<()> {
    for tool in gateway.definitions() {
        tracing::info!(route = %format!("POST /tools/{}", tool.name), "registered tool");
    }
    tracing::info!(addr = %listener.local_addr()?, "tool server listening");

    axum::serve(listener, router(gateway, engine)).await?;
    Ok(())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    knowledge: EngineState,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        knowledge: state.engine.state(),
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state.gateway.definitions(),
    })
}

// ============ POST /tools/{name} ============

#[derive(Serialize)]
struct ToolCallResponse {
    result: String,
}

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Json<ToolCallResponse> {
    let params = if body.iter().all(u8::is_ascii_whitespace) {
        Ok(serde_json::Value::Null)
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ToolError::InvalidParams(format!("request body is not JSON ({})", e)))
    };

    let result = match params {
        Ok(params) => state.gateway.invoke(&name, params).await,
        Err(e) => {
            tracing::warn!(tool = %name, error = %e, "rejected tool call");
            state.gateway.fallback(&name, &serde_json::Value::Null, &e)
        }
    };

    Json(ToolCallResponse { result })
}
