//! Request/response HTTP surface (§6): one Axum route per hook kind plus
//! administrative GET routes, in the `State(engine): State<Arc<...>>` /
//! `Json(request)` handler shape of `knhk-workflow-engine::api::rest::handlers`.

use crate::http_worker::{HttpWorkerHandle, WorkerRegistrationSpec};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{delete, get, post};
use axum::Router;
use hookbridge_protocol::{HookEvent, HookKind, WorkerDef};
use hookbridge_security::Principal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/mcp-status", get(mcp_status))
        .route("/recommendations", get(recommendations))
        .route("/pre-tool", post(pre_tool))
        .route("/post-tool", post(post_tool))
        .route("/notification-metrics", post(notification_metrics))
        .route("/session-stop", post(session_stop))
        .route("/subagent-completed", post(subagent_completed))
        .route("/pre-compaction", post(pre_compaction))
        .route("/admin/workers", post(register_worker))
        .route("/admin/workers/:name", delete(unregister_worker))
        .route("/admin/cache/invalidate", post(invalidate_cache))
        .route("/admin/circuit-breaker/:worker/reset", post(reset_circuit_breaker))
        .route("/ws", get(crate::ws::upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Principal, axum::response::Response> {
    state.security.authenticate(bearer(headers)).map_err(|e| {
        (StatusCode::UNAUTHORIZED, Json(json!({"success": false, "kind": "Unauthenticated", "message": e.to_string()}))).into_response()
    })
}

fn authorize(state: &AppState, principal: &Principal, operation: &str) -> Result<(), axum::response::Response> {
    if state.security.authorize(principal, operation, None) {
        Ok(())
    } else {
        Err((
            StatusCode::FORBIDDEN,
            Json(json!({"success": false, "kind": "Unauthorized", "message": format!("missing permission for {operation}")})),
        )
            .into_response())
    }
}

/// `GET /health` — cacheable 30s by callers; reports listener address,
/// uptime, active connection count, and a performance snapshot.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "bindAddr": state.bind_addr,
        "uptimeSecs": state.uptime_secs(),
        "activeConnections": state.connection_count(),
        "performance": state.metrics.overall(),
    }))
}

/// `GET /metrics` — Prometheus text exposition backed by the Performance
/// Tracker's counters.
async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let overall = state.metrics.overall();
    let body = format!(
        "# HELP hookbridge_avg_exec_ms Average dispatch latency in milliseconds.\n\
         # TYPE hookbridge_avg_exec_ms gauge\n\
         hookbridge_avg_exec_ms {}\n\
         # HELP hookbridge_rps Requests per second since start.\n\
         # TYPE hookbridge_rps gauge\n\
         hookbridge_rps {}\n\
         # HELP hookbridge_error_rate Fraction of dispatches that errored.\n\
         # TYPE hookbridge_error_rate gauge\n\
         hookbridge_error_rate {}\n\
         # HELP hookbridge_optimization_factor Effective throughput multiplier from cache/single-flight savings.\n\
         # TYPE hookbridge_optimization_factor gauge\n\
         hookbridge_optimization_factor {}\n\
         # HELP hookbridge_cache_hit_rate Fraction of cacheable dispatches served from cache.\n\
         # TYPE hookbridge_cache_hit_rate gauge\n\
         hookbridge_cache_hit_rate {}\n",
        overall.avg_exec_ms, overall.rps, overall.error_rate, overall.optimization_factor, overall.cache_hit_rate,
    );
    ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

/// `GET /mcp-status` — administrative snapshot of the Worker Registry.
async fn mcp_status(State(state): State<AppState>) -> impl IntoResponse {
    let mut workers = Vec::new();
    for name in state.registry.names() {
        let state_snapshot = state.registry.state(&name).await;
        workers.push(json!({"name": name, "state": state_snapshot}));
    }
    Json(json!({"workers": workers}))
}

/// `GET /recommendations` — placeholder administrative inspection
/// endpoint for future Plan/cache recommendation surfaces; today reports
/// the live performance snapshot that would inform one.
async fn recommendations(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({"performance": state.metrics.overall(), "recommendations": []}))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreToolRequest {
    tool_name: String,
    #[serde(default)]
    tool_args: Value,
    session_id: String,
    #[serde(default)]
    execution_id: String,
    #[serde(default)]
    persona: Option<String>,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    environment: Value,
}

/// `POST /pre-tool`. Fails open with `{allow:true, error, fallback:true}`
/// so a dispatch failure never blocks the calling agent.
async fn pre_tool(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<PreToolRequest>) -> axum::response::Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize(&state, &principal, "pre_tool") {
        return resp;
    }

    let worker = match req.persona.clone().filter(|p| state.registry.contains(p)) {
        Some(name) => Some(name),
        None => state.registry.find_by_capability(HookKind::PreTool.as_str()).await,
    };
    let Some(worker) = worker else {
        return Json(json!({
            "allow": true,
            "modifiedArgs": req.tool_args,
            "metadata": {},
            "error": "no worker available",
            "fallback": true,
            "bridgeResponse": true,
        }))
        .into_response();
    };

    let mut event = HookEvent::new(HookKind::PreTool, req.session_id, req.tool_name);
    event.args = json!({
        "toolArgs": req.tool_args,
        "executionId": req.execution_id,
        "flags": req.flags,
        "environment": req.environment,
    });
    let response = state.dispatcher.dispatch(&worker, &event).await;

    if response.success {
        let result = response.result.unwrap_or(Value::Null);
        Json(json!({
            "allow": result.get("allow").and_then(Value::as_bool).unwrap_or(true),
            "modifiedArgs": result.get("modifiedArgs").cloned().unwrap_or(req.tool_args),
            "metadata": result.get("metadata").cloned().unwrap_or(json!({})),
            "performance": response.performance,
            "bridgeResponse": true,
        }))
        .into_response()
    } else {
        Json(json!({
            "allow": true,
            "error": response.error.map(|e| e.message).unwrap_or_default(),
            "fallback": true,
            "bridgeResponse": true,
        }))
        .into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostToolRequest {
    tool_name: String,
    session_id: String,
    #[serde(default)]
    tool_result: Value,
    #[serde(default)]
    tool_error: Option<String>,
}

/// `POST /post-tool`. Fail path: `{processed:false, error}`.
async fn post_tool(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<PostToolRequest>) -> axum::response::Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize(&state, &principal, "post_tool") {
        return resp;
    }

    let Some(worker) = state.registry.find_by_capability(HookKind::PostTool.as_str()).await else {
        return Json(json!({"processed": false, "error": "no worker available"})).into_response();
    };

    let mut event = HookEvent::new(HookKind::PostTool, req.session_id, req.tool_name);
    event.result = Some(req.tool_result);
    event.error = req.tool_error;
    let response = state.dispatcher.dispatch(&worker, &event).await;

    if response.success {
        let result = response.result.unwrap_or(Value::Null);
        Json(json!({
            "processed": true,
            "performance": response.performance,
            "triggerValidation": result.get("triggerValidation").cloned().unwrap_or(Value::Bool(false)),
            "validationRules": result.get("validationRules").cloned().unwrap_or(json!([])),
            "contextUpdates": result.get("contextUpdates").cloned().unwrap_or(json!({})),
        }))
        .into_response()
    } else {
        Json(json!({"processed": false, "error": response.error.map(|e| e.message).unwrap_or_default()})).into_response()
    }
}

async fn notification_metrics(State(_state): State<AppState>) -> impl IntoResponse {
    Json(json!({"received": true, "processed": true, "timestamp": chrono::Utc::now()}))
}

async fn ack_endpoint(state: &AppState, headers: &HeaderMap, kind: HookKind, session_id: &str) -> axum::response::Response {
    let principal = match authenticate(state, headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    if authorize(state, &principal, kind.as_str()).is_err() {
        return Json(json!({"acknowledged": true, "fallback": true})).into_response();
    }
    let Some(worker) = state.registry.find_by_capability(kind.as_str()).await else {
        return Json(json!({"acknowledged": true, "fallback": true})).into_response();
    };
    let event = HookEvent::new(kind, session_id, kind.as_str());
    let response = state.dispatcher.dispatch(&worker, &event).await;
    if response.success {
        Json(json!({"acknowledged": true})).into_response()
    } else {
        Json(json!({
            "acknowledged": true,
            "error": response.error.map(|e| e.message).unwrap_or_default(),
            "fallback": true,
        }))
        .into_response()
    }
}

#[derive(Debug, Deserialize)]
struct SessionIdOnly {
    #[serde(rename = "sessionId", default)]
    session_id: String,
}

async fn session_stop(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<SessionIdOnly>) -> axum::response::Response {
    ack_endpoint(&state, &headers, HookKind::SessionStop, &req.session_id).await
}

async fn subagent_completed(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<SessionIdOnly>) -> axum::response::Response {
    ack_endpoint(&state, &headers, HookKind::SubagentStop, &req.session_id).await
}

async fn pre_compaction(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<SessionIdOnly>) -> axum::response::Response {
    ack_endpoint(&state, &headers, HookKind::PreCompact, &req.session_id).await
}

/// `POST /admin/workers` — backs the `register-worker <spec>` CLI verb.
async fn register_worker(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(spec): Json<WorkerRegistrationSpec>,
) -> axum::response::Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize(&state, &principal, "admin:register_worker") {
        return resp;
    }

    let def = WorkerDef {
        name: spec.name.clone(),
        kind: spec.kind,
        version: spec.version,
        capabilities: spec.capabilities,
        dependencies: spec.dependencies,
        probe_interval_ms: spec.probe_interval_ms,
        failover_policy: spec.failover_policy,
        fallback_worker: spec.fallback_worker,
        failure_threshold: spec.failure_threshold,
        budget: spec.budget,
    };
    let handle = Arc::new(HttpWorkerHandle::new(spec.invoke_url, spec.probe_url));
    match state.registry.register(def, handle).await {
        Ok(()) => Json(json!({"registered": spec.name})).into_response(),
        Err(e) => (StatusCode::CONFLICT, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

/// `DELETE /admin/workers/:name` — backs `unregister-worker <name>`.
async fn unregister_worker(State(state): State<AppState>, headers: HeaderMap, Path(name): Path<String>) -> axum::response::Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize(&state, &principal, "admin:unregister_worker") {
        return resp;
    }
    let removed = state.registry.unregister(&name);
    if removed {
        Json(json!({"unregistered": name})).into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(json!({"error": format!("no such worker: {name}")}))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct InvalidateCacheRequest {
    pattern: String,
}

/// `POST /admin/cache/invalidate` — backs `invalidate-cache <pattern>`.
async fn invalidate_cache(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<InvalidateCacheRequest>,
) -> axum::response::Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize(&state, &principal, "admin:invalidate_cache") {
        return resp;
    }
    let evicted = state.dispatcher.invalidate_cache(&req.pattern);
    Json(json!({"evicted": evicted})).into_response()
}

/// `POST /admin/circuit-breaker/:worker/reset` — backs `circuit-reset <worker>`.
async fn reset_circuit_breaker(State(state): State<AppState>, headers: HeaderMap, Path(worker): Path<String>) -> axum::response::Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize(&state, &principal, "admin:circuit_reset") {
        return resp;
    }
    state.dispatcher.reset_breaker(&worker);
    Json(json!({"reset": worker})).into_response()
}
