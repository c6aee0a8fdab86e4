use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;

use super::AppState;
use super::error::ApiError;
use super::protocol::{
    DeleteFileResponse, HealthResponse, IngestResponse, LoginResponse, MessageResponse,
    QueryRequest, QueryResponse, StatusResponse,
};
use crate::error::SessionError;
use crate::services::{Session, TenantStatus};

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(SessionError::MissingCredentials)?;

    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .unwrap_or_default();
    if token.is_empty() {
        return Err(SessionError::MissingCredentials.into());
    }
    Ok(token)
}

async fn admin_session(state: &AppState, headers: &HeaderMap) -> Result<Arc<Session>, ApiError> {
    let session = state.sessions.current(bearer_token(headers)?).await?;
    session.require_admin()?;
    Ok(session)
}

/// Rebuild the chains of every session on the tenant after its index changed.
async fn refresh_sessions(state: &AppState, tenant: &str) {
    let refreshed = state.sessions.refresh_tenant(tenant).await;
    tracing::debug!(tenant, refreshed, "sessions refreshed after index change");
}

pub async fn login(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<LoginResponse> {
    let session = state.sessions.resolve(bearer_token(&headers)?).await?;
    Ok(Json(LoginResponse {
        message: "logged in successfully".to_string(),
        session_id: session.session_id.clone(),
        tenant: session.tenant_id().to_string(),
        admin: session.is_admin(),
    }))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<MessageResponse> {
    state.sessions.logout(bearer_token(&headers)?).await;
    Ok(Json(MessageResponse::new("logged out successfully")))
}

pub async fn query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> ApiResult<QueryResponse> {
    let session = state.sessions.current(bearer_token(&headers)?).await?;

    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if request.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }

    let handle = state
        .scheduler
        .enqueue(request.query, Arc::clone(&session.chain))?;
    tracing::debug!(task_id = handle.task_id(), tenant = session.tenant_id(), "query queued");
    let completed = handle.wait().await?;

    Ok(Json(QueryResponse::new(completed.task_id, completed.result)))
}

pub async fn get_vectorstore(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<TenantStatus> {
    let session = admin_session(&state, &headers).await?;
    Ok(Json(state.tenants.status(session.tenant_id()).await?))
}

pub async fn add_to_vectorstore(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<IngestResponse> {
    let session = admin_session(&state, &headers).await?;
    let tenant = session.tenant_id();

    let summary = state.tenants.ingest(tenant).await?;
    if summary.added_chunks > 0 {
        refresh_sessions(&state, tenant).await;
    }

    Ok(Json(IngestResponse {
        message: format!("added files to collection {} successfully", tenant),
        added: summary.added_chunks,
        files_loaded: summary.files_loaded,
        failures: summary.failures.iter().map(|f| f.to_string()).collect(),
    }))
}

pub async fn delete_vectorstore(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<MessageResponse> {
    let session = admin_session(&state, &headers).await?;
    let tenant = session.tenant_id();

    if !state.tenants.delete_collection(tenant).await? {
        return Ok(Json(MessageResponse::new(format!(
            "collection {} does not exist",
            tenant
        ))));
    }
    refresh_sessions(&state, tenant).await;

    Ok(Json(MessageResponse::new(format!(
        "deleted collection {} successfully",
        tenant
    ))))
}

pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(file): Path<String>,
) -> ApiResult<DeleteFileResponse> {
    let session = admin_session(&state, &headers).await?;
    let tenant = session.tenant_id();

    let source = state.tenants.file_source_path(tenant, &file)?;
    let removed = state.tenants.delete_file(tenant, &source).await?;
    if removed > 0 {
        refresh_sessions(&state, tenant).await;
    }

    Ok(Json(DeleteFileResponse {
        message: format!(
            "deleted file {} from collection {} successfully",
            file, tenant
        ),
        removed,
    }))
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let vector_store = match state.tenants.backend().health_check().await {
        Ok(healthy) => healthy,
        Err(e) => {
            tracing::warn!(error = %e, "vector store health check failed");
            false
        }
    };

    Json(HealthResponse {
        status: if vector_store { "ok" } else { "degraded" }.to_string(),
        vector_store,
    })
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let metrics = match &state.metrics {
        Some(store) => {
            let store = Arc::clone(store);
            let retention_days = state.retention_days;
            tokio::task::spawn_blocking(move || store.get_summary(retention_days))
                .await
                .ok()
        }
        None => None,
    };

    Json(StatusResponse {
        running: state.scheduler.is_running(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        queue_depth: state.scheduler.pending(),
        active_sessions: state.sessions.active_sessions(),
        vector_driver: state.tenants.backend().driver(),
        metrics,
    })
}
