//! §6.2 admin surface: thin repository-backed CRUD over providers/bindings/prompts,
//! grounded on teacher's `ai_config_service.py`/`prompt_config_service.py` admin
//! surfaces. Secrets are masked on every read (§4.1). Sits behind a placeholder
//! `require_admin` extractor — a real deployment supplies its own auth layer (§1).

use axum::extract::{Path, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use model_gateway::{Binding, ProviderKind, ProviderRecord};
use orchestrator_core::RoleKey;
use serde::{Deserialize, Serialize};

use crate::repository::PromptVersion;
use crate::{ApiResponse, AppError, AppState};

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/api/admin/providers", get(list_providers).put(upsert_provider))
        .route("/api/admin/bindings", get(list_bindings).put(upsert_binding))
        .route("/api/admin/prompts/:role", get(active_prompt).put(write_prompt))
}

/// No-op placeholder (§6.2): a real deployment replaces this with its own auth
/// middleware layered in front of these routes.
fn require_admin() {}

#[derive(Debug, Serialize)]
pub struct ProviderView {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    pub masked_api_key: Option<String>,
    pub enabled_models: Vec<String>,
    pub priority: u32,
    pub enabled: bool,
}

async fn list_providers(State(state): State<AppState>) -> Json<ApiResponse<Vec<ProviderView>>> {
    require_admin();
    let providers = state.gateway.list_providers().await;
    let views = providers
        .into_iter()
        .map(|p| ProviderView {
            masked_api_key: p.masked_api_key(&state.encryption_key),
            id: p.id,
            kind: p.kind,
            base_url: p.base_url,
            enabled_models: p.enabled_models,
            priority: p.priority,
            enabled: p.enabled,
        })
        .collect();
    Json(ApiResponse::success(views))
}

#[derive(Debug, Deserialize)]
pub struct UpsertProviderBody {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    pub api_key: Option<String>,
    pub enabled_models: Vec<String>,
    pub priority: u32,
    pub enabled: bool,
}

async fn upsert_provider(
    State(state): State<AppState>,
    Json(body): Json<UpsertProviderBody>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    require_admin();
    let api_key_encrypted = body
        .api_key
        .as_deref()
        .map(|plain| model_gateway::encrypt_secret(plain, &state.encryption_key));

    state
        .gateway
        .upsert_provider(ProviderRecord {
            id: body.id,
            kind: body.kind,
            base_url: body.base_url,
            api_key_encrypted,
            enabled_models: body.enabled_models,
            priority: body.priority,
            enabled: body.enabled,
        })
        .await;

    Ok(Json(ApiResponse::success(())))
}

#[derive(Debug, Serialize)]
pub struct BindingView {
    pub role: RoleKey,
    pub provider_id: String,
    pub model_name: String,
}

async fn list_bindings(State(state): State<AppState>) -> Json<ApiResponse<Vec<BindingView>>> {
    require_admin();
    let bindings = state.gateway.list_bindings().await;
    let views = bindings
        .into_iter()
        .map(|(role, binding)| BindingView { role, provider_id: binding.provider_id, model_name: binding.model_name })
        .collect();
    Json(ApiResponse::success(views))
}

#[derive(Debug, Deserialize)]
pub struct UpsertBindingBody {
    pub role: RoleKey,
    pub provider_id: String,
    pub model_name: String,
}

async fn upsert_binding(
    State(state): State<AppState>,
    Json(body): Json<UpsertBindingBody>,
) -> Json<ApiResponse<()>> {
    require_admin();
    state
        .gateway
        .bind(body.role, Binding { provider_id: body.provider_id, model_name: body.model_name })
        .await;
    Json(ApiResponse::success(()))
}

async fn active_prompt(
    State(state): State<AppState>,
    Path(role): Path<String>,
) -> Result<Json<ApiResponse<Option<PromptVersion>>>, AppError> {
    require_admin();
    let version = state.prompts.active_version(&role).await?;
    Ok(Json(ApiResponse::success(version)))
}

#[derive(Debug, Deserialize)]
pub struct WritePromptBody {
    pub body: String,
}

async fn write_prompt(
    State(state): State<AppState>,
    Path(role): Path<String>,
    Json(body): Json<WritePromptBody>,
) -> Result<Json<ApiResponse<PromptVersion>>, AppError> {
    require_admin();
    let version = state.prompts.write_version(&role, &body.body).await?;
    Ok(Json(ApiResponse::success(version)))
}
